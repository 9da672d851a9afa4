/*!
 * In-Memory Tuple Storage
 *
 * This module provides the tuple space itself: a hash map from key to value
 * that also tracks the byte size of everything it holds. It performs no
 * locking of its own; callers go through `space::Space`, which owns the only
 * instance behind the process-wide lock.
 */

use std::collections::HashMap;
use std::hash::BuildHasherDefault;

// AHash instead of SipHash: keys come from trusted framing and lookups are
// on the request path under the global lock
type AHash = BuildHasherDefault<ahash::AHasher>;

/// Failure of a tuple space operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// `put` on a key that is already present
    AlreadyExists,
    /// `read`/`get` on a key that is absent
    NotFound,
}

/// Successful `put`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Added,
}

/// The keyed tuple collection with running size totals.
///
/// `key_bytes` and `value_bytes` always equal the sums over the entries
/// currently stored.
#[derive(Default)]
pub struct TupleSpace {
    inner: HashMap<String, String, AHash>,
    key_bytes: usize,
    value_bytes: usize,
}

impl TupleSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tuple
    ///
    /// # Returns
    /// * `Ok(PutOutcome::Added)` if the key was free
    /// * `Err(StoreError::AlreadyExists)` otherwise; the stored value is kept
    pub fn put(&mut self, key: &str, value: &str) -> Result<PutOutcome, StoreError> {
        if self.inner.contains_key(key) {
            return Err(StoreError::AlreadyExists);
        }
        self.key_bytes += key.len();
        self.value_bytes += value.len();
        self.inner.insert(key.to_string(), value.to_string());
        Ok(PutOutcome::Added)
    }

    /// Look a tuple up without removing it
    #[inline]
    pub fn read(&self, key: &str) -> Result<&str, StoreError> {
        self.inner
            .get(key)
            .map(String::as_str)
            .ok_or(StoreError::NotFound)
    }

    /// Remove a tuple and hand its value back
    pub fn get(&mut self, key: &str) -> Result<String, StoreError> {
        let value = self.inner.remove(key).ok_or(StoreError::NotFound)?;
        self.key_bytes -= key.len();
        self.value_bytes -= value.len();
        Ok(value)
    }

    /// Number of stored tuples
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Sum of the key lengths of all stored tuples
    #[inline]
    pub fn key_bytes(&self) -> usize {
        self.key_bytes
    }

    /// Sum of the value lengths of all stored tuples
    #[inline]
    pub fn value_bytes(&self) -> usize {
        self.value_bytes
    }
}
