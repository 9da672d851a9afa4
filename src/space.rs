/*!
 * Shared Tuple Space
 *
 * This module implements request execution. A `Space` owns the tuple
 * storage together with its statistics behind ONE mutex, and every request
 * from every connection runs to completion while holding it.
 *
 * That mutex is the server's serialization point and an intentional
 * bottleneck: it gives all operations a single total order, and it keeps
 * counters and size totals in step with the tuples they describe.
 */

use crate::protocol::{Outcome, Reason, Request, Response};
use crate::stats::{OpKind, Stats, StatsSnapshot};
use crate::storage::TupleSpace;
use parking_lot::Mutex;

#[derive(Default)]
struct State {
    tuples: TupleSpace,
    stats: Stats,
}

/// The process-wide tuple space, shared by all connections
#[derive(Default)]
pub struct Space {
    state: Mutex<State>,
}

impl Space {
    /// An empty space with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Execute one request and build its response.
    ///
    /// The store mutation and the counter update happen in the same
    /// critical section. Only application errors come back from here; they
    /// are ordinary `ERR` responses.
    pub fn exec(&self, req: Request) -> Response {
        let mut guard = self.state.lock();
        let State { tuples, stats } = &mut *guard;

        let (kind, resp) = match req {
            Request::Put { key, value } => {
                let resp = match tuples.put(&key, &value) {
                    Ok(_) => Response::ok(key, value, Outcome::Added),
                    Err(_) => Response::err(key, Reason::AlreadyExists),
                };
                (OpKind::Put, resp)
            }
            Request::Read { key } => {
                let resp = match tuples.read(&key) {
                    Ok(value) => Response::ok(key.as_str(), value, Outcome::Read),
                    Err(_) => Response::err(key, Reason::DoesNotExist),
                };
                (OpKind::Read, resp)
            }
            Request::Get { key } => {
                let resp = match tuples.get(&key) {
                    Ok(value) => Response::ok(key, value, Outcome::Removed),
                    Err(_) => Response::err(key, Reason::DoesNotExist),
                };
                (OpKind::Get, resp)
            }
            Request::Unknown { key, .. } => {
                (OpKind::Invalid, Response::err(key, Reason::InvalidCommand))
            }
        };

        stats.record(kind, !resp.is_ok());
        resp
    }

    /// Count a newly accepted client connection
    pub fn client_connected(&self) {
        self.state.lock().stats.client_connected();
    }

    /// Copy the counters and size totals out under the lock
    pub fn snapshot(&self) -> StatsSnapshot {
        let guard = self.state.lock();
        StatsSnapshot::new(
            &guard.stats,
            guard.tuples.len(),
            guard.tuples.key_bytes(),
            guard.tuples.value_bytes(),
        )
    }

    /// Number of stored tuples
    pub fn len(&self) -> usize {
        self.state.lock().tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
