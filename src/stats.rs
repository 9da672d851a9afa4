/*!
 * Operation Statistics
 *
 * Counters describing the traffic a tuple space has served, plus the
 * background thread that logs a snapshot of them on a fixed period.
 */

use crate::space::Space;
use crossbeam::channel::{bounded, tick, Sender};
use crossbeam::select;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Operation kinds tracked by [`Stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Put,
    Read,
    Get,
    /// A request with an unrecognised command
    Invalid,
}

/// Monotonic traffic counters.
///
/// Only ever touched while the owning `Space` lock is held, so the counters
/// are plain integers and always agree with the tuples they describe.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stats {
    pub clients: u64,
    pub total_ops: u64,
    pub reads: u64,
    pub gets: u64,
    pub puts: u64,
    pub errors: u64,
}

impl Stats {
    /// Count one accepted connection. Never decremented.
    pub fn client_connected(&mut self) {
        self.clients += 1;
    }

    /// Count one operation attempt and, when `failed`, one error
    pub fn record(&mut self, kind: OpKind, failed: bool) {
        self.total_ops += 1;
        match kind {
            OpKind::Put => self.puts += 1,
            OpKind::Read => self.reads += 1,
            OpKind::Get => self.gets += 1,
            OpKind::Invalid => {}
        }
        if failed {
            self.errors += 1;
        }
    }
}

/// Point-in-time view of a tuple space and its counters
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub tuples: usize,
    pub avg_tuple_size: f64,
    pub avg_key_size: f64,
    pub avg_value_size: f64,
    pub counters: Stats,
}

impl StatsSnapshot {
    /// Build a snapshot from the live counters and the current size totals.
    ///
    /// Averages cover the tuples stored right now and are 0 for an empty
    /// space.
    pub fn new(counters: &Stats, tuples: usize, key_bytes: usize, value_bytes: usize) -> Self {
        let avg = |total: usize| {
            if tuples == 0 {
                0.0
            } else {
                total as f64 / tuples as f64
            }
        };
        Self {
            tuples,
            avg_tuple_size: avg(key_bytes + value_bytes),
            avg_key_size: avg(key_bytes),
            avg_value_size: avg(value_bytes),
            counters: counters.clone(),
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counters;
        write!(
            f,
            "tuples={} avg_tuple={:.2} avg_key={:.2} avg_value={:.2} clients={} ops={} reads={} gets={} puts={} errors={}",
            self.tuples,
            self.avg_tuple_size,
            self.avg_key_size,
            self.avg_value_size,
            c.clients,
            c.total_ops,
            c.reads,
            c.gets,
            c.puts,
            c.errors,
        )
    }
}

/// Handle to the periodic stats reporter.
///
/// The reporter runs for as long as the handle lives; dropping it (or calling
/// [`StatsReporter::stop`]) ends the thread.
pub struct StatsReporter {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

/// Spawn a background thread that logs a snapshot of `space` every `period`.
///
/// The thread only takes the space lock for the duration of
/// [`Space::snapshot`]; logging happens after the lock is released.
pub fn spawn_stats_reporter(space: Arc<Space>, period: Duration) -> std::io::Result<StatsReporter> {
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let ticker = tick(period);

    let thread = std::thread::Builder::new()
        .name("stats-reporter".into())
        .spawn(move || loop {
            select! {
                recv(ticker) -> _ => {
                    let snap = space.snapshot();
                    log::info!("stats: {}", snap);
                }
                // Either an explicit stop or the handle being dropped
                recv(stop_rx) -> _ => break,
            }
        })?;

    Ok(StatsReporter {
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

impl StatsReporter {
    /// Stop the reporter and wait for its thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Closing the channel wakes the select
        drop(self.stop_tx.take());
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
