/*!
 * Server Configuration
 *
 * The plain settings a `Server` runs with. Command line and environment
 * handling lives in `cli`, which produces a `Config`.
 */

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port used when none is given on the command line
pub const DEFAULT_PORT: u16 = 51234;

/// Period of the stats reporter
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the listener binds
    pub addr: SocketAddr,
    /// Number of reactor threads serving connections
    pub workers: usize,
    /// How often the stats reporter logs a snapshot
    pub stats_interval: Duration,
}

/// One reactor per available core, 4 if that cannot be determined
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for Config {
    fn default() -> Self {
        Self::with_port(DEFAULT_PORT)
    }
}

impl Config {
    /// Default settings listening on every interface at `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            workers: default_workers(),
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}
