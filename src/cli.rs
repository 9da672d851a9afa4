use std::path::PathBuf;
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::Parser;

use crate::config::{default_workers, Config, DEFAULT_PORT};

/// Serve an in-memory tuple space over TCP.
#[derive(Parser, Debug, Clone)]
#[command(name = "tuplespace", version, about, long_about = None)]
pub struct ServerArgs {
    /// Port to listen on, on every interface.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Reactor threads serving connections. Defaults to the number of cores.
    #[arg(
        long,
        env = "TUPLESPACE_WORKERS",
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub workers: Option<usize>,

    /// Seconds between two stats reports.
    #[arg(
        long,
        env = "TUPLESPACE_STATS_SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub stats_secs: u64,
}

impl ServerArgs {
    pub fn into_config(self) -> Config {
        let mut cfg = Config::with_port(self.port);
        cfg.workers = self.workers.unwrap_or_else(default_workers);
        cfg.stats_interval = Duration::from_secs(self.stats_secs);
        cfg
    }
}

/// Replay a script of PUT/READ/GET lines against a tuple space server.
#[derive(Parser, Debug, Clone)]
#[command(name = "tuplespace-client", version, about, long_about = None)]
pub struct ClientArgs {
    /// Server host name or address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Script file, one `CMD KEY [VALUE]` per line.
    pub script: PathBuf,
}
