/*!
 * Tuple Space Server Entry Point
 *
 * Initializes logging, reads the configuration, binds the listener and
 * serves until the process is killed.
 */

use anyhow::*;
use clap::Parser;
use tuplespace::*;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Usage: `tuplespace [PORT] [--workers N] [--stats-secs S]`
fn main() -> Result<()> {
    // Respects RUST_LOG, e.g. RUST_LOG=debug to trace every request
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerArgs::parse().into_config();
    let server = Server::bind(config)?;

    // Blocks for the life of the process
    server.run()
}
