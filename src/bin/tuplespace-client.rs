/*!
 * Tuple Space Script Client
 *
 * Connects to a server and replays a script of `PUT`/`READ`/`GET` lines,
 * printing the server's answer for each one.
 */

use anyhow::*;
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use tuplespace::*;

/// Usage: `tuplespace-client <HOST> <PORT> <SCRIPT>`
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let ClientArgs { host, port, script } = ClientArgs::parse();

    let file = File::open(&script).with_context(|| format!("open {}", script.display()))?;
    let mut client = Client::connect((host.as_str(), port))
        .with_context(|| format!("connect {}:{}", host, port))?;

    let stdout = std::io::stdout();
    let summary = run_script(&mut client, BufReader::new(file), &mut stdout.lock())
        .context("script aborted")?;

    log::info!(
        "{} sent, {} ok, {} failed, {} skipped",
        summary.sent,
        summary.ok,
        summary.failed,
        summary.skipped
    );
    Ok(())
}
