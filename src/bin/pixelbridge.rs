use std::io::{stdin, stdout};
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use tracing::info;

use pixelbridge::{
    FlatImageLoader, Session, SessionConfig, SharedMemoryChannel,
};

/// Rendering bridge process. Spawned by a host application with a byte-stream
/// pair on stdin/stdout; pixels travel through a shared-memory region named
/// after the host's process id.
#[derive(Parser, Debug)]
#[command(name = "pixelbridge", version)]
struct Cli {
    /// Peer process id owning the shared-memory region. Defaults to the
    /// parent process id.
    #[arg(long)]
    peer_pid: Option<i32>,

    /// Seconds an image may go untouched before the idle sweep drops it.
    #[arg(long, default_value_t = 300)]
    idle_timeout_secs: u64,

    /// Minimum seconds between idle sweeps.
    #[arg(long, default_value_t = 30)]
    sweep_interval_secs: u64,

    /// Worker-strip count for the pixel transfer stage. Defaults to the
    /// number of available processing units.
    #[arg(long)]
    transfer_workers: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let peer_pid = match cli.peer_pid {
        Some(pid) => pid,
        None => parent_pid().context("cannot determine the peer process id")?,
    };
    info!(peer_pid, "starting bridge session");

    let config = SessionConfig {
        transfer_workers: cli.transfer_workers,
        idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
        sweep_interval: Duration::from_secs(cli.sweep_interval_secs),
        ..SessionConfig::default()
    };

    let mut session = Session::new(
        stdin().lock(),
        stdout().lock(),
        SharedMemoryChannel::new(peer_pid),
        Box::new(FlatImageLoader),
        config,
    );
    session.run().context("session ended with a fatal error")?;
    info!("session finished");
    Ok(())
}

fn parent_pid() -> Option<i32> {
    rustix::process::getppid().map(|pid| pid.as_raw_nonzero().get())
}
