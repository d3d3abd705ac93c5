//! CLI binary simulating several instances of an application on one origin.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::time::Duration;

use clap::Parser;
use multitab::{MultiTab, PresenceConfig};
use multitab_broadcast_memory::{MemoryChannel, MemoryTransport};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid command line arguments
    #[error("invalid arguments: {0}")]
    Args(String),

    /// Presence library error
    #[error(transparent)]
    Presence(#[from] multitab::Error),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of simulated instances
    #[arg(long, default_value_t = 3, env = "MULTITAB_INSTANCES")]
    instances: usize,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = 200, env = "MULTITAB_HEARTBEAT_MS")]
    heartbeat_ms: u64,

    /// Inactivity threshold in milliseconds
    #[arg(long, default_value_t = 600, env = "MULTITAB_THRESHOLD_MS")]
    threshold_ms: u64,

    /// Channel name shared by the instances
    #[arg(long, default_value = "multitab", env = "MULTITAB_CHANNEL")]
    channel: String,

    /// Log every message, sweep and recomputation
    #[arg(long)]
    debug: bool,

    /// Kill the first instance without announcing its departure
    #[arg(long)]
    crash: bool,
}

fn report(tabs: &[(String, MultiTab<MemoryChannel>)]) {
    for (label, tab) in tabs {
        let snapshot = tab.snapshot();
        info!(
            "{} ({}): count={} multi={} leader={}",
            label, snapshot.self_id, snapshot.count, snapshot.is_multi, snapshot.is_leader
        );
    }
}

/// Sleeps for `duration`. Returns `false` if shutdown was requested first.
async fn pause(shutdown_token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = shutdown_token.cancelled() => false,
        () = sleep(duration) => true,
    }
}

async fn run(
    args: Args,
    transport: &MemoryTransport,
    shutdown_token: CancellationToken,
) -> Result<(), Error> {
    if args.instances == 0 {
        return Err(Error::Args("at least one instance is required".to_string()));
    }

    let heartbeat = Duration::from_millis(args.heartbeat_ms);
    let threshold = Duration::from_millis(args.threshold_ms);

    let mut tabs = Vec::with_capacity(args.instances);
    for index in 0..args.instances {
        let label = format!("tab-{index}");
        let callback_label = label.clone();

        let config = PresenceConfig::new(args.channel.clone())
            .with_heartbeat_interval(heartbeat)
            .with_inactivity_threshold(threshold)
            .with_debug(args.debug)
            .with_url(format!("sim://{label}"))
            .with_on_multi_tab_change(move |is_multi, count, urls| {
                info!(
                    "{} leads: multi={} count={} urls={:?}",
                    callback_label, is_multi, count, urls
                );
            });

        let tab = MultiTab::start(transport, config).await?;
        info!("started {} as {}", label, tab.self_id());
        tabs.push((label, tab));
    }

    let mut interrupted = !pause(&shutdown_token, heartbeat * 2).await;
    report(&tabs);

    // Leader first, so every step hands leadership over.
    tabs.sort_by(|(_, a), (_, b)| a.self_id().cmp(b.self_id()));

    let mut crash = args.crash;
    while !interrupted && !tabs.is_empty() {
        let (label, tab) = tabs.remove(0);

        if crash {
            crash = false;
            info!("crashing {}", label);
            tab.abandon();
            interrupted = !pause(&shutdown_token, threshold + threshold / 2 + heartbeat).await;
        } else {
            info!("closing {}", label);
            tab.shutdown().await;
            interrupted = !pause(&shutdown_token, heartbeat).await;
        }

        report(&tabs);
    }

    for (label, tab) in tabs {
        info!("closing {}", label);
        tab.shutdown().await;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .init();

    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match (
                signal(SignalKind::terminate()),
                signal(SignalKind::interrupt()),
            ) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = sigint.recv() => info!("Received SIGINT"),
                    }
                }
                _ => {
                    warn!("failed to install signal handlers, falling back to ctrl-c");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received interrupt signal");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        }

        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    run(args, &MemoryTransport::new("multitab-sim"), shutdown_token).await
}
