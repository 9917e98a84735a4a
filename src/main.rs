//! Herald soak runner.
//!
//! Repeatedly registers effects on one broadcaster, publishes the values
//! they wait for, and reports how many rounds failed.
//!
//! # Usage
//!
//! ```bash
//! herald --rounds 1000 --effects 4 --timeout-ms 100
//! ```
//!
//! Environment variables can also be used:
//! - `HERALD_TIMEOUT_MS`: Timeout for each wait
//! - `HERALD_ROUNDS`: Number of rounds
//! - `HERALD_EFFECTS`: Effects per round
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//! - `HERALD_LOG_FORMAT`: `text` or `json`

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use herald::config::Config;
use herald::observability::metrics::init_metrics_with_endpoint;
use herald::observability::tracing::init_tracing;
use herald::{Broadcaster, Effect};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
  Herald v{} - effect broadcaster soak

  Configuration:
    Timeout:    {} ms
    Rounds:     {}
    Effects:    {}
    Log Level:  {}
    Log Format: {:?}

  Press Ctrl+C to stop early.
"#,
        version,
        config.timeout_ms,
        config.rounds,
        config.effects,
        config.log_level,
        config.log_format
    );
}

/// Outcome of a soak run.
#[derive(Debug, Default)]
struct Report {
    rounds: u64,
    failures: u64,
    elapsed: Duration,
    listeners_left: usize,
}

/// Run `config.rounds` wait rounds, stopping early when `shutdown` fires.
async fn run_rounds(config: &Config, shutdown: &CancellationToken) -> Report {
    let broadcaster = Broadcaster::<Uuid>::with_config(config.broadcaster_config());
    let started = Instant::now();
    let mut report = Report::default();

    for round in 0..config.rounds {
        if shutdown.is_cancelled() {
            tracing::info!(round, "Stopping early");
            break;
        }

        let ids: Vec<Uuid> = (0..config.effects).map(|_| Uuid::now_v7()).collect();
        let effects = ids.iter().map(|&id| {
            Effect::matching(move |msg: &Uuid| *msg == id, format!("timed out waiting for {id}"))
        });

        let result = broadcaster
            .wait_for_effects(
                shutdown,
                async {
                    if let Err(e) = broadcaster.broadcast(ids.iter().copied()).await {
                        tracing::error!(error = %e, "Publish failed");
                    }
                },
                effects,
            )
            .await;

        report.rounds += 1;
        if let Err(e) = result {
            report.failures += 1;
            tracing::warn!(round, failed = e.len(), error = %e, "Round failed");
        }
    }

    report.elapsed = started.elapsed();
    report.listeners_left = settled_listener_count(&broadcaster, broadcaster.timeout()).await;
    broadcaster.shutdown().await;
    report
}

/// Listener count once listeners detached by a timed-out round have had
/// `grace` to deregister.
async fn settled_listener_count(broadcaster: &Broadcaster<Uuid>, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    loop {
        let count = broadcaster.listener_count().await;
        if count == 0 || Instant::now() >= deadline {
            return count;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {
                            tracing::info!("Received SIGINT (Ctrl+C), stopping...");
                        }
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, stopping...");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                    if ctrl_c.await.is_ok() {
                        tracing::info!("Received SIGINT (Ctrl+C), stopping...");
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if ctrl_c.await.is_ok() {
                tracing::info!("Received Ctrl+C, stopping...");
            }
        }

        shutdown.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse_args();

    init_tracing(&config.log_level, config.log_format)?;
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    print_banner(&config);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let report = run_rounds(&config, &shutdown).await;

    let per_second = report.rounds as f64 / report.elapsed.as_secs_f64().max(f64::EPSILON);
    println!("Soak results:");
    println!("  Rounds: {}", report.rounds);
    println!("  Effects per round: {}", config.effects);
    println!("  Failures: {}", report.failures);
    println!("  Duration: {:?}", report.elapsed);
    println!("  Throughput: {:.2} rounds/s", per_second);
    println!("  Listeners left: {}", report.listeners_left);

    if report.failures > 0 || report.listeners_left > 0 {
        bail!(
            "{} of {} rounds failed, {} listeners left registered",
            report.failures,
            report.rounds,
            report.listeners_left
        );
    }

    tracing::info!("Herald soak complete");
    Ok(())
}
