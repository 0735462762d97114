//! Stress command implementation
//!
//! Runs many handles over one multiplexed connection to an in-process echo
//! server and checks that every handle reads back exactly the replies to
//! its own commands.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use rand::Rng;

use cm_core::config::MuxConfig;
use cm_core::{Command, LineConnection, Reply};
use cm_mux::Multiplexer;

use crate::echo::serve_echo;
use crate::output::{print_error, print_success};

/// Smallest in-memory pipe between client and echo server
const MIN_PIPE_CAPACITY: usize = 64 * 1024;

/// Parameters for a stress run
#[derive(Debug, Clone)]
pub struct StressOptions {
    /// Concurrent handles
    pub handles: usize,
    /// Batches sent by each handle
    pub rounds: usize,
    /// Largest number of commands pipelined per batch
    pub max_batch: usize,
    /// Largest random delay the echo server adds per reply
    pub jitter: Duration,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            handles: 8,
            rounds: 100,
            max_batch: 4,
            jitter: Duration::ZERO,
        }
    }
}

/// Outcome of a stress run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StressReport {
    pub commands: u64,
    pub mismatches: u64,
    pub elapsed: Duration,
}

fn workload_command(id: usize, round: usize, i: usize) -> Command {
    Command::new("SET")
        .arg(format!("h{}:r{}:c{}", id, round, i))
        .arg(round.to_string())
}

/// Pipe size that holds every reply that can be unread at once.
///
/// The echo server stops reading while a reply write is blocked, and a
/// sender can then block on the send lock with its batch half written. As
/// long as all unread replies fit in the pipe the server never blocks.
fn pipe_capacity(options: &StressOptions) -> usize {
    let batch = options.max_batch.max(1);
    let last = workload_command(
        options.handles.saturating_sub(1),
        options.rounds.saturating_sub(1),
        batch - 1,
    );
    let longest = last.to_string().len() + 1;
    options
        .handles
        .saturating_mul(batch)
        .saturating_mul(longest)
        .max(MIN_PIPE_CAPACITY)
}

/// Run one handle's share of the workload
async fn run_handle(
    mux: Multiplexer<LineConnection<tokio::io::DuplexStream>>,
    id: usize,
    options: StressOptions,
    commands: Arc<AtomicU64>,
    mismatches: Arc<AtomicU64>,
) -> Result<()> {
    let mut handle = mux.get();

    for round in 0..options.rounds {
        let batch = rand::thread_rng().gen_range(1..=options.max_batch.max(1));
        let mut sent = Vec::with_capacity(batch);
        for i in 0..batch {
            let command = workload_command(id, round, i);
            handle.send(&command).await?;
            sent.push(command);
        }
        handle.flush().await?;

        for command in sent {
            let reply = handle.receive().await?;
            commands.fetch_add(1, Ordering::Relaxed);
            if reply != Reply::Status(command.to_string()) {
                tracing::error!("Handle {} sent `{}` but got `{}`", id, command, reply);
                mismatches.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    handle.close().await?;
    Ok(())
}

/// Run the stress workload and report ordering violations
pub async fn stress_command(config: MuxConfig, options: StressOptions) -> Result<StressReport> {
    let (client, server) = tokio::io::duplex(pipe_capacity(&options));
    let server = tokio::spawn(serve_echo(server, options.jitter));

    let mux = Multiplexer::with_config(LineConnection::new(client), config);
    let commands = Arc::new(AtomicU64::new(0));
    let mismatches = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    tracing::info!(
        "Stressing {} handles x {} rounds (batches up to {})",
        options.handles,
        options.rounds,
        options.max_batch
    );

    let tasks: Vec<_> = (0..options.handles)
        .map(|id| {
            tokio::spawn(run_handle(
                mux.clone(),
                id,
                options.clone(),
                Arc::clone(&commands),
                Arc::clone(&mismatches),
            ))
        })
        .collect();

    for (id, result) in futures::future::join_all(tasks).await.into_iter().enumerate() {
        result
            .with_context(|| format!("Handle {} panicked", id))?
            .with_context(|| format!("Handle {} failed", id))?;
    }

    let elapsed = started.elapsed();
    mux.close().await.context("Failed to close connection")?;
    let served = server.await.context("Echo server panicked")??;

    let report = StressReport {
        commands: commands.load(Ordering::Relaxed),
        mismatches: mismatches.load(Ordering::Relaxed),
        elapsed,
    };

    if served != report.commands {
        bail!(
            "Echo server answered {} commands but {} replies were read",
            served,
            report.commands
        );
    }

    if report.mismatches == 0 {
        print_success(&format!(
            "{} commands over {} handles in {:.2?}, all replies in order",
            report.commands, options.handles, report.elapsed
        ));
    } else {
        print_error(&format!(
            "{} of {} replies went to the wrong command",
            report.mismatches, report.commands
        ));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_holds_every_unread_reply() {
        let small = StressOptions::default();
        assert_eq!(pipe_capacity(&small), MIN_PIPE_CAPACITY);

        let large = StressOptions {
            handles: 500,
            rounds: 10_000,
            max_batch: 64,
            jitter: Duration::ZERO,
        };
        let line = workload_command(499, 9_999, 63).to_string().len() + 1;
        assert!(pipe_capacity(&large) >= 500 * 64 * line);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_handles_with_large_batches_finish() {
        let options = StressOptions {
            handles: 64,
            rounds: 5,
            max_batch: 64,
            jitter: Duration::ZERO,
        };
        let report = tokio::time::timeout(
            Duration::from_secs(60),
            stress_command(MuxConfig::default(), options),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(report.mismatches, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stress_keeps_order() {
        let options = StressOptions {
            handles: 6,
            rounds: 25,
            max_batch: 3,
            jitter: Duration::from_micros(50),
        };
        let report = stress_command(MuxConfig::default(), options).await.unwrap();
        assert_eq!(report.mismatches, 0);
        assert!(report.commands >= 6 * 25);
    }
}
