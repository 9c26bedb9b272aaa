//! Handoff demo host - drives a main-thread dispatcher from a fixed-cadence loop.
//!
//! # Architecture
//!
//! ```text
//! main() -> load config -> Dispatcher::new(options) -> HostContext (this thread)
//!                                  ^                        |
//!             producer threads ----+                        v
//!                                                 run_host_loop(): tick per interval
//! ```
//!
//! # Event Loop
//!
//! 1. Wait for the next tick of the interval (or Ctrl-C)
//! 2. `host.tick()`: resume woken tasks, swap the queue, run the batch
//! 3. Stop after `run_ticks` when configured
//!
//! Shutdown drops the host context before joining producers, so any producer
//! blocked on a reply sees its channel close instead of waiting forever.

mod board;
mod producers;

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::time::{Instant, MissedTickBehavior};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use handoff_config::HandoffConfig;
use handoff_core::{Dispatcher, HostContext, TickReport};

const PRODUCER_COUNT: usize = 4;
const LOG_FILE_ENV: &str = "HANDOFF_LOG_FILE";
const LOG_FILE_NAME: &str = "handoff.log";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file(&log_file_candidates(
        env::var_os(LOG_FILE_ENV).map(PathBuf::from),
        handoff_config::config_path().as_deref(),
    ));

    if let Some((path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();
        tracing::info!(path = %path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file(candidates: &[PathBuf]) -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(candidate) {
            Ok(file) => return (Some((candidate.clone(), file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

/// `$HANDOFF_LOG_FILE` first, then `handoff.log` beside the config file
/// (`~/.handoff/handoff.log` by default), then `./.handoff/handoff.log`.
fn log_file_candidates(explicit: Option<PathBuf>, config_path: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        candidates.push(path);
    }
    if let Some(config_path) = config_path
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join(LOG_FILE_NAME));
    }
    candidates.push(PathBuf::from(".handoff").join(LOG_FILE_NAME));

    candidates
}

fn load_config() -> HandoffConfig {
    let loaded = match HandoffConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %err.path().display(), "{err}; using defaults");
            None
        }
    };
    loaded.unwrap_or_default().with_env_overrides()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracing();
    let config = load_config();
    tracing::info!(?config, "Starting handoff host");

    let dispatcher = Dispatcher::new(config.dispatcher_options());
    if !dispatcher.install_global() {
        tracing::warn!("Another global dispatcher is live; continuing with a private one");
    }
    let mut host = HostContext::new(dispatcher.clone()).context("failed to bind host context")?;

    let stop = Arc::new(AtomicBool::new(false));
    let pace = config.tick_interval() / 2;
    let producers = producers::spawn(&dispatcher, PRODUCER_COUNT, pace, &stop);

    let started = Instant::now();
    let result = run_host_loop(&mut host, &config).await;

    stop.store(true, Ordering::Release);
    let ticks = host.ticks();
    drop(host);
    for producer in producers {
        if producer.join().is_err() {
            tracing::warn!("Producer thread panicked");
        }
    }

    let stats = dispatcher.stats();
    let summary = board::with_board(|board| board.summary());
    tracing::info!(
        ticks,
        elapsed_ms = started.elapsed().as_millis(),
        submitted = stats.submitted,
        executed = stats.executed,
        failed = stats.failed,
        discarded = stats.discarded,
        %summary,
        "Host stopped"
    );

    result
}

async fn run_host_loop(host: &mut HostContext, config: &HandoffConfig) -> Result<()> {
    let mut frames = tokio::time::interval(config.tick_interval());
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = frames.tick() => {}
            signal = &mut ctrl_c => {
                signal.context("failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted");
                return Ok(());
            }
        }

        let report = host.tick();
        log_report(&report);

        if let Some(limit) = config.host.run_ticks
            && host.ticks() >= limit
        {
            return Ok(());
        }
    }
}

fn log_report(report: &TickReport) {
    if report.failed > 0 || report.tasks_failed > 0 {
        tracing::info!(
            tick = report.tick,
            executed = report.executed,
            failed = report.failed,
            tasks_failed = report.tasks_failed,
            "Tick completed with failures"
        );
    } else if !report.is_idle() {
        tracing::trace!(tick = report.tick, executed = report.executed, "Tick completed");
    }
}
