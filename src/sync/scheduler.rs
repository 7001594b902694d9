//! Periodic poll driver for one stream.
//!
//! Each stream gets its own scheduler and its own rule: if the previous poll
//! for this stream is still in flight when the tick fires, the tick is
//! skipped, never queued. That bounds load to one outstanding request per
//! stream and keeps responses applying in issue order. Failed cycles log,
//! report, and keep ticking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::transport::{StreamBatch, StreamSource};

/// Receives every cycle's outcome, success or failure, with the instant the
/// request was issued. The coordinator hangs off this seam.
pub type BatchSink =
    Arc<dyn Fn(&'static str, Result<StreamBatch, SyncError>, DateTime<Utc>) + Send + Sync>;

#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub ticks: AtomicU64,
    pub skipped: AtomicU64,
    pub completed: AtomicU64,
    pub failures: AtomicU64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerStatsSnapshot {
    pub ticks: u64,
    pub skipped: u64,
    pub completed: u64,
    pub failures: u64,
}

pub struct PollingScheduler {
    stream_name: &'static str,
    stopped: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
    task: JoinHandle<()>,
}

impl PollingScheduler {
    /// Spawn the poll loop for `stream`. If the source also supports push,
    /// pushed batches flow through the same sink between ticks.
    pub fn spawn(stream: Arc<dyn StreamSource>, period: Duration, sink: BatchSink) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(SchedulerStats::default());
        let stream_name = stream.name();

        let task = tokio::spawn(run_loop(
            stream,
            period,
            sink,
            stopped.clone(),
            stats.clone(),
        ));

        Self {
            stream_name,
            stopped,
            stats,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.stream_name
    }

    /// Prevent further ticks. An in-flight poll is not aborted; its response
    /// still reaches the sink when it resolves.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }
}

async fn run_loop(
    stream: Arc<dyn StreamSource>,
    period: Duration,
    sink: BatchSink,
    stopped: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
) {
    let name = stream.name();
    let in_flight = Arc::new(AtomicBool::new(false));

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut push_rx = stream.subscribe();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                stats.ticks.fetch_add(1, Ordering::Relaxed);

                if in_flight.swap(true, Ordering::SeqCst) {
                    stats.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(stream = name, "previous poll still in flight, skipping tick");
                    continue;
                }

                let stream = stream.clone();
                let sink = sink.clone();
                let in_flight = in_flight.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    let issued_at = Utc::now();
                    let result = stream.poll_once().await;
                    match &result {
                        Ok(_) => {
                            stats.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            stats.failures.fetch_add(1, Ordering::Relaxed);
                            warn!(stream = name, error = %e, "poll cycle failed, will retry next tick");
                        }
                    }
                    sink(name, result, issued_at);
                    in_flight.store(false, Ordering::SeqCst);
                });
            }
            pushed = next_push(&mut push_rx) => match pushed {
                Some(batch) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    sink(name, Ok(batch), Utc::now());
                }
                None => push_rx = None,
            }
        }
    }

    debug!(stream = name, "polling stopped");
}

/// Await the next pushed batch, or park forever for poll-only sources.
async fn next_push(rx: &mut Option<broadcast::Receiver<StreamBatch>>) -> Option<StreamBatch> {
    match rx {
        Some(receiver) => loop {
            match receiver.recv().await {
                Ok(batch) => return Some(batch),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "push subscription lagged, batches dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        },
        None => std::future::pending().await,
    }
}
