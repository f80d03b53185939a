//! Public API types for the in-process sweep engine.

use std::sync::Arc;
use std::time::Duration;

use rosterwatch_core::{JsonStore, MatchRecord};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};

use crate::lifecycle::{CompletionReporter, CompletionSignal, ContextLauncher, JobId, JobReport};

/// Configuration for the engine process.
///
/// Per-sweep settings (filter, concurrency, timeout, marker) live in the store
/// and are reloaded at every sweep start; these are the knobs that are not.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Durable store with candidates, matches, settings and progress.
    pub store: JsonStore,

    /// Pause between the end of a sweep and the automatic start of the next.
    pub restart_delay: Duration,

    /// Pause before admitting the next candidate after one with an unusable URL.
    pub invalid_skip_delay: Duration,

    /// Pause before admitting the next candidate after a context failed to open.
    pub open_failure_delay: Duration,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl MonitorConfig {
    /// Default pause between sweeps.
    pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(2);

    /// Default pause after an invalid candidate.
    pub const DEFAULT_INVALID_SKIP_DELAY: Duration = Duration::from_millis(150);

    /// Default pause after an open failure.
    pub const DEFAULT_OPEN_FAILURE_DELAY: Duration = Duration::from_millis(500);

    /// Longest accepted value for any of the pauses above; larger values are capped.
    pub const MAX_RESTART_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

    /// Default event channel capacity.
    pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

    /// Defaults for everything except the store.
    pub fn new(store: JsonStore) -> Self {
        Self {
            store,
            restart_delay: Self::DEFAULT_RESTART_DELAY,
            invalid_skip_delay: Self::DEFAULT_INVALID_SKIP_DELAY,
            open_failure_delay: Self::DEFAULT_OPEN_FAILURE_DELAY,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// A job currently holding a concurrency slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveJobSummary {
    /// Job handle.
    pub job: JobId,
    /// Candidate identifier, if any.
    pub identifier: Option<String>,
    /// Candidate target URL (without the marker parameter).
    pub target_url: Option<String>,
}

/// Engine event stream payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MonitorEvent {
    /// A sweep began.
    SweepStarted {
        /// Sweep sequence number (1-based, per monitor).
        sweep: u64,
        /// Size of the filtered candidate list.
        total: usize,
        /// Concurrency limit for this sweep.
        concurrency: usize,
    },
    /// Start was requested but the filtered list was empty; monitoring is off.
    SweepEmpty,
    /// All candidates of a sweep were processed; a new one follows.
    SweepCompleted {
        /// Sweep sequence number.
        sweep: u64,
    },
    /// A context was opened for a candidate.
    JobOpened {
        /// Job handle.
        job: JobId,
        /// Candidate label.
        candidate: String,
    },
    /// A job reported completion.
    JobFinished {
        /// Job handle.
        job: JobId,
        /// Candidate label.
        candidate: String,
        /// Whether the report was a match.
        matched: bool,
    },
    /// A job never reported and was force-closed.
    JobTimedOut {
        /// Job handle.
        job: JobId,
        /// Candidate label.
        candidate: String,
    },
    /// A candidate was passed over without a job.
    CandidateSkipped {
        /// Candidate label.
        candidate: String,
        /// Why.
        reason: String,
    },
    /// Cursor moved.
    Progress {
        /// Candidates admitted so far.
        current: usize,
        /// Filtered list size.
        total: usize,
    },
    /// A new match was recorded.
    Matched {
        /// The stored record.
        record: MatchRecord,
    },
    /// A non-fatal warning.
    Warning {
        /// Warning message.
        message: String,
    },
    /// A non-fatal error.
    Error {
        /// Error message.
        message: String,
    },
    /// Monitoring was stopped and every context closed.
    Stopped,
    /// The engine task exited.
    ShutDown,
}

/// Current engine state snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Monitoring is on (a sweep is running or about to restart).
    pub running: bool,
    /// Sequence number of the current or last sweep.
    pub sweep: u64,
    /// Cursor into the filtered list.
    pub cursor: usize,
    /// Filtered list size.
    pub total: usize,
    /// Concurrency limit of the current sweep.
    pub concurrency: usize,
    /// Jobs holding a slot, by handle.
    pub active_jobs: Vec<ActiveJobSummary>,
    /// Size of the dedup cache.
    pub matched: usize,
}

#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    Shutdown,
}

pub(crate) struct MonitorInner {
    pub(crate) event_tx: broadcast::Sender<MonitorEvent>,
    pub(crate) snapshot_rx: watch::Receiver<StatusSnapshot>,
    pub(crate) cmd_tx: mpsc::UnboundedSender<Command>,
    pub(crate) signal_tx: mpsc::UnboundedSender<CompletionSignal>,
}

/// Handle to a running engine instance.
pub struct MonitorHandle {
    pub(crate) inner: Arc<MonitorInner>,
    pub(crate) join: tokio::task::JoinHandle<anyhow::Result<()>>,
}

/// Spawn a new engine on the current tokio runtime. It starts idle.
pub fn start_monitor<L: ContextLauncher>(config: MonitorConfig, launcher: L) -> MonitorHandle {
    crate::engine::start_monitor(config, Arc::new(launcher))
}

impl MonitorHandle {
    /// Start monitoring. No-op if a sweep is already running.
    pub fn start(&self) {
        let _ = self.inner.cmd_tx.send(Command::Start);
    }

    /// Stop monitoring, force-closing every open context.
    pub fn stop(&self) {
        let _ = self.inner.cmd_tx.send(Command::Stop);
    }

    /// Stop monitoring and end the engine task.
    pub fn shutdown(&self) {
        let _ = self.inner.cmd_tx.send(Command::Shutdown);
    }

    /// Reporter for `job`, for collaborators that learn of completions out of band.
    pub fn reporter(&self, job: JobId) -> CompletionReporter {
        CompletionReporter::new(job, self.inner.signal_tx.clone())
    }

    /// Deliver a completion report for `job`.
    pub fn report(&self, job: JobId, report: JobReport) -> bool {
        self.reporter(job).report(report)
    }

    /// Subscribe to the engine event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Latest engine snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.snapshot_rx.borrow().clone()
    }

    /// Watch snapshots as they change.
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.inner.snapshot_rx.clone()
    }

    /// Wait for the engine to exit, returning the engine task result.
    pub async fn wait(self) -> anyhow::Result<()> {
        match self.join.await {
            Ok(res) => res,
            Err(err) => Err(anyhow::anyhow!("engine task join error: {err}")),
        }
    }
}
