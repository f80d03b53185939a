use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use rosterwatch_core::{
    Candidate, DedupCache, JsonStore, MatchRecord, MonitorStatus, Settings, filter_candidates,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;

use crate::api::{
    ActiveJobSummary, Command, MonitorConfig, MonitorEvent, MonitorHandle, MonitorInner,
    StatusSnapshot,
};
use crate::lifecycle::{CompletionSignal, ContextLauncher, JobId, JobLifecycle, JobReport, LaunchError};
use crate::scheduler::{Admission, SweepState};


struct LoadedSweep {
    settings: Settings,
    dedup: DedupCache,
    filtered: Vec<Candidate>,
}

struct MonitorRuntime<L> {
    cfg: MonitorConfig,
    store: JsonStore,
    lifecycle: JobLifecycle<L>,

    sweep: Option<SweepState>,
    sweep_seq: u64,
    dedup: DedupCache,
    restart_at: Option<Instant>,
    retries: BinaryHeap<Reverse<Instant>>,

    cmd_rx: mpsc::UnboundedReceiver<Command>,
    signal_rx: mpsc::UnboundedReceiver<CompletionSignal>,
    snapshot_tx: watch::Sender<StatusSnapshot>,
    inner: Arc<MonitorInner>,
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

impl<L: ContextLauncher> MonitorRuntime<L> {
    fn build_snapshot(&self) -> StatusSnapshot {
        let mut snap = StatusSnapshot {
            running: self.sweep.is_some() || self.restart_at.is_some(),
            sweep: self.sweep_seq,
            matched: self.dedup.len(),
            ..StatusSnapshot::default()
        };
        if let Some(sweep) = &self.sweep {
            snap.cursor = sweep.cursor();
            snap.total = sweep.total();
            snap.concurrency = sweep.limit();
            snap.active_jobs = sweep
                .active()
                .map(|(job, c)| ActiveJobSummary {
                    job: *job,
                    identifier: c.identifier.clone(),
                    target_url: c.target_url.clone(),
                })
                .collect();
        }
        snap
    }

    fn push_snapshot(&self) {
        let snap = self.build_snapshot();
        let _ = self.snapshot_tx.send(snap);
    }

    fn emit(&self, event: MonitorEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    fn warn(&self, message: String) {
        log::warn!("{message}");
        self.emit(MonitorEvent::Warning { message });
    }

    async fn load_sweep(&mut self) -> anyhow::Result<LoadedSweep> {
        let settings = self.store.settings().await?;
        let dedup = DedupCache::from_records(&self.store.matched().await?);
        let candidates = self.store.candidates().await?;
        let filtered = filter_candidates(candidates, &settings.filter);
        Ok(LoadedSweep {
            settings,
            dedup,
            filtered,
        })
    }

    async fn set_status(&mut self, status: MonitorStatus) {
        if let Err(err) = self.store.set_status(status).await {
            self.warn(format!("failed to persist monitor status: {err:#}"));
        }
    }

    async fn persist_progress(&mut self) {
        let Some(sweep) = &self.sweep else {
            return;
        };
        let progress = sweep.progress();
        if let Err(err) = self.store.set_progress(Some(progress)).await {
            self.warn(format!("failed to persist progress: {err:#}"));
        }
        self.emit(MonitorEvent::Progress {
            current: progress.current,
            total: progress.total,
        });
    }

    async fn clear_progress(&mut self) {
        if let Err(err) = self.store.set_progress(None).await {
            self.warn(format!("failed to clear progress: {err:#}"));
        }
    }

    async fn start_sweep(&mut self, force: bool) {
        if !force && (self.sweep.is_some() || self.restart_at.is_some()) {
            log::debug!("start requested while running; ignoring");
            return;
        }

        self.restart_at = None;
        self.retries.clear();
        self.sweep = None;
        let leftover = self.lifecycle.close_all().await;
        if !leftover.is_empty() {
            log::debug!("closed {} leftover context(s) from the previous sweep", leftover.len());
        }

        let loaded = match self.load_sweep().await {
            Ok(loaded) => loaded,
            Err(err) => {
                let message = format!("cannot start sweep: {err:#}");
                log::error!("{message}");
                self.emit(MonitorEvent::Error { message });
                self.clear_progress().await;
                self.set_status(MonitorStatus::Off).await;
                self.push_snapshot();
                return;
            }
        };

        self.dedup = loaded.dedup;
        if loaded.filtered.is_empty() {
            log::info!("no candidates after filter {:?}; monitoring is off", loaded.settings.filter);
            self.clear_progress().await;
            self.set_status(MonitorStatus::Off).await;
            self.emit(MonitorEvent::SweepEmpty);
            self.push_snapshot();
            return;
        }

        self.lifecycle
            .configure(&loaded.settings.marker_param, loaded.settings.job_timeout());
        let concurrency = loaded.settings.concurrency;
        let sweep = SweepState::new(loaded.filtered, concurrency);
        let total = sweep.total();
        self.sweep = Some(sweep);
        self.sweep_seq += 1;

        log::info!(
            "sweep {} started: {total} candidate(s), concurrency {concurrency}, {} already matched",
            self.sweep_seq,
            self.dedup.len()
        );
        self.emit(MonitorEvent::SweepStarted {
            sweep: self.sweep_seq,
            total,
            concurrency,
        });
        self.set_status(MonitorStatus::On).await;
        self.persist_progress().await;

        for _ in 0..concurrency {
            self.admit_next().await;
        }
        self.push_snapshot();
    }

    async fn stop_sweep(&mut self) {
        if self.sweep.is_none() && self.restart_at.is_none() {
            log::debug!("stop requested while idle; ignoring");
            return;
        }

        self.sweep = None;
        self.restart_at = None;
        self.retries.clear();
        self.clear_progress().await;
        let closed = self.lifecycle.close_all().await;
        log::info!("monitoring stopped; closed {} context(s)", closed.len());
        self.set_status(MonitorStatus::Off).await;
        self.emit(MonitorEvent::Stopped);
        self.push_snapshot();
    }

    /// Fill one freed slot. Duplicates are skipped in place; invalid targets
    /// schedule a delayed retry instead of looping.
    async fn admit_next(&mut self) {
        let before = self.sweep.as_ref().map(SweepState::cursor);

        loop {
            let Some(sweep) = self.sweep.as_mut() else {
                return;
            };
            match sweep.admit_next(&self.dedup) {
                Admission::Saturated | Admission::Drain => break,
                Admission::Exhausted => {
                    if self.restart_at.is_none() {
                        log::info!("sweep {} complete", self.sweep_seq);
                        self.emit(MonitorEvent::SweepCompleted {
                            sweep: self.sweep_seq,
                        });
                        self.restart_at = Some(Instant::now() + self.cfg.restart_delay);
                    }
                    break;
                }
                Admission::SkipDuplicate { candidate } => {
                    log::debug!("{} already matched; skipping", candidate.label());
                }
                Admission::SkipInvalid { candidate, reason } => {
                    self.warn(format!("skipping {}: {reason}", candidate.label()));
                    self.emit(MonitorEvent::CandidateSkipped {
                        candidate: candidate.label().to_string(),
                        reason: reason.to_string(),
                    });
                    self.retries
                        .push(Reverse(Instant::now() + self.cfg.invalid_skip_delay));
                    break;
                }
                Admission::Open { candidate, target } => {
                    let job = self.lifecycle.open(&candidate, &target);
                    log::debug!("{job}: opening {} ({target})", candidate.label());
                    sweep.track(job, candidate);
                    break;
                }
            }
        }

        let after = self.sweep.as_ref().map(SweepState::cursor);
        if after != before {
            self.persist_progress().await;
        }
    }

    async fn handle_opened(&mut self, job: JobId, res: Result<(), LaunchError>) {
        let active = self.sweep.as_ref().is_some_and(|s| s.is_active(job));
        match res {
            Ok(()) => {
                if !active || !self.lifecycle.mark_open(job) {
                    log::debug!("{job}: opened after it was released; closing");
                    self.lifecycle.close(job).await;
                    return;
                }
                let label = self
                    .sweep
                    .as_ref()
                    .and_then(|s| s.active().find(|(j, _)| **j == job).map(|(_, c)| c.label().to_string()))
                    .unwrap_or_default();
                self.emit(MonitorEvent::JobOpened {
                    job,
                    candidate: label,
                });
            }
            Err(err) => {
                self.lifecycle.forget(job);
                let Some(candidate) = self.sweep.as_mut().and_then(|s| s.complete(job)) else {
                    log::debug!("{job}: open failed after it was released: {err:#}");
                    return;
                };
                // The same candidate is not retried in this sweep.
                self.warn(format!("skipping {}: {err:#}", candidate.label()));
                self.emit(MonitorEvent::CandidateSkipped {
                    candidate: candidate.label().to_string(),
                    reason: format!("{err:#}"),
                });
                self.retries
                    .push(Reverse(Instant::now() + self.cfg.open_failure_delay));
                self.push_snapshot();
            }
        }
    }

    async fn handle_signal(&mut self, signal: CompletionSignal) {
        let CompletionSignal { job, report } = signal;
        if !self.sweep.as_ref().is_some_and(|s| s.is_active(job)) {
            log::debug!("{job}: ignoring stale {report:?}");
            return;
        }

        self.lifecycle.close(job).await;
        let Some(candidate) = self.sweep.as_mut().and_then(|s| s.complete(job)) else {
            return;
        };

        let matched = matches!(report, JobReport::Matched { .. });
        if let JobReport::Matched { payload } = report {
            self.record_match(&candidate, payload).await;
        }
        self.emit(MonitorEvent::JobFinished {
            job,
            candidate: candidate.label().to_string(),
            matched,
        });

        self.admit_next().await;
        self.push_snapshot();
    }

    async fn handle_timeout(&mut self, job: JobId) {
        self.lifecycle.close(job).await;
        let Some(candidate) = self.sweep.as_mut().and_then(|s| s.complete(job)) else {
            return;
        };
        self.warn(format!(
            "{job}: {} did not report in time; closing",
            candidate.label()
        ));
        self.emit(MonitorEvent::JobTimedOut {
            job,
            candidate: candidate.label().to_string(),
        });
        self.admit_next().await;
        self.push_snapshot();
    }

    async fn record_match(&mut self, candidate: &Candidate, payload: Option<serde_json::Value>) {
        let Some(record) = MatchRecord::for_candidate(candidate, payload) else {
            return;
        };
        if !self.dedup.add(&record.target_url) {
            return;
        }
        if let Err(err) = self.store.append_match(&record).await {
            self.warn(format!(
                "failed to persist match for {}: {err:#}",
                candidate.label()
            ));
        }
        self.emit(MonitorEvent::Matched { record });
    }

    async fn run(mut self) -> anyhow::Result<()> {
        self.push_snapshot();

        loop {
            let next_deadline = self.lifecycle.next_deadline();
            let next_retry = self.retries.peek().map(|Reverse(at)| *at);
            let restart_at = self.restart_at;
            let has_pending_opens = self.lifecycle.has_pending_opens();

            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Start) => self.start_sweep(false).await,
                    Some(Command::Stop) => self.stop_sweep().await,
                    Some(Command::Shutdown) | None => break,
                },
                Some(signal) = self.signal_rx.recv() => self.handle_signal(signal).await,
                (job, res) = self.lifecycle.next_opened(), if has_pending_opens => {
                    self.handle_opened(job, res).await;
                }
                _ = sleep_until_opt(next_deadline.map(|(_, at)| at)) => {
                    if let Some((job, _)) = next_deadline {
                        self.handle_timeout(job).await;
                    }
                }
                _ = sleep_until_opt(next_retry) => {
                    self.retries.pop();
                    self.admit_next().await;
                    self.push_snapshot();
                }
                _ = sleep_until_opt(restart_at) => {
                    self.start_sweep(true).await;
                }
            }
        }

        self.stop_sweep().await;
        self.emit(MonitorEvent::ShutDown);
        self.push_snapshot();
        Ok(())
    }
}

pub(crate) fn start_monitor<L: ContextLauncher>(mut cfg: MonitorConfig, launcher: Arc<L>) -> MonitorHandle {
    if cfg.restart_delay == Duration::ZERO {
        cfg.restart_delay = MonitorConfig::DEFAULT_RESTART_DELAY;
    }
    cfg.restart_delay = cfg.restart_delay.min(MonitorConfig::MAX_RESTART_DELAY);
    cfg.invalid_skip_delay = cfg.invalid_skip_delay.min(MonitorConfig::MAX_RESTART_DELAY);
    cfg.open_failure_delay = cfg.open_failure_delay.min(MonitorConfig::MAX_RESTART_DELAY);
    if cfg.event_capacity == 0 {
        cfg.event_capacity = MonitorConfig::DEFAULT_EVENT_CAPACITY;
    }

    let (event_tx, _) = broadcast::channel::<MonitorEvent>(cfg.event_capacity);
    let (snapshot_tx, snapshot_rx) = watch::channel(StatusSnapshot::default());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (signal_tx, signal_rx) = mpsc::unbounded_channel::<CompletionSignal>();

    let inner = Arc::new(MonitorInner {
        event_tx,
        snapshot_rx,
        cmd_tx,
        signal_tx: signal_tx.clone(),
    });

    let runtime = MonitorRuntime {
        store: cfg.store.clone(),
        cfg,
        lifecycle: JobLifecycle::new(launcher, signal_tx),
        sweep: None,
        sweep_seq: 0,
        dedup: DedupCache::new(),
        restart_at: None,
        retries: BinaryHeap::new(),
        cmd_rx,
        signal_rx,
        snapshot_tx,
        inner: inner.clone(),
    };

    let join = tokio::spawn(runtime.run());
    MonitorHandle { inner, join }
}
