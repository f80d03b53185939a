//! Execution contexts: the launcher seam, completion signals, and the
//! bookkeeping that ties each open context to a job handle.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use rosterwatch_core::Candidate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Handle of one opened job. Unique for the lifetime of a monitor, across sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// What the inspection side reports when a job is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobReport {
    /// Inspection finished without a match.
    Finished,
    /// Submission marker found.
    Matched {
        /// Optional detail forwarded into the match record.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
    /// The context went away on its own (e.g. closed by a user).
    Closed,
}

/// A report keyed by the job it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSignal {
    /// Job the report is for.
    pub job: JobId,
    /// The report.
    pub report: JobReport,
}

/// Sends the completion signal for one job back to the engine.
///
/// Reports for jobs that are no longer active (stopped, timed out, already
/// reported) are dropped by the engine.
#[derive(Debug, Clone)]
pub struct CompletionReporter {
    job: JobId,
    tx: mpsc::UnboundedSender<CompletionSignal>,
}

impl CompletionReporter {
    pub(crate) fn new(job: JobId, tx: mpsc::UnboundedSender<CompletionSignal>) -> Self {
        Self { job, tx }
    }

    /// Job this reporter belongs to.
    pub fn job(&self) -> JobId {
        self.job
    }

    /// Send `report`; `false` once the engine has shut down.
    pub fn report(&self, report: JobReport) -> bool {
        self.tx
            .send(CompletionSignal {
                job: self.job,
                report,
            })
            .is_ok()
    }

    /// Inspection done, nothing found.
    pub fn finished(&self) -> bool {
        self.report(JobReport::Finished)
    }

    /// Inspection found the submission marker.
    pub fn matched(&self, payload: Option<serde_json::Value>) -> bool {
        self.report(JobReport::Matched { payload })
    }

    /// The context was closed externally.
    pub fn closed(&self) -> bool {
        self.report(JobReport::Closed)
    }
}

/// Everything a launcher needs to open one context.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Handle the context is registered under.
    pub job: JobId,
    /// Target URL with the automation marker parameter appended.
    pub url: Url,
    /// The record being inspected.
    pub candidate: Candidate,
    /// Where to send the completion signal.
    pub reporter: CompletionReporter,
}

/// Errors from a [`ContextLauncher`].
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The context could not be opened.
    #[error("open failed: {0}")]
    Open(String),
    /// Navigation/transport failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    /// Target answered with a non-success status.
    #[error("http {0}")]
    Status(reqwest::StatusCode),
    /// The open task panicked or was aborted.
    #[error("open task failed: {0}")]
    Join(String),
}

/// Opens and closes isolated execution contexts (tabs, sessions, fetches).
pub trait ContextLauncher: Send + Sync + 'static {
    /// Open a background context at `request.url`.
    ///
    /// Resolving `Ok` means the context exists; the job is finished only once
    /// `request.reporter` is used.
    fn open(&self, request: OpenRequest) -> impl Future<Output = Result<(), LaunchError>> + Send;

    /// Close the context for `job`. Must tolerate unknown or already-closed jobs.
    fn close(&self, job: JobId) -> impl Future<Output = Result<(), LaunchError>> + Send;
}

/// Append `<param>=1` to `target`, replacing any existing value for `param`.
pub(crate) fn marked_url(target: &Url, param: &str) -> Url {
    let mut url = target.clone();
    let kept: Vec<(String, String)> = target
        .query_pairs()
        .filter(|(k, _)| k != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(param, "1");
    }
    url
}

type OpenResult = (JobId, Result<(), LaunchError>);

/// Tracks which contexts are opening or open, and their deadlines.
pub(crate) struct JobLifecycle<L> {
    launcher: Arc<L>,
    signal_tx: mpsc::UnboundedSender<CompletionSignal>,
    next_id: u64,
    marker_param: String,
    job_timeout: Option<Duration>,
    opening: JoinSet<OpenResult>,
    opening_ids: HashSet<JobId>,
    open: HashMap<JobId, Option<Instant>>,
}

impl<L: ContextLauncher> JobLifecycle<L> {
    pub(crate) fn new(launcher: Arc<L>, signal_tx: mpsc::UnboundedSender<CompletionSignal>) -> Self {
        Self {
            launcher,
            signal_tx,
            next_id: 1,
            marker_param: String::new(),
            job_timeout: None,
            opening: JoinSet::new(),
            opening_ids: HashSet::new(),
            open: HashMap::new(),
        }
    }

    /// Apply per-sweep settings.
    pub(crate) fn configure(&mut self, marker_param: &str, job_timeout: Option<Duration>) {
        self.marker_param = marker_param.to_string();
        self.job_timeout = job_timeout;
    }

    /// Allocate a handle and start opening a context for `candidate`.
    pub(crate) fn open(&mut self, candidate: &Candidate, target: &Url) -> JobId {
        let job = JobId(self.next_id);
        self.next_id += 1;

        let request = OpenRequest {
            job,
            url: marked_url(target, &self.marker_param),
            candidate: candidate.clone(),
            reporter: CompletionReporter::new(job, self.signal_tx.clone()),
        };
        let launcher = self.launcher.clone();
        self.opening_ids.insert(job);
        self.opening
            .spawn(async move { (job, launcher.open(request).await) });
        job
    }

    pub(crate) fn has_pending_opens(&self) -> bool {
        !self.opening.is_empty()
    }

    /// Next finished open attempt. Pending forever when nothing is opening.
    pub(crate) async fn next_opened(&mut self) -> OpenResult {
        loop {
            match self.opening.join_next().await {
                Some(Ok(res)) => return res,
                // Aborted opens were torn down already; panics have no job id to report.
                Some(Err(err)) if err.is_cancelled() => continue,
                Some(Err(err)) => {
                    log::error!("context open task failed: {err:#}");
                    continue;
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    /// Promote `job` from opening to open. `false` if it was torn down meanwhile.
    pub(crate) fn mark_open(&mut self, job: JobId) -> bool {
        if !self.opening_ids.remove(&job) {
            return false;
        }
        // A deadline past what `Instant` can represent means no deadline.
        let deadline = self.job_timeout.and_then(|t| Instant::now().checked_add(t));
        self.open.insert(job, deadline);
        true
    }

    /// Drop bookkeeping for an open that failed.
    pub(crate) fn forget(&mut self, job: JobId) {
        self.opening_ids.remove(&job);
        self.open.remove(&job);
    }

    /// Open job with the earliest deadline.
    pub(crate) fn next_deadline(&self) -> Option<(JobId, Instant)> {
        self.open
            .iter()
            .filter_map(|(job, deadline)| deadline.map(|at| (*job, at)))
            .min_by_key(|(job, at)| (*at, *job))
    }

    /// Close `job`'s context. Errors are logged and swallowed.
    pub(crate) async fn close(&mut self, job: JobId) {
        self.forget(job);
        if let Err(err) = self.launcher.close(job).await {
            log::debug!("closing {job}: {err:#}");
        }
    }

    /// Abort pending opens and close every known context.
    pub(crate) async fn close_all(&mut self) -> Vec<JobId> {
        self.opening.abort_all();
        let mut jobs: Vec<JobId> = self
            .opening_ids
            .drain()
            .chain(self.open.drain().map(|(job, _)| job))
            .collect();
        jobs.sort();
        for job in &jobs {
            if let Err(err) = self.launcher.close(*job).await {
                log::debug!("closing {job}: {err:#}");
            }
        }
        jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_url_appends_param() {
        let url = Url::parse("https://sis.example.edu/s/1?tab=notes").unwrap();
        let marked = marked_url(&url, "rw_auto");
        assert_eq!(marked.as_str(), "https://sis.example.edu/s/1?tab=notes&rw_auto=1");
    }

    #[test]
    fn marked_url_replaces_existing_param() {
        let url = Url::parse("https://sis.example.edu/s/1?rw_auto=0&x=y").unwrap();
        let marked = marked_url(&url, "rw_auto");
        assert_eq!(marked.as_str(), "https://sis.example.edu/s/1?x=y&rw_auto=1");
    }

    #[test]
    fn reporter_is_keyed_by_job() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = CompletionReporter::new(JobId(7), tx);
        assert!(reporter.matched(None));
        assert_eq!(
            rx.try_recv().unwrap(),
            CompletionSignal {
                job: JobId(7),
                report: JobReport::Matched { payload: None }
            }
        );
        drop(rx);
        assert!(!reporter.finished());
    }

    #[test]
    fn report_json_shape() {
        let json = serde_json::to_value(JobReport::Matched {
            payload: Some(serde_json::json!({"marker": "Submitted"})),
        })
        .unwrap();
        assert_eq!(json["type"], "Matched");
        assert_eq!(json["payload"]["marker"], "Submitted");
    }
}
