//! Execution contexts backed by plain HTTP fetches.
//!
//! Opening a context sends the request and waits for the response head, so
//! connection errors and non-success statuses surface as open failures. The
//! body is then scanned in a background task which reports the outcome.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::lifecycle::{ContextLauncher, JobId, LaunchError, OpenRequest};

/// Fetches each target and looks for submission markers in the body.
pub struct HttpLauncher {
    http: reqwest::Client,
    markers: Vec<String>,
    tasks: Mutex<HashMap<JobId, AbortHandle>>,
}

impl HttpLauncher {
    /// Markers used when none are configured.
    pub const DEFAULT_MARKERS: &'static [&'static str] = &["submitted", "submission received"];

    /// Request timeout for a single fetch.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Build a launcher matching any of `markers` (case-insensitive).
    pub fn new(markers: Vec<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Self::DEFAULT_REQUEST_TIMEOUT)
            .user_agent(concat!("rosterwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| anyhow::anyhow!("build http client: {err:#}"))?;

        let mut markers: Vec<String> = markers
            .into_iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        if markers.is_empty() {
            markers = Self::DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect();
        }

        Ok(Self {
            http,
            markers,
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Markers in effect (lowercased).
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn `job`'s scan task. The map stays locked until the handle is
    /// recorded, so a `close` racing with a fast task always finds it.
    fn spawn_scan<F>(&self, job: JobId, scan: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks();
        let task = tokio::spawn(scan);
        tasks.insert(job, task.abort_handle());
    }
}

/// First marker found in `body`, compared case-insensitively.
pub(crate) fn find_marker<'a>(body: &str, markers: &'a [String]) -> Option<&'a str> {
    let body = body.to_lowercase();
    markers
        .iter()
        .find(|m| body.contains(m.as_str()))
        .map(String::as_str)
}

impl ContextLauncher for HttpLauncher {
    async fn open(&self, request: OpenRequest) -> Result<(), LaunchError> {
        let OpenRequest {
            job, url, reporter, ..
        } = request;

        let res = self.http.get(url.clone()).send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(LaunchError::Status(status));
        }

        let markers = self.markers.clone();
        self.spawn_scan(job, async move {
            match res.text().await {
                Ok(body) => match find_marker(&body, &markers) {
                    Some(marker) => {
                        log::debug!("{job}: found {marker:?} at {url}");
                        reporter.matched(Some(serde_json::json!({
                            "marker": marker,
                            "status": status.as_u16(),
                        })));
                    }
                    None => {
                        reporter.finished();
                    }
                },
                Err(err) => {
                    log::warn!("{job}: reading {url}: {err:#}");
                    reporter.finished();
                }
            }
        });
        Ok(())
    }

    async fn close(&self, job: JobId) -> Result<(), LaunchError> {
        if let Some(task) = self.tasks().remove(&job) {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_marker_is_case_insensitive() {
        let markers = vec!["submitted".to_string(), "received".to_string()];
        assert_eq!(find_marker("<p>Status: SUBMITTED</p>", &markers), Some("submitted"));
        assert_eq!(find_marker("form received", &markers), Some("received"));
        assert_eq!(find_marker("draft", &markers), None);
    }

    #[test]
    fn blank_markers_fall_back_to_defaults() {
        let launcher = HttpLauncher::new(vec!["  ".into()]).unwrap();
        assert_eq!(launcher.markers(), HttpLauncher::DEFAULT_MARKERS);
        let launcher = HttpLauncher::new(vec![" Turned In ".into()]).unwrap();
        assert_eq!(launcher.markers(), ["turned in"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scan_that_closes_itself_leaves_no_entry() {
        let launcher = std::sync::Arc::new(HttpLauncher::new(Vec::new()).unwrap());
        for i in 0..64 {
            let job = JobId(i);
            let (done_tx, done_rx) = tokio::sync::oneshot::channel();
            let closer = launcher.clone();
            launcher.spawn_scan(job, async move {
                closer.close(job).await.unwrap();
                let _ = done_tx.send(());
            });
            done_rx.await.unwrap();
            assert!(launcher.tasks().is_empty(), "{job} left behind");
        }
    }

    #[tokio::test]
    async fn closing_unknown_jobs_is_fine() {
        let launcher = HttpLauncher::new(Vec::new()).unwrap();
        launcher.close(JobId(42)).await.unwrap();
        launcher.close(JobId(42)).await.unwrap();
    }
}
