use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings reloaded from the store at the start of every sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    /// Filter expression over `daysOut` (`all`, `>=5`, ...).
    #[serde(default = "Settings::default_filter")]
    pub filter: String,
    /// Maximum number of concurrently open inspection jobs.
    #[serde(default = "Settings::default_concurrency")]
    pub concurrency: usize,
    /// Seconds before an unresponsive job is force-closed; `None` waits forever.
    #[serde(default = "Settings::default_job_timeout_secs")]
    pub job_timeout_secs: Option<u64>,
    /// Query parameter appended to scheduler-driven visits.
    #[serde(default = "Settings::default_marker_param")]
    pub marker_param: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            filter: Self::default_filter(),
            concurrency: Self::default_concurrency(),
            job_timeout_secs: Self::default_job_timeout_secs(),
            marker_param: Self::default_marker_param(),
        }
    }
}

impl Settings {
    /// Upper bound on `concurrency`.
    pub const MAX_CONCURRENCY: usize = 64;

    /// Upper bound on `job_timeout_secs` (one week).
    pub const MAX_JOB_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

    fn default_filter() -> String {
        "all".to_string()
    }

    fn default_concurrency() -> usize {
        3
    }

    fn default_job_timeout_secs() -> Option<u64> {
        Some(300)
    }

    fn default_marker_param() -> String {
        "rw_auto".to_string()
    }

    /// Clamp and trim fields into their valid ranges.
    pub fn normalize(&mut self) {
        self.filter = self.filter.trim().to_string();
        if self.filter.is_empty() {
            self.filter = Self::default_filter();
        }
        self.concurrency = self.concurrency.clamp(1, Self::MAX_CONCURRENCY);
        self.job_timeout_secs = self
            .job_timeout_secs
            .filter(|&secs| secs > 0)
            .map(|secs| secs.min(Self::MAX_JOB_TIMEOUT_SECS));
        self.marker_param = self.marker_param.trim().to_string();
        if self.marker_param.is_empty() {
            self.marker_param = Self::default_marker_param();
        }
    }

    /// Per-job timeout as a [`Duration`].
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}
