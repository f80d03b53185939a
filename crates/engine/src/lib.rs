#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Sweep engine for `rosterwatch` (admission, job lifecycle, auto-restart).

/// Public API for the engine crate.
pub mod api;
/// HTTP-backed execution contexts.
pub mod http;
/// Execution-context seam and completion signalling.
pub mod lifecycle;

mod engine;
mod scheduler;

pub use api::{
    ActiveJobSummary, MonitorConfig, MonitorEvent, MonitorHandle, StatusSnapshot, start_monitor,
};
pub use http::HttpLauncher;
pub use lifecycle::{
    CompletionReporter, CompletionSignal, ContextLauncher, JobId, JobReport, LaunchError,
    OpenRequest,
};
