#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared data model and persistence for `rosterwatch` (candidates, filters, dedup, store).

/// Candidate and match record types.
pub mod candidate;
/// Dedup cache of already-matched targets.
pub mod dedup;
/// `daysOut` filter expressions.
pub mod filter;
/// Per-sweep settings document.
pub mod settings;
/// Durable JSON key-value store.
pub mod store;

pub use candidate::{Candidate, MatchRecord, Progress, TargetError};
pub use dedup::DedupCache;
pub use filter::{ParsedFilter, apply_filter, filter_candidates, parse_filter};
pub use settings::Settings;
pub use store::{JsonStore, MonitorStatus, StoreError};
