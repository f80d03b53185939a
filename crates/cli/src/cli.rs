use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use rosterwatch_core::Settings;
use rosterwatch_engine::MonitorConfig;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "rosterwatch",
    version,
    about = "Sweeps student record pages for submission markers"
)]
pub struct Cli {
    /// Directory holding candidates, matches, settings and progress.
    ///
    /// Defaults to `$XDG_STATE_HOME/rosterwatch`.
    #[arg(long, env = "ROSTERWATCH_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Log debug output from rosterwatch crates.
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start monitoring until interrupted.
    Run(RunArgs),
    /// Manage the candidate list.
    Candidates {
        #[command(subcommand)]
        action: CandidatesAction,
    },
    /// Inspect or clear recorded matches.
    Matched {
        #[command(subcommand)]
        action: MatchedAction,
    },
    /// View or change per-sweep settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print the persisted monitoring status and progress.
    Status,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Text that marks a page as submitted (repeatable, case-insensitive).
    #[arg(long = "marker", env = "ROSTERWATCH_MARKERS", value_delimiter = ',')]
    pub markers: Vec<String>,

    /// Seconds to wait between the end of a sweep and the next one.
    #[arg(
        long,
        env = "ROSTERWATCH_RESTART_DELAY",
        default_value_t = 2,
        value_parser = clap::value_parser!(u64).range(..=MonitorConfig::MAX_RESTART_DELAY.as_secs())
    )]
    pub restart_delay: u64,

    /// Do not draw the progress bar.
    #[arg(long, env = "ROSTERWATCH_NO_PROGRESS", default_value_t = false)]
    pub no_progress: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CandidatesAction {
    /// Replace the candidate list with a JSON array from `file`.
    Load { file: PathBuf },
    /// Print the candidate list.
    Show,
}

#[derive(Debug, Clone, Subcommand)]
pub enum MatchedAction {
    /// Print recorded matches.
    Show,
    /// Forget every match so those targets are inspected again.
    Clear,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Print current settings.
    Show,
    /// Update settings; omitted fields keep their value.
    Set(ConfigSetArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ConfigSetArgs {
    /// `all` or a comparison on daysOut such as `>=5`.
    #[arg(long)]
    pub filter: Option<String>,

    /// Concurrent inspection jobs.
    #[arg(
        long,
        value_parser = clap::value_parser!(u16).range(1..=Settings::MAX_CONCURRENCY as i64)
    )]
    pub concurrency: Option<u16>,

    /// Seconds before an unresponsive job is closed (0 disables).
    #[arg(
        long,
        value_parser = clap::value_parser!(u64).range(..=Settings::MAX_JOB_TIMEOUT_SECS)
    )]
    pub job_timeout: Option<u64>,

    /// Query parameter added to automated visits.
    #[arg(long)]
    pub marker_param: Option<String>,
}
