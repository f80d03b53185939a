mod cli;
mod commands;
mod logger;
mod signals;
mod ui;

use std::io::IsTerminal;
use std::time::Duration;

use clap::Parser;

use rosterwatch_core::JsonStore;
use rosterwatch_engine::{HttpLauncher, MonitorConfig, MonitorEvent, start_monitor};

use crate::cli::{Cli, Command, RunArgs};
use crate::logger::setup_logging;
use crate::signals::{Interrupt, spawn_interrupt_listener};
use crate::ui::Ui;

fn say(ui: Option<&Ui>, msg: &str) {
    match ui {
        Some(ui) => ui.println(msg),
        None => println!("{msg}"),
    }
}

async fn run(store: JsonStore, args: RunArgs) -> anyhow::Result<()> {
    let launcher = HttpLauncher::new(args.markers)?;
    let markers = launcher.markers().join(", ");

    let mut config = MonitorConfig::new(store.clone());
    config.restart_delay = Duration::from_secs(args.restart_delay);
    let monitor = start_monitor(config, launcher);
    let mut events = monitor.subscribe();

    let (interrupt_tx, mut interrupt_rx) = tokio::sync::mpsc::unbounded_channel::<Interrupt>();
    spawn_interrupt_listener(interrupt_tx);

    let ui = (!args.no_progress && std::io::stdout().is_terminal()).then(Ui::new);
    say(
        ui.as_ref(),
        &format!(
            "rosterwatch {} state={} markers=[{markers}]",
            env!("CARGO_PKG_VERSION"),
            store.dir().display()
        ),
    );

    monitor.start();
    let mut immediate_exit = false;
    let mut failed: Option<String> = None;

    loop {
        tokio::select! {
            interrupt = interrupt_rx.recv() => match interrupt {
                Some(Interrupt::Stop) => {
                    say(ui.as_ref(), "Stopping: closing open jobs (press CTRL+C again to exit immediately).");
                    monitor.shutdown();
                }
                Some(Interrupt::Abort) => {
                    immediate_exit = true;
                    break;
                }
                None => {}
            },
            evt = events.recv() => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::debug!("ui lagged by {n} event(s)");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                match evt {
                    MonitorEvent::SweepStarted { sweep, total, concurrency } => {
                        if let Some(ui) = &ui {
                            ui.start_sweep(sweep, total, concurrency);
                        }
                    }
                    MonitorEvent::Progress { current, total } => {
                        if let Some(ui) = &ui {
                            ui.set_progress(current, total);
                        }
                    }
                    MonitorEvent::SweepCompleted { sweep } => {
                        if let Some(ui) = &ui {
                            ui.set_status(&format!("sweep {sweep} done, restarting"));
                        }
                    }
                    MonitorEvent::Matched { record } => {
                        say(
                            ui.as_ref(),
                            &format!(
                                "MATCH {} {}",
                                record.identifier.as_deref().unwrap_or("-"),
                                record.target_url
                            ),
                        );
                    }
                    MonitorEvent::SweepEmpty => {
                        say(ui.as_ref(), "No candidates pass the current filter; nothing to monitor.");
                        monitor.shutdown();
                    }
                    MonitorEvent::Error { message } => {
                        failed = Some(message);
                        monitor.shutdown();
                    }
                    MonitorEvent::JobOpened { .. }
                    | MonitorEvent::JobFinished { .. }
                    | MonitorEvent::JobTimedOut { .. }
                    | MonitorEvent::CandidateSkipped { .. }
                    | MonitorEvent::Warning { .. }
                    | MonitorEvent::Stopped => {}
                    MonitorEvent::ShutDown => break,
                }
            }
        }
    }

    if let Some(ui) = &ui {
        ui.finish();
    }
    if immediate_exit {
        std::process::exit(130);
    }

    monitor.wait().await?;
    match failed {
        Some(message) => Err(anyhow::anyhow!("{message}")),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let dir = match cli.state_dir {
        Some(dir) => dir,
        None => JsonStore::default_dir()?,
    };
    let store = JsonStore::open(dir);

    match cli.command {
        Command::Run(args) => run(store, args).await,
        Command::Candidates { action } => commands::candidates(&store, action).await,
        Command::Matched { action } => commands::matched(&store, action).await,
        Command::Config { action } => commands::config(&store, action).await,
        Command::Status => commands::status(&store).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_markers() {
        let cli = Cli::try_parse_from([
            "rosterwatch",
            "--state-dir",
            "/tmp/rw",
            "run",
            "--marker",
            "submitted,turned in",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.markers, ["submitted", "turned in"]);
        assert_eq!(args.restart_delay, 2);
    }

    #[test]
    fn rejects_out_of_range_concurrency() {
        assert!(Cli::try_parse_from(["rosterwatch", "config", "set", "--concurrency", "0"]).is_err());
        assert!(Cli::try_parse_from(["rosterwatch", "config", "set", "--concurrency", "65"]).is_err());
        assert!(Cli::try_parse_from(["rosterwatch", "config", "set", "--concurrency", "64"]).is_ok());
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let huge = u64::MAX.to_string();
        assert!(Cli::try_parse_from(["rosterwatch", "run", "--restart-delay", huge.as_str()]).is_err());
        assert!(Cli::try_parse_from(["rosterwatch", "run", "--restart-delay", "86400"]).is_ok());
        assert!(Cli::try_parse_from(["rosterwatch", "config", "set", "--job-timeout", huge.as_str()]).is_err());
        assert!(Cli::try_parse_from(["rosterwatch", "config", "set", "--job-timeout", "604800"]).is_ok());
    }
}
