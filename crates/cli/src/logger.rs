use std::io::Write;

use env_logger::Builder;
use log::{Level, LevelFilter};

const OWN_CRATES: [&str; 3] = ["rosterwatch", "rosterwatch_core", "rosterwatch_engine"];

/// Warnings only from dependencies, info (or debug) from our crates; `RUST_LOG` wins.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Warn);
    for name in OWN_CRATES {
        builder.filter_module(name, level);
    }
    builder
        .parse_default_env()
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            match record.level() {
                Level::Error | Level::Warn => writeln!(
                    buf,
                    "[{name} {} {}] {}",
                    record.level(),
                    record.target(),
                    record.args()
                ),
                _ => writeln!(buf, "[{name}] {}", record.args()),
            }
        })
        .init();
}
