//! Structured logging built on top of `slog`/`sloggers`. Every long-lived networking object
//! is handed a child logger from its owner rather than constructing its own from scratch.

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::{Format, Severity};
use sloggers::Build;
use std::path::Path;

pub use slog::Logger;
pub use slog::{debug, error, info, o, trace, warn};

/// Builds a terminal logger at the given severity. Used for interactive runs where the
/// configuration store has not yet supplied a logging config file.
pub fn terminal(level: Severity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level);
    builder.destination(Destination::Stderr);
    builder.format(Format::Full);

    builder.build().expect("failed building terminal logger")
}

/// Loads a `sloggers` logger configuration from a TOML file, falling back to a sensible
/// terminal default when the file is absent. Mirrors the way `flux::config` loads
/// `NetSettings`.
pub fn from_file<P: AsRef<Path>>(path: P) -> Logger {
    use sloggers::LoggerConfig;

    match serdeconv::from_toml_file::<LoggerConfig, _>(path) {
        Ok(config) => config.build_logger().expect("failed building logger from config"),
        Err(_) => terminal(Severity::Debug),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_builds() {
        let log = terminal(Severity::Info);
        info!(log, "logger smoke test"; "component" => "flux::logging");
    }
}
