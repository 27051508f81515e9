//! Logger setup for the command line

use std::io::{IsTerminal, Write};

/// ANSI color code and padded label for a log level
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Default filter for the verbosity flags; quiet wins over verbose
pub fn default_level(verbose: bool, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    }
}

/// Initialize the global logger. `RUST_LOG` overrides the flags.
///
/// Calling this more than once keeps the first logger.
pub fn init_logging(verbose: bool, quiet: bool) {
    let color = std::io::stderr().is_terminal();
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level(verbose, quiet)),
    )
    .format(move |buf, record| {
        let (pre, label, post) = level_style(record.level(), color);
        writeln!(buf, "[{pre}{label}{post}] {}", record.args())
    })
    .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level() {
        assert_eq!(default_level(false, false), "info");
        assert_eq!(default_level(true, false), "debug");
        assert_eq!(default_level(true, true), "error");
    }

    #[test]
    fn test_level_style_without_color() {
        assert_eq!(level_style(log::Level::Warn, false), ("", "WARN ", ""));
    }
}
