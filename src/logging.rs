//! Tracing subscriber setup for the `simdex` binary.
//!
//! Filter priority, highest first:
//!
//! 1. `SIMDEX_LOG` (directives, e.g. `simdex=debug,warn`)
//! 2. `RUST_LOG`
//! 3. `-v` / `-q` flags
//! 4. `[logging] level` from the settings file

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Verbosity requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    #[must_use]
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }
}

/// Installs the global subscriber, writing to stderr.
///
/// Does nothing if a subscriber is already installed.
pub fn init(configured_level: &str, verbosity: Verbosity, no_color: bool) {
    let filter = build_env_filter(configured_level, verbosity);
    let use_ansi = !no_color && std::io::stderr().is_terminal();

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(verbosity == Verbosity::Verbose);

    let result = if verbosity == Verbosity::Verbose {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.with_timer(fmt::time::uptime()))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.without_time().compact())
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

fn build_env_filter(configured_level: &str, verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var("SIMDEX_LOG")
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let directive = fallback_directive(configured_level, verbosity);
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn fallback_directive(configured_level: &str, verbosity: Verbosity) -> String {
    match verbosity {
        Verbosity::Quiet => "error".to_string(),
        Verbosity::Verbose => "warn,simdex=debug".to_string(),
        Verbosity::Normal => configured_level.to_string(),
    }
}
