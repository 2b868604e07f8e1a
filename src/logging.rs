//! logging
//!
//! Log subscriber setup.
//!
//! # Design
//!
//! The engine logs through `tracing` and never installs a subscriber
//! itself. Embedding tools call [`init`] once at startup; `RUST_LOG`
//! overrides the level derived from [`Verbosity`].

use tracing_subscriber::EnvFilter;

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Quiet mode - errors only
    Quiet,
    /// Normal mode - warnings and progress
    #[default]
    Normal,
    /// Debug mode - every remote call
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }

    /// Default filter directive for this level.
    pub fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Debug => "debug",
        }
    }

    /// Filter for this level, unless `RUST_LOG` says otherwise.
    pub fn env_filter(self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()))
    }
}

/// Install the global log subscriber.
///
/// Returns `false` if a subscriber was already installed.
pub fn init(verbosity: Verbosity) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(verbosity.env_filter())
        .with_target(verbosity == Verbosity::Debug)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_debug() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }

    #[test]
    fn directives() {
        assert_eq!(Verbosity::Quiet.directive(), "error");
        assert_eq!(Verbosity::Normal.directive(), "info");
        assert_eq!(Verbosity::Debug.directive(), "debug");
    }

    #[test]
    fn second_init_reports_existing_subscriber() {
        init(Verbosity::Quiet);
        assert!(!init(Verbosity::Quiet));
    }
}
