//! Logging setup and per-call debug selection.
//!
//! The crate logs through [`tracing`]. Binaries embedding the engine can call
//! [`init`] (feature `logging`) to install a formatted subscriber, or install
//! their own.
//!
//! Full script text is only logged for operations selected by a
//! [`DebugFilter`], which is built once from configuration and consulted on
//! every call.

use glob::Pattern;

use crate::config::LoggingConfig;

/// Selects the operations whose generated scripts are logged in full.
#[derive(Debug, Clone, Default)]
pub struct DebugFilter {
    patterns: Vec<Pattern>,
}

impl DebugFilter {
    /// Compile glob patterns; invalid patterns are skipped with a warning.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .filter_map(|p| match Pattern::new(p.as_ref()) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = p.as_ref(), error = %e, "ignoring invalid debug pattern");
                    None
                },
            })
            .collect();
        Self { patterns }
    }

    /// Build from the logging section of the engine configuration.
    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(&config.debug_patterns)
    }

    /// Whether calls to `operation` should log their script text.
    pub fn matches(&self, operation: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(operation))
    }

    /// `true` if no pattern is configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `config.level`. Returns `false` if a global
/// subscriber was already installed.
#[cfg(feature = "logging")]
pub fn init(config: &LoggingConfig) -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_globs() {
        let filter = DebugFilter::new(["list_*", "add_todo"]);
        assert!(filter.matches("list_projects"));
        assert!(filter.matches("add_todo"));
        assert!(!filter.matches("add_project"));
    }

    #[test]
    fn invalid_patterns_are_dropped() {
        let filter = DebugFilter::new(["[", "ok"]);
        assert!(filter.matches("ok"));
        assert!(!filter.is_empty());
        assert!(DebugFilter::default().is_empty());
    }

    #[test]
    fn built_from_config() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            debug_patterns: vec!["*".to_string()],
        };
        assert!(DebugFilter::from_config(&config).matches("anything"));
    }
}
