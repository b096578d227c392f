//! Narrator configuration.

use std::str::FromStr;
use std::time::Duration;

/// Default number of history entries shown to the narrator.
pub const DEFAULT_HISTORY_WINDOW: usize = 9;

/// Default number of history entries shown to reconciliation.
pub const DEFAULT_RECONCILE_WINDOW: usize = 4;

/// Story logs longer than this are compacted instead of extended.
pub const DEFAULT_STORY_COMPACTION_THRESHOLD: usize = 10;

/// Default bound on every call to the text-generation service.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Command that throws the current game away and starts a new one.
pub const DEFAULT_RESET_COMMAND: &str = "RESET GAME";

/// Tunables for the narrator.
#[derive(Debug, Clone, PartialEq)]
pub struct NarratorConfig {
    /// History entries included in the narrative prompt.
    pub history_window: usize,
    /// History entries included in the reconciliation prompt.
    pub reconcile_window: usize,
    pub story_compaction_threshold: usize,
    /// Applied around every collaborator call, whatever the transport does.
    pub request_timeout: Duration,
    pub reset_command: String,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            reconcile_window: DEFAULT_RECONCILE_WINDOW,
            story_compaction_threshold: DEFAULT_STORY_COMPACTION_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reset_command: DEFAULT_RESET_COMMAND.to_string(),
        }
    }
}

impl NarratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, using defaults for missing values.
    ///
    /// Reads `OCTOPUS_HISTORY_WINDOW`, `OCTOPUS_RECONCILE_WINDOW`,
    /// `OCTOPUS_STORY_THRESHOLD` and `OCTOPUS_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            history_window: env_or("OCTOPUS_HISTORY_WINDOW", defaults.history_window),
            reconcile_window: env_or("OCTOPUS_RECONCILE_WINDOW", defaults.reconcile_window),
            story_compaction_threshold: env_or(
                "OCTOPUS_STORY_THRESHOLD",
                defaults.story_compaction_threshold,
            ),
            request_timeout: Duration::from_secs(env_or(
                "OCTOPUS_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            reset_command: defaults.reset_command,
        }
    }

    pub fn with_history_window(mut self, entries: usize) -> Self {
        self.history_window = entries;
        self
    }

    pub fn with_reconcile_window(mut self, entries: usize) -> Self {
        self.reconcile_window = entries;
        self
    }

    pub fn with_story_compaction_threshold(mut self, threshold: usize) -> Self {
        self.story_compaction_threshold = threshold;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reset_command(mut self, command: impl Into<String>) -> Self {
        self.reset_command = command.into();
        self
    }
}

/// Parse an environment variable, falling back to `default` when it is
/// missing or unparseable.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment variable");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NarratorConfig::default();
        assert_eq!(config.history_window, 9);
        assert_eq!(config.reconcile_window, 4);
        assert_eq!(config.story_compaction_threshold, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.reset_command, "RESET GAME");
    }

    #[test]
    fn test_builder() {
        let config = NarratorConfig::new()
            .with_history_window(3)
            .with_request_timeout(Duration::from_millis(50))
            .with_reset_command("RESTART");
        assert_eq!(config.history_window, 3);
        assert_eq!(config.request_timeout, Duration::from_millis(50));
        assert_eq!(config.reset_command, "RESTART");
    }

    #[test]
    fn test_env_or_falls_back() {
        assert_eq!(env_or("OCTOPUS_TEST_UNSET_VARIABLE", 7usize), 7);
    }
}
