//! Configuration types for shellbridge sessions.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Error;

/// Which backend a session should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Pick from the platform and available executables
    #[default]
    Auto,
    /// Pseudo-terminal process group
    Pty,
    /// tmux pane
    Tmux,
    /// Plain stdin/stdout/stderr pipes
    #[serde(alias = "subprocess")]
    Pipe,
}

/// Session configuration, loadable from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backend selection
    pub backend: BackendPreference,
    /// Completed lines retained in the output buffer
    pub history_limit: usize,
    /// Interval between completion checks, in milliseconds
    pub poll_interval_ms: u64,
    /// Command timeout when the caller gives none, in seconds
    pub default_timeout_secs: u64,
    /// Time given to the shell to apply the prompt directive, in milliseconds
    pub init_settle_ms: u64,
    /// Grace period between graceful and forced termination, in milliseconds
    pub close_grace_ms: u64,
    /// Time to wait for the prompt after an interrupt, in milliseconds
    pub interrupt_grace_ms: u64,
    /// Pane capture interval of the tmux reader, in milliseconds
    pub tmux_poll_interval_ms: u64,
    /// Terminal rows
    pub rows: u16,
    /// Terminal columns
    pub cols: u16,
    /// TERM environment variable value
    pub term: String,
    /// Substrings marking environment variables that are not passed to the shell
    pub env_denylist: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            history_limit: 10_000,
            poll_interval_ms: 100,
            default_timeout_secs: 30,
            init_settle_ms: 500,
            close_grace_ms: 2000,
            interrupt_grace_ms: 3000,
            tmux_poll_interval_ms: 100,
            rows: 1000,
            cols: 1000,
            term: "xterm-256color".to_string(),
            env_denylist: [
                "TOKEN",
                "SECRET",
                "PASSWORD",
                "PASSWD",
                "API_KEY",
                "ACCESS_KEY",
                "PRIVATE_KEY",
                "CREDENTIAL",
                "SESSION_KEY",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        let config: SessionConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.history_limit == 0 {
            return Err(Error::Config("history_limit must be > 0".to_string()));
        }
        if self.poll_interval_ms == 0 || self.tmux_poll_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be > 0".to_string()));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(Error::Config("terminal dimensions must be > 0".to_string()));
        }
        Ok(())
    }

    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Default command timeout as a `Duration`.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Settle delay after prompt installation.
    pub fn init_settle(&self) -> Duration {
        Duration::from_millis(self.init_settle_ms)
    }

    /// Grace period before forced termination.
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Time to wait for the prompt after an interrupt.
    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    /// Pane capture interval of the tmux reader.
    pub fn tmux_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tmux_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.backend, BackendPreference::Auto);
        assert_eq!(config.history_limit, 10_000);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert!(config.env_denylist.iter().any(|p| p == "TOKEN"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_history_limit() {
        let config = SessionConfig {
            history_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_dimensions() {
        let config = SessionConfig {
            cols: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
backend: pipe
history_limit: 500
poll_interval_ms: 20
default_timeout_secs: 5
env_denylist:
  - TOKEN
"#;

        let config = SessionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.backend, BackendPreference::Pipe);
        assert_eq!(config.history_limit, 500);
        assert_eq!(config.poll_interval_ms, 20);
        assert_eq!(config.default_timeout(), Duration::from_secs(5));
        assert_eq!(config.env_denylist, vec!["TOKEN".to_string()]);
        // Unspecified fields keep their defaults
        assert_eq!(config.close_grace_ms, 2000);
    }

    #[test]
    fn test_parse_yaml_rejects_invalid() {
        assert!(SessionConfig::from_yaml("history_limit: 0").is_err());
        assert!(SessionConfig::from_yaml("backend: telnet").is_err());
    }

    #[test]
    fn test_backend_preference_names() {
        let backend = |yaml: &str| SessionConfig::from_yaml(yaml).map(|c| c.backend);
        assert_eq!(backend("backend: tmux").unwrap(), BackendPreference::Tmux);
        assert_eq!(backend("backend: subprocess").unwrap(), BackendPreference::Pipe);
        assert!(backend("backend: screen").is_err());
    }
}
