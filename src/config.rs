//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::state::DEFAULT_RESET_INTERVAL;

/// How long to wait between event tap registration attempts
pub const DEFAULT_REGISTRATION_RETRY: Duration = Duration::from_secs(5);

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Workflow snapshot read at start-up, if present
    pub workflows_path: PathBuf,

    /// Idle interval after which an open sequence is abandoned
    pub reset_interval: Duration,

    /// Interval between event tap registration attempts
    pub registration_retry: Duration,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Self::resolve(&home, |name| std::env::var(name).ok())
    }

    fn resolve(home: &str, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("keyflow");

        let socket_path = var("KEYFLOW_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("daemon.sock"));
        let workflows_path = var("KEYFLOW_WORKFLOWS")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("workflows.json"));

        let reset_interval = match var("KEYFLOW_RESET_INTERVAL_MS") {
            Some(ms) => Duration::from_millis(
                ms.parse::<u64>()
                    .with_context(|| format!("invalid KEYFLOW_RESET_INTERVAL_MS: {ms}"))?,
            ),
            None => DEFAULT_RESET_INTERVAL,
        };

        Ok(Self {
            socket_path,
            data_dir,
            workflows_path,
            reset_interval,
            registration_retry: DEFAULT_REGISTRATION_RETRY,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::resolve("/Users/me", |_| None).unwrap();
        assert_eq!(
            config.socket_path,
            PathBuf::from("/Users/me/.local/share/keyflow/daemon.sock")
        );
        assert_eq!(
            config.workflows_path,
            PathBuf::from("/Users/me/.local/share/keyflow/workflows.json")
        );
        assert_eq!(config.reset_interval, Duration::from_secs(1));
        assert_eq!(config.registration_retry, Duration::from_secs(5));
    }

    #[test]
    fn test_config_env_overrides() {
        let config = Config::resolve("/Users/me", |name| match name {
            "KEYFLOW_SOCKET" => Some("/tmp/kf.sock".to_string()),
            "KEYFLOW_RESET_INTERVAL_MS" => Some("750".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/tmp/kf.sock"));
        assert_eq!(config.reset_interval, Duration::from_millis(750));
    }

    #[test]
    fn test_config_rejects_bad_interval() {
        let result = Config::resolve("/Users/me", |name| {
            (name == "KEYFLOW_RESET_INTERVAL_MS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
