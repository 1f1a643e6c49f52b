use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::worker::BackoffPolicy;

/// Configuration shared by the `cavtc` CLI, its workers and the monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// SQLite file holding the four job collections, shared by all workers
    pub db_path: PathBuf,
    /// How long a store operation waits for the database lock before failing
    pub busy_timeout_secs: u64,
    /// Lower bound of the randomized idle backoff
    pub backoff_min_ms: u64,
    /// Upper bound of the randomized idle backoff
    pub backoff_max_ms: u64,
    /// Label recorded on claimed jobs; defaults to the host name
    pub worker_identity: Option<String>,
    /// External transcoder executable
    pub transcoder_program: PathBuf,
    /// Extra arguments passed to the transcoder before the file path
    pub transcoder_args: Vec<String>,
    /// File extensions picked up by enumeration (case-insensitive)
    pub media_extensions: Vec<String>,
    /// Directories whose path contains any of these are skipped
    pub exempt_substrings: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl QueueConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            db_path: home.join(".tmp").join(".cavtc.db"),
            busy_timeout_secs: 30,
            backoff_min_ms: 500,
            backoff_max_ms: 2000,
            worker_identity: None,
            transcoder_program: PathBuf::from("avtc"),
            transcoder_args: Vec::new(),
            media_extensions: ["mkv", "mp4", "m4v", "avi", "mov", "webm", "wmv", "flv", "mpg", "ts"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exempt_substrings: vec!["0in".to_string(), "0out".to_string()],
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backoff_min_ms > self.backoff_max_ms {
            bail!(
                "backoff_min_ms ({}) must not exceed backoff_max_ms ({})",
                self.backoff_min_ms,
                self.backoff_max_ms
            );
        }
        if self.busy_timeout_secs == 0 {
            bail!("busy_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_min_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = QueueConfig::default();
        assert!(cfg.db_path.ends_with(".tmp/.cavtc.db"));
        assert_eq!(cfg.busy_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.exempt_substrings, vec!["0in", "0out"]);
        assert!(cfg.media_extensions.iter().any(|e| e == "mkv"));
        cfg.validate().unwrap();
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let cfg = QueueConfig::load_config(Some(Path::new("/nonexistent/cavtc.toml"))).unwrap();
        assert_eq!(cfg.busy_timeout_secs, 30);
        let cfg = QueueConfig::load_config(None).unwrap();
        assert_eq!(cfg.transcoder_program, PathBuf::from("avtc"));
    }

    #[test]
    fn test_load_toml_with_partial_fields() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "db_path = \"/srv/queue/jobs.db\"\nbackoff_min_ms = 100\nbackoff_max_ms = 100\nworker_identity = \"rack-3\""
        )
        .unwrap();

        let cfg = QueueConfig::load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/srv/queue/jobs.db"));
        assert_eq!(cfg.worker_identity.as_deref(), Some("rack-3"));
        assert_eq!(cfg.backoff().min(), Duration::from_millis(100));
        // untouched fields keep their defaults
        assert_eq!(cfg.busy_timeout_secs, 30);
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"transcoder_program": "/usr/local/bin/avtc", "transcoder_args": ["--preset", "slow"]}}"#
        )
        .unwrap();

        let cfg = QueueConfig::load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.transcoder_program, PathBuf::from("/usr/local/bin/avtc"));
        assert_eq!(cfg.transcoder_args, vec!["--preset", "slow"]);
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "backoff_min_ms = 5000\nbackoff_max_ms = 10").unwrap();
        assert!(QueueConfig::load_config(Some(file.path())).is_err());
    }
}
