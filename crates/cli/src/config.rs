use anyhow::{Context, Result};
use ivie_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::CliArgs;

const DEFAULT_CONFIG_FILE: &str = "ivie.toml";

/// CLI configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Scheduler settings; missing keys fall back to their defaults.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl CliConfig {
    /// Return the default config file path: ./ivie.toml
    pub fn default_config_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load config from the given path, or the default path.
    /// Returns default config if the file does not exist.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path(),
        };
        Self::load_from(&config_path)
    }

    fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            debug!(?config_path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        debug!(?config_path, "Loading config");
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config: {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", config_path.display()))
    }

    /// Resolve the scheduler config.
    /// Priority: CLI argument / env var > config file > defaults.
    pub fn resolve_scheduler(&self, args: &CliArgs) -> SchedulerConfig {
        let mut config = self.scheduler.clone();
        if let Some(workers) = args.workers {
            config.worker_threads = workers;
        }
        if let Some(max) = args.max_workers {
            config.max_worker_threads = max;
        }
        if let Some(poll) = args.poll_ms {
            config.poll_interval_ms = poll;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["ivie-sched"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scheduler.worker_threads, 0);
        assert_eq!(config.scheduler.max_worker_threads, 4);
        assert_eq!(config.scheduler.poll_interval_ms, 10);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nworker_threads = 3\nmax_worker_threads = 8").unwrap();

        let config = CliConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.scheduler.worker_threads, 3);
        assert_eq!(config.scheduler.max_worker_threads, 8);
        assert_eq!(config.scheduler.poll_interval_ms, 10);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler]\nworker_threads = \"many\"").unwrap();

        let err = CliConfig::load(file.path().to_str()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = CliConfig::default();
        config.scheduler.worker_threads = 2;
        config.scheduler.poll_interval_ms = 25;

        let resolved = config.resolve_scheduler(&args(&["--workers", "6", "--max-workers", "6"]));
        assert_eq!(resolved.worker_threads, 6);
        assert_eq!(resolved.max_worker_threads, 6);
        assert_eq!(resolved.poll_interval_ms, 25);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = CliConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: CliConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.scheduler.max_worker_threads, config.scheduler.max_worker_threads);
    }
}
