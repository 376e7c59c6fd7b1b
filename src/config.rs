//! Config loading and persistence.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to write config to {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding unit files and their `<unit>.d/` drop-in dirs.
    pub unit_dir: PathBuf,
    /// Local path where the external watcher keeps the desired-state document.
    pub document_path: PathBuf,
    /// Root under which collaborators mount container images for extraction.
    pub image_mounts_dir: PathBuf,
    /// Durable baseline of the last applied desired state.
    pub applied_state_path: PathBuf,
    /// Name of the unit running this reconciler. A change to it gates
    /// self-restart instead of a normal command-phase action.
    pub self_unit: String,
    /// Periodic reconciliation interval.
    pub sync_period_secs: u64,
    /// Bound on each blocking service-manager call.
    pub step_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            unit_dir: PathBuf::from("/etc/systemd/system"),
            document_path: paths::data_dir().join("desired-state.json"),
            image_mounts_dir: paths::data_dir().join("mounts"),
            applied_state_path: paths::applied_state_path(),
            self_unit: "nodesync.service".to_string(),
            sync_period_secs: 300,
            step_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.sync_period_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

pub fn config_path() -> PathBuf {
    paths::config_dir().join("config.toml")
}

pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

pub fn load_or_init() -> Config {
    let path = config_path();
    if path.exists() {
        match load_from(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                return Config::default();
            }
        }
    }

    let cfg = Config::default();
    if let Err(e) = write_config(&path, &cfg) {
        tracing::warn!("failed to write default config: {e}");
    }
    cfg
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            reason: format!("failed to create {}: {e}", dir.display()),
        })?;
    }
    let contents = toml::to_string_pretty(cfg).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        reason: format!("failed to render config: {e}"),
    })?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let write_err = |reason: String| ConfigError::Write {
        path: path.to_path_buf(),
        reason,
    };

    let dir = path
        .parent()
        .ok_or_else(|| write_err("config path missing parent directory".to_string()))?;
    let temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| write_err(format!("failed to create temp file in {}: {e}", dir.display())))?;
    fs::write(temp.path(), data)
        .map_err(|e| write_err(format!("failed to write config temp file: {e}")))?;
    temp.persist(path)
        .map_err(|e| write_err(format!("failed to persist: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let cfg = Config {
            unit_dir: PathBuf::from("/run/units"),
            document_path: PathBuf::from("/run/desired.json"),
            image_mounts_dir: PathBuf::from("/run/mounts"),
            applied_state_path: PathBuf::from("/run/last-applied.json"),
            self_unit: "agent.service".to_string(),
            sync_period_secs: 60,
            step_timeout_secs: 5,
        };
        write_config(&path, &cfg).expect("write config");
        let loaded = load_from(&path).expect("load config");
        assert_eq!(loaded.unit_dir, PathBuf::from("/run/units"));
        assert_eq!(loaded.self_unit, "agent.service");
        assert_eq!(loaded.sync_period(), Duration::from_secs(60));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let partial: Config = toml::from_str("self_unit = \"x.service\"").expect("parse");
        assert_eq!(partial.self_unit, "x.service");
        assert_eq!(partial.unit_dir, Config::default().unit_dir);
        assert_eq!(partial.step_timeout_secs, 30);
    }
}
