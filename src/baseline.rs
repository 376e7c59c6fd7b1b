//! Persistence bookkeeper for the applied-state baseline.
//!
//! The baseline is a single-owner durable value: one serialized blob,
//! overwritten atomically (write-temp-then-rename) after every apply
//! attempt, including partially failed ones, so the next cycle diffs
//! against what was actually attempted instead of replaying completed steps
//! forever. It is never read back except as the diff baseline.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::{AppliedState, DesiredState};

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("failed to read baseline {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("baseline {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to persist baseline {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

pub struct Bookkeeper {
    path: PathBuf,
}

impl Bookkeeper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the baseline. `None` on first run (nothing applied yet).
    pub fn load(&self) -> Result<Option<AppliedState>, BaselineError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BaselineError::Read {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };
        let state = serde_json::from_slice(&raw).map_err(|e| BaselineError::Corrupt {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(Some(state))
    }

    /// Overwrite the baseline with the state the just-completed plan was
    /// derived from.
    pub fn commit(&self, state: &DesiredState) -> Result<(), BaselineError> {
        let raw = Self::serialize(state);
        self.atomic_write(&raw)
    }

    /// The canonical serialization of a state, exposed so callers can
    /// publish a checksum over exactly what was persisted.
    pub fn serialize(state: &DesiredState) -> Vec<u8> {
        serde_json::to_vec(state).expect("applied state serialization is infallible")
    }

    fn atomic_write(&self, data: &[u8]) -> Result<(), BaselineError> {
        let write_err = |reason: String| BaselineError::Write {
            path: self.path.clone(),
            reason,
        };

        let dir = self
            .path
            .parent()
            .ok_or_else(|| write_err("baseline path missing parent directory".to_string()))?;
        fs::create_dir_all(dir)
            .map_err(|e| write_err(format!("failed to create {}: {e}", dir.display())))?;

        let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            write_err(format!("failed to create temp file in {}: {e}", dir.display()))
        })?;
        fs::write(temp.path(), data)
            .map_err(|e| write_err(format!("failed to write temp file: {e}")))?;
        temp.persist(&self.path)
            .map_err(|e| write_err(format!("failed to persist: {e}")))?;
        Ok(())
    }
}
