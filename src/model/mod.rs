//! Domain types for the reconciler.
//!
//! Module hierarchy follows the data lifecycle:
//! - file: declared files and their resolved on-disk form
//! - unit: declared units, drop-ins, and the merged unit shape
//! - this module: the wire document and the assembled desired/applied state

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::Transience;

pub mod file;
pub mod unit;

pub use file::{DEFAULT_FILE_MODE, Encoding, FileContent, FileSpec, FileState};
pub use unit::{DropIn, UNIT_FILE_MODE, Unit, UnitCommand, UnitSpec};

/// The desired-state document as published to the node: an owner list plus
/// an extension list of files and units. Retrieval and decoding from the
/// remote store is the watcher's job; the reconciler receives it parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesiredStateDocument {
    pub files: Vec<FileSpec>,
    pub units: Vec<UnitSpec>,
    pub extension_files: Vec<FileSpec>,
    pub extension_units: Vec<UnitSpec>,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read desired-state document {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse desired-state document: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },
}

impl DocumentError {
    pub fn transience(&self) -> Transience {
        match self {
            DocumentError::Read { .. } => Transience::Retryable,
            DocumentError::Parse { .. } => Transience::Permanent,
        }
    }
}

impl DesiredStateDocument {
    pub fn from_json(raw: &[u8]) -> Result<Self, DocumentError> {
        Ok(serde_json::from_slice(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let raw = std::fs::read(path).map_err(|e| DocumentError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&raw)
    }

    /// Hex sha256 over the canonical serialization, published alongside the
    /// cycle outcome so the control plane can tell which document landed.
    pub fn checksum(&self) -> String {
        let raw = serde_json::to_vec(self).expect("document serialization is infallible");
        checksum_hex(&raw)
    }
}

/// Hex-encoded sha256.
pub fn checksum_hex(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}

/// The assembled, resolved configuration a cycle converges toward.
///
/// Files are keyed by absolute path, units by name. All content has been
/// resolved to bytes, so equality here is equality of on-disk outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub files: BTreeMap<PathBuf, FileState>,
    pub units: BTreeMap<String, Unit>,
}

/// Durable record of the last desired state that was (attempted to be)
/// applied. Same shape as [`DesiredState`]; only ever read as a diff
/// baseline.
pub type AppliedState = DesiredState;

impl DesiredState {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.units.is_empty()
    }
}
