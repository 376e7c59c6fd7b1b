//! File declarations and their resolved on-disk form.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default mode for files declared without explicit permissions.
///
/// Restrictive on purpose: declared content may carry credentials.
pub const DEFAULT_FILE_MODE: u32 = 0o600;

/// Content encoding of inline file data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    /// Raw bytes of the declared string.
    #[default]
    #[serde(rename = "")]
    Plain,
    #[serde(rename = "base64", alias = "b64")]
    Base64,
}

/// Where a file's bytes come from. Exactly one source per file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileContent {
    #[serde(rename_all = "camelCase")]
    Inline {
        #[serde(default)]
        encoding: Encoding,
        data: String,
    },
    /// A path extracted out of a locally mounted container image.
    #[serde(rename_all = "camelCase")]
    ImageRef {
        image: String,
        path_in_image: PathBuf,
    },
}

/// A declared file, as it appears in the desired-state document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    /// Absolute target path on the host.
    pub path: PathBuf,
    pub content: FileContent,
    /// Mode bits; [`DEFAULT_FILE_MODE`] when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<u32>,
    /// Transport hint for the publishing side; irrelevant to reconciliation.
    #[serde(default, skip_serializing_if = "is_false")]
    pub transmit_unencoded: bool,
}

impl FileSpec {
    pub fn mode(&self) -> u32 {
        self.permissions.unwrap_or(DEFAULT_FILE_MODE)
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A file after content resolution: the exact bytes and mode that belong on
/// disk. This is what diffing compares and what the baseline records, so two
/// declarations that resolve to the same bytes are the same file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    #[serde(with = "content_b64")]
    pub content: Vec<u8>,
    pub mode: u32,
    /// Name of the unit that declared this file, if it was embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl FileState {
    /// Equality of the on-disk outcome. Provenance (`unit`) is bookkeeping,
    /// not output: moving a file between a unit's list and the standalone
    /// list without changing bytes or mode is not a change.
    pub fn same_output(&self, other: &FileState) -> bool {
        self.content == other.content && self.mode == other.mode
    }
}

/// Serialize resolved bytes as base64 so the baseline blob stays line-safe.
mod content_b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw.as_bytes()).map_err(serde::de::Error::custom)
    }
}
