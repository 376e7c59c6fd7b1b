//! Content resolution: declared content -> bytes.
//!
//! Inline data is decoded per its declared encoding. Image-extracted content
//! is read from beneath the image's already-mounted directory; mounting and
//! unmounting are a collaborator's responsibility, so a missing mount is a
//! resolution failure, never a trigger to mount.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

use crate::assemble::AssembledConfig;
use crate::model::{DesiredState, Encoding, FileContent, FileState};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Image not mounted locally or path absent inside the mount.
    #[error("content unavailable: {path} from image {image}: {reason}")]
    ContentUnavailable {
        image: String,
        path: PathBuf,
        reason: String,
    },
    #[error("invalid base64 in inline content: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Pure reader over locally mounted image directories.
#[derive(Debug, Clone)]
pub struct ContentResolver {
    mounts_root: PathBuf,
}

impl ContentResolver {
    pub fn new(mounts_root: impl Into<PathBuf>) -> Self {
        Self {
            mounts_root: mounts_root.into(),
        }
    }

    /// Materialize declared content into bytes. No side effects.
    pub fn resolve(&self, content: &FileContent) -> Result<Vec<u8>, ResolveError> {
        match content {
            FileContent::Inline { encoding, data } => match encoding {
                Encoding::Plain => Ok(data.as_bytes().to_vec()),
                Encoding::Base64 => Ok(BASE64.decode(data.as_bytes())?),
            },
            FileContent::ImageRef {
                image,
                path_in_image,
            } => {
                let path = self.image_dir(image).join(strip_root(path_in_image));
                std::fs::read(&path).map_err(|e| ResolveError::ContentUnavailable {
                    image: image.clone(),
                    path: path_in_image.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Mount directory for one image reference. The collaborator that mounts
    /// images lays them out under the mounts root by sanitized reference.
    pub fn image_dir(&self, image: &str) -> PathBuf {
        let sanitized: String = image
            .chars()
            .map(|c| if c == '/' || c == ':' || c == '@' { '_' } else { c })
            .collect();
        self.mounts_root.join(sanitized)
    }
}

/// `path_in_image` is declared absolute ("/bin/tool"); joining it verbatim
/// would escape the mount dir.
fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

/// A desired file whose content could not be materialized this cycle.
///
/// Fatal for that one file only: the cycle proceeds without it and the
/// failure is surfaced in the outcome.
#[derive(Debug, Clone)]
pub struct UnresolvedFile {
    pub path: PathBuf,
    pub error: String,
}

/// Resolve every assembled file, partitioning successes from per-file
/// failures. Unresolvable files are absent from the returned state; callers
/// must make sure their absence is not mistaken for removal.
pub fn resolve_all(
    config: &AssembledConfig,
    resolver: &ContentResolver,
) -> (DesiredState, Vec<UnresolvedFile>) {
    let mut files = BTreeMap::new();
    let mut unresolved = Vec::new();

    for (path, declared) in &config.files {
        match resolver.resolve(&declared.content) {
            Ok(content) => {
                files.insert(
                    path.clone(),
                    FileState {
                        content,
                        mode: declared.mode,
                        unit: declared.unit.clone(),
                    },
                );
            }
            Err(e) => unresolved.push(UnresolvedFile {
                path: path.clone(),
                error: e.to_string(),
            }),
        }
    }

    (
        DesiredState {
            files,
            units: config.units.clone(),
        },
        unresolved,
    )
}
