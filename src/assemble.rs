//! Desired-state assembly: owner + extension lists -> one canonical config.
//!
//! Total and side-effect-free. Files union by path, units fold by name with
//! an explicit fragment/base distinction, and every unit's embedded files are
//! flattened into the file set. Content is not resolved here; the resolver
//! turns the assembled config into a [`crate::model::DesiredState`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{FileContent, FileSpec, Unit, UnitSpec};

/// Malformed desired state. Surfaced before any step executes, since
/// proceeding could apply an inconsistent configuration.
#[derive(Debug, Error)]
pub enum AssembleError {
    /// The same path was declared more than once (standalone or embedded).
    /// No precedence order is defined; callers must avoid collisions.
    #[error("file {path} is declared more than once")]
    AmbiguousFile { path: PathBuf },

    /// Drop-in fragments for a unit that has no base definition anywhere.
    #[error("unit {unit} has drop-ins but no base definition")]
    OrphanDropIn { unit: String },

    /// Two base definitions for the same unit name.
    #[error("unit {unit} has more than one base definition")]
    DuplicateUnit { unit: String },
}

/// A declared file keyed into the assembled file set, content not yet
/// resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeclaredFile {
    pub content: FileContent,
    pub mode: u32,
    /// Set when the file was embedded in a unit's `files` list.
    pub unit: Option<String>,
}

/// The canonical merged configuration, prior to content resolution.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssembledConfig {
    pub files: BTreeMap<PathBuf, DeclaredFile>,
    pub units: BTreeMap<String, Unit>,
}

/// Merge owner and extension file/unit lists into one canonical config.
///
/// Owner-declared drop-ins precede extension-declared ones for the same
/// unit; insertion order is preserved within each list.
pub fn assemble(
    owner_files: &[FileSpec],
    owner_units: &[UnitSpec],
    extension_files: &[FileSpec],
    extension_units: &[UnitSpec],
) -> Result<AssembledConfig, AssembleError> {
    let mut config = AssembledConfig::default();

    for file in owner_files.iter().chain(extension_files) {
        insert_file(&mut config.files, file, None)?;
    }

    // Two-pass fold keyed by name: bases first, then fragments, so a
    // fragment may precede its base in either list.
    let all_units = || owner_units.iter().chain(extension_units);

    for unit in all_units() {
        for file in &unit.files {
            insert_file(&mut config.files, file, Some(unit.name.clone()))?;
        }

        if unit.is_fragment_only() {
            continue;
        }
        let base = Unit {
            enable: unit.enable,
            command: unit.command,
            content: unit.content.clone(),
            drop_ins: Vec::new(),
        };
        if config.units.insert(unit.name.clone(), base).is_some() {
            return Err(AssembleError::DuplicateUnit {
                unit: unit.name.clone(),
            });
        }
    }

    for unit in all_units() {
        let Some(base) = config.units.get_mut(&unit.name) else {
            return Err(AssembleError::OrphanDropIn {
                unit: unit.name.clone(),
            });
        };
        base.drop_ins.extend(unit.drop_ins.iter().cloned());
    }

    Ok(config)
}

fn insert_file(
    files: &mut BTreeMap<PathBuf, DeclaredFile>,
    file: &FileSpec,
    unit: Option<String>,
) -> Result<(), AssembleError> {
    let declared = DeclaredFile {
        content: file.content.clone(),
        mode: file.mode(),
        unit,
    };
    if files.insert(file.path.clone(), declared).is_some() {
        return Err(AssembleError::AmbiguousFile {
            path: file.path.clone(),
        });
    }
    Ok(())
}
