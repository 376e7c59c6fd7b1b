//! Diff engine: assembled desired state vs. the last applied baseline.
//!
//! Pure, deterministic, total. The baseline is the durable record of the
//! previous apply attempt, never the live filesystem: convergence is driven
//! by what we believe we applied, so a failed step keeps diffing as changed
//! only until a later attempt records it.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::model::{AppliedState, DesiredState, FileState, Unit};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One file's classification, with both sides kept for planning and for the
/// outcome summary's before/after rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub applied: Option<FileState>,
    pub desired: Option<FileState>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitChange {
    pub name: String,
    pub kind: ChangeKind,
    pub applied: Option<Unit>,
    pub desired: Option<Unit>,
}

impl UnitChange {
    /// Whether this change invalidates the service manager's unit cache.
    /// Enablement-only and command-only changes do not.
    pub fn requires_reload(&self) -> bool {
        match self.kind {
            ChangeKind::Added | ChangeKind::Removed => true,
            ChangeKind::Modified => {
                let (Some(applied), Some(desired)) = (&self.applied, &self.desired) else {
                    return true;
                };
                applied.content != desired.content || applied.drop_ins != desired.drop_ins
            }
        }
    }
}

/// Everything that differs between desired and applied. Empty means
/// converged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub files: Vec<FileChange>,
    pub units: Vec<UnitChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.units.is_empty()
    }
}

/// Classify every file and unit as added/modified/removed; unchanged entries
/// are omitted.
///
/// `unresolvable` lists desired paths whose content could not be
/// materialized this cycle. They are absent from `desired.files`, but their
/// absence must not read as removal: the file stays untouched on disk and is
/// retried once resolvable.
pub fn diff(
    desired: &DesiredState,
    applied: &AppliedState,
    unresolvable: &BTreeSet<PathBuf>,
) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (path, state) in &desired.files {
        match applied.files.get(path) {
            None => changes.files.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Added,
                applied: None,
                desired: Some(state.clone()),
            }),
            Some(prev) if !prev.same_output(state) => changes.files.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Modified,
                applied: Some(prev.clone()),
                desired: Some(state.clone()),
            }),
            Some(_) => {}
        }
    }
    for (path, prev) in &applied.files {
        if !desired.files.contains_key(path) && !unresolvable.contains(path) {
            changes.files.push(FileChange {
                path: path.clone(),
                kind: ChangeKind::Removed,
                applied: Some(prev.clone()),
                desired: None,
            });
        }
    }

    for (name, unit) in &desired.units {
        match applied.units.get(name) {
            None => changes.units.push(UnitChange {
                name: name.clone(),
                kind: ChangeKind::Added,
                applied: None,
                desired: Some(unit.clone()),
            }),
            Some(prev) if prev != unit => changes.units.push(UnitChange {
                name: name.clone(),
                kind: ChangeKind::Modified,
                applied: Some(prev.clone()),
                desired: Some(unit.clone()),
            }),
            Some(_) => {}
        }
    }
    for (name, prev) in &applied.units {
        if !desired.units.contains_key(name) {
            changes.units.push(UnitChange {
                name: name.clone(),
                kind: ChangeKind::Removed,
                applied: Some(prev.clone()),
                desired: None,
            });
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DropIn, UnitCommand};

    fn file(content: &[u8], mode: u32) -> FileState {
        FileState {
            content: content.to_vec(),
            mode,
            unit: None,
        }
    }

    fn unit(enable: Option<bool>, content: &str, drop_ins: &[&str]) -> Unit {
        Unit {
            enable,
            command: Some(UnitCommand::Start),
            content: Some(content.to_string()),
            drop_ins: drop_ins
                .iter()
                .map(|n| DropIn {
                    name: n.to_string(),
                    content: format!("#{n}"),
                })
                .collect(),
        }
    }

    fn diff_plain(desired: &DesiredState, applied: &AppliedState) -> ChangeSet {
        diff(desired, applied, &BTreeSet::new())
    }

    #[test]
    fn empty_against_empty_is_converged() {
        assert!(diff_plain(&DesiredState::default(), &AppliedState::default()).is_empty());
    }

    #[test]
    fn file_classification() {
        let mut desired = DesiredState::default();
        desired.files.insert("/a".into(), file(b"x", 0o640));
        desired.files.insert("/same".into(), file(b"s", 0o600));
        desired.files.insert("/mode".into(), file(b"m", 0o700));

        let mut applied = AppliedState::default();
        applied.files.insert("/same".into(), file(b"s", 0o600));
        applied.files.insert("/mode".into(), file(b"m", 0o600));
        applied.files.insert("/gone".into(), file(b"g", 0o600));

        let changes = diff_plain(&desired, &applied);
        let kinds: Vec<(&str, ChangeKind)> = changes
            .files
            .iter()
            .map(|c| (c.path.to_str().unwrap(), c.kind))
            .collect();
        assert!(kinds.contains(&("/a", ChangeKind::Added)));
        assert!(kinds.contains(&("/mode", ChangeKind::Modified)));
        assert!(kinds.contains(&("/gone", ChangeKind::Removed)));
        assert_eq!(kinds.len(), 3, "unchanged /same must be omitted");
    }

    #[test]
    fn provenance_move_is_not_a_change() {
        let mut desired = DesiredState::default();
        desired.files.insert(
            "/f".into(),
            FileState {
                content: b"same".to_vec(),
                mode: 0o600,
                unit: None,
            },
        );
        let mut applied = AppliedState::default();
        applied.files.insert(
            "/f".into(),
            FileState {
                content: b"same".to_vec(),
                mode: 0o600,
                unit: Some("u.service".into()),
            },
        );
        assert!(diff_plain(&desired, &applied).is_empty());
    }

    #[test]
    fn unresolvable_is_not_removal() {
        let mut applied = AppliedState::default();
        applied.files.insert("/f".into(), file(b"old", 0o600));

        let unresolvable: BTreeSet<PathBuf> = [PathBuf::from("/f")].into();
        let changes = diff(&DesiredState::default(), &applied, &unresolvable);
        assert!(changes.is_empty());
    }

    #[test]
    fn unit_structural_changes() {
        let mut desired = DesiredState::default();
        desired
            .units
            .insert("new.service".into(), unit(Some(true), "#new", &[]));
        desired
            .units
            .insert("same.service".into(), unit(Some(true), "#same", &["a"]));
        desired
            .units
            .insert("flip.service".into(), unit(Some(true), "#flip", &[]));

        let mut applied = AppliedState::default();
        applied
            .units
            .insert("same.service".into(), unit(Some(true), "#same", &["a"]));
        applied
            .units
            .insert("flip.service".into(), unit(Some(false), "#flip", &[]));
        applied
            .units
            .insert("old.service".into(), unit(Some(true), "#old", &[]));

        let changes = diff_plain(&desired, &applied);
        let kinds: Vec<(&str, ChangeKind)> = changes
            .units
            .iter()
            .map(|c| (c.name.as_str(), c.kind))
            .collect();
        assert!(kinds.contains(&("new.service", ChangeKind::Added)));
        assert!(kinds.contains(&("flip.service", ChangeKind::Modified)));
        assert!(kinds.contains(&("old.service", ChangeKind::Removed)));
        assert_eq!(kinds.len(), 3);
    }

    #[test]
    fn drop_in_reorder_is_modified_without_reload_exemption() {
        let mut desired = DesiredState::default();
        desired
            .units
            .insert("u.service".into(), unit(Some(true), "#u", &["a", "b"]));
        let mut applied = AppliedState::default();
        applied
            .units
            .insert("u.service".into(), unit(Some(true), "#u", &["b", "a"]));

        let changes = diff_plain(&desired, &applied);
        assert_eq!(changes.units.len(), 1);
        assert_eq!(changes.units[0].kind, ChangeKind::Modified);
        assert!(changes.units[0].requires_reload());
    }

    #[test]
    fn enablement_only_change_does_not_require_reload() {
        let mut desired = DesiredState::default();
        desired
            .units
            .insert("u.service".into(), unit(Some(true), "#u", &[]));
        let mut applied = AppliedState::default();
        applied
            .units
            .insert("u.service".into(), unit(Some(false), "#u", &[]));

        let changes = diff_plain(&desired, &applied);
        assert_eq!(changes.units.len(), 1);
        assert!(!changes.units[0].requires_reload());
    }
}
