//! Cycle outcome: what changed, what failed, and why the cycle ran.
//!
//! The outcome is the value an external status sink publishes (node
//! annotation, status object); the format there is the caller's concern.
//! Here we produce the checksum, a per-entity before/after description, and
//! the per-step failures, so an operator can tell "applied" from "attempted
//! but failed" for every entity.

use std::fmt;

use serde::Serialize;

use crate::apply::ApplyReport;
use crate::diff::{ChangeKind, ChangeSet};
use crate::model::{FileState, Unit, checksum_hex};
use crate::resolve::UnresolvedFile;

/// Why this cycle was triggered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileReason {
    /// The published document changed.
    #[default]
    DeclarativeChange,
    /// The publisher selected a new version automatically.
    AutoUpdate,
    /// Forced or expired rollout.
    Forced,
}

impl fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileReason::DeclarativeChange => write!(f, "declarative change"),
            ReconcileReason::AutoUpdate => write!(f, "auto-update"),
            ReconcileReason::Forced => write!(f, "forced"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CycleStatus {
    Applied,
    AppliedWithFailures { failed: usize, attempted: usize },
}

/// One entity's change, rendered for humans.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChangeDescription {
    pub entity: String,
    pub kind: ChangeKind,
    pub before: String,
    pub after: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub target: String,
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CycleOutcome {
    /// sha256 over the desired-state document this cycle applied.
    pub checksum: String,
    pub status: CycleStatus,
    pub reason: ReconcileReason,
    pub changes: Vec<ChangeDescription>,
    pub failures: Vec<StepFailure>,
    /// The reconciler's own definition changed; the host must exit so its
    /// supervisor restarts it.
    pub restart_required: bool,
}

impl CycleOutcome {
    pub fn converged(&self) -> bool {
        matches!(self.status, CycleStatus::Applied)
    }
}

pub fn summarize(
    checksum: String,
    reason: ReconcileReason,
    changes: &ChangeSet,
    unresolved: &[UnresolvedFile],
    report: &ApplyReport,
    restart_required: bool,
) -> CycleOutcome {
    let mut descriptions = Vec::new();
    for fc in &changes.files {
        descriptions.push(ChangeDescription {
            entity: format!("file {}", fc.path.display()),
            kind: fc.kind,
            before: describe_file(fc.applied.as_ref()),
            after: describe_file(fc.desired.as_ref()),
        });
    }
    for uc in &changes.units {
        descriptions.push(ChangeDescription {
            entity: format!("unit {}", uc.name),
            kind: uc.kind,
            before: describe_unit(uc.applied.as_ref()),
            after: describe_unit(uc.desired.as_ref()),
        });
    }

    let mut failures: Vec<StepFailure> = unresolved
        .iter()
        .map(|u| StepFailure {
            target: format!("resolve {}", u.path.display()),
            error: u.error.clone(),
        })
        .collect();
    failures.extend(report.failures().map(|s| StepFailure {
        target: s.step.to_string(),
        error: s.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
    }));

    let status = if failures.is_empty() {
        CycleStatus::Applied
    } else {
        CycleStatus::AppliedWithFailures {
            failed: failures.len(),
            attempted: report.attempted() + unresolved.len(),
        }
    };

    CycleOutcome {
        checksum,
        status,
        reason,
        changes: descriptions,
        failures,
        restart_required,
    }
}

fn describe_file(state: Option<&FileState>) -> String {
    match state {
        None => "absent".to_string(),
        Some(f) => format!(
            "sha256:{} mode={:o} ({} bytes)",
            &checksum_hex(&f.content)[..12],
            f.mode,
            f.content.len()
        ),
    }
}

fn describe_unit(unit: Option<&Unit>) -> String {
    let Some(u) = unit else {
        return "absent".to_string();
    };
    let enable = match u.enable {
        Some(true) => "enabled",
        Some(false) => "disabled",
        None => "enablement-unmanaged",
    };
    let command = match u.command {
        Some(crate::model::UnitCommand::Start) => "start",
        Some(crate::model::UnitCommand::Stop) => "stop",
        None => "none",
    };
    let content = match &u.content {
        Some(c) => format!("sha256:{}", &checksum_hex(c.as_bytes())[..12]),
        None => "none".to_string(),
    };
    let drop_ins: Vec<&str> = u.drop_ins.iter().map(|d| d.name.as_str()).collect();
    format!(
        "{enable} command={command} content={content} drop-ins=[{}]",
        drop_ins.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::FileChange;

    #[test]
    fn clean_cycle_is_applied() {
        let outcome = summarize(
            "abc".into(),
            ReconcileReason::DeclarativeChange,
            &ChangeSet::default(),
            &[],
            &ApplyReport::default(),
            false,
        );
        assert!(outcome.converged());
        assert!(outcome.changes.is_empty());
    }

    #[test]
    fn unresolved_files_count_as_failures() {
        let outcome = summarize(
            "abc".into(),
            ReconcileReason::AutoUpdate,
            &ChangeSet::default(),
            &[UnresolvedFile {
                path: "/f".into(),
                error: "image not mounted".into(),
            }],
            &ApplyReport::default(),
            false,
        );
        assert_eq!(
            outcome.status,
            CycleStatus::AppliedWithFailures {
                failed: 1,
                attempted: 1
            }
        );
        assert_eq!(outcome.failures[0].target, "resolve /f");
    }

    #[test]
    fn descriptions_carry_before_and_after() {
        let changes = ChangeSet {
            files: vec![FileChange {
                path: "/a".into(),
                kind: ChangeKind::Modified,
                applied: Some(FileState {
                    content: b"old".to_vec(),
                    mode: 0o600,
                    unit: None,
                }),
                desired: Some(FileState {
                    content: b"new".to_vec(),
                    mode: 0o640,
                    unit: None,
                }),
            }],
            units: Vec::new(),
        };
        let outcome = summarize(
            "abc".into(),
            ReconcileReason::Forced,
            &changes,
            &[],
            &ApplyReport::default(),
            false,
        );
        assert_eq!(outcome.changes.len(), 1);
        let change = &outcome.changes[0];
        assert_eq!(change.entity, "file /a");
        assert!(change.before.contains("mode=600"));
        assert!(change.after.contains("mode=640"));
        assert_ne!(change.before, change.after);
    }
}
