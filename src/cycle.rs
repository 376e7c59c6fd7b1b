//! One reconciliation cycle: assemble -> resolve -> diff -> plan -> apply ->
//! commit.
//!
//! Cycles never run concurrently against the same baseline; the reconciler
//! owns the bookkeeper and takes `&mut self` for the read-modify-write, so
//! the single-writer discipline is enforced by the borrow checker rather
//! than a lock. Cancellation is cooperative: a cycle always runs to
//! completion and the caller acts on `restart_required` afterwards.

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::Result;
use crate::apply::apply_plan;
use crate::assemble::assemble;
use crate::baseline::Bookkeeper;
use crate::config::Config;
use crate::diff::{ChangeSet, diff};
use crate::manager::ServiceManager;
use crate::model::DesiredStateDocument;
use crate::outcome::{CycleOutcome, ReconcileReason, summarize};
use crate::plan::{Plan, PlanContext, plan};
use crate::resolve::{ContentResolver, resolve_all};

pub struct Reconciler {
    config: Config,
    bookkeeper: Bookkeeper,
    resolver: ContentResolver,
    manager: Box<dyn ServiceManager>,
}

impl Reconciler {
    pub fn new(config: Config, manager: Box<dyn ServiceManager>) -> Self {
        let bookkeeper = Bookkeeper::new(config.applied_state_path.clone());
        let resolver = ContentResolver::new(config.image_mounts_dir.clone());
        Self {
            config,
            bookkeeper,
            resolver,
            manager,
        }
    }

    /// Run one full cycle against the given document.
    ///
    /// Structural input errors (ambiguous files, orphan drop-ins) abort
    /// before any step executes. Execution errors are accumulated per step;
    /// the baseline is committed either way so the next cycle retries only
    /// what still diffs as changed.
    pub fn reconcile(
        &mut self,
        document: &DesiredStateDocument,
        reason: ReconcileReason,
    ) -> Result<CycleOutcome> {
        let checksum = document.checksum();
        let (changes, execution_plan, desired, unresolved) = self.prepare(document)?;

        info!(
            files = changes.files.len(),
            units = changes.units.len(),
            steps = execution_plan.steps.len(),
            reason = %reason,
            "reconciling"
        );

        let report = apply_plan(&execution_plan, self.manager.as_ref());

        // Commit the attempted state, splicing the previous record back in
        // for files that could not be resolved this cycle: they were not
        // touched, so the old baseline is still the truth about them.
        let mut to_commit = desired;
        if !unresolved.is_empty()
            && let Some(previous) = self.bookkeeper.load()?
        {
            for file in &unresolved {
                if let Some(prev) = previous.files.get(&file.path) {
                    to_commit.files.insert(file.path.clone(), prev.clone());
                }
            }
        }
        self.bookkeeper.commit(&to_commit)?;

        let outcome = summarize(
            checksum,
            reason,
            &changes,
            &unresolved,
            &report,
            execution_plan.cancel_self,
        );
        if outcome.converged() {
            info!(checksum = %outcome.checksum, "cycle applied");
        } else {
            warn!(
                checksum = %outcome.checksum,
                failed = outcome.failures.len(),
                "cycle applied with failures"
            );
        }
        if outcome.restart_required {
            info!("own unit changed; requesting restart");
        }
        Ok(outcome)
    }

    /// Compute the change set and plan without executing or committing.
    pub fn preview(&self, document: &DesiredStateDocument) -> Result<(ChangeSet, Plan)> {
        let (changes, execution_plan, _, _) = self.prepare(document)?;
        Ok((changes, execution_plan))
    }

    fn prepare(
        &self,
        document: &DesiredStateDocument,
    ) -> Result<(
        ChangeSet,
        Plan,
        crate::model::DesiredState,
        Vec<crate::resolve::UnresolvedFile>,
    )> {
        let assembled = assemble(
            &document.files,
            &document.units,
            &document.extension_files,
            &document.extension_units,
        )?;
        let (desired, unresolved) = resolve_all(&assembled, &self.resolver);
        for file in &unresolved {
            warn!(path = %file.path.display(), error = %file.error, "content unavailable");
        }

        let applied = self.bookkeeper.load()?.unwrap_or_default();
        let unresolvable: BTreeSet<PathBuf> =
            unresolved.iter().map(|u| u.path.clone()).collect();
        let changes = diff(&desired, &applied, &unresolvable);

        let ctx = PlanContext {
            unit_dir: &self.config.unit_dir,
            self_unit: &self.config.self_unit,
        };
        let execution_plan = plan(&changes, &desired.units, &ctx);
        Ok((changes, execution_plan, desired, unresolved))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::manager::{ManagerAction, RecordingManager};
    use crate::model::{Encoding, FileContent, FileSpec, UnitCommand, UnitSpec};
    use crate::outcome::CycleStatus;

    struct Fixture {
        reconciler: Reconciler,
        manager: std::sync::Arc<RecordingManager>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            unit_dir: dir.path().join("units"),
            document_path: dir.path().join("desired.json"),
            image_mounts_dir: dir.path().join("mounts"),
            applied_state_path: dir.path().join("last-applied.json"),
            self_unit: "nodesync.service".into(),
            sync_period_secs: 300,
            step_timeout_secs: 5,
        };
        let manager = std::sync::Arc::new(RecordingManager::new());
        Fixture {
            reconciler: Reconciler::new(config, Box::new(manager.clone())),
            manager,
            _dir: dir,
        }
    }

    fn doc_with_unit(dir: &Path, content: &str) -> DesiredStateDocument {
        DesiredStateDocument {
            files: vec![FileSpec {
                path: dir.join("managed.conf"),
                content: FileContent::Inline {
                    encoding: Encoding::Plain,
                    data: "conf".into(),
                },
                permissions: Some(0o640),
                transmit_unencoded: false,
            }],
            units: vec![UnitSpec {
                name: "svc.service".into(),
                enable: Some(true),
                command: Some(UnitCommand::Start),
                content: Some(content.into()),
                drop_ins: Vec::new(),
                files: Vec::new(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn second_cycle_is_idempotent() {
        let mut fx = fixture();
        let doc = doc_with_unit(fx._dir.path(), "#svc");

        let first = fx
            .reconciler
            .reconcile(&doc, ReconcileReason::DeclarativeChange)
            .expect("first cycle");
        assert_eq!(first.status, CycleStatus::Applied);
        assert!(!first.changes.is_empty());
        fx.manager.take_actions();

        let second = fx
            .reconciler
            .reconcile(&doc, ReconcileReason::DeclarativeChange)
            .expect("second cycle");
        assert!(second.changes.is_empty());
        assert!(fx.manager.take_actions().is_empty());
    }

    #[test]
    fn partial_failure_commits_attempted_baseline() {
        let mut fx = fixture();
        fx.manager.fail_unit("svc.service");
        let doc = doc_with_unit(fx._dir.path(), "#svc");

        let first = fx
            .reconciler
            .reconcile(&doc, ReconcileReason::DeclarativeChange)
            .expect("first cycle");
        assert!(matches!(
            first.status,
            CycleStatus::AppliedWithFailures { .. }
        ));

        // The baseline records the attempt, so the next cycle does not
        // replay the already-successful file writes.
        fx.manager.take_actions();
        let second = fx
            .reconciler
            .reconcile(&doc, ReconcileReason::DeclarativeChange)
            .expect("second cycle");
        assert!(second.changes.is_empty());
    }

    #[test]
    fn unresolved_file_is_retried_once_mountable() {
        let mut fx = fixture();
        let image = "registry.example/tools:v1";
        let mut doc = doc_with_unit(fx._dir.path(), "#svc");
        let image_file = fx._dir.path().join("from-image");
        doc.files.push(FileSpec {
            path: image_file.clone(),
            content: FileContent::ImageRef {
                image: image.into(),
                path_in_image: "/payload".into(),
            },
            permissions: None,
            transmit_unencoded: false,
        });

        let first = fx
            .reconciler
            .reconcile(&doc, ReconcileReason::DeclarativeChange)
            .expect("first cycle");
        assert!(matches!(
            first.status,
            CycleStatus::AppliedWithFailures { failed: 1, .. }
        ));
        assert!(!image_file.exists());

        // mount arrives: collaborator lays the image contents down
        let mount = ContentResolver::new(fx._dir.path().join("mounts")).image_dir(image);
        std::fs::create_dir_all(&mount).expect("mkdir");
        std::fs::write(mount.join("payload"), b"tool-bytes").expect("write");

        let second = fx
            .reconciler
            .reconcile(&doc, ReconcileReason::DeclarativeChange)
            .expect("second cycle");
        assert_eq!(second.status, CycleStatus::Applied);
        assert_eq!(std::fs::read(&image_file).expect("read"), b"tool-bytes");
    }

    #[test]
    fn own_unit_change_sets_restart_and_skips_command() {
        let mut fx = fixture();
        let mut doc = doc_with_unit(fx._dir.path(), "#svc");
        fx.reconciler
            .reconcile(&doc, ReconcileReason::DeclarativeChange)
            .expect("seed cycle");
        fx.manager.take_actions();

        doc.units.push(UnitSpec {
            name: "nodesync.service".into(),
            enable: Some(true),
            command: Some(UnitCommand::Start),
            content: Some("#self-v2".into()),
            drop_ins: Vec::new(),
            files: Vec::new(),
        });

        let outcome = fx
            .reconciler
            .reconcile(&doc, ReconcileReason::AutoUpdate)
            .expect("self cycle");
        assert!(outcome.restart_required);
        assert_eq!(
            fx.manager.take_actions(),
            vec![
                ManagerAction::Enable("nodesync.service".into()),
                ManagerAction::DaemonReload,
            ]
        );
    }
}
