//! Plan execution: best-effort convergence with per-step accounting.
//!
//! Every step is attempted independently. A failing step is recorded with
//! its target identity and cause, and execution continues, so one bad unit
//! cannot block the rest of the host from converging. The plan is "fully
//! applied" only when zero steps failed.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use crate::manager::{ManagerError, ServiceManager};
use crate::plan::{Plan, Step};

#[derive(Debug, Error)]
pub enum StepError {
    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Manager(#[from] ManagerError),
}

/// One executed step and what happened to it.
#[derive(Debug)]
pub struct StepReport {
    pub step: Step,
    pub error: Option<StepError>,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub steps: Vec<StepReport>,
}

impl ApplyReport {
    pub fn attempted(&self) -> usize {
        self.steps.len()
    }

    pub fn failed(&self) -> usize {
        self.steps.iter().filter(|s| s.error.is_some()).count()
    }

    pub fn fully_applied(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.error.is_some())
    }
}

/// Execute every step of the plan in order.
pub fn apply_plan(plan: &Plan, manager: &dyn ServiceManager) -> ApplyReport {
    let mut report = ApplyReport::default();

    for step in &plan.steps {
        let result = execute(step, manager);
        match &result {
            Ok(()) => debug!("applied: {step}"),
            Err(e) => warn!("step failed: {step}: {e}"),
        }
        report.steps.push(StepReport {
            step: step.clone(),
            error: result.err(),
        });
    }

    report
}

fn execute(step: &Step, manager: &dyn ServiceManager) -> Result<(), StepError> {
    match step {
        Step::WriteFile {
            path,
            mode,
            content,
        } => write_file(path, *mode, content),
        // A target that is already gone is converged, not a failure.
        Step::RemoveFile { path } => match fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        },
        Step::RemoveTree { path } => match fs::remove_dir_all(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        },
        Step::Enable { unit } => Ok(manager.enable(unit)?),
        Step::Disable { unit } => Ok(manager.disable(unit)?),
        Step::Reload => Ok(manager.daemon_reload()?),
        Step::Start { unit } => Ok(manager.start(unit)?),
        Step::Stop { unit } => Ok(manager.stop(unit)?),
        Step::Restart { unit } => Ok(manager.restart(unit)?),
    }
}

/// Content lands before permissions, so a reader mid-write never observes a
/// short file that already carries the final mode.
fn write_file(path: &Path, mode: u32, content: &[u8]) -> Result<(), StepError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}
