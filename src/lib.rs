#![forbid(unsafe_code)]

pub mod apply;
pub mod assemble;
pub mod baseline;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod cycle;
pub mod diff;
pub mod error;
pub mod manager;
pub mod model;
pub mod outcome;
mod paths;
pub mod plan;
pub mod resolve;
pub mod telemetry;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the reconciliation surface at crate root for convenience
pub use crate::apply::{ApplyReport, StepError, StepReport, apply_plan};
pub use crate::assemble::{AssembleError, AssembledConfig, assemble};
pub use crate::baseline::Bookkeeper;
pub use crate::cycle::Reconciler;
pub use crate::diff::{ChangeKind, ChangeSet, FileChange, UnitChange, diff};
pub use crate::manager::{ManagerError, ServiceManager, Systemctl};
pub use crate::model::{
    AppliedState, DesiredState, DesiredStateDocument, DropIn, Encoding, FileContent, FileSpec,
    FileState, Unit, UnitCommand, UnitSpec,
};
pub use crate::outcome::{CycleOutcome, CycleStatus, ReconcileReason};
pub use crate::plan::{Plan, Step, plan, should_cancel};
pub use crate::resolve::{ContentResolver, ResolveError};
