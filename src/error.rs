use thiserror::Error;

use crate::assemble::AssembleError;
use crate::baseline::BaselineError;
use crate::config::ConfigError;
use crate::model::DocumentError;

/// Whether retrying this operation may succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs/state.
    Permanent,
    /// Retry may help (transient contention/outage).
    Retryable,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Crate-level convenience error.
///
/// Not a "god error": it is a thin wrapper over canonical capability errors.
/// Per-step execution failures never reach this type; they are accumulated in
/// [`crate::apply::ApplyReport`] so a cycle can continue past them.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Baseline(#[from] BaselineError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            // Malformed desired state stays malformed until republished.
            Error::Assemble(_) => Transience::Permanent,
            Error::Document(e) => e.transience(),
            Error::Config(_) => Transience::Permanent,
            // Baseline I/O may recover (disk pressure, transient mount).
            Error::Baseline(_) => Transience::Retryable,
        }
    }
}
