//! Service-manager adapter.
//!
//! The planner and executor treat the manager as a capability interface:
//! blocking calls that succeed or fail, nothing about the IPC mechanism.
//! [`Systemctl`] shells out to systemctl with a bounded per-call timeout so
//! a hung manager becomes a recorded step failure instead of stalling the
//! cycle. [`RecordingManager`] is the test double.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// The manager itself cannot be reached (binary missing, bus down).
    #[error("service manager unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("`{command}` timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
    #[error("`{command}` failed: {detail}")]
    Failed { command: String, detail: String },
}

pub trait ServiceManager: Send + Sync {
    fn enable(&self, unit: &str) -> Result<(), ManagerError>;
    fn disable(&self, unit: &str) -> Result<(), ManagerError>;
    fn start(&self, unit: &str) -> Result<(), ManagerError>;
    fn stop(&self, unit: &str) -> Result<(), ManagerError>;
    fn restart(&self, unit: &str) -> Result<(), ManagerError>;
    fn daemon_reload(&self) -> Result<(), ManagerError>;
}

impl<M: ServiceManager + ?Sized> ServiceManager for std::sync::Arc<M> {
    fn enable(&self, unit: &str) -> Result<(), ManagerError> {
        (**self).enable(unit)
    }

    fn disable(&self, unit: &str) -> Result<(), ManagerError> {
        (**self).disable(unit)
    }

    fn start(&self, unit: &str) -> Result<(), ManagerError> {
        (**self).start(unit)
    }

    fn stop(&self, unit: &str) -> Result<(), ManagerError> {
        (**self).stop(unit)
    }

    fn restart(&self, unit: &str) -> Result<(), ManagerError> {
        (**self).restart(unit)
    }

    fn daemon_reload(&self) -> Result<(), ManagerError> {
        (**self).daemon_reload()
    }
}

/// systemctl-backed manager.
pub struct Systemctl {
    timeout: Duration,
}

impl Systemctl {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, args: &[&str]) -> Result<(), ManagerError> {
        let rendered = format!("systemctl {}", args.join(" "));

        let mut child = Command::new("systemctl")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ManagerError::Unreachable {
                reason: e.to_string(),
            })?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ManagerError::Timeout {
                            command: rendered,
                            timeout_secs: self.timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => {
                    return Err(ManagerError::Unreachable {
                        reason: e.to_string(),
                    });
                }
            }
        };

        if status.success() {
            return Ok(());
        }

        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            let _ = pipe.read_to_string(&mut stderr);
        }
        Err(ManagerError::Failed {
            command: rendered,
            detail: format!("{status}: {}", stderr.trim()),
        })
    }
}

impl ServiceManager for Systemctl {
    fn enable(&self, unit: &str) -> Result<(), ManagerError> {
        self.run(&["enable", unit])
    }

    fn disable(&self, unit: &str) -> Result<(), ManagerError> {
        self.run(&["disable", unit])
    }

    fn start(&self, unit: &str) -> Result<(), ManagerError> {
        self.run(&["start", unit])
    }

    fn stop(&self, unit: &str) -> Result<(), ManagerError> {
        self.run(&["stop", unit])
    }

    fn restart(&self, unit: &str) -> Result<(), ManagerError> {
        self.run(&["restart", unit])
    }

    fn daemon_reload(&self) -> Result<(), ManagerError> {
        self.run(&["daemon-reload"])
    }
}

/// One recorded call against the fake manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagerAction {
    Enable(String),
    Disable(String),
    Start(String),
    Stop(String),
    Restart(String),
    DaemonReload,
}

/// In-memory manager that records every call, for tests and dry runs.
///
/// Failure injection: `fail_unit` makes calls naming that unit fail;
/// `set_unreachable` makes every call fail the way a down manager would.
#[derive(Default)]
pub struct RecordingManager {
    actions: Mutex<Vec<ManagerAction>>,
    fail_units: Mutex<Vec<String>>,
    unreachable: Mutex<bool>,
}

impl RecordingManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain recorded actions.
    pub fn take_actions(&self) -> Vec<ManagerAction> {
        std::mem::take(&mut self.actions.lock().expect("actions lock"))
    }

    pub fn fail_unit(&self, unit: &str) {
        self.fail_units
            .lock()
            .expect("fail lock")
            .push(unit.to_string());
    }

    pub fn set_unreachable(&self, down: bool) {
        *self.unreachable.lock().expect("unreachable lock") = down;
    }

    fn record(&self, action: ManagerAction, unit: Option<&str>) -> Result<(), ManagerError> {
        if *self.unreachable.lock().expect("unreachable lock") {
            return Err(ManagerError::Unreachable {
                reason: "injected outage".into(),
            });
        }
        if let Some(unit) = unit
            && self
                .fail_units
                .lock()
                .expect("fail lock")
                .iter()
                .any(|u| u == unit)
        {
            return Err(ManagerError::Failed {
                command: format!("{action:?}"),
                detail: "injected failure".into(),
            });
        }
        self.actions.lock().expect("actions lock").push(action);
        Ok(())
    }
}

impl ServiceManager for RecordingManager {
    fn enable(&self, unit: &str) -> Result<(), ManagerError> {
        self.record(ManagerAction::Enable(unit.to_string()), Some(unit))
    }

    fn disable(&self, unit: &str) -> Result<(), ManagerError> {
        self.record(ManagerAction::Disable(unit.to_string()), Some(unit))
    }

    fn start(&self, unit: &str) -> Result<(), ManagerError> {
        self.record(ManagerAction::Start(unit.to_string()), Some(unit))
    }

    fn stop(&self, unit: &str) -> Result<(), ManagerError> {
        self.record(ManagerAction::Stop(unit.to_string()), Some(unit))
    }

    fn restart(&self, unit: &str) -> Result<(), ManagerError> {
        self.record(ManagerAction::Restart(unit.to_string()), Some(unit))
    }

    fn daemon_reload(&self) -> Result<(), ManagerError> {
        self.record(ManagerAction::DaemonReload, None)
    }
}
