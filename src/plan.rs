//! Execution planning: ChangeSet -> ordered steps.
//!
//! Steps come out in five strict phases (files, enablement, manager reload,
//! unit commands, self-check), because each phase assumes the previous one
//! already landed on disk or in the manager's unit cache. Within the file
//! phase all writes precede all deletions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::diff::{ChangeKind, ChangeSet, UnitChange};
use crate::model::{UNIT_FILE_MODE, Unit, UnitCommand};

/// One typed operation against the filesystem or the service manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    WriteFile {
        path: PathBuf,
        mode: u32,
        content: Vec<u8>,
    },
    RemoveFile {
        path: PathBuf,
    },
    RemoveTree {
        path: PathBuf,
    },
    Enable {
        unit: String,
    },
    Disable {
        unit: String,
    },
    Reload,
    Start {
        unit: String,
    },
    Stop {
        unit: String,
    },
    Restart {
        unit: String,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::WriteFile { path, mode, .. } => {
                write!(f, "write {} (mode {:o})", path.display(), mode)
            }
            Step::RemoveFile { path } => write!(f, "remove {}", path.display()),
            Step::RemoveTree { path } => write!(f, "remove tree {}", path.display()),
            Step::Enable { unit } => write!(f, "enable {unit}"),
            Step::Disable { unit } => write!(f, "disable {unit}"),
            Step::Reload => write!(f, "reload service manager"),
            Step::Start { unit } => write!(f, "start {unit}"),
            Step::Stop { unit } => write!(f, "stop {unit}"),
            Step::Restart { unit } => write!(f, "restart {unit}"),
        }
    }
}

/// Produced fresh every cycle, executed once, never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<Step>,
    /// The reconciler's own unit changed: the host process must exit after
    /// this cycle so the supervisor restarts it under the new definition.
    pub cancel_self: bool,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Whether this cycle must end with the reconciler exiting.
///
/// True when the reconciler's own unit is added/modified, or a file owned by
/// it changed. Restarting it through the normal command phase would kill the
/// process executing the plan, so the planner suppresses that action and the
/// host exits at the end-of-cycle boundary instead.
pub fn should_cancel(changes: &ChangeSet, self_unit: &str) -> bool {
    let own_unit_changed = changes.units.iter().any(|uc| {
        uc.name == self_unit && matches!(uc.kind, ChangeKind::Added | ChangeKind::Modified)
    });
    let own_file_changed = changes.files.iter().any(|fc| {
        let owner = |s: &Option<crate::model::FileState>| {
            s.as_ref().and_then(|f| f.unit.as_deref()) == Some(self_unit)
        };
        owner(&fc.desired) || owner(&fc.applied)
    });
    own_unit_changed || own_file_changed
}

pub struct PlanContext<'a> {
    pub unit_dir: &'a Path,
    pub self_unit: &'a str,
}

impl PlanContext<'_> {
    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(name)
    }

    fn drop_in_dir(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{name}.d"))
    }
}

/// Turn a change set into an ordered plan.
///
/// `desired_units` is the full desired unit map, consulted for the command
/// of units that did not change structurally but own a changed file.
pub fn plan(changes: &ChangeSet, desired_units: &BTreeMap<String, Unit>, ctx: &PlanContext) -> Plan {
    let cancel_self = should_cancel(changes, ctx.self_unit);
    let mut steps = Vec::new();

    file_phase(changes, ctx, &mut steps);
    enablement_phase(changes, &mut steps);

    if changes.units.iter().any(UnitChange::requires_reload) {
        steps.push(Step::Reload);
    }

    command_phase(changes, desired_units, ctx, cancel_self, &mut steps);

    Plan { steps, cancel_self }
}

fn file_phase(changes: &ChangeSet, ctx: &PlanContext, steps: &mut Vec<Step>) {
    let mut writes = Vec::new();
    let mut removals = Vec::new();

    for fc in &changes.files {
        match fc.kind {
            ChangeKind::Added | ChangeKind::Modified => {
                let state = fc.desired.as_ref().expect("added/modified has desired");
                writes.push(Step::WriteFile {
                    path: fc.path.clone(),
                    mode: state.mode,
                    content: state.content.clone(),
                });
            }
            ChangeKind::Removed => removals.push(Step::RemoveFile {
                path: fc.path.clone(),
            }),
        }
    }

    for uc in &changes.units {
        match uc.kind {
            ChangeKind::Added => {
                let unit = uc.desired.as_ref().expect("added has desired");
                if let Some(content) = &unit.content {
                    writes.push(write_unit_file(ctx, &uc.name, content));
                }
                for drop_in in &unit.drop_ins {
                    writes.push(write_drop_in(ctx, &uc.name, &drop_in.name, &drop_in.content));
                }
            }
            ChangeKind::Modified => {
                let applied = uc.applied.as_ref().expect("modified has applied");
                let desired = uc.desired.as_ref().expect("modified has desired");

                if desired.content != applied.content {
                    match &desired.content {
                        Some(content) => writes.push(write_unit_file(ctx, &uc.name, content)),
                        None => removals.push(Step::RemoveFile {
                            path: ctx.unit_path(&uc.name),
                        }),
                    }
                }

                if desired.drop_ins != applied.drop_ins {
                    if desired.drop_ins.is_empty() {
                        // fragment-cleared: the whole directory goes
                        removals.push(Step::RemoveTree {
                            path: ctx.drop_in_dir(&uc.name),
                        });
                    } else {
                        for drop_in in &desired.drop_ins {
                            if !applied.drop_ins.contains(drop_in) {
                                writes.push(write_drop_in(
                                    ctx,
                                    &uc.name,
                                    &drop_in.name,
                                    &drop_in.content,
                                ));
                            }
                        }
                        for stale in &applied.drop_ins {
                            if !desired.drop_ins.iter().any(|d| d.name == stale.name) {
                                removals.push(Step::RemoveFile {
                                    path: ctx.drop_in_dir(&uc.name).join(&stale.name),
                                });
                            }
                        }
                    }
                }
            }
            ChangeKind::Removed => {
                let applied = uc.applied.as_ref().expect("removed has applied");
                if applied.content.is_some() {
                    removals.push(Step::RemoveFile {
                        path: ctx.unit_path(&uc.name),
                    });
                }
                if !applied.drop_ins.is_empty() {
                    removals.push(Step::RemoveTree {
                        path: ctx.drop_in_dir(&uc.name),
                    });
                }
            }
        }
    }

    steps.extend(writes);
    steps.extend(removals);
}

fn write_unit_file(ctx: &PlanContext, name: &str, content: &str) -> Step {
    Step::WriteFile {
        path: ctx.unit_path(name),
        mode: UNIT_FILE_MODE,
        content: content.as_bytes().to_vec(),
    }
}

fn write_drop_in(ctx: &PlanContext, unit: &str, drop_in: &str, content: &str) -> Step {
    Step::WriteFile {
        path: ctx.drop_in_dir(unit).join(drop_in),
        mode: UNIT_FILE_MODE,
        content: content.as_bytes().to_vec(),
    }
}

/// Absence of `enable` means "do not manage enablement": only explicit
/// values that differ from the baseline produce an action.
fn enablement_phase(changes: &ChangeSet, steps: &mut Vec<Step>) {
    for uc in &changes.units {
        match uc.kind {
            ChangeKind::Added => {
                let desired = uc.desired.as_ref().expect("added has desired");
                match desired.enable {
                    Some(true) => steps.push(Step::Enable {
                        unit: uc.name.clone(),
                    }),
                    Some(false) => steps.push(Step::Disable {
                        unit: uc.name.clone(),
                    }),
                    None => {}
                }
            }
            ChangeKind::Modified => {
                let applied = uc.applied.as_ref().expect("modified has applied");
                let desired = uc.desired.as_ref().expect("modified has desired");
                if desired.enable.is_some() && desired.enable != applied.enable {
                    match desired.enable {
                        Some(true) => steps.push(Step::Enable {
                            unit: uc.name.clone(),
                        }),
                        _ => steps.push(Step::Disable {
                            unit: uc.name.clone(),
                        }),
                    }
                }
            }
            ChangeKind::Removed => {
                let applied = uc.applied.as_ref().expect("removed has applied");
                if applied.enable == Some(true) {
                    steps.push(Step::Disable {
                        unit: uc.name.clone(),
                    });
                }
            }
        }
    }
}

fn command_phase(
    changes: &ChangeSet,
    desired_units: &BTreeMap<String, Unit>,
    ctx: &PlanContext,
    cancel_self: bool,
    steps: &mut Vec<Step>,
) {
    // Units whose declared files changed pick up the new content through
    // their command, even when the unit itself is structurally unchanged.
    let mut owners = BTreeSet::new();
    for fc in &changes.files {
        for side in [&fc.desired, &fc.applied] {
            if let Some(owner) = side.as_ref().and_then(|f| f.unit.as_deref()) {
                owners.insert(owner.to_string());
            }
        }
    }

    let mut handled = BTreeSet::new();
    for uc in &changes.units {
        handled.insert(uc.name.clone());

        if cancel_self && uc.name == ctx.self_unit {
            // the supervisor restarts us after exit; acting here would kill
            // the process mid-plan
            continue;
        }

        match uc.kind {
            ChangeKind::Removed => steps.push(Step::Stop {
                unit: uc.name.clone(),
            }),
            ChangeKind::Added => {
                let desired = uc.desired.as_ref().expect("added has desired");
                match desired.command {
                    Some(UnitCommand::Start) => steps.push(Step::Start {
                        unit: uc.name.clone(),
                    }),
                    Some(UnitCommand::Stop) => steps.push(Step::Stop {
                        unit: uc.name.clone(),
                    }),
                    None => {}
                }
            }
            ChangeKind::Modified => {
                let applied = uc.applied.as_ref().expect("modified has applied");
                let desired = uc.desired.as_ref().expect("modified has desired");
                // Enablement-only modifications take no command action: the
                // running state is already what the command asked for.
                let needs_action = applied.content != desired.content
                    || applied.drop_ins != desired.drop_ins
                    || applied.command != desired.command
                    || owners.contains(&uc.name);
                if !needs_action {
                    continue;
                }
                match desired.command {
                    Some(UnitCommand::Start) => steps.push(Step::Restart {
                        unit: uc.name.clone(),
                    }),
                    Some(UnitCommand::Stop) => steps.push(Step::Stop {
                        unit: uc.name.clone(),
                    }),
                    None => {}
                }
            }
        }
    }

    for owner in owners {
        if handled.contains(&owner) {
            continue;
        }
        if cancel_self && owner == ctx.self_unit {
            continue;
        }
        let Some(unit) = desired_units.get(&owner) else {
            continue;
        };
        match unit.command {
            Some(UnitCommand::Start) => steps.push(Step::Restart { unit: owner }),
            Some(UnitCommand::Stop) => steps.push(Step::Stop { unit: owner }),
            None => {}
        }
    }
}
