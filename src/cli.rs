//! CLI surface for nodesync.
//!
//! `run` is the long-lived mode: reconcile on startup, then on every
//! document change or periodic tick until a shutdown signal arrives or the
//! reconciler's own unit changes (at which point the process exits and its
//! supervisor restarts it). `apply` and `plan` are one-shot.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use clap::{ArgAction, Parser, Subcommand};
use tracing::{debug, error, info};

use crate::config::{self, Config};
use crate::cycle::Reconciler;
use crate::manager::Systemctl;
use crate::model::DesiredStateDocument;
use crate::outcome::{CycleOutcome, ReconcileReason};
use crate::{Error, Result};

#[derive(Parser, Debug)]
#[command(
    name = "nodesync",
    version,
    about = "Node configuration reconciler",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Config file (default: $XDG_CONFIG_HOME/nodesync/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reconcile continuously until shutdown or self-restart.
    Run,
    /// Run a single reconciliation cycle and print the outcome.
    Apply {
        /// Desired-state document (default: configured document path).
        #[arg(long, value_name = "PATH")]
        document: Option<PathBuf>,
        /// Why this cycle ran; recorded in the outcome.
        #[arg(long, value_enum, default_value = "declarative-change")]
        reason: ReasonArg,
    },
    /// Compute and print the plan without touching the host.
    Plan {
        #[arg(long, value_name = "PATH")]
        document: Option<PathBuf>,
        /// Print the change set and plan as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum ReasonArg {
    DeclarativeChange,
    AutoUpdate,
    Forced,
}

impl From<ReasonArg> for ReconcileReason {
    fn from(value: ReasonArg) -> Self {
        match value {
            ReasonArg::DeclarativeChange => ReconcileReason::DeclarativeChange,
            ReasonArg::AutoUpdate => ReconcileReason::AutoUpdate,
            ReasonArg::Forced => ReconcileReason::Forced,
        }
    }
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli) -> Result<()> {
    let cfg = match &cli.config {
        Some(path) => config::load_from(path).map_err(Error::from)?,
        None => config::load_or_init(),
    };

    match cli.command {
        Command::Run => run_loop(cfg),
        Command::Apply { document, reason } => {
            let path = document.unwrap_or_else(|| cfg.document_path.clone());
            let doc = DesiredStateDocument::load(&path)?;
            let mut reconciler = new_reconciler(cfg);
            let outcome = reconciler.reconcile(&doc, reason.into())?;
            print_outcome(&outcome);
            Ok(())
        }
        Command::Plan { document, json } => {
            let path = document.unwrap_or_else(|| cfg.document_path.clone());
            let doc = DesiredStateDocument::load(&path)?;
            let reconciler = new_reconciler(cfg);
            let (changes, plan) = reconciler.preview(&doc)?;
            if json {
                let steps: Vec<String> = plan.steps.iter().map(|s| s.to_string()).collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "changed_files": changes.files.len(),
                        "changed_units": changes.units.len(),
                        "restart_required": plan.cancel_self,
                        "steps": steps,
                    })
                );
            } else {
                if plan.is_empty() {
                    println!("converged; nothing to do");
                }
                for step in &plan.steps {
                    println!("{step}");
                }
                if plan.cancel_self {
                    println!("(own unit changed: reconciler would exit for restart)");
                }
            }
            Ok(())
        }
    }
}

fn new_reconciler(cfg: Config) -> Reconciler {
    let manager = Systemctl::new(cfg.step_timeout());
    Reconciler::new(cfg, Box::new(manager))
}

/// The long-lived reconcile loop.
///
/// Exits cleanly on SIGTERM/SIGINT, and after any cycle that changed the
/// reconciler's own unit; the surrounding supervisor performs the actual
/// restart.
fn run_loop(cfg: Config) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone());
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone());

    let document_path = cfg.document_path.clone();
    let sync_period = cfg.sync_period();
    let mut reconciler = new_reconciler(cfg);

    info!(document = %document_path.display(), "reconciler started");

    let ticker = crossbeam::channel::tick(Duration::from_millis(500));
    let mut last_checksum: Option<String> = None;
    let mut next_periodic = Instant::now();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown signal received");
            return Ok(());
        }

        match ticker.recv_timeout(Duration::from_millis(500)) {
            Ok(_) => {}
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return Ok(()),
        }

        let document = match DesiredStateDocument::load(&document_path) {
            Ok(doc) => doc,
            Err(e) => {
                // the watcher may not have delivered a document yet
                debug!("desired-state document unavailable: {e}");
                continue;
            }
        };

        let checksum = document.checksum();
        let periodic_due = Instant::now() >= next_periodic;
        if last_checksum.as_deref() == Some(checksum.as_str()) && !periodic_due {
            continue;
        }

        match reconciler.reconcile(&document, ReconcileReason::DeclarativeChange) {
            Ok(outcome) => {
                last_checksum = Some(outcome.checksum.clone());
                next_periodic = Instant::now() + sync_period;
                if outcome.restart_required {
                    info!("exiting for supervised restart");
                    return Ok(());
                }
            }
            Err(e) => {
                error!(retryable = e.transience().is_retryable(), "cycle failed: {e}");
                next_periodic = Instant::now() + sync_period;
            }
        }
    }
}

fn print_outcome(outcome: &CycleOutcome) {
    match serde_json::to_string_pretty(outcome) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => error!("failed to render outcome: {e}"),
    }
}
