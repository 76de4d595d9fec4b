//! # coda-orchestrator
//!
//! Control loop for Coda.
//!
//! This crate provides:
//! - Process runner with early exit on a success marker and group kill on timeout
//! - Pure state machine for the verification loop and its async driver
//! - Strategy manager with the no-progress stop condition
//! - Session driver from the pristine document to a stop reason
//! - Run logger, pristine-restore guard and live-file workspace

mod progress;
mod recovery;
mod run_log;
mod runner;
mod session;
mod state_machine;
mod strategy;
mod verify_loop;
mod workspace;

pub use progress::ProgressTicker;
pub use recovery::PristineGuard;
pub use run_log::{RunArtifacts, RunLogger};
pub use runner::{
    is_clean_build, is_warning_only_build, run_command, timeout_annotation, CommandOutput,
};
pub use session::{RunReport, Session, StopReason};
pub use state_machine::{transition, Action, Event, Phase};
pub use strategy::{outcome_line, StrategyManager, DEFAULT_FAILURE_THRESHOLD};
pub use verify_loop::{StrategyOutcome, VerificationLoop, VerifyConfig};
pub use workspace::LiveWorkspace;
