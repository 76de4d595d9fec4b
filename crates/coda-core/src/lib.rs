//! # coda-core
//!
//! Core types for Coda, an autonomous loop that asks a language model for
//! textual edits to a source file and keeps only the edits that still build,
//! still pass the designated test, and shrink the amount of code sitting
//! under the `unsafe` marker.
//!
//! ## Core Paradigm
//!
//! - A patch IS an ordered list of `original -> new` text replacements
//! - Safety IS a lexical count of lines inside unsafe blocks
//! - A strategy IS a one-sentence plan with exactly one terminal status
//! - The live file is ALWAYS restored to its pristine form when a run ends

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{
    CodaConfig, LogConfig, LoopSettings, MatchPolicy, ModelSettings, TargetConfig, CONFIG_FILE_NAME,
};
pub use error::{CodaError, Result};
pub use types::*;
