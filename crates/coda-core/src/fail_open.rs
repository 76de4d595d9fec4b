//! Fail-open helpers for run bookkeeping
//!
//! Writing run artifacts (summaries, per-attempt code snapshots, best-so-far
//! copies) must never abort a run that is otherwise making progress. These
//! helpers swallow the error after reporting it through `tracing::warn!`.
//!
//! Never use them for the patch engine, the build/test runner, or restoring
//! the pristine document: those failures are part of the loop's contract.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run an async bookkeeping operation, logging and discarding any error
///
/// ```no_run
/// use coda_core::fail_open::fail_open;
/// use coda_core::Result;
///
/// async fn write_summary() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("run_log::summary", || write_summary()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Blocking variant for code paths that cannot await (e.g. `Drop`)
pub fn fail_open_sync<F, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Result<T>,
{
    match f() {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
