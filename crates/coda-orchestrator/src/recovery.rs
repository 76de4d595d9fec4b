//! Pristine-restore guard
//!
//! Whatever way a run ends (normal completion, Ctrl-C, an error bubbling out
//! of the session, or a panic unwinding through it) the live files must be
//! back in their pre-run state.

use crate::workspace::LiveWorkspace;
use coda_core::fail_open::fail_open_sync;
use coda_core::{Document, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Snapshot of the live files taken before the run touched them
///
/// `restore` is idempotent and also runs on drop.
pub struct PristineGuard {
    workspace: LiveWorkspace,
    pristine: Document,
    restored: AtomicBool,
}

impl PristineGuard {
    /// Read and remember the current on-disk document
    pub async fn capture(workspace: LiveWorkspace) -> Result<Self> {
        let pristine = workspace.read().await?;
        Ok(Self::new(workspace, pristine))
    }

    pub fn new(workspace: LiveWorkspace, pristine: Document) -> Self {
        Self {
            workspace,
            pristine,
            restored: AtomicBool::new(false),
        }
    }

    pub fn pristine(&self) -> &Document {
        &self.pristine
    }

    pub fn is_restored(&self) -> bool {
        self.restored.load(Ordering::SeqCst)
    }

    /// Copy the pristine document back over the live paths
    ///
    /// Returns `Ok(false)` when an earlier call already restored. A failed
    /// write leaves the guard armed so a later call (or drop) retries.
    pub fn restore(&self) -> Result<bool> {
        if self.restored.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        if let Err(e) = self.write_pristine() {
            self.restored.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            "Restored pristine {}",
            self.workspace.code_path().display()
        );
        Ok(true)
    }

    fn write_pristine(&self) -> Result<()> {
        std::fs::write(self.workspace.code_path(), &self.pristine.code)?;
        if let (Some(path), Some(manifest)) =
            (self.workspace.manifest_path(), &self.pristine.manifest)
        {
            std::fs::write(path, manifest)?;
        }
        Ok(())
    }
}

impl Drop for PristineGuard {
    fn drop(&mut self) {
        if !self.is_restored() {
            warn!("Run ended without explicit restore; restoring on drop");
            fail_open_sync("recovery::restore_on_drop", || self.restore());
        }
    }
}
