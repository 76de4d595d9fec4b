//! The live files under modification
//!
//! Build and test commands only ever see what is on disk, so every candidate
//! is written to the live paths before building and the base document is
//! written back when a strategy does not succeed.

use coda_core::{CodaError, Document, Result, TargetConfig};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Live code path plus optional manifest path
#[derive(Debug, Clone)]
pub struct LiveWorkspace {
    code_path: PathBuf,
    manifest_path: Option<PathBuf>,
}

impl LiveWorkspace {
    pub fn new(code_path: impl Into<PathBuf>, manifest_path: Option<PathBuf>) -> Self {
        Self {
            code_path: code_path.into(),
            manifest_path,
        }
    }

    pub fn from_target(target: &TargetConfig) -> Self {
        Self::new(target.code_path.clone(), target.manifest_path.clone())
    }

    pub fn code_path(&self) -> &Path {
        &self.code_path
    }

    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref()
    }

    /// Read the current on-disk document
    pub async fn read(&self) -> Result<Document> {
        let code = tokio::fs::read_to_string(&self.code_path)
            .await
            .map_err(|e| io_context(&self.code_path, e))?;

        let mut document = Document::new(code);
        if let Some(path) = &self.manifest_path {
            let manifest = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| io_context(path, e))?;
            document = document.with_manifest(manifest);
        }
        Ok(document)
    }

    /// Overwrite the live files with `document`
    ///
    /// The manifest is only written when both a path and content exist.
    pub async fn write(&self, document: &Document) -> Result<()> {
        tokio::fs::write(&self.code_path, &document.code)
            .await
            .map_err(|e| io_context(&self.code_path, e))?;

        if let (Some(path), Some(manifest)) = (&self.manifest_path, &document.manifest) {
            tokio::fs::write(path, manifest)
                .await
                .map_err(|e| io_context(path, e))?;
        }

        debug!("Wrote {} bytes to {}", document.code.len(), self.code_path.display());
        Ok(())
    }
}

fn io_context(path: &Path, e: std::io::Error) -> CodaError {
    CodaError::Io(std::io::Error::new(
        e.kind(),
        format!("{}: {}", path.display(), e),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_write_round_trip_with_manifest() {
        let temp = TempDir::new().unwrap();
        let code = temp.path().join("main.rs");
        let manifest = temp.path().join("Cargo.toml");
        std::fs::write(&code, "fn main() {}\n").unwrap();
        std::fs::write(&manifest, "[package]\n").unwrap();

        let live = LiveWorkspace::new(&code, Some(manifest.clone()));
        let doc = live.read().await.unwrap();
        assert_eq!(doc.manifest.as_deref(), Some("[package]\n"));

        let changed = Document::new("fn main() { run(); }\n").with_manifest("[package]\nname = \"x\"\n");
        live.write(&changed).await.unwrap();
        assert_eq!(live.read().await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let temp = TempDir::new().unwrap();
        let live = LiveWorkspace::new(temp.path().join("absent.rs"), None);
        let err = live.read().await.unwrap_err();
        assert!(err.to_string().contains("absent.rs"));
    }
}
