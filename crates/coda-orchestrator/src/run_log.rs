//! Run logger - chronological summaries and per-attempt artifacts
//!
//! Layout under the log root:
//!
//! ```text
//! original.rs / original.toml       pristine copies; a mismatch recreates the root
//! runNNN/summary.log                run-level summary
//! runNNN/best.rs / best.toml        best-known-safe document
//! runNNN/strategyNNN/summary.log
//! runNNN/strategyNNN/verbose_summary.log   timestamped detail
//! runNNN/strategyNNN/replacementsNNN.json, codeNNN.rs, tomlNNN.toml
//! runNNN/strategyNNN/generation_attempts/NNN-K.txt
//! ```
//!
//! Only `open` can fail. Every write after that is fail-open: a full disk
//! produces warnings, never an aborted run.

use chrono::Local;
use coda_core::fail_open::{fail_open, fail_open_sync};
use coda_core::{Document, PatchProposal, Result, SafetyCount};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

const ORIGINAL_CODE: &str = "original.rs";
const ORIGINAL_MANIFEST: &str = "original.toml";
const SUMMARY: &str = "summary.log";
const VERBOSE_SUMMARY: &str = "verbose_summary.log";
const BEST_CODE: &str = "best.rs";
const BEST_MANIFEST: &str = "best.toml";

/// Where the artifacts of a finished run ended up
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub best_code: Option<PathBuf>,
    pub best_manifest: Option<PathBuf>,
}

/// Explicitly opened, explicitly finished logger for one run
pub struct RunLogger {
    run_dir: PathBuf,
    started: Instant,
    initial_lines: usize,
    remaining_lines: usize,
    strategy_number: usize,
    strategy_dir: PathBuf,
    prompt_number: usize,
    last_prompt: String,
    best_written: bool,
    has_manifest: bool,
    finished: bool,
}

impl RunLogger {
    /// Prepare the log root and create the next `runNNN` directory
    ///
    /// The root is wiped and recreated when its pristine copies do not match
    /// `pristine`, since old runs were made against a different file.
    pub async fn open(root: &Path, pristine: &Document) -> Result<Self> {
        if tokio::fs::metadata(root).await.is_ok() {
            if !originals_match(root, pristine).await {
                info!("{} no longer matches the target, recreating log folder", ORIGINAL_CODE);
                tokio::fs::remove_dir_all(root).await?;
                create_root(root, pristine).await?;
            }
        } else {
            info!("Creating log folder {}", root.display());
            create_root(root, pristine).await?;
        }

        let run_dir = root.join(format!("run{:03}", next_run_number(root).await?));
        tokio::fs::create_dir_all(&run_dir).await?;
        info!("Logs for this run: {}", run_dir.display());

        Ok(Self {
            strategy_dir: run_dir.clone(),
            run_dir,
            started: Instant::now(),
            initial_lines: 0,
            remaining_lines: 0,
            strategy_number: 0,
            prompt_number: 0,
            last_prompt: String::new(),
            best_written: false,
            has_manifest: pristine.manifest.is_some(),
            finished: false,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn strategy_dir(&self) -> &Path {
        &self.strategy_dir
    }

    pub async fn begin_run(&mut self, initial: SafetyCount) {
        self.initial_lines = initial.line_count;
        self.remaining_lines = initial.line_count;
        let path = self.run_dir.join(SUMMARY);
        let line = format!("Initial unsafe lines: {}\n", initial.line_count);
        fail_open("run_log::begin_run", || append(&path, &line)).await;
    }

    /// Open a new `strategyNNN` directory and record the strategy
    pub async fn begin_strategy(&mut self, prompt: &str) {
        self.strategy_number += 1;
        self.prompt_number = 0;
        self.last_prompt = prompt.to_string();
        self.strategy_dir = self
            .run_dir
            .join(format!("strategy{:03}", self.strategy_number));

        let dir = self.strategy_dir.clone();
        fail_open("run_log::begin_strategy", || async move {
            tokio::fs::create_dir_all(&dir).await?;
            Ok(())
        })
        .await;

        let separator = if self.strategy_number > 1 { "\n" } else { "" };
        let line = format!(
            "{}Strategy {}: {}\n",
            separator, self.strategy_number, prompt
        );
        let path = self.run_dir.join(SUMMARY);
        fail_open("run_log::begin_strategy", || append(&path, &line)).await;
    }

    /// Record the task prompt about to be tried
    pub async fn log_prompt(&mut self, prompt: &str) {
        self.prompt_number += 1;
        self.last_prompt = prompt.to_string();

        let separator = if self.prompt_number > 1 { "\n" } else { "" };
        let message = format!("Prompt {}: {}", self.prompt_number, prompt);
        let path = self.strategy_dir.join(SUMMARY);
        let line = format!("{}{}\n", separator, message);
        fail_open("run_log::log_prompt", || append(&path, &line)).await;
        self.log_verbose(&message).await;
    }

    /// Save the applied replacement set and resulting document
    pub async fn log_generated(
        &self,
        proposal: &PatchProposal,
        document: &Document,
        attempts: usize,
        elapsed: Duration,
    ) {
        let n = self.prompt_number;
        let dir = &self.strategy_dir;

        fail_open("run_log::log_generated", || async {
            let json = serde_json::to_string_pretty(proposal)?;
            tokio::fs::write(dir.join(format!("replacements{:03}.json", n)), json).await?;
            tokio::fs::write(dir.join(format!("code{:03}.rs", n)), &document.code).await?;
            if let Some(manifest) = &document.manifest {
                tokio::fs::write(dir.join(format!("toml{:03}.toml", n)), manifest).await?;
            }
            Ok(())
        })
        .await;

        let message = format!(
            "Successful generation in {} attempt{} ({:.2}s)",
            attempts,
            plural(attempts),
            elapsed.as_secs_f64()
        );
        let path = dir.join(SUMMARY);
        let line = format!("{}\n", message);
        fail_open("run_log::log_generated", || append(&path, &line)).await;
        self.log_verbose(&message).await;
    }

    /// Save what a failed generation attempt produced
    pub async fn log_generation_attempt(&self, attempt: usize, detail: &str) {
        let dir = self.strategy_dir.join("generation_attempts");
        let path = dir.join(format!("{:03}-{}.txt", self.prompt_number, attempt));
        fail_open("run_log::log_generation_attempt", || async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, detail).await?;
            Ok(())
        })
        .await;
    }

    /// One status line in the strategy summary and the verbose log
    pub async fn log_status(&self, status: &str, elapsed: Option<Duration>) {
        let message = match elapsed {
            Some(t) => format!("{} ({:.2}s)", status, t.as_secs_f64()),
            None => status.to_string(),
        };
        let path = self.strategy_dir.join(SUMMARY);
        let line = format!("{}\n", message);
        fail_open("run_log::log_status", || append(&path, &line)).await;
        self.log_verbose(&message).await;
    }

    /// Detail that only belongs in the verbose log (command output, verdicts)
    pub async fn log_verbose(&self, message: &str) {
        let path = self.strategy_dir.join(VERBOSE_SUMMARY);
        let line = format!("[{}] {}\n", Local::now().format("%H:%M:%S"), message);
        fail_open("run_log::log_verbose", || append(&path, &line)).await;
    }

    /// Close out the current strategy in both summaries
    pub async fn log_strategy_result(&mut self, result_line: &str, remaining: SafetyCount) {
        self.remaining_lines = remaining.line_count;
        let strategy_summary = self.strategy_dir.join(SUMMARY);
        let line = format!("\n{}\n", result_line);
        fail_open("run_log::log_strategy_result", || {
            append(&strategy_summary, &line)
        })
        .await;

        let message = format!(
            "Final prompt: {}\n{}\n{} unsafe lines remaining\n",
            self.last_prompt, result_line, remaining.line_count
        );
        let run_summary = self.run_dir.join(SUMMARY);
        let block = format!("{}\n", message);
        fail_open("run_log::log_strategy_result", || append(&run_summary, &block)).await;
        self.log_verbose(&message).await;
    }

    /// Persist the best-known-safe document
    pub async fn update_best(&mut self, document: &Document) {
        let run_dir = &self.run_dir;
        let written = fail_open("run_log::update_best", || async {
            tokio::fs::write(run_dir.join(BEST_CODE), &document.code).await?;
            if let Some(manifest) = &document.manifest {
                tokio::fs::write(run_dir.join(BEST_MANIFEST), manifest).await?;
            }
            Ok(())
        })
        .await;

        if written.is_some() {
            self.best_written = true;
            info!("✓ Updated best code");
        }
    }

    /// Append the closing line; later calls are no-ops
    pub async fn finish(&mut self, final_count: SafetyCount) -> RunArtifacts {
        if !self.finished {
            self.finished = true;
            let line = self.result_line(final_count.line_count);
            let path = self.run_dir.join(SUMMARY);
            fail_open("run_log::finish", || append(&path, &line)).await;
        }
        self.artifacts()
    }

    fn result_line(&self, final_lines: usize) -> String {
        let elapsed = self.started.elapsed().as_secs();
        format!(
            "\nResult: {} unsafe lines -> {} unsafe lines in {}:{:02}\n",
            self.initial_lines,
            final_lines,
            elapsed / 60,
            elapsed % 60
        )
    }

    pub fn artifacts(&self) -> RunArtifacts {
        let best_code = self.run_dir.join(BEST_CODE);
        let best_manifest = self.run_dir.join(BEST_MANIFEST);
        RunArtifacts {
            run_dir: self.run_dir.clone(),
            best_code: self.best_written.then_some(best_code),
            best_manifest: (self.best_written && self.has_manifest).then_some(best_manifest),
        }
    }
}

/// Closes the run summary with the last known count when `finish` never ran
impl Drop for RunLogger {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        warn!(
            "Run log {} dropped without finish, writing the closing summary",
            self.run_dir.display()
        );
        let line = self.result_line(self.remaining_lines);
        let path = self.run_dir.join(SUMMARY);
        fail_open_sync("run_log::drop", || {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(line.as_bytes())?;
            Ok(())
        });
    }
}

async fn originals_match(root: &Path, pristine: &Document) -> bool {
    let code_matches = tokio::fs::read_to_string(root.join(ORIGINAL_CODE))
        .await
        .map(|saved| saved == pristine.code)
        .unwrap_or(false);

    let manifest_matches = match &pristine.manifest {
        Some(manifest) => tokio::fs::read_to_string(root.join(ORIGINAL_MANIFEST))
            .await
            .map(|saved| &saved == manifest)
            .unwrap_or(false),
        None => true,
    };

    code_matches && manifest_matches
}

async fn create_root(root: &Path, pristine: &Document) -> Result<()> {
    tokio::fs::create_dir_all(root).await?;
    tokio::fs::write(root.join(ORIGINAL_CODE), &pristine.code).await?;
    if let Some(manifest) = &pristine.manifest {
        tokio::fs::write(root.join(ORIGINAL_MANIFEST), manifest).await?;
    }
    Ok(())
}

/// One past the highest existing `runNNN`
async fn next_run_number(root: &Path) -> Result<usize> {
    let mut highest = 0;
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(digits) = name.strip_prefix("run") {
            if digits.len() == 3 && digits.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(n) = digits.parse::<usize>() {
                    highest = highest.max(n);
                }
            }
        }
    }
    Ok(highest + 1)
}

async fn append(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(text.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_core::Replacement;
    use tempfile::TempDir;

    fn pristine() -> Document {
        Document::new("unsafe { a() }\n").with_manifest("[package]\n")
    }

    #[tokio::test]
    async fn test_open_numbers_runs() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("log");

        let mut first = RunLogger::open(&root, &pristine()).await.unwrap();
        assert!(first.run_dir().ends_with("run001"));
        first.finish(SafetyCount::default()).await;

        let mut second = RunLogger::open(&root, &pristine()).await.unwrap();
        assert!(second.run_dir().ends_with("run002"));
        second.finish(SafetyCount::default()).await;

        assert_eq!(
            std::fs::read_to_string(root.join(ORIGINAL_CODE)).unwrap(),
            "unsafe { a() }\n"
        );
        assert_eq!(
            std::fs::read_to_string(root.join(ORIGINAL_MANIFEST)).unwrap(),
            "[package]\n"
        );
    }

    #[tokio::test]
    async fn test_changed_original_recreates_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("log");

        let mut first = RunLogger::open(&root, &pristine()).await.unwrap();
        first.finish(SafetyCount::default()).await;

        let changed = Document::new("fn main() {}\n");
        let mut second = RunLogger::open(&root, &changed).await.unwrap();
        assert!(second.run_dir().ends_with("run001"));
        second.finish(SafetyCount::default()).await;
        assert_eq!(
            std::fs::read_to_string(root.join(ORIGINAL_CODE)).unwrap(),
            "fn main() {}\n"
        );
    }

    #[tokio::test]
    async fn test_full_strategy_layout() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("log");
        let mut logger = RunLogger::open(&root, &pristine()).await.unwrap();

        logger.begin_run(SafetyCount::new(1, 5)).await;
        logger.begin_strategy("use safe indexing").await;
        logger.log_prompt("use safe indexing").await;
        logger.log_generation_attempt(1, "fragment not found").await;

        let proposal = PatchProposal {
            replacements: vec![Replacement::new("unsafe { a() }", "a()")],
            manifest_replacements: Vec::new(),
        };
        let candidate = Document::new("a()\n").with_manifest("[package]\n");
        logger
            .log_generated(&proposal, &candidate, 2, Duration::from_millis(250))
            .await;
        logger.log_status("Building...", Some(Duration::from_secs(1))).await;
        logger
            .log_strategy_result("Result: code safety improved in 1 attempt and 3.00s", SafetyCount::new(0, 2))
            .await;
        logger.update_best(&candidate).await;
        let artifacts = logger.finish(SafetyCount::new(0, 2)).await;

        let run = artifacts.run_dir.clone();
        let strategy = run.join("strategy001");
        assert!(strategy.join("replacements001.json").exists());
        assert_eq!(std::fs::read_to_string(strategy.join("code001.rs")).unwrap(), "a()\n");
        assert!(strategy.join("toml001.toml").exists());
        assert_eq!(
            std::fs::read_to_string(strategy.join("generation_attempts/001-1.txt")).unwrap(),
            "fragment not found"
        );

        let strategy_summary = std::fs::read_to_string(strategy.join(SUMMARY)).unwrap();
        assert!(strategy_summary.starts_with("Prompt 1: use safe indexing\n"));
        assert!(strategy_summary.contains("Successful generation in 2 attempts (0.25s)"));
        assert!(strategy_summary.contains("Building... (1.00s)"));

        let verbose = std::fs::read_to_string(strategy.join(VERBOSE_SUMMARY)).unwrap();
        assert!(verbose.contains("2 unsafe lines remaining"));

        let run_summary = std::fs::read_to_string(run.join(SUMMARY)).unwrap();
        assert!(run_summary.starts_with("Initial unsafe lines: 5\nStrategy 1: use safe indexing\n"));
        assert!(run_summary.contains("Final prompt: use safe indexing\n"));
        assert!(run_summary.contains("Result: 5 unsafe lines -> 2 unsafe lines in 0:0"));

        assert_eq!(artifacts.best_code, Some(run.join(BEST_CODE)));
        assert_eq!(artifacts.best_manifest, Some(run.join(BEST_MANIFEST)));
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_and_writes_fail_open() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("log");
        let mut logger = RunLogger::open(&root, &Document::new("x")).await.unwrap();
        logger.begin_run(SafetyCount::new(1, 1)).await;

        // Strategy directory never created: writes warn instead of failing
        logger.log_status("orphan status", None).await;

        logger.finish(SafetyCount::new(1, 1)).await;
        let artifacts = logger.finish(SafetyCount::default()).await;
        assert!(artifacts.best_code.is_none());

        let summary = std::fs::read_to_string(artifacts.run_dir.join(SUMMARY)).unwrap();
        assert_eq!(summary.matches("\nResult: ").count(), 1);
    }

    #[tokio::test]
    async fn test_drop_without_finish_closes_the_summary() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("log");
        let run_dir = {
            let mut logger = RunLogger::open(&root, &pristine()).await.unwrap();
            logger.begin_run(SafetyCount::new(2, 6)).await;
            logger.begin_strategy("drop the raw pointer").await;
            logger
                .log_strategy_result("Result: code safety improved", SafetyCount::new(1, 3))
                .await;
            logger.run_dir().to_path_buf()
        };

        let summary = std::fs::read_to_string(run_dir.join(SUMMARY)).unwrap();
        assert!(summary.contains("\nResult: 6 unsafe lines -> 3 unsafe lines in 0:0"));
        assert_eq!(summary.matches("\nResult: 6 unsafe lines").count(), 1);
    }
}
