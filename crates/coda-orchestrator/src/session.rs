//! Session - one run from the pristine document to a stop condition
//!
//! Each iteration asks for a strategy, runs it through the verification loop
//! and records the outcome. Only a successful strategy moves the running
//! document forward.

use crate::run_log::RunLogger;
use crate::strategy::StrategyManager;
use crate::verify_loop::{StrategyOutcome, VerificationLoop, VerifyConfig};
use crate::workspace::LiveWorkspace;
use crate::state_machine::Phase;
use coda_agent::Collaborator;
use coda_core::{CodaConfig, Document, Result, SafetyCount, Strategy, StrategyStatus};
use coda_patch::count_unsafe_with_keyword;
use std::fmt;
use tracing::{info, warn};

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// No unsafe lines remain
    ReachedZero,
    /// Too many consecutive strategies without success
    NoProgress,
    /// `max_strategies` reached
    StrategyLimit,
    /// The build environment is broken
    BuildStopped(String),
    /// No applicable patch and no usable follow-up prompt
    GenerationFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::ReachedZero => write!(f, "no unsafe lines remain"),
            StopReason::NoProgress => write!(f, "too many strategies without progress"),
            StopReason::StrategyLimit => write!(f, "strategy limit reached"),
            StopReason::BuildStopped(message) => write!(f, "build stopped: {}", message),
            StopReason::GenerationFailed => write!(f, "could not generate an applicable patch"),
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub initial: SafetyCount,
    pub final_count: SafetyCount,
    pub strategies: Vec<Strategy>,
    pub stop_reason: StopReason,
    pub best: Document,
}

impl RunReport {
    pub fn successes(&self) -> usize {
        self.strategies
            .iter()
            .filter(|s| s.result.is_success())
            .count()
    }
}

pub struct Session<'a> {
    collaborator: &'a dyn Collaborator,
    verify: VerificationLoop,
    strategies: StrategyManager,
    max_strategies: usize,
    strategy_retries: usize,
    initial: SafetyCount,
    best: Document,
    best_count: SafetyCount,
}

impl<'a> Session<'a> {
    /// Prepare a run starting from `start`
    pub fn new(config: &CodaConfig, collaborator: &'a dyn Collaborator, start: Document) -> Self {
        let settings = &config.loop_settings;
        let initial = count_unsafe_with_keyword(&start.code, &settings.unsafe_keyword);
        Self {
            collaborator,
            verify: VerificationLoop::new(
                VerifyConfig::from_config(config),
                LiveWorkspace::from_target(&config.target),
            ),
            strategies: StrategyManager::new(settings.strategy_failure_threshold),
            max_strategies: settings.max_strategies,
            strategy_retries: settings.generation_retries,
            initial,
            best: start,
            best_count: initial,
        }
    }

    /// Replace the verification settings (progress display, timeouts)
    pub fn with_verify_config(mut self, config: VerifyConfig) -> Self {
        let workspace = self.verify.workspace().clone();
        self.verify = VerificationLoop::new(config, workspace);
        self
    }

    pub fn initial(&self) -> SafetyCount {
        self.initial
    }

    /// Best-known-safe document so far
    pub fn best(&self) -> &Document {
        &self.best
    }

    pub fn best_count(&self) -> SafetyCount {
        self.best_count
    }

    pub fn history(&self) -> &[Strategy] {
        self.strategies.history()
    }

    /// Run strategies until a stop condition holds
    pub async fn run(&mut self, logger: &mut RunLogger) -> Result<RunReport> {
        info!("Initial: {}", self.initial);
        logger.begin_run(self.initial).await;

        let stop_reason = loop {
            if self.best_count.line_count == 0 {
                break StopReason::ReachedZero;
            }
            if self.strategies.should_stop() {
                break StopReason::NoProgress;
            }
            if self.max_strategies > 0 && self.history().len() >= self.max_strategies {
                break StopReason::StrategyLimit;
            }

            let prompt = match self
                .strategies
                .generate_strategy(self.collaborator, &self.best.code, self.strategy_retries)
                .await
            {
                Ok(prompt) => prompt,
                Err(e) => {
                    warn!("No strategy available: {}", e);
                    break StopReason::GenerationFailed;
                }
            };

            let number = self.history().len() + 1;
            info!("→ Strategy {}: {}", number, prompt);
            logger.begin_strategy(&prompt).await;

            let outcome = self
                .verify
                .run_strategy(self.collaborator, logger, &self.best, &prompt)
                .await?;

            if let Some(reason) = self.record(prompt, outcome, logger).await {
                break reason;
            }
        };

        info!(
            "Stopped ({}): {} -> {} unsafe lines",
            stop_reason, self.initial.line_count, self.best_count.line_count
        );

        Ok(RunReport {
            initial: self.initial,
            final_count: self.best_count,
            strategies: self.history().to_vec(),
            stop_reason,
            best: self.best.clone(),
        })
    }

    /// Fold one strategy outcome into the session; `Some` ends the run
    async fn record(
        &mut self,
        prompt: String,
        outcome: StrategyOutcome,
        logger: &mut RunLogger,
    ) -> Option<StopReason> {
        match outcome.phase {
            Phase::Finished(status) => {
                self.strategies.record_outcome(prompt, status);
                if status.is_success() {
                    info!(
                        "✓ Unsafe lines {} -> {}",
                        self.best_count.line_count, outcome.count.line_count
                    );
                    self.best = outcome.document;
                    self.best_count = outcome.count;
                    logger.update_best(&self.best).await;
                }
                (status == StrategyStatus::FailedGeneration).then_some(StopReason::GenerationFailed)
            }
            Phase::Aborted(message) => Some(StopReason::BuildStopped(message)),
            other => Some(StopReason::BuildStopped(format!(
                "strategy ended in non-terminal phase {}",
                other.label()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_display() {
        assert_eq!(StopReason::ReachedZero.to_string(), "no unsafe lines remain");
        assert_eq!(
            StopReason::BuildStopped("no cargo".into()).to_string(),
            "build stopped: no cargo"
        );
    }

    #[test]
    fn test_report_counts_successes() {
        let report = RunReport {
            initial: SafetyCount::new(2, 4),
            final_count: SafetyCount::new(1, 2),
            strategies: vec![
                Strategy {
                    prompt: "a".into(),
                    result: StrategyStatus::Success,
                },
                Strategy {
                    prompt: "b".into(),
                    result: StrategyStatus::CodeSafetyUnchanged,
                },
            ],
            stop_reason: StopReason::NoProgress,
            best: Document::new(""),
        };
        assert_eq!(report.successes(), 1);
    }
}
