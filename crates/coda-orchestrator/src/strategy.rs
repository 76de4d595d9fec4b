//! Strategy manager
//!
//! Keeps the append-only history of strategies tried in this run, feeds the
//! failures back into the next strategy request, and decides when the run has
//! stopped making progress.

use coda_agent::Collaborator;
use coda_core::{CodaError, Result, Strategy, StrategyStatus};
use std::time::Duration;
use tracing::{info, warn};

/// Consecutive non-success outcomes that end a run
pub const DEFAULT_FAILURE_THRESHOLD: usize = 10;

pub struct StrategyManager {
    history: Vec<Strategy>,
    failure_threshold: usize,
}

impl Default for StrategyManager {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl StrategyManager {
    pub fn new(failure_threshold: usize) -> Self {
        Self {
            history: Vec::new(),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Ask the collaborator for the next strategy
    ///
    /// The prior failures are passed along so the model does not repeat them.
    /// Errors and empty answers are retried up to `retries` times.
    pub async fn generate_strategy(
        &self,
        collaborator: &dyn Collaborator,
        current_code: &str,
        retries: usize,
    ) -> Result<String> {
        let summary = self.failed_strategies_summary();
        if !summary.is_empty() {
            info!("Failed strategies so far: {}", self.failures().count());
        }

        let attempts = retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match collaborator.propose_strategy(current_code, &summary).await {
                Ok(strategy) if !strategy.trim().is_empty() => return Ok(strategy.trim().to_string()),
                Ok(_) => {
                    warn!("Empty strategy (attempt {}/{})", attempt, attempts);
                    last_error = Some(CodaError::InvalidResponse("empty strategy".to_string()));
                }
                Err(e) => {
                    warn!("Strategy request failed (attempt {}/{}): {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CodaError::Other("no strategy requested".to_string())))
    }

    /// Append a terminal outcome; history never shrinks
    pub fn record_outcome(&mut self, prompt: impl Into<String>, result: StrategyStatus) {
        self.history.push(Strategy {
            prompt: prompt.into(),
            result,
        });
    }

    /// True once the most recent outcomes are `failure_threshold` non-successes in a row
    pub fn should_stop(&self) -> bool {
        self.consecutive_failures() >= self.failure_threshold
    }

    pub fn consecutive_failures(&self) -> usize {
        self.history
            .iter()
            .rev()
            .take_while(|s| !s.result.is_success())
            .count()
    }

    pub fn history(&self) -> &[Strategy] {
        &self.history
    }

    pub fn successes(&self) -> usize {
        self.history.iter().filter(|s| s.result.is_success()).count()
    }

    /// Prompt section describing strategies that did not make the code safer
    ///
    /// Empty when nothing has failed yet.
    pub fn failed_strategies_summary(&self) -> String {
        if self.failures().next().is_none() {
            return String::new();
        }

        let mut text = format!(
            "\nOut of the {} strategies you have tried so far, the following ones did not make the code safer:\n",
            self.history.len()
        );
        for strategy in &self.history {
            let reason = match strategy.result {
                StrategyStatus::FailedTooLong => {
                    "This strategy took too long to produce a positive safety result, and timed out"
                }
                StrategyStatus::CodeSafetyDeteriorated => "This strategy made the code less safe",
                StrategyStatus::CodeSafetyUnchanged => {
                    "This strategy made no change to the code safety"
                }
                StrategyStatus::Success | StrategyStatus::FailedGeneration => continue,
            };
            text.push_str(&format!("- {}: {}\n", reason, strategy.prompt));
        }
        text.push_str("\nDo not repeat these strategies unless you have a good reason to do so.\n");
        text
    }

    fn failures(&self) -> impl Iterator<Item = &Strategy> {
        self.history.iter().filter(|s| !s.result.is_success())
    }
}

/// `Result: <outcome> in N attempt(s) and T s` line for run summaries
pub fn outcome_line(status: StrategyStatus, attempts: usize, elapsed: Duration) -> String {
    format!(
        "Result: {} in {} attempt{} and {:.2}s",
        status.describe(),
        attempts,
        if attempts == 1 { "" } else { "s" },
        elapsed.as_secs_f64()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_agent::ScriptedCollaborator;

    #[test]
    fn test_should_stop_after_exactly_threshold_failures() {
        let mut manager = StrategyManager::default();
        manager.record_outcome("early win", StrategyStatus::Success);

        for i in 0..9 {
            manager.record_outcome(format!("s{}", i), StrategyStatus::CodeSafetyUnchanged);
        }
        assert_eq!(manager.consecutive_failures(), 9);
        assert!(!manager.should_stop());

        manager.record_outcome("s9", StrategyStatus::FailedTooLong);
        assert!(manager.should_stop());
    }

    #[test]
    fn test_success_resets_the_streak() {
        let mut manager = StrategyManager::new(3);
        manager.record_outcome("a", StrategyStatus::FailedTooLong);
        manager.record_outcome("b", StrategyStatus::FailedTooLong);
        manager.record_outcome("c", StrategyStatus::Success);
        manager.record_outcome("d", StrategyStatus::CodeSafetyDeteriorated);
        assert_eq!(manager.consecutive_failures(), 1);
        assert!(!manager.should_stop());
        assert_eq!(manager.history().len(), 4);
        assert_eq!(manager.successes(), 1);
    }

    #[test]
    fn test_failed_summary() {
        let mut manager = StrategyManager::default();
        assert_eq!(manager.failed_strategies_summary(), "");

        manager.record_outcome("use Vec", StrategyStatus::Success);
        assert_eq!(manager.failed_strategies_summary(), "");

        manager.record_outcome("use slices", StrategyStatus::CodeSafetyUnchanged);
        manager.record_outcome("drop libc", StrategyStatus::CodeSafetyDeteriorated);
        manager.record_outcome("rewrite all", StrategyStatus::FailedTooLong);

        let summary = manager.failed_strategies_summary();
        assert!(summary.contains("Out of the 4 strategies"));
        assert!(summary.contains("no change to the code safety: use slices"));
        assert!(summary.contains("less safe: drop libc"));
        assert!(summary.contains("timed out: rewrite all"));
        assert!(!summary.contains("use Vec"));
        assert!(summary.ends_with("unless you have a good reason to do so.\n"));
    }

    #[test]
    fn test_outcome_line() {
        assert_eq!(
            outcome_line(StrategyStatus::Success, 1, Duration::from_millis(1500)),
            "Result: code safety improved in 1 attempt and 1.50s"
        );
        assert_eq!(
            outcome_line(StrategyStatus::CodeSafetyUnchanged, 3, Duration::from_secs(2)),
            "Result: code safety unchanged in 3 attempts and 2.00s"
        );
    }

    #[tokio::test]
    async fn test_generate_strategy_retries_errors_and_blanks() {
        let collab = ScriptedCollaborator::new()
            .with_strategy("   ")
            .with_strategy("  wrap the pointer in a slice  ");
        let manager = StrategyManager::default();

        let strategy = manager.generate_strategy(&collab, "fn main() {}", 5).await.unwrap();
        assert_eq!(strategy, "wrap the pointer in a slice");
        assert_eq!(collab.calls("strategy"), 2);
    }

    #[tokio::test]
    async fn test_generate_strategy_gives_up() {
        let collab = ScriptedCollaborator::new();
        let manager = StrategyManager::default();
        assert!(manager.generate_strategy(&collab, "", 2).await.is_err());
        assert_eq!(collab.calls("strategy"), 2);
    }
}
