//! Pure state machine for the verification loop
//!
//! No I/O and no async: `transition(phase, event)` returns the next phase and
//! the side effects the driver must carry out. Invalid transitions go to
//! `Aborted` instead of panicking.

use coda_core::StrategyStatus;

/// Where one strategy attempt currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Requesting a patch for the current task prompt and applying it
    Generating,
    /// Running the build command on the candidate
    Building,
    /// Asking the collaborator about a build that was not clean
    BuildAnalyzing,
    /// Running the test command with the success marker
    Testing,
    /// Asking the collaborator for a new prompt after a failed test
    TestAnalyzing,
    /// Comparing unsafe line counts before and after
    SafetyComparing,
    /// The strategy reached a terminal status
    Finished(StrategyStatus),
    /// The run cannot continue (build command fault or invalid transition)
    Aborted(String),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Finished(_) | Phase::Aborted(_))
    }

    /// Short label for status lines and traces
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Generating => "generating",
            Phase::Building => "building",
            Phase::BuildAnalyzing => "analyzing build",
            Phase::Testing => "testing",
            Phase::TestAnalyzing => "analyzing test",
            Phase::SafetyComparing => "comparing safety",
            Phase::Finished(_) => "finished",
            Phase::Aborted(_) => "aborted",
        }
    }
}

/// Outcomes reported by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A replacement set was generated and applied
    PatchApplied,
    /// Generation or application failed and will be retried with the same prompt
    GenerationFailed { reason: String },
    /// Retries ran out and escalation produced no distinct prompt
    GenerationExhausted,
    /// A collaborator produced a new task prompt (escalation or analysis)
    PromptRevised { prompt: String },
    /// The per-strategy prompt budget ran out
    AttemptsExhausted,
    /// The build command finished; `clean` skips collaborator review
    BuildFinished { clean: bool },
    /// The collaborator judged a noisy build acceptable
    BuildAccepted,
    /// The collaborator judged the build environment broken
    BuildStopped { message: String },
    /// The test command finished; `passed` means the marker was seen
    TestFinished { passed: bool },
    /// Fewer unsafe lines than before
    SafetyImproved,
    /// The collaborator gave up on the strategy
    StrategyAbandoned { status: StrategyStatus },
}

/// Side effects for the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Print one status line
    LogStatus { message: String },
    /// Write the patched document to the live paths
    WriteCandidate,
    /// The candidate becomes the best-known-safe document
    AdoptCandidate,
    /// Write the strategy's base document back to the live paths
    RestoreBase,
}

fn status(message: impl Into<String>) -> Action {
    Action::LogStatus {
        message: message.into(),
    }
}

/// Pure transition function
pub fn transition(phase: Phase, event: Event) -> (Phase, Vec<Action>) {
    match (phase, event) {
        // Prompt budget can run out wherever a new prompt would be started
        (phase, Event::AttemptsExhausted) if !phase.is_terminal() => (
            Phase::Finished(StrategyStatus::FailedTooLong),
            vec![
                status("✗ Prompt attempts exhausted"),
                Action::RestoreBase,
            ],
        ),

        // Generating
        (Phase::Generating, Event::PatchApplied) => (
            Phase::Building,
            vec![status("✓ Patch applied"), Action::WriteCandidate],
        ),
        (Phase::Generating, Event::GenerationFailed { reason }) => (
            Phase::Generating,
            vec![status(format!("✗ Generation failed: {}", reason))],
        ),
        (Phase::Generating, Event::GenerationExhausted) => (
            Phase::Finished(StrategyStatus::FailedGeneration),
            vec![
                status("✗ Could not generate an applicable patch"),
                Action::RestoreBase,
            ],
        ),
        (Phase::Generating, Event::PromptRevised { prompt }) => (
            Phase::Generating,
            vec![status(format!("→ Escalated prompt: {}", first_line(&prompt)))],
        ),

        // Building
        (Phase::Building, Event::BuildFinished { clean: true }) => {
            (Phase::Testing, vec![status("✓ Build clean")])
        }
        (Phase::Building, Event::BuildFinished { clean: false }) => (
            Phase::BuildAnalyzing,
            vec![status("→ Build output needs review")],
        ),

        // Build analysis
        (Phase::BuildAnalyzing, Event::BuildAccepted) => {
            (Phase::Testing, vec![status("✓ Build accepted")])
        }
        (Phase::BuildAnalyzing, Event::PromptRevised { prompt }) => (
            Phase::Generating,
            vec![status(format!("✗ Build rejected, new prompt: {}", first_line(&prompt)))],
        ),
        (Phase::BuildAnalyzing, Event::BuildStopped { message }) => (
            Phase::Aborted(message.clone()),
            vec![
                status(format!("✗ Build stopped: {}", message)),
                Action::RestoreBase,
            ],
        ),

        // Testing
        (Phase::Testing, Event::TestFinished { passed: true }) => {
            (Phase::SafetyComparing, vec![status("✓ Test passed")])
        }
        (Phase::Testing, Event::TestFinished { passed: false }) => (
            Phase::TestAnalyzing,
            vec![status("✗ Test output did not match")],
        ),

        // Test analysis
        (Phase::TestAnalyzing, Event::PromptRevised { prompt }) => (
            Phase::Generating,
            vec![status(format!("→ New prompt: {}", first_line(&prompt)))],
        ),

        // Safety comparison
        (Phase::SafetyComparing, Event::SafetyImproved) => (
            Phase::Finished(StrategyStatus::Success),
            vec![status("✓ Code safety improved"), Action::AdoptCandidate],
        ),
        (Phase::SafetyComparing, Event::PromptRevised { prompt }) => (
            Phase::Generating,
            vec![status(format!(
                "→ Safety unchanged, refining: {}",
                first_line(&prompt)
            ))],
        ),
        (Phase::SafetyComparing, Event::StrategyAbandoned { status: outcome }) => (
            Phase::Finished(outcome),
            vec![
                status(format!("✗ Strategy abandoned: {}", outcome.describe())),
                Action::RestoreBase,
            ],
        ),

        // Everything else
        (phase, event) => (
            Phase::Aborted(format!(
                "Invalid transition: {:?} cannot handle event {:?}",
                phase, event
            )),
            vec![Action::RestoreBase],
        ),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let (phase, actions) = transition(Phase::Generating, Event::PatchApplied);
        assert_eq!(phase, Phase::Building);
        assert!(actions.contains(&Action::WriteCandidate));

        let (phase, _) = transition(phase, Event::BuildFinished { clean: true });
        assert_eq!(phase, Phase::Testing);

        let (phase, _) = transition(phase, Event::TestFinished { passed: true });
        assert_eq!(phase, Phase::SafetyComparing);

        let (phase, actions) = transition(phase, Event::SafetyImproved);
        assert_eq!(phase, Phase::Finished(StrategyStatus::Success));
        assert!(actions.contains(&Action::AdoptCandidate));
        assert!(!actions.contains(&Action::RestoreBase));
    }

    #[test]
    fn test_noisy_build_goes_through_analysis() {
        let (phase, _) = transition(Phase::Building, Event::BuildFinished { clean: false });
        assert_eq!(phase, Phase::BuildAnalyzing);

        let (accepted, _) = transition(phase.clone(), Event::BuildAccepted);
        assert_eq!(accepted, Phase::Testing);

        let (rejected, _) = transition(
            phase.clone(),
            Event::PromptRevised {
                prompt: "try again".into(),
            },
        );
        assert_eq!(rejected, Phase::Generating);

        let (stopped, actions) = transition(
            phase,
            Event::BuildStopped {
                message: "cargo missing".into(),
            },
        );
        assert_eq!(stopped, Phase::Aborted("cargo missing".into()));
        assert!(actions.contains(&Action::RestoreBase));
    }

    #[test]
    fn test_failed_test_asks_for_new_prompt() {
        let (phase, _) = transition(Phase::Testing, Event::TestFinished { passed: false });
        assert_eq!(phase, Phase::TestAnalyzing);
        let (phase, _) = transition(
            phase,
            Event::PromptRevised {
                prompt: "keep output order".into(),
            },
        );
        assert_eq!(phase, Phase::Generating);
    }

    #[test]
    fn test_generation_failures() {
        let (phase, actions) = transition(
            Phase::Generating,
            Event::GenerationFailed {
                reason: "not found".into(),
            },
        );
        assert_eq!(phase, Phase::Generating);
        assert_eq!(actions.len(), 1);

        let (phase, actions) = transition(phase, Event::GenerationExhausted);
        assert_eq!(phase, Phase::Finished(StrategyStatus::FailedGeneration));
        assert!(actions.contains(&Action::RestoreBase));
    }

    #[test]
    fn test_attempts_exhausted_from_any_active_phase() {
        for phase in [
            Phase::Generating,
            Phase::BuildAnalyzing,
            Phase::TestAnalyzing,
            Phase::SafetyComparing,
        ] {
            let (next, actions) = transition(phase, Event::AttemptsExhausted);
            assert_eq!(next, Phase::Finished(StrategyStatus::FailedTooLong));
            assert!(actions.contains(&Action::RestoreBase));
        }
    }

    #[test]
    fn test_safety_abandoned_keeps_status() {
        let (phase, _) = transition(
            Phase::SafetyComparing,
            Event::StrategyAbandoned {
                status: StrategyStatus::CodeSafetyDeteriorated,
            },
        );
        assert_eq!(
            phase,
            Phase::Finished(StrategyStatus::CodeSafetyDeteriorated)
        );
    }

    #[test]
    fn test_invalid_transitions_abort() {
        let (phase, _) = transition(Phase::Testing, Event::PatchApplied);
        assert!(matches!(phase, Phase::Aborted(_)));

        let (phase, _) = transition(
            Phase::Finished(StrategyStatus::Success),
            Event::AttemptsExhausted,
        );
        assert!(matches!(phase, Phase::Aborted(_)));
    }
}
