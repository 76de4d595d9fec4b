//! Shared data model for the patch engine and the control loop

use serde::{Deserialize, Serialize};
use std::fmt;

/// One textual edit: replace the span matching `original` with `new`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub original: String,
    pub new: String,
}

impl Replacement {
    pub fn new(original: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            new: new.into(),
        }
    }
}

/// Ordered replacements, applied against the progressively-updated text
pub type ReplacementSet = Vec<Replacement>;

/// A proposed patch for the document and, optionally, its manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchProposal {
    pub replacements: ReplacementSet,
    #[serde(default)]
    pub manifest_replacements: ReplacementSet,
}

/// The file under modification plus its optional secondary manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub code: String,
    pub manifest: Option<String>,
}

impl Document {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            manifest: None,
        }
    }

    pub fn with_manifest(mut self, manifest: impl Into<String>) -> Self {
        self.manifest = Some(manifest.into());
        self
    }
}

/// Number of unsafe blocks and the non-trivial code lines inside them
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCount {
    pub block_count: usize,
    pub line_count: usize,
}

impl SafetyCount {
    pub fn new(block_count: usize, line_count: usize) -> Self {
        Self {
            block_count,
            line_count,
        }
    }

    /// True when no unsafe code remains
    pub fn is_zero(&self) -> bool {
        self.line_count == 0 && self.block_count == 0
    }
}

impl fmt::Display for SafetyCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unsafe lines in {} blocks",
            self.line_count, self.block_count
        )
    }
}

/// Terminal outcome of one strategy attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyStatus {
    Success,
    CodeSafetyDeteriorated,
    CodeSafetyUnchanged,
    FailedTooLong,
    FailedGeneration,
}

impl StrategyStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StrategyStatus::Success)
    }

    /// Human-readable outcome used in run summaries
    pub fn describe(&self) -> &'static str {
        match self {
            StrategyStatus::Success => "code safety improved",
            StrategyStatus::CodeSafetyDeteriorated => "code safety deteriorated",
            StrategyStatus::CodeSafetyUnchanged => "code safety unchanged",
            StrategyStatus::FailedTooLong => {
                "failed to generate a successful implementation in time"
            }
            StrategyStatus::FailedGeneration => "failed to generate an applicable patch",
        }
    }
}

impl fmt::Display for StrategyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyStatus::Success => "SUCCESS",
            StrategyStatus::CodeSafetyDeteriorated => "CODE_SAFETY_DETERIORATED",
            StrategyStatus::CodeSafetyUnchanged => "CODE_SAFETY_UNCHANGED",
            StrategyStatus::FailedTooLong => "FAILED_TOO_LONG",
            StrategyStatus::FailedGeneration => "FAILED_GENERATION",
        };
        write!(f, "{}", s)
    }
}

/// A recorded strategy; immutable once appended to the history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub prompt: String,
    pub result: StrategyStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_proposal_manifest_defaults_empty() {
        let json = r#"{"replacements":[{"original":"a","new":"b"}]}"#;
        let proposal: PatchProposal = serde_json::from_str(json).unwrap();
        assert_eq!(proposal.replacements, vec![Replacement::new("a", "b")]);
        assert!(proposal.manifest_replacements.is_empty());
    }

    #[test]
    fn test_strategy_status_serializes_screaming() {
        let json = serde_json::to_string(&StrategyStatus::CodeSafetyUnchanged).unwrap();
        assert_eq!(json, "\"CODE_SAFETY_UNCHANGED\"");
        assert_eq!(StrategyStatus::FailedTooLong.to_string(), "FAILED_TOO_LONG");
    }

    #[test]
    fn test_safety_count_zero() {
        assert!(SafetyCount::default().is_zero());
        assert!(!SafetyCount::new(1, 0).is_zero());
        assert_eq!(
            SafetyCount::new(2, 7).to_string(),
            "7 unsafe lines in 2 blocks"
        );
    }
}
