//! Scripted collaborator for tests
//!
//! Replies are queued per call kind and consumed in order. An exhausted queue
//! answers with `CodaError::Api`, exactly like an unreachable model.

use crate::collaborator::Collaborator;
use crate::verdict::parse_patch_response;
use async_trait::async_trait;
use coda_core::{CodaError, Document, PatchProposal, Result, SafetyCount};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const STRATEGY: &str = "strategy";
const PATCH: &str = "patch";
const REVISION: &str = "revision";
const BUILD: &str = "build";
const TEST: &str = "test";
const SAFETY: &str = "safety";

/// One queued answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Raw answer text (patches are parsed like a real model answer)
    Text(String),
    /// The call fails with `CodaError::Api`
    Fail(String),
}

/// Collaborator that replays queued answers
#[derive(Default)]
pub struct ScriptedCollaborator {
    replies: Mutex<HashMap<&'static str, VecDeque<ScriptedReply>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    patch_tasks: Mutex<Vec<String>>,
}

impl ScriptedCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(self, strategy: &str) -> Self {
        self.with_reply(STRATEGY, ScriptedReply::Text(strategy.to_string()))
    }

    /// Queue a raw patch answer (JSON, possibly fenced)
    pub fn with_patch(self, answer: &str) -> Self {
        self.with_reply(PATCH, ScriptedReply::Text(answer.to_string()))
    }

    pub fn with_patch_failure(self, message: &str) -> Self {
        self.with_reply(PATCH, ScriptedReply::Fail(message.to_string()))
    }

    pub fn with_revision(self, task: &str) -> Self {
        self.with_reply(REVISION, ScriptedReply::Text(task.to_string()))
    }

    pub fn with_revision_failure(self, message: &str) -> Self {
        self.with_reply(REVISION, ScriptedReply::Fail(message.to_string()))
    }

    pub fn with_build_verdict(self, answer: &str) -> Self {
        self.with_reply(BUILD, ScriptedReply::Text(answer.to_string()))
    }

    pub fn with_test_revision(self, task: &str) -> Self {
        self.with_reply(TEST, ScriptedReply::Text(task.to_string()))
    }

    pub fn with_safety_verdict(self, answer: &str) -> Self {
        self.with_reply(SAFETY, ScriptedReply::Text(answer.to_string()))
    }

    fn with_reply(self, kind: &'static str, reply: ScriptedReply) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.entry(kind).or_default().push_back(reply);
        }
        self
    }

    /// Number of calls made for a kind: strategy, patch, revision, build, test, safety
    pub fn calls(&self, kind: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.get(kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Task prompts passed to `generate_patch`, in call order
    pub fn patch_tasks(&self) -> Vec<String> {
        self.patch_tasks
            .lock()
            .map(|tasks| tasks.clone())
            .unwrap_or_default()
    }

    /// Unconsumed replies across all kinds
    pub fn remaining(&self) -> usize {
        self.replies
            .lock()
            .map(|replies| replies.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }

    fn next(&self, kind: &'static str) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(kind).or_insert(0) += 1;
        }

        let reply = self
            .replies
            .lock()
            .map_err(|_| CodaError::Other("scripted collaborator poisoned".to_string()))?
            .get_mut(kind)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(CodaError::Api(message)),
            None => Err(CodaError::Api(format!("No scripted {} reply", kind))),
        }
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    async fn propose_strategy(&self, _code: &str, _failed_summary: &str) -> Result<String> {
        self.next(STRATEGY)
    }

    async fn generate_patch(&self, task: &str, _document: &Document) -> Result<PatchProposal> {
        if let Ok(mut tasks) = self.patch_tasks.lock() {
            tasks.push(task.to_string());
        }
        let answer = self.next(PATCH)?;
        parse_patch_response(&answer)
    }

    async fn revise_after_generation_failure(
        &self,
        _task: &str,
        _code: &str,
        _attempts: usize,
    ) -> Result<String> {
        self.next(REVISION)
    }

    async fn classify_build(
        &self,
        _task: &str,
        _code: &str,
        _build_output: &str,
        _original_task: &str,
    ) -> Result<String> {
        self.next(BUILD)
    }

    async fn classify_test(
        &self,
        _task: &str,
        _original_code: &str,
        _new_code: &str,
        _run_output: &str,
        _original_task: &str,
    ) -> Result<String> {
        self.next(TEST)
    }

    async fn classify_safety(
        &self,
        _task: &str,
        _original_code: &str,
        _new_code: &str,
        _old_count: SafetyCount,
        _new_count: SafetyCount,
        _original_task: &str,
    ) -> Result<String> {
        self.next(SAFETY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_are_consumed_in_order() {
        let collab = ScriptedCollaborator::new()
            .with_strategy("first")
            .with_strategy("second");

        assert_eq!(collab.propose_strategy("", "").await.unwrap(), "first");
        assert_eq!(collab.propose_strategy("", "").await.unwrap(), "second");
        assert!(collab.propose_strategy("", "").await.is_err());
        assert_eq!(collab.calls("strategy"), 3);
    }

    #[tokio::test]
    async fn test_patch_answers_are_parsed() {
        let collab = ScriptedCollaborator::new()
            .with_patch(r#"{"replacements":[{"original":"a","new":"b"}]}"#)
            .with_patch("not json")
            .with_patch_failure("model down");
        let doc = Document::new("a");

        let proposal = collab.generate_patch("task one", &doc).await.unwrap();
        assert_eq!(proposal.replacements.len(), 1);

        let err = collab.generate_patch("task two", &doc).await.unwrap_err();
        assert!(matches!(err, CodaError::InvalidResponse(_)));

        let err = collab.generate_patch("task three", &doc).await.unwrap_err();
        assert!(matches!(err, CodaError::Api(_)));

        assert_eq!(collab.patch_tasks(), vec!["task one", "task two", "task three"]);
        assert_eq!(collab.remaining(), 0);
    }
}
