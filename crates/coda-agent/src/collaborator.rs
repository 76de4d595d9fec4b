//! The language-model collaborator seam
//!
//! The control loop only ever talks to `dyn Collaborator`; production wires in
//! `LlmCollaborator`, tests wire in `ScriptedCollaborator`.

use crate::client::AgentClient;
use crate::prompts;
use crate::verdict::parse_patch_response;
use async_trait::async_trait;
use coda_core::{Document, PatchProposal, Result, SafetyCount};
use tracing::debug;

/// External collaborator calls made by the strategy manager and verification loop
///
/// Classification methods return the raw answer; the loop parses it with
/// `BuildVerdict` / `SafetyVerdict` so an unparseable answer can be re-asked.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// A one-or-two-sentence plan for making `code` safer
    async fn propose_strategy(&self, code: &str, failed_summary: &str) -> Result<String>;

    /// A replacement set implementing `task` against `document`
    async fn generate_patch(&self, task: &str, document: &Document) -> Result<PatchProposal>;

    /// An easier task description after `attempts` failed patch generations
    async fn revise_after_generation_failure(
        &self,
        task: &str,
        code: &str,
        attempts: usize,
    ) -> Result<String>;

    /// `good ...`, `bad: <task>` or `stop: <message>`
    async fn classify_build(
        &self,
        task: &str,
        code: &str,
        build_output: &str,
        original_task: &str,
    ) -> Result<String>;

    /// A revised task after the test run missed its expected output
    async fn classify_test(
        &self,
        task: &str,
        original_code: &str,
        new_code: &str,
        run_output: &str,
        original_task: &str,
    ) -> Result<String>;

    /// `good: <task>` or `bad: <reason>`
    async fn classify_safety(
        &self,
        task: &str,
        original_code: &str,
        new_code: &str,
        old_count: SafetyCount,
        new_count: SafetyCount,
        original_task: &str,
    ) -> Result<String>;
}

/// Collaborator backed by the Anthropic Messages API
#[derive(Debug, Clone, Default)]
pub struct LlmCollaborator {
    client: AgentClient,
}

impl LlmCollaborator {
    pub fn new(client: AgentClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AgentClient {
        &self.client
    }

    async fn ask(&self, purpose: &str, prompt: String) -> Result<String> {
        debug!("{} prompt: {} chars", purpose, prompt.len());
        let answer = self.client.complete(&prompt).await?;
        Ok(answer.trim().to_string())
    }
}

#[async_trait]
impl Collaborator for LlmCollaborator {
    async fn propose_strategy(&self, code: &str, failed_summary: &str) -> Result<String> {
        self.ask("Strategy", prompts::strategy_prompt(code, failed_summary))
            .await
    }

    async fn generate_patch(&self, task: &str, document: &Document) -> Result<PatchProposal> {
        let answer = self
            .ask("Patch", prompts::patch_prompt(task, document))
            .await?;
        parse_patch_response(&answer)
    }

    async fn revise_after_generation_failure(
        &self,
        task: &str,
        code: &str,
        attempts: usize,
    ) -> Result<String> {
        self.ask(
            "Generation failure",
            prompts::generation_failure_prompt(task, code, attempts),
        )
        .await
    }

    async fn classify_build(
        &self,
        task: &str,
        code: &str,
        build_output: &str,
        original_task: &str,
    ) -> Result<String> {
        self.ask(
            "Build analysis",
            prompts::build_analysis_prompt(task, code, build_output, original_task),
        )
        .await
    }

    async fn classify_test(
        &self,
        task: &str,
        original_code: &str,
        new_code: &str,
        run_output: &str,
        original_task: &str,
    ) -> Result<String> {
        self.ask(
            "Test analysis",
            prompts::test_analysis_prompt(task, original_code, new_code, run_output, original_task),
        )
        .await
    }

    async fn classify_safety(
        &self,
        task: &str,
        original_code: &str,
        new_code: &str,
        old_count: SafetyCount,
        new_count: SafetyCount,
        original_task: &str,
    ) -> Result<String> {
        self.ask(
            "Safety analysis",
            prompts::safety_analysis_prompt(
                task,
                original_code,
                new_code,
                old_count,
                new_count,
                original_task,
            ),
        )
        .await
    }
}
