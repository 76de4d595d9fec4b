//! Verification loop - drives one strategy through the state machine
//!
//! The loop owns all I/O: collaborator calls, the patch applier, build and
//! test commands, live-file writes and run logging. `transition` decides what
//! happens next; this module only turns the current phase into an event and
//! carries out the returned actions.

use crate::progress::ProgressTicker;
use crate::run_log::RunLogger;
use crate::runner::{is_clean_build, is_warning_only_build, run_command};
use crate::state_machine::{transition, Action, Event, Phase};
use crate::strategy::outcome_line;
use crate::workspace::LiveWorkspace;
use coda_agent::{BuildVerdict, Collaborator, SafetyVerdict};
use coda_core::fail_open::fail_open;
use coda_core::{CodaConfig, Document, LoopSettings, Result, SafetyCount, StrategyStatus, TargetConfig};
use coda_patch::{apply_proposal, count_unsafe_with_keyword};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything the loop needs besides the collaborator
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub settings: LoopSettings,
    pub target: TargetConfig,
    pub show_progress: bool,
}

impl VerifyConfig {
    pub fn from_config(config: &CodaConfig) -> Self {
        Self {
            settings: config.loop_settings.clone(),
            target: config.target.clone(),
            show_progress: config.log.show_progress,
        }
    }

    fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.target.build_timeout_secs)
    }

    fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.target.test_timeout_secs)
    }
}

/// How one strategy ended
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    /// Terminal phase: `Finished(status)` or `Aborted(message)`
    pub phase: Phase,
    /// Prompts tried, starting at 1
    pub attempts: usize,
    /// The adopted candidate on success, otherwise the base document
    pub document: Document,
    pub count: SafetyCount,
    pub elapsed: Duration,
    /// Every phase visited, in order, ending with the terminal one
    pub trace: Vec<Phase>,
}

impl StrategyOutcome {
    pub fn status(&self) -> Option<StrategyStatus> {
        match self.phase {
            Phase::Finished(status) => Some(status),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status().is_some_and(|s| s.is_success())
    }

    pub fn abort_message(&self) -> Option<&str> {
        match &self.phase {
            Phase::Aborted(message) => Some(message),
            _ => None,
        }
    }
}

/// Mutable state of the strategy in flight
struct Attempt<'a> {
    original_task: &'a str,
    task: String,
    attempts: usize,
    generation_failures: usize,
    candidate: Option<Document>,
    build_output: String,
    test_output: String,
    new_count: SafetyCount,
}

pub struct VerificationLoop {
    config: VerifyConfig,
    workspace: LiveWorkspace,
}

impl VerificationLoop {
    pub fn new(config: VerifyConfig, workspace: LiveWorkspace) -> Self {
        Self { config, workspace }
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    pub fn workspace(&self) -> &LiveWorkspace {
        &self.workspace
    }

    /// Run `strategy` against `base` until it reaches a terminal phase
    ///
    /// Errors are reserved for faults outside the loop's contract (live-file
    /// writes, commands that cannot be spawned). The base document is written
    /// back before such an error is returned.
    pub async fn run_strategy(
        &self,
        collaborator: &dyn Collaborator,
        logger: &mut RunLogger,
        base: &Document,
        strategy: &str,
    ) -> Result<StrategyOutcome> {
        match self.drive(collaborator, logger, base, strategy).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Strategy interrupted: {}", e);
                fail_open("verify_loop::restore_base", || self.workspace.write(base)).await;
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        collaborator: &dyn Collaborator,
        logger: &mut RunLogger,
        base: &Document,
        strategy: &str,
    ) -> Result<StrategyOutcome> {
        let started = Instant::now();
        let keyword = &self.config.settings.unsafe_keyword;
        let base_count = count_unsafe_with_keyword(&base.code, keyword);

        let mut state = Attempt {
            original_task: strategy,
            task: strategy.to_string(),
            attempts: 1,
            generation_failures: 0,
            candidate: None,
            build_output: String::new(),
            test_output: String::new(),
            new_count: base_count,
        };
        logger.log_prompt(strategy).await;

        let mut phase = Phase::Generating;
        let mut trace = vec![phase.clone()];
        let mut adopted = false;

        while !phase.is_terminal() {
            let step_started = Instant::now();
            let event = match &phase {
                Phase::Generating => self.generate(collaborator, logger, base, &mut state).await,
                Phase::Building => self.build(logger, &mut state).await?,
                Phase::BuildAnalyzing => {
                    self.analyze_build(collaborator, logger, base, &mut state).await
                }
                Phase::Testing => self.test(logger, &mut state).await?,
                Phase::TestAnalyzing => {
                    self.analyze_test(collaborator, logger, base, &mut state).await
                }
                Phase::SafetyComparing => {
                    self.compare_safety(collaborator, logger, base, base_count, &mut state)
                        .await
                }
                Phase::Finished(_) | Phase::Aborted(_) => break,
            };

            if let Event::PromptRevised { prompt } = &event {
                state.task = prompt.clone();
                state.generation_failures = 0;
                logger.log_prompt(prompt).await;
            }

            debug!("{} + {:?}", phase.label(), event);
            let (next, actions) = transition(phase, event);
            for action in actions {
                match action {
                    Action::LogStatus { message } => {
                        info!("{}", message);
                        logger
                            .log_status(&message, Some(step_started.elapsed()))
                            .await;
                    }
                    Action::WriteCandidate => {
                        if let Some(candidate) = &state.candidate {
                            self.workspace.write(candidate).await?;
                        }
                    }
                    Action::AdoptCandidate => adopted = true,
                    Action::RestoreBase => self.workspace.write(base).await?,
                }
            }
            phase = next;
            trace.push(phase.clone());
        }

        let elapsed = started.elapsed();
        let (document, count) = match (adopted, state.candidate) {
            (true, Some(candidate)) => (candidate, state.new_count),
            _ => (base.clone(), base_count),
        };

        match &phase {
            Phase::Finished(status) => {
                let line = outcome_line(*status, state.attempts, elapsed);
                info!("{}", line);
                logger.log_strategy_result(&line, count).await;
            }
            Phase::Aborted(message) => {
                logger
                    .log_status(&format!("Aborted: {}", message), Some(elapsed))
                    .await;
            }
            _ => {}
        }

        Ok(StrategyOutcome {
            phase,
            attempts: state.attempts,
            document,
            count,
            elapsed,
            trace,
        })
    }

    /// Count a new prompt against the per-strategy budget
    ///
    /// `attempts` only grows when the new prompt will actually be tried.
    fn revise(&self, state: &mut Attempt<'_>, prompt: String) -> Event {
        if state.attempts >= self.config.settings.max_prompt_attempts {
            warn!(
                "Prompt budget of {} attempts spent",
                self.config.settings.max_prompt_attempts
            );
            return Event::AttemptsExhausted;
        }
        state.attempts += 1;
        Event::PromptRevised { prompt }
    }

    async fn generate(
        &self,
        collaborator: &dyn Collaborator,
        logger: &RunLogger,
        base: &Document,
        state: &mut Attempt<'_>,
    ) -> Event {
        let ticker = ProgressTicker::maybe_start(self.config.show_progress, "Generating patch");
        let policy = self.config.settings.match_policy;
        let generated = match collaborator.generate_patch(&state.task, base).await {
            Ok(proposal) => apply_proposal(base, &proposal, policy).map(|doc| (proposal, doc)),
            Err(e) => Err(e),
        };
        let elapsed = ticker.stop();

        match generated {
            Ok((proposal, candidate)) => {
                logger
                    .log_generated(
                        &proposal,
                        &candidate,
                        state.generation_failures + 1,
                        elapsed,
                    )
                    .await;
                state.candidate = Some(candidate);
                Event::PatchApplied
            }
            Err(e) => {
                state.generation_failures += 1;
                let source = if e.is_patch_error() {
                    "patch did not apply"
                } else {
                    "generation call failed"
                };
                logger
                    .log_generation_attempt(
                        state.generation_failures,
                        &format!("{}: {}", source, e),
                    )
                    .await;

                let retries = self.config.settings.generation_retries.max(1);
                if state.generation_failures < retries {
                    return Event::GenerationFailed {
                        reason: format!(
                            "{}: {} (attempt {}/{})",
                            source, e, state.generation_failures, retries
                        ),
                    };
                }

                warn!(
                    "Generation failed {} times, asking for a different prompt",
                    state.generation_failures
                );
                self.escalate(collaborator, base, state).await
            }
        }
    }

    /// Ask for an easier prompt after the generation retries ran out
    ///
    /// Failed calls are retried up to `generation_retries` times. Only an
    /// empty answer, the same prompt back, or running out of retries ends the
    /// strategy.
    async fn escalate(
        &self,
        collaborator: &dyn Collaborator,
        base: &Document,
        state: &mut Attempt<'_>,
    ) -> Event {
        let retries = self.config.settings.generation_retries.max(1);
        for call in 1..=retries {
            match collaborator
                .revise_after_generation_failure(
                    &state.task,
                    &base.code,
                    state.generation_failures,
                )
                .await
            {
                Ok(prompt) => {
                    let prompt = prompt.trim();
                    if prompt.is_empty() || prompt == state.task.trim() {
                        return Event::GenerationExhausted;
                    }
                    return self.revise(state, prompt.to_string());
                }
                Err(e) => {
                    warn!(
                        "Generation failure follow-up failed ({}/{}): {}",
                        call, retries, e
                    );
                }
            }
        }
        Event::GenerationExhausted
    }

    async fn build(&self, logger: &RunLogger, state: &mut Attempt<'_>) -> Result<Event> {
        let target = &self.config.target;
        let ticker = ProgressTicker::maybe_start(self.config.show_progress, "Building");
        let output = run_command(
            &target.build_command,
            target.working_dir.as_deref(),
            self.config.build_timeout(),
            None,
        )
        .await?;
        drop(ticker);

        logger
            .log_verbose(&format!(
                "Build exit code {:?}:\n{}",
                output.exit_code, output.output
            ))
            .await;

        let clean = is_clean_build(&output)
            || (self.config.settings.accept_build_warnings && is_warning_only_build(&output));
        state.build_output = output.output;
        Ok(Event::BuildFinished { clean })
    }

    async fn analyze_build(
        &self,
        collaborator: &dyn Collaborator,
        logger: &RunLogger,
        base: &Document,
        state: &mut Attempt<'_>,
    ) -> Event {
        let task = state.task.as_str();
        let code = state.candidate.as_ref().unwrap_or(base).code.as_str();
        let build_output = state.build_output.as_str();
        let original_task = state.original_task;

        let verdict = self
            .ask_verdict(
                "build",
                logger,
                move || collaborator.classify_build(task, code, build_output, original_task),
                BuildVerdict::parse,
            )
            .await;

        match verdict {
            Some(BuildVerdict::Good) => Event::BuildAccepted,
            Some(BuildVerdict::Bad(prompt)) => self.revise(state, prompt),
            Some(BuildVerdict::Stop(message)) => Event::BuildStopped { message },
            None => Event::AttemptsExhausted,
        }
    }

    async fn test(&self, logger: &RunLogger, state: &mut Attempt<'_>) -> Result<Event> {
        let target = &self.config.target;
        let ticker = ProgressTicker::maybe_start(self.config.show_progress, "Testing");
        let output = run_command(
            &target.test_command,
            target.working_dir.as_deref(),
            self.config.test_timeout(),
            Some(target.test_expected_output.as_str()),
        )
        .await?;
        drop(ticker);

        logger
            .log_verbose(&format!("Test output:\n{}", output.output))
            .await;

        let passed =
            output.marker_seen || output.output.contains(target.test_expected_output.as_str());
        state.test_output = output.output;
        Ok(Event::TestFinished { passed })
    }

    async fn analyze_test(
        &self,
        collaborator: &dyn Collaborator,
        logger: &RunLogger,
        base: &Document,
        state: &mut Attempt<'_>,
    ) -> Event {
        let task = state.task.as_str();
        let original_code = base.code.as_str();
        let new_code = state.candidate.as_ref().unwrap_or(base).code.as_str();
        let run_output = state.test_output.as_str();
        let original_task = state.original_task;

        let prompt = self
            .ask_verdict(
                "test",
                logger,
                move || {
                    collaborator.classify_test(task, original_code, new_code, run_output, original_task)
                },
                |answer: &str| {
                    let answer = answer.trim();
                    (!answer.is_empty()).then(|| answer.to_string())
                },
            )
            .await;

        match prompt {
            Some(prompt) => self.revise(state, prompt),
            None => Event::AttemptsExhausted,
        }
    }

    async fn compare_safety(
        &self,
        collaborator: &dyn Collaborator,
        logger: &RunLogger,
        base: &Document,
        base_count: SafetyCount,
        state: &mut Attempt<'_>,
    ) -> Event {
        let new_code = state.candidate.as_ref().unwrap_or(base).code.as_str();
        let new_count = count_unsafe_with_keyword(new_code, &self.config.settings.unsafe_keyword);
        state.new_count = new_count;
        logger
            .log_status(
                &format!(
                    "Unsafe lines: {} -> {}",
                    base_count.line_count, new_count.line_count
                ),
                None,
            )
            .await;

        if new_count.line_count < base_count.line_count {
            return Event::SafetyImproved;
        }

        let task = state.task.as_str();
        let original_code = base.code.as_str();
        let original_task = state.original_task;
        let verdict = self
            .ask_verdict(
                "safety",
                logger,
                move || {
                    collaborator.classify_safety(
                        task,
                        original_code,
                        new_code,
                        base_count,
                        new_count,
                        original_task,
                    )
                },
                SafetyVerdict::parse,
            )
            .await;

        match verdict {
            Some(SafetyVerdict::Good(prompt)) => self.revise(state, prompt),
            Some(SafetyVerdict::Bad(reason)) => {
                logger.log_verbose(&format!("Abandoned: {}", reason)).await;
                let status = if new_count.line_count > base_count.line_count {
                    StrategyStatus::CodeSafetyDeteriorated
                } else {
                    StrategyStatus::CodeSafetyUnchanged
                };
                Event::StrategyAbandoned { status }
            }
            None => Event::AttemptsExhausted,
        }
    }

    /// Ask until the answer parses
    ///
    /// Unparseable answers are re-asked up to `max_verdict_retries` times and
    /// failed calls up to `generation_retries` times. Neither spends a prompt
    /// attempt. `None` means the collaborator never produced a usable answer.
    async fn ask_verdict<T, F, Fut, P>(
        &self,
        kind: &str,
        logger: &RunLogger,
        mut ask: F,
        parse: P,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
        P: Fn(&str) -> Option<T>,
    {
        let settings = &self.config.settings;
        let max_errors = settings.generation_retries.max(1);
        let mut errors = 0;
        let mut unparseable = 0;

        loop {
            let ticker = ProgressTicker::maybe_start(
                self.config.show_progress,
                format!("Analyzing {}", kind),
            );
            let answer = ask().await;
            drop(ticker);

            match answer {
                Ok(answer) => {
                    logger
                        .log_verbose(&format!("{} verdict: {}", kind, answer.trim()))
                        .await;
                    if let Some(verdict) = parse(&answer) {
                        return Some(verdict);
                    }
                    unparseable += 1;
                    warn!(
                        "Unparseable {} verdict ({}/{})",
                        kind, unparseable, settings.max_verdict_retries
                    );
                    if unparseable > settings.max_verdict_retries {
                        return None;
                    }
                }
                Err(e) => {
                    errors += 1;
                    warn!("{} analysis failed ({}/{}): {}", kind, errors, max_errors, e);
                    if errors >= max_errors {
                        return None;
                    }
                }
            }
        }
    }
}
