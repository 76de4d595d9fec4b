//! # coda-agent
//!
//! Language-model collaborators for the Coda loop.
//!
//! Every call is a fresh, single-message request: no conversation history is
//! kept between calls. State reaches the model only through the prompt text
//! (current code, previous task description, build or run output).
//!
//! ## Collaborators
//!
//! - `propose_strategy` - one narrowly-scoped plan for making the code safer
//! - `generate_patch` - an ordered replacement set for a task prompt
//! - `revise_after_generation_failure` - an easier task prompt after repeated patch failures
//! - `classify_build` / `classify_test` / `classify_safety` - verdicts on each loop phase

mod auth;
mod circuit_breaker;
mod client;
mod collaborator;
mod mock;
pub mod prompts;
mod types;
mod verdict;

pub use auth::get_auth_token;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{send_prompt, AgentClient};
pub use collaborator::{Collaborator, LlmCollaborator};
pub use mock::{ScriptedCollaborator, ScriptedReply};
pub use types::*;
pub use verdict::{parse_patch_response, BuildVerdict, SafetyVerdict};
