//! Authentication for the Anthropic API
//!
//! Supports two credentials:
//! 1. OAuth token (CLAUDE_CODE_OAUTH_TOKEN) for subscription access
//! 2. Anthropic API key (ANTHROPIC_API_KEY) for standard API access

use coda_core::{CodaError, Result};
use std::env;

const OAUTH_TOKEN_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";
const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Get the credential for Anthropic API calls
///
/// Priority:
/// 1. CLAUDE_CODE_OAUTH_TOKEN
/// 2. ANTHROPIC_API_KEY
///
/// Empty values are treated as unset.
pub fn get_auth_token() -> Result<String> {
    if let Some(token) = non_empty_var(OAUTH_TOKEN_VAR) {
        tracing::debug!("Using OAuth token for model calls");
        return Ok(token);
    }

    if let Some(key) = non_empty_var(API_KEY_VAR) {
        tracing::debug!("Using {} for model calls", API_KEY_VAR);
        return Ok(key);
    }

    Err(CodaError::Auth(format!(
        "No credentials found. Set either:\n\
         - {}=sk-ant-oat01-... (subscription access)\n\
         - {}=sk-ant-api03-...       (API access)",
        OAUTH_TOKEN_VAR, API_KEY_VAR
    )))
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize the tests that touch them
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        for (key, value) in vars {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }

        result
    }

    #[test]
    fn test_oauth_token_priority() {
        with_env_vars(
            &[
                (OAUTH_TOKEN_VAR, Some("test-oauth")),
                (API_KEY_VAR, Some("test-api-key")),
            ],
            || assert_eq!(get_auth_token().unwrap(), "test-oauth"),
        );
    }

    #[test]
    fn test_api_key_fallback() {
        with_env_vars(
            &[(OAUTH_TOKEN_VAR, None), (API_KEY_VAR, Some("test-api-key"))],
            || assert_eq!(get_auth_token().unwrap(), "test-api-key"),
        );
    }

    #[test]
    fn test_empty_token_is_ignored() {
        with_env_vars(
            &[(OAUTH_TOKEN_VAR, Some("  ")), (API_KEY_VAR, Some("key"))],
            || assert_eq!(get_auth_token().unwrap(), "key"),
        );
    }

    #[test]
    fn test_no_auth() {
        with_env_vars(&[(OAUTH_TOKEN_VAR, None), (API_KEY_VAR, None)], || {
            assert!(matches!(get_auth_token(), Err(CodaError::Auth(_))));
        });
    }
}
