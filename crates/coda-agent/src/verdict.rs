//! Parsing of collaborator answers
//!
//! Verdicts are prefix-tagged free text. Anything that does not carry a
//! recognised prefix parses to `None`; the loop re-asks instead of guessing.

use coda_core::{CodaError, PatchProposal, Replacement, Result};

/// Classification of a build that was not unambiguously clean
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildVerdict {
    /// Compiled acceptably despite the noise
    Good,
    /// Did not work; carries the replacement task prompt
    Bad(String),
    /// Environment or build-command fault; carries a message for the user
    Stop(String),
}

impl BuildVerdict {
    pub fn parse(answer: &str) -> Option<Self> {
        let answer = clean(answer);

        if let Some(rest) = strip_prefix_ci(answer, "stop:") {
            return Some(BuildVerdict::Stop(rest.trim().to_string()));
        }
        if let Some(rest) = strip_prefix_ci(answer, "bad:") {
            return non_empty(rest).map(BuildVerdict::Bad);
        }
        if strip_prefix_ci(answer, "good").is_some() {
            return Some(BuildVerdict::Good);
        }
        None
    }
}

/// Whether a strategy that did not reduce unsafe lines deserves another prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    /// Keep going with this refined task prompt
    Good(String),
    /// Abandon the strategy; carries the reasoning
    Bad(String),
}

impl SafetyVerdict {
    pub fn parse(answer: &str) -> Option<Self> {
        let answer = clean(answer);

        if let Some(rest) = strip_prefix_ci(answer, "good:") {
            return non_empty(rest).map(SafetyVerdict::Good);
        }
        if let Some(rest) = strip_prefix_ci(answer, "bad:") {
            return Some(SafetyVerdict::Bad(rest.trim().to_string()));
        }
        None
    }
}

/// Parse a patch-generation answer into a proposal
///
/// Accepts the JSON object form, optionally inside a Markdown code fence and
/// surrounded by prose, or a bare array of replacements. Any shape deviation
/// is `InvalidResponse`.
pub fn parse_patch_response(answer: &str) -> Result<PatchProposal> {
    let body = strip_markdown_fences(answer);

    if body.starts_with('[') {
        let fragment = extract_json_fragment(body, '[', ']')
            .ok_or_else(|| CodaError::InvalidResponse("Unterminated JSON array".to_string()))?;
        let replacements: Vec<Replacement> = serde_json::from_str(fragment)
            .map_err(|e| CodaError::InvalidResponse(format!("Bad replacement list: {}", e)))?;
        return Ok(PatchProposal {
            replacements,
            manifest_replacements: Vec::new(),
        });
    }

    let fragment = extract_json_fragment(body, '{', '}').ok_or_else(|| {
        CodaError::InvalidResponse("No JSON object found in patch response".to_string())
    })?;

    serde_json::from_str(fragment)
        .map_err(|e| CodaError::InvalidResponse(format!("Bad patch object: {}", e)))
}

/// Trim whitespace and the quoting/emphasis models like to wrap answers in
fn clean(answer: &str) -> &str {
    answer.trim().trim_matches(|c| c == '"' || c == '`' || c == '*').trim()
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    clean.strip_suffix("```").unwrap_or(clean).trim()
}

/// First balanced fragment between `open` and `close`, ignoring string contents
fn extract_json_fragment(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }

        if c == open {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == close && depth > 0 {
            depth -= 1;
            if depth == 0 {
                return start_idx.map(|start| &text[start..=i]);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_verdicts() {
        assert_eq!(
            BuildVerdict::parse("good, only pre-existing warnings"),
            Some(BuildVerdict::Good)
        );
        assert_eq!(
            BuildVerdict::parse("Bad: use slices instead of raw pointers"),
            Some(BuildVerdict::Bad(
                "use slices instead of raw pointers".to_string()
            ))
        );
        assert_eq!(
            BuildVerdict::parse("  stop: cargo is not installed\n"),
            Some(BuildVerdict::Stop("cargo is not installed".to_string()))
        );
        assert_eq!(
            BuildVerdict::parse("\"good\""),
            Some(BuildVerdict::Good)
        );
    }

    #[test]
    fn test_unparseable_build_verdicts() {
        assert_eq!(BuildVerdict::parse("I think it compiled"), None);
        assert_eq!(BuildVerdict::parse(""), None);
        assert_eq!(BuildVerdict::parse("bad:   "), None);
    }

    #[test]
    fn test_safety_verdicts() {
        assert_eq!(
            SafetyVerdict::parse("good: also remove the raw pointer field"),
            Some(SafetyVerdict::Good(
                "also remove the raw pointer field".to_string()
            ))
        );
        assert_eq!(
            SafetyVerdict::parse("BAD: FFI call is unavoidable"),
            Some(SafetyVerdict::Bad("FFI call is unavoidable".to_string()))
        );
        assert_eq!(SafetyVerdict::parse("good"), None);
        assert_eq!(SafetyVerdict::parse("maybe"), None);
    }

    #[test]
    fn test_parse_patch_plain_object() {
        let proposal =
            parse_patch_response(r#"{"replacements":[{"original":"a()","new":"b()"}]}"#).unwrap();
        assert_eq!(proposal.replacements, vec![Replacement::new("a()", "b()")]);
        assert!(proposal.manifest_replacements.is_empty());
    }

    #[test]
    fn test_parse_patch_fenced_with_braces_in_strings() {
        let answer = "```json\n{\"replacements\":[{\"original\":\"unsafe { f() }\",\"new\":\"f()\"}],\"manifest_replacements\":[{\"original\":\"libc = \\\"0.2\\\"\",\"new\":\"\"}]}\n```";
        let proposal = parse_patch_response(answer).unwrap();
        assert_eq!(proposal.replacements[0].original, "unsafe { f() }");
        assert_eq!(proposal.manifest_replacements[0].original, "libc = \"0.2\"");
    }

    #[test]
    fn test_parse_patch_with_prose() {
        let answer = "Here is the patch:\n{\"replacements\": []}\nThanks!";
        assert!(parse_patch_response(answer).unwrap().replacements.is_empty());
    }

    #[test]
    fn test_parse_patch_bare_array() {
        let proposal = parse_patch_response(r#"[{"original":"x","new":"y"}]"#).unwrap();
        assert_eq!(proposal.replacements.len(), 1);
    }

    #[test]
    fn test_parse_patch_shape_errors() {
        for answer in [
            "no json here",
            r#"{"replacements": "not a list"}"#,
            r#"{"replacements": [{"original": "x"}]}"#,
            r#"{"edits": []}"#,
            "{\"replacements\": [",
        ] {
            let err = parse_patch_response(answer).unwrap_err();
            assert!(
                matches!(err, CodaError::InvalidResponse(_)),
                "unexpected error for {answer}: {err}"
            );
        }
    }
}
