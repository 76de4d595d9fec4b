//! Prompt builders for every collaborator call
//!
//! Prompts are plain Markdown sections. Command output is tail-truncated so a
//! runaway build log cannot blow the context window; the end of a log is where
//! compilers and test harnesses put the part that matters.

use coda_core::{Document, SafetyCount};

/// Longest command output embedded in a prompt, in characters
pub const MAX_OUTPUT_CHARS: usize = 12_000;

const PATCH_FORMAT: &str = r#"## RESPONSE FORMAT

Do not return new code. Return a JSON object describing textual replacements:

```json
{
  "replacements": [
    {"original": "fn simple() -> i32 {\n    a + b\n}", "new": "fn simple() -> i32 {\n    a - b\n}"},
    {"original": "use std::collections::HashMap;\nuse std::collections::BTreeMap;", "new": "use std::collections::HashMap;"}
  ],
  "manifest_replacements": []
}
```

Rules:
- Each `original` must be copied from the current text and include several unchanged lines of context, so it matches exactly one place.
- List replacements in the order they appear in the file. Later replacements see the text after earlier ones were applied.
- `manifest_replacements` edits the manifest file in the same format; leave it empty if the manifest does not need to change.
- Return only the JSON object, with no comments or labels.
"#;

/// Ask for one narrowly-scoped plan that makes the code safer
pub fn strategy_prompt(code: &str, failed_summary: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a software engineering assistant. Your goal is to make a Rust file safer, \
         as measured by the number of lines inside `unsafe` blocks.\n\n",
    );

    prompt.push_str("## CURRENT CODE\n\n```rust\n");
    prompt.push_str(code);
    prompt.push_str("\n```\n\n");

    if !failed_summary.is_empty() {
        prompt.push_str("## PREVIOUS ATTEMPTS\n");
        prompt.push_str(failed_summary);
        prompt.push('\n');
    }

    prompt.push_str("## INSTRUCTIONS\n\n");
    prompt.push_str(
        "Describe one modification strategy that would make the code safer.\n\
         - Use 1-2 sentences.\n\
         - Change an isolated part of the code instead of making sweeping changes, for example \
         \"change this struct to use generic types to isolate the unsafe code (and its uses)\" or \
         \"change this function to use the Rust standard library instead of a C library (and everything that calls it)\".\n\
         - The strategy must make the code SAFER, not just more idiomatic, cleaner or faster.\n\
         - Include removing the `unsafe` keyword where it is no longer needed.\n\
         Do not explain your reasoning. Return only the strategy.\n",
    );

    prompt
}

/// Ask for a replacement set implementing `task` against `document`
pub fn patch_prompt(task: &str, document: &Document) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a software engineering assistant. You are given some code and a task \
         describing how to modify it.\n\n",
    );

    prompt.push_str("## CURRENT CODE\n\n```rust\n");
    prompt.push_str(&document.code);
    prompt.push_str("\n```\n\n");

    if let Some(manifest) = &document.manifest {
        prompt.push_str("## MANIFEST\n\n```toml\n");
        prompt.push_str(manifest);
        prompt.push_str("\n```\n\n");
    }

    prompt.push_str("## TASK\n\n");
    prompt.push_str(task);
    prompt.push_str("\n\n");

    prompt.push_str(PATCH_FORMAT);
    prompt
}

/// Ask for an easier task description after every patch attempt failed
pub fn generation_failure_prompt(task: &str, code: &str, attempts: usize) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a software engineering assistant. You were given some code and a task \
         describing how to modify it.\n\n",
    );

    prompt.push_str("## TASK\n\n");
    prompt.push_str(task);
    prompt.push_str("\n\n## CODE\n\n```rust\n");
    prompt.push_str(code);
    prompt.push_str("\n```\n\n");

    prompt.push_str(&format!(
        "You tried {} times to produce a replacement patch for this task and every attempt \
         failed to parse or to apply.\n\n",
        attempts
    ));
    prompt.push_str(
        "Rewrite the task description so a patch is easier to produce, keeping the same \
         strategy. Do not explain any reasoning. Return only the new task description.\n",
    );

    prompt
}

/// Ask whether a build with diagnostics is acceptable
///
/// Expected answers start with `good`, `bad: <new task>` or `stop: <message>`.
pub fn build_analysis_prompt(
    task: &str,
    code: &str,
    build_output: &str,
    original_task: &str,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a software engineering assistant. You were given some code and a task \
         describing how to modify it.\n\n",
    );

    prompt.push_str("## TASK\n\n");
    prompt.push_str(task);
    prompt.push_str("\n\n## CODE YOU GENERATED\n\n```rust\n");
    prompt.push_str(code);
    prompt.push_str("\n```\n\n## BUILD OUTPUT\n\n```\n");
    prompt.push_str(&tail_chars(build_output, MAX_OUTPUT_CHARS));
    prompt.push_str("\n```\n\n");

    prompt.push_str("## INSTRUCTIONS\n\n");
    prompt.push_str(
        "Did the modification compile without introducing significant NEW issues, \
         including easy-to-fix warnings?\n\
         - If the build failed for a reason unrelated to your modification (for example a \
         broken build command), answer \"stop: \" followed by a message for the user.\n\
         - If it worked, answer \"good\" followed by a short explanation.\n\
         - If it did not work, answer \"bad: \" followed by a new task description that \
         replaces the current one.\n\n",
    );
    prompt.push_str(&revision_rules(original_task));

    prompt
}

/// Ask for a revised task after the test run missed its expected output
pub fn test_analysis_prompt(
    task: &str,
    original_code: &str,
    new_code: &str,
    run_output: &str,
    original_task: &str,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a software engineering assistant. You were given some code and a task \
         describing how to modify it.\n\n",
    );

    prompt.push_str("## TASK\n\n");
    prompt.push_str(task);
    prompt.push_str("\n\n## ORIGINAL CODE\n\n```rust\n");
    prompt.push_str(original_code);
    prompt.push_str("\n```\n\n## CODE YOU GENERATED\n\n```rust\n");
    prompt.push_str(new_code);
    prompt.push_str("\n```\n\n## RUN OUTPUT\n\n");
    prompt.push_str(
        "The program compiled, but running it did not produce the expected output:\n\n```\n",
    );
    prompt.push_str(&tail_chars(run_output, MAX_OUTPUT_CHARS));
    prompt.push_str("\n```\n\n");

    prompt.push_str("## INSTRUCTIONS\n\n");
    prompt.push_str(
        "Write a new, better task description that modifies the original code so that it \
         produces the expected output.\n\n",
    );
    prompt.push_str(&revision_rules(original_task));

    prompt
}

/// Ask whether a strategy that did not reduce unsafe lines can still work
///
/// Expected answers start with `good: <new task>` or `bad: <reason>`.
pub fn safety_analysis_prompt(
    task: &str,
    original_code: &str,
    new_code: &str,
    old_count: SafetyCount,
    new_count: SafetyCount,
    original_task: &str,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are a software engineering assistant. You were given some code and a task \
         describing how to modify it to make it safer.\n\n",
    );

    prompt.push_str("## TASK\n\n");
    prompt.push_str(task);
    prompt.push_str("\n\n## ORIGINAL CODE\n\n```rust\n");
    prompt.push_str(original_code);
    prompt.push_str("\n```\n\n## CODE YOU GENERATED\n\n```rust\n");
    prompt.push_str(new_code);
    prompt.push_str("\n```\n\n");

    let comparison = if new_count.line_count == old_count.line_count {
        "the new code has the same number of unsafe lines as the original code"
    } else {
        "the new code has more unsafe lines than the original code"
    };
    prompt.push_str("## RESULT\n\n");
    prompt.push_str(&format!(
        "The program compiled and ran successfully, preserving the original functionality. \
         However, {}, so the modification failed ({} new vs {} old unsafe lines).\n\n",
        comparison, new_count.line_count, old_count.line_count
    ));

    prompt.push_str("## INSTRUCTIONS\n\n");
    prompt.push_str(&format!(
        "Keeping the core strategy of <{}>, is it possible to refine the task description \
         so the code actually becomes safer (fewer unsafe lines)? Only the fine details may change.\n\
         - If it is not possible, answer \"bad: \" followed by concise reasoning.\n\
         - If it is possible, answer \"good: \" followed by the new task description. \
         Do not explain any reasoning.\n",
        original_task
    ));

    prompt
}

fn revision_rules(original_task: &str) -> String {
    format!(
        "A new task description must:\n\
         - Preserve the core strategy of the original task description: <{}>, with the \
         ultimate goal of reducing the number of unsafe lines\n\
         - Work where the current one (and the original one) did not\n\
         - Contain no reasoning, only the new task description\n",
        original_task
    )
}

/// Keep the last `max_chars` characters of `text`
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().skip(total - max_chars).collect();
    format!("[... {} earlier characters omitted]\n{}", total - max_chars, kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_prompt_includes_failures_only_when_present() {
        let fresh = strategy_prompt("fn main() {}", "");
        assert!(fresh.contains("fn main() {}"));
        assert!(!fresh.contains("PREVIOUS ATTEMPTS"));

        let retry = strategy_prompt("fn main() {}", "\n- tried X\n");
        assert!(retry.contains("PREVIOUS ATTEMPTS"));
        assert!(retry.contains("tried X"));
    }

    #[test]
    fn test_patch_prompt_manifest_section() {
        let doc = Document::new("fn main() {}");
        assert!(!patch_prompt("task", &doc).contains("## MANIFEST"));

        let doc = doc.with_manifest("[dependencies]\nlibc = \"0.2\"");
        let prompt = patch_prompt("remove libc", &doc);
        assert!(prompt.contains("## MANIFEST"));
        assert!(prompt.contains("libc = \"0.2\""));
        assert!(prompt.contains("remove libc"));
        assert!(prompt.contains("\"replacements\""));
    }

    #[test]
    fn test_safety_prompt_wording_follows_counts() {
        let same = safety_analysis_prompt(
            "t",
            "a",
            "b",
            SafetyCount::new(1, 4),
            SafetyCount::new(1, 4),
            "orig",
        );
        assert!(same.contains("same number of unsafe lines"));
        assert!(same.contains("(4 new vs 4 old unsafe lines)"));

        let worse = safety_analysis_prompt(
            "t",
            "a",
            "b",
            SafetyCount::new(1, 4),
            SafetyCount::new(2, 6),
            "orig",
        );
        assert!(worse.contains("more unsafe lines"));
        assert!(worse.contains("<orig>"));
    }

    #[test]
    fn test_build_prompt_truncates_output() {
        let output = "x".repeat(MAX_OUTPUT_CHARS + 10);
        let prompt = build_analysis_prompt("t", "code", &output, "orig");
        assert!(prompt.contains("[... 10 earlier characters omitted]"));
        assert!(prompt.contains("\"stop: \""));
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("hello", 10), "hello");
        assert_eq!(tail_chars("hello", 0), "");
        assert_eq!(tail_chars("héllo", 2), "[... 3 earlier characters omitted]\nlo");
    }
}
