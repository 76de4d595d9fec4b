//! Lexical unsafe-code metric
//!
//! Counts unsafe blocks and the non-trivial code lines inside them. The scan
//! is purely textual: comments are stripped first, then a three-state machine
//! follows the keyword, its opening brace, and brace nesting until the
//! outermost close. It knows nothing about the target language's grammar.

use coda_core::SafetyCount;

/// Characters that never make a line count as code on their own
const STRUCTURAL_PUNCTUATION: &[char] = &['{', '}', '(', ')', '[', ']', ',', ';'];

/// Count unsafe blocks and lines using the `unsafe` keyword
pub fn count_unsafe(source: &str) -> SafetyCount {
    SafetyScanner::default().count(source)
}

/// Count unsafe blocks and lines using a custom marker keyword
pub fn count_unsafe_with_keyword(source: &str, keyword: &str) -> SafetyCount {
    SafetyScanner::new(keyword).count(source)
}

/// Remove `//` line comments and (nested) `/* */` block comments
///
/// Works line by line, carrying the block-comment depth across lines. Line
/// structure is preserved, so a commented-out line becomes an empty line.
pub fn strip_comments(source: &str) -> String {
    let mut depth = 0usize;
    let mut lines = Vec::new();

    for line in source.split('\n') {
        let bytes = line.as_bytes();
        let mut kept = String::with_capacity(line.len());
        let mut i = 0;

        while i < bytes.len() {
            let pair = (bytes[i], bytes.get(i + 1).copied());
            if depth > 0 {
                match pair {
                    (b'/', Some(b'*')) => {
                        depth += 1;
                        i += 2;
                    }
                    (b'*', Some(b'/')) => {
                        depth -= 1;
                        i += 2;
                    }
                    _ => i += 1,
                }
                continue;
            }

            match pair {
                (b'/', Some(b'/')) => break,
                (b'/', Some(b'*')) => {
                    depth = 1;
                    i += 2;
                }
                _ => {
                    // Copy the whole UTF-8 character starting here
                    let ch_len = line[i..].chars().next().map_or(1, char::len_utf8);
                    kept.push_str(&line[i..i + ch_len]);
                    i += ch_len;
                }
            }
        }

        lines.push(kept);
    }

    lines.join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Outside,
    SeenKeywordAwaitingBrace,
    InsideUnsafeBlock { depth: usize },
}

/// Unsafe-region scanner parameterized by its marker keyword
#[derive(Debug, Clone)]
pub struct SafetyScanner {
    keyword: String,
}

impl Default for SafetyScanner {
    fn default() -> Self {
        Self::new("unsafe")
    }
}

impl SafetyScanner {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }

    /// Count unsafe blocks and the non-trivial lines they contain
    ///
    /// A line is counted at most once, and only if it takes part in an
    /// unsafe region (keyword line, brace line, body line, closing line) and
    /// still has code once the keyword and structural punctuation are removed.
    pub fn count(&self, source: &str) -> SafetyCount {
        let stripped = strip_comments(source);
        let mut state = ScanState::Outside;
        let mut count = SafetyCount::default();

        for line in stripped.lines() {
            let mut in_region = false;
            let mut cursor = 0;

            loop {
                match state {
                    ScanState::Outside => match self.find_keyword(line, cursor) {
                        Some(pos) => {
                            state = ScanState::SeenKeywordAwaitingBrace;
                            in_region = true;
                            cursor = pos + self.keyword.len();
                        }
                        None => break,
                    },
                    ScanState::SeenKeywordAwaitingBrace => match line[cursor..].find('{') {
                        Some(offset) => {
                            state = ScanState::InsideUnsafeBlock { depth: 1 };
                            count.block_count += 1;
                            in_region = true;
                            cursor += offset + 1;
                        }
                        None => break,
                    },
                    ScanState::InsideUnsafeBlock { depth } => {
                        in_region = true;
                        let mut depth = depth;
                        let mut closed_at = None;

                        for (offset, ch) in line[cursor..].char_indices() {
                            match ch {
                                '{' => depth += 1,
                                '}' => {
                                    depth -= 1;
                                    if depth == 0 {
                                        closed_at = Some(cursor + offset + 1);
                                        break;
                                    }
                                }
                                _ => {}
                            }
                        }

                        match closed_at {
                            Some(next) => {
                                state = ScanState::Outside;
                                cursor = next;
                            }
                            None => {
                                state = ScanState::InsideUnsafeBlock { depth };
                                break;
                            }
                        }
                    }
                }
            }

            if in_region && self.has_code(line) {
                count.line_count += 1;
            }
        }

        count
    }

    /// Byte offset of the next keyword occurrence that is a whole word
    fn find_keyword(&self, line: &str, from: usize) -> Option<usize> {
        let keyword = self.keyword.as_str();
        if keyword.is_empty() {
            return None;
        }

        let mut search = from;
        while let Some(offset) = line[search..].find(keyword) {
            let start = search + offset;
            let end = start + keyword.len();
            let before_ok = line[..start]
                .chars()
                .next_back()
                .map_or(true, |c| !is_ident_char(c));
            let after_ok = line[end..].chars().next().map_or(true, |c| !is_ident_char(c));
            if before_ok && after_ok {
                return Some(start);
            }
            search = end;
        }
        None
    }

    /// Whether anything besides the keyword and structural punctuation remains
    fn has_code(&self, line: &str) -> bool {
        let mut rest = String::with_capacity(line.len());
        let mut cursor = 0;
        while let Some(start) = self.find_keyword(line, cursor) {
            rest.push_str(&line[cursor..start]);
            cursor = start + self.keyword.len();
        }
        rest.push_str(&line[cursor..]);

        rest.chars()
            .any(|c| !c.is_whitespace() && !STRUCTURAL_PUNCTUATION.contains(&c))
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
