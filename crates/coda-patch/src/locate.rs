//! Whitespace-insensitive fragment location
//!
//! Model-proposed fragments routinely drift from the real file in
//! indentation, trailing spaces, and line breaks. Matching is therefore done
//! on text with every whitespace character deleted, and the match is mapped
//! back onto the untouched original so the caller can splice exact bytes.

/// Byte range `[start, end)` into the original haystack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// The original text covered by this span
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Delete every whitespace character (not just collapse runs)
pub fn normalize(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// One kept character: where it sits in the normalized and original text
#[derive(Debug, Clone, Copy)]
struct Origin {
    normalized: usize,
    original: usize,
    width: usize,
}

/// Normalized haystack with a byte-offset map back to the original
struct NormalizedText {
    text: String,
    origins: Vec<Origin>,
}

impl NormalizedText {
    fn new(original: &str) -> Self {
        let mut text = String::with_capacity(original.len());
        let mut origins = Vec::with_capacity(original.len());

        for (offset, ch) in original.char_indices() {
            if ch.is_whitespace() {
                continue;
            }
            origins.push(Origin {
                normalized: text.len(),
                original: offset,
                width: ch.len_utf8(),
            });
            text.push(ch);
        }

        Self { text, origins }
    }

    /// Translate a normalized match back into an original-text span
    fn span_for(&self, normalized_start: usize, char_count: usize) -> Option<Span> {
        let first = self
            .origins
            .binary_search_by_key(&normalized_start, |o| o.normalized)
            .ok()?;
        let last = self.origins.get(first + char_count.checked_sub(1)?)?;

        Some(Span {
            start: self.origins[first].original,
            end: last.original + last.width,
        })
    }
}

/// Find the first whitespace-insensitive occurrence of `needle` in `haystack`
///
/// Returns `None` when the needle is empty after normalization or does not
/// occur. The span starts at the first matched non-whitespace character and
/// ends after the last one, so interior whitespace of the original is kept
/// while surrounding whitespace is not.
pub fn locate(haystack: &str, needle: &str) -> Option<Span> {
    let needle = normalize(needle);
    if needle.is_empty() {
        return None;
    }

    let hay = NormalizedText::new(haystack);
    let start = hay.text.find(&needle)?;
    hay.span_for(start, needle.chars().count())
}

/// Count (possibly overlapping) normalized occurrences of `needle`
pub fn count_occurrences(haystack: &str, needle: &str) -> usize {
    let needle = normalize(needle);
    if needle.is_empty() {
        return 0;
    }

    let hay = normalize(haystack);
    let mut count = 0;
    let mut from = 0;
    while let Some(found) = hay[from..].find(&needle) {
        count += 1;
        let at = from + found;
        let step = hay[at..].chars().next().map_or(1, char::len_utf8);
        from = at + step;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_deletes_all_whitespace() {
        assert_eq!(normalize("  let x =\n\t 1 ;\r\n"), "letx=1;");
        assert_eq!(normalize("\u{00a0}a b"), "ab");
    }

    #[test]
    fn test_locate_exact_fragment() {
        let text = "fn a() {}\nfn b() {}\n";
        let span = locate(text, "fn b() {}").unwrap();
        assert_eq!(span.slice(text), "fn b() {}");
        assert_eq!(span.start, 10);
    }

    #[test]
    fn test_locate_tolerates_indentation_drift() {
        let text = "fn main() {\n        let x = 1;\n        let y = 2;\n}\n";
        let needle = "let x = 1;\nlet y = 2;";
        let span = locate(text, needle).unwrap();
        assert_eq!(span.slice(text), "let x = 1;\n        let y = 2;");
        assert_eq!(normalize(span.slice(text)), normalize(needle));
    }

    #[test]
    fn test_locate_tolerates_reflowed_lines() {
        let text = "swap(\n    &mut a,\n    &mut b,\n);";
        let span = locate(text, "swap(&mut a, &mut b,);").unwrap();
        assert_eq!(span, Span { start: 0, end: text.len() });
    }

    #[test]
    fn test_locate_excludes_surrounding_whitespace() {
        let text = "a\n\n   target   \n\nb";
        let span = locate(text, "\n target \n").unwrap();
        assert_eq!(span.slice(text), "target");
    }

    #[test]
    fn test_locate_not_found() {
        assert_eq!(locate("fn main() {}", "fn other()"), None);
    }

    #[test]
    fn test_locate_empty_needle() {
        assert_eq!(locate("fn main() {}", ""), None);
        assert_eq!(locate("fn main() {}", " \n\t"), None);
    }

    #[test]
    fn test_locate_returns_first_of_many() {
        let text = "x += 1;\ny();\nx += 1;\n";
        let span = locate(text, "x += 1;").unwrap();
        assert_eq!(span.start, 0);
        assert_eq!(count_occurrences(text, "x+=1;"), 2);
    }

    #[test]
    fn test_locate_multibyte_text() {
        let text = "let s = \"héllo wörld\";\nlet t = 1;";
        let span = locate(text, "\"héllo   wörld\"").unwrap();
        assert_eq!(span.slice(text), "\"héllo wörld\"");
    }

    #[test]
    fn test_count_occurrences_overlapping() {
        assert_eq!(count_occurrences("aaa", "aa"), 2);
        assert_eq!(count_occurrences("a a a", "a a"), 2);
        assert_eq!(count_occurrences("abc", "d"), 0);
        assert_eq!(count_occurrences("abc", "  "), 0);
    }

    #[test]
    fn test_normalized_span_matches_needle_for_many_inputs() {
        let docs = [
            "unsafe {\n    *p = 1;\n}\n",
            "fn f(a: i32,\n      b: i32) -> i32 { a + b }",
            "  \t leading and trailing \n",
        ];
        let needles = ["*p=1;", "b: i32)", "and trailing", "unsafe{"];
        for doc in docs {
            for needle in needles {
                if let Some(span) = locate(doc, needle) {
                    assert_eq!(normalize(span.slice(doc)), normalize(needle));
                } else {
                    assert!(!normalize(doc).contains(&normalize(needle)));
                }
            }
        }
    }
}
