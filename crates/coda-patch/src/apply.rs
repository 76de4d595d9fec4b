//! All-or-nothing application of replacement sets

use crate::locate::{count_occurrences, locate, normalize};
use coda_core::{CodaError, Document, MatchPolicy, PatchProposal, Replacement, Result};
use tracing::{debug, warn};

/// Apply `replacements` to `document` in order
///
/// Each fragment is located in the text as mutated by the entries before it.
/// On any failure the error names the offending fragment and no partially
/// patched text escapes: the caller keeps its own copy of `document`.
/// Everything outside matched spans, line endings included, is preserved.
pub fn apply(document: &str, replacements: &[Replacement], policy: MatchPolicy) -> Result<String> {
    let mut current = document.to_string();

    for (index, replacement) in replacements.iter().enumerate() {
        if normalize(&replacement.original).is_empty() {
            return Err(CodaError::EmptyFragment(index));
        }

        let span = locate(&current, &replacement.original)
            .ok_or_else(|| CodaError::PatchNotFound(replacement.original.clone()))?;

        if policy == MatchPolicy::Unique {
            let matches = count_occurrences(&current, &replacement.original);
            if matches > 1 {
                return Err(CodaError::PatchAmbiguous {
                    fragment: replacement.original.clone(),
                    matches,
                });
            }
        }

        debug!(
            "Replacement {}: bytes {}..{} ({} -> {} bytes)",
            index + 1,
            span.start,
            span.end,
            span.len(),
            replacement.new.len()
        );
        current.replace_range(span.start..span.end, &replacement.new);
    }

    Ok(current)
}

/// Apply a proposal to both the document and its manifest
///
/// Manifest replacements are ignored when no manifest is configured.
pub fn apply_proposal(
    document: &Document,
    proposal: &PatchProposal,
    policy: MatchPolicy,
) -> Result<Document> {
    let code = apply(&document.code, &proposal.replacements, policy)?;

    let manifest = match &document.manifest {
        Some(manifest) => Some(apply(manifest, &proposal.manifest_replacements, policy)?),
        None => {
            if !proposal.manifest_replacements.is_empty() {
                warn!(
                    "Ignoring {} manifest replacements: no manifest configured",
                    proposal.manifest_replacements.len()
                );
            }
            None
        }
    };

    Ok(Document { code, manifest })
}
