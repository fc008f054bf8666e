//! Unified diff generation and validation.
//!
//! Both sides are normalized first (LF line endings, no trailing whitespace,
//! `<br/>` → `<br>`, final newline) so re-serialization noise never reaches
//! the diff. The diff itself is diffy's Myers line diff.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::PatchError;
use crate::model::DiffResult;

fn self_closing_void_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)<(area|base|basefont|bgsound|br|col|embed|frame|hr|img|input|keygen|link|meta|param|source|track|wbr)(\s[^<>]*?)?\s*/>",
        )
        .ok()
    })
    .as_ref()
}

/// Canonical text form used on both sides of every diff.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let canonical = match self_closing_void_re() {
        Some(re) => re.replace_all(&unified, "<$1$2>").into_owned(),
        None => unified,
    };
    let mut out = String::with_capacity(canonical.len() + 1);
    for line in canonical.lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Unified diff of two already-normalized texts; empty when they are equal.
pub fn unified_diff(original: &str, modified: &str) -> String {
    let patch = diffy::create_patch(original, modified);
    if patch.hunks().is_empty() {
        return String::new();
    }
    patch.to_string()
}

/// Apply `diff` to `original` (normalized). An empty diff is the identity.
pub fn apply_diff(original: &str, diff: &str) -> Result<String, PatchError> {
    if diff.is_empty() {
        return Ok(original.to_string());
    }
    let patch = diffy::Patch::from_str(diff)
        .map_err(|err| PatchError::DiffInapplicable(format!("unparsable diff: {err}")))?;
    diffy::apply(original, &patch)
        .map_err(|err| PatchError::DiffInapplicable(format!("hunks do not apply: {err}")))
}

/// Diff two serializations and check the result reproduces `modified`.
///
/// `expect_change` is set when the apply step recorded at least one mark; an
/// empty diff is then not applicable.
pub fn diff_documents(original: &str, modified: &str, expect_change: bool) -> DiffResult {
    let original = normalize(original);
    let modified = normalize(modified);
    let diff = unified_diff(&original, &modified);

    let round_trip = match apply_diff(&original, &diff) {
        Ok(rebuilt) => rebuilt == modified,
        Err(err) => {
            tracing::warn!(error = %err, "generated diff failed validation");
            false
        }
    };
    let applicable = round_trip && (!expect_change || !diff.is_empty());
    DiffResult { diff, applicable }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub hunks: usize,
    pub added: usize,
    pub removed: usize,
}

pub fn diff_stats(diff: &str) -> Result<DiffStats, PatchError> {
    if diff.is_empty() {
        return Ok(DiffStats::default());
    }
    let patch = diffy::Patch::from_str(diff)
        .map_err(|err| PatchError::DiffInapplicable(format!("unparsable diff: {err}")))?;
    let mut stats = DiffStats {
        hunks: patch.hunks().len(),
        ..DiffStats::default()
    };
    for hunk in patch.hunks() {
        for line in hunk.lines() {
            match line {
                diffy::Line::Insert(_) => stats.added += 1,
                diffy::Line::Delete(_) => stats.removed += 1,
                diffy::Line::Context(_) => {}
            }
        }
    }
    Ok(stats)
}
