//! Full-document fallback.
//!
//! When the collaborator returns a whole modified document instead of a
//! plan, the two documents are compared and every difference is classified:
//!
//! - head singletons that are new or carry a new value become upserts;
//! - attribute changes on `<html>` and on body elements become `replaceAttr`
//!   operations addressed by structural path, provided the body element
//!   skeleton is unchanged;
//! - everything else is reported as an [`UnclassifiedChange`] and dropped.
//!
//! The derived plan then goes through the normal resolve/apply path, so the
//! safety gate and idempotence hold for fallback output too.

use std::collections::BTreeMap;

use crate::dom::{normalize_whitespace, Document, NodeId};
use crate::head::{self, HeadIndex, HeadKey, MetaKind};
use crate::model::{NodeRef, PatchOp, PatchOperation, PatchPlan, UnclassifiedChange};

/// Audit id given to operations derived from a fallback document.
pub const FALLBACK_AUDIT_ID: &str = "fallback";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackDerivation {
    pub plan: PatchPlan,
    pub rejected: Vec<UnclassifiedChange>,
}

impl FallbackDerivation {
    fn reject(&mut self, location: impl Into<String>, detail: impl Into<String>) {
        self.rejected.push(UnclassifiedChange {
            location: location.into(),
            detail: detail.into(),
        });
    }

    fn push(&mut self, reason: impl Into<String>, operation: PatchOperation) {
        self.plan
            .push(PatchOp::new(FALLBACK_AUDIT_ID, reason, operation));
    }
}

/// Classify the differences between `original` and `fallback`.
pub fn derive_plan(original: &Document, fallback: &Document) -> FallbackDerivation {
    let mut out = FallbackDerivation::default();
    derive_root(original, fallback, &mut out);
    derive_head(original, fallback, &mut out);
    derive_body(original, fallback, &mut out);
    tracing::info!(
        derived = out.plan.len(),
        rejected = out.rejected.len(),
        "classified fallback document"
    );
    out
}

// ============================================================================
// Attributes
// ============================================================================

/// Derive `replaceAttr` operations for attributes `new` adds or changes
/// relative to `orig`, and report the ones it drops.
fn derive_attrs(
    original: &Document,
    orig: NodeId,
    fallback: &Document,
    new: NodeId,
    out: &mut FallbackDerivation,
) {
    let path = original.structural_path(orig);
    for (name, value) in fallback.attrs(new) {
        if original.attr(orig, name) == Some(value.as_str()) {
            continue;
        }
        out.push(
            format!("fallback document sets {name} on {path}"),
            PatchOperation::ReplaceAttr {
                target: NodeRef::from_path(path.clone()),
                attr_name: name.clone(),
                attr_value: value.clone(),
            },
        );
    }
    for (name, _) in original.attrs(orig) {
        if fallback.attr(new, name).is_none() {
            out.reject(path.clone(), format!("attribute {name:?} removed"));
        }
    }
}

fn same_attrs(a: &Document, a_id: NodeId, b: &Document, b_id: NodeId) -> bool {
    let (left, right) = (a.attrs(a_id), b.attrs(b_id));
    left.len() == right.len()
        && left
            .iter()
            .all(|(name, value)| b.attr(b_id, name) == Some(value.as_str()))
}

/// Attributes on `<html>` are fixable (`lang`, `dir`); `<head>` carries
/// nothing an operation can manage.
fn derive_root(original: &Document, fallback: &Document, out: &mut FallbackDerivation) {
    if let (Some(orig), Some(new)) = (original.html_element(), fallback.html_element()) {
        derive_attrs(original, orig, fallback, new, out);
    }
    if let (Some(orig), Some(new)) = (original.head(), fallback.head()) {
        if !same_attrs(original, orig, fallback, new) {
            out.reject(original.structural_path(orig), "head attributes changed");
        }
    }
}

// ============================================================================
// Head
// ============================================================================

fn head_value(doc: &Document, node: NodeId, key: &HeadKey) -> String {
    match head::managed_attr(key) {
        Some(attr) => doc.attr(node, attr).unwrap_or("").trim().to_string(),
        None => normalize_whitespace(&doc.text_content(node)),
    }
}

fn upsert_for(key: &HeadKey, doc: &Document, node: NodeId, value: String) -> Option<PatchOperation> {
    Some(match key {
        HeadKey::Charset => PatchOperation::UpsertMetaName {
            name: "charset".into(),
            content: value,
        },
        HeadKey::Viewport => PatchOperation::UpsertMetaName {
            name: "viewport".into(),
            content: value,
        },
        HeadKey::Meta {
            key,
            kind: MetaKind::Name,
        } => PatchOperation::UpsertMetaName {
            name: key.clone(),
            content: value,
        },
        HeadKey::Meta {
            key,
            kind: MetaKind::Property,
        } => PatchOperation::UpsertMetaProperty {
            property: key.clone(),
            content: value,
        },
        HeadKey::Title => PatchOperation::UpsertTitle { text: value },
        HeadKey::Link { rel, .. } => PatchOperation::UpsertLinkRel {
            rel: rel.clone(),
            href: value,
            hreflang: doc.attr(node, "hreflang").map(|h| h.trim().to_string()),
        },
        HeadKey::ScopedStyle => return None,
    })
}

/// Outer HTML of head children that are not managed singletons.
fn unmanaged_head(doc: &Document) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    if let Some(h) = doc.head() {
        for child in doc.element_children(h) {
            if head::classify(doc, child).is_none() {
                *counts.entry(doc.outer_html(child)).or_insert(0) += 1;
            }
        }
    }
    counts
}

fn derive_head(original: &Document, fallback: &Document, out: &mut FallbackDerivation) {
    let before = HeadIndex::build(original);
    let after = HeadIndex::build(fallback);

    for key in after.keys() {
        let Some(node) = after.first(key) else {
            continue;
        };
        let value = head_value(fallback, node, key);
        let changed = match before.first(key) {
            Some(orig) => head_value(original, orig, key) != value,
            None => true,
        };
        if !changed {
            continue;
        }
        if value.is_empty() {
            out.reject(key.to_string(), "empty value");
            continue;
        }
        match upsert_for(key, fallback, node, value) {
            Some(op) => out.push(format!("fallback document sets {key}"), op),
            None => out.reject(key.to_string(), "managed style block edited directly"),
        }
    }

    for key in before.keys() {
        if after.first(key).is_none() {
            out.reject(key.to_string(), "head element removed");
        }
    }

    let (was, now) = (unmanaged_head(original), unmanaged_head(fallback));
    for (html, n) in &now {
        if was.get(html).copied().unwrap_or(0) < *n {
            out.reject("head", format!("unmanaged element added: {}", preview(html)));
        }
    }
    for (html, n) in &was {
        if now.get(html).copied().unwrap_or(0) < *n {
            out.reject("head", format!("unmanaged element removed: {}", preview(html)));
        }
    }
}

fn preview(html: &str) -> String {
    const LIMIT: usize = 120;
    match html.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &html[..idx]),
        None => html.to_string(),
    }
}

// ============================================================================
// Body
// ============================================================================

fn body_elements(doc: &Document) -> Vec<NodeId> {
    match doc.body() {
        Some(b) => doc
            .descendants(b)
            .into_iter()
            .filter(|n| doc.is_element(*n))
            .collect(),
        None => Vec::new(),
    }
}

/// Text directly inside `id`, excluding descendants.
fn own_text(doc: &Document, id: NodeId) -> String {
    let joined: String = doc
        .children(id)
        .iter()
        .filter_map(|c| doc.text(*c))
        .collect::<Vec<_>>()
        .join(" ");
    normalize_whitespace(&joined)
}

fn derive_body(original: &Document, fallback: &Document, out: &mut FallbackDerivation) {
    let before = body_elements(original);
    let after = body_elements(fallback);

    let same_skeleton = before.len() == after.len()
        && before
            .iter()
            .zip(&after)
            .all(|(a, b)| original.tag(*a) == fallback.tag(*b));
    if !same_skeleton {
        out.reject(
            "body",
            format!(
                "element structure changed ({} -> {} elements)",
                before.len(),
                after.len()
            ),
        );
        return;
    }

    for (orig, new) in before.iter().zip(&after) {
        derive_attrs(original, *orig, fallback, *new, out);
        if own_text(original, *orig) != own_text(fallback, *new) {
            out.reject(original.structural_path(*orig), "text content changed");
        }
    }
}
