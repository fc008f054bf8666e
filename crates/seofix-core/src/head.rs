//! Head singleton identity keys.
//!
//! Every upsertable head element has a [`HeadKey`]. The derived `Ord` is the
//! canonical head order:
//!
//! ```text
//!   charset < viewport < meta (by key) < title < link (rel, hreflang) < managed style
//! ```
//!
//! A [`HeadIndex`] is built fresh from the document before any mutation and
//! rebuilt after each one, so "does this key exist" is a map lookup. Parsers
//! leave misplaced `<title>`, `<meta>` and `<link>` tags where they appear, so
//! singletons outside `<head>` are indexed too. They sort after the head's own
//! copies of the same key.

use std::collections::BTreeMap;
use std::fmt;

use crate::dom::{Document, NodeId};
use crate::model::{PatchOperation, MARK_ATTR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaKind {
    Name,
    Property,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeadKey {
    Charset,
    Viewport,
    Meta { key: String, kind: MetaKind },
    Title,
    Link { rel: String, hreflang: Option<String> },
    ScopedStyle,
}

impl fmt::Display for HeadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadKey::Charset => write!(f, "meta[charset]"),
            HeadKey::Viewport => write!(f, "meta[name=viewport]"),
            HeadKey::Meta {
                key,
                kind: MetaKind::Name,
            } => write!(f, "meta[name={key}]"),
            HeadKey::Meta {
                key,
                kind: MetaKind::Property,
            } => write!(f, "meta[property={key}]"),
            HeadKey::Title => write!(f, "title"),
            HeadKey::Link {
                rel,
                hreflang: None,
            } => write!(f, "link[rel={rel}]"),
            HeadKey::Link {
                rel,
                hreflang: Some(lang),
            } => write!(f, "link[rel={rel}][hreflang={lang}]"),
            HeadKey::ScopedStyle => write!(f, "style[{MARK_ATTR}]"),
        }
    }
}

fn normalize_rel(rel: &str) -> String {
    rel.split_whitespace()
        .map(|t| t.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_token(s: &str) -> Option<String> {
    let t = s.trim().to_ascii_lowercase();
    (!t.is_empty()).then_some(t)
}

/// Identity key for a meta `name`.
pub fn meta_name_key(name: &str) -> Option<HeadKey> {
    let name = normalize_token(name)?;
    Some(match name.as_str() {
        "charset" => HeadKey::Charset,
        "viewport" => HeadKey::Viewport,
        _ => HeadKey::Meta {
            key: name,
            kind: MetaKind::Name,
        },
    })
}

pub fn meta_property_key(property: &str) -> Option<HeadKey> {
    Some(HeadKey::Meta {
        key: normalize_token(property)?,
        kind: MetaKind::Property,
    })
}

pub fn link_key(rel: &str, hreflang: Option<&str>) -> Option<HeadKey> {
    let rel = normalize_rel(rel);
    if rel.is_empty() {
        return None;
    }
    Some(HeadKey::Link {
        rel,
        hreflang: hreflang.and_then(normalize_token),
    })
}

/// Key of a head-level operation, or `None` for body operations and for
/// operations whose key is empty.
pub fn operation_key(op: &PatchOperation) -> Option<HeadKey> {
    match op {
        PatchOperation::UpsertTitle { .. } => Some(HeadKey::Title),
        PatchOperation::UpsertMetaName { name, .. } => meta_name_key(name),
        PatchOperation::UpsertMetaProperty { property, .. } => meta_property_key(property),
        PatchOperation::UpsertLinkRel { rel, hreflang, .. } => link_key(rel, hreflang.as_deref()),
        PatchOperation::ReplaceAttr { .. } | PatchOperation::InsertStyleScoped { .. } => None,
    }
}

/// Key of an existing head element, if it is one of the managed singletons.
pub fn classify(doc: &Document, id: NodeId) -> Option<HeadKey> {
    match doc.tag(id)? {
        "meta" => {
            if doc.attr(id, "charset").is_some() {
                return Some(HeadKey::Charset);
            }
            if let Some(key) = doc.attr(id, "name").and_then(meta_name_key) {
                return Some(key);
            }
            doc.attr(id, "property").and_then(meta_property_key)
        }
        "title" => Some(HeadKey::Title),
        "link" => link_key(doc.attr(id, "rel")?, doc.attr(id, "hreflang")),
        "style" if doc.attr(id, MARK_ATTR).is_some() => Some(HeadKey::ScopedStyle),
        _ => None,
    }
}

/// The attribute an upsert manages on an element with the given key.
pub fn managed_attr(key: &HeadKey) -> Option<&'static str> {
    match key {
        HeadKey::Charset => Some("charset"),
        HeadKey::Viewport | HeadKey::Meta { .. } => Some("content"),
        HeadKey::Link { .. } => Some("href"),
        HeadKey::Title | HeadKey::ScopedStyle => None,
    }
}

// ============================================================================
// Index
// ============================================================================

/// Where a new keyed element goes relative to existing head children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertAt {
    Before(NodeId),
    After(NodeId),
    End,
}

#[derive(Debug, Clone, Default)]
pub struct HeadIndex {
    head: Option<NodeId>,
    by_key: BTreeMap<HeadKey, Vec<NodeId>>,
    /// Classified head children in document order.
    ordered: Vec<(NodeId, HeadKey)>,
}

/// Subtrees whose `<title>` and `<link>` are not document metadata.
const FOREIGN_ROOTS: &[&str] = &["svg", "math", "template"];

impl HeadIndex {
    pub fn build(doc: &Document) -> Self {
        let head = doc.head();
        let mut index = Self {
            head,
            ..Self::default()
        };
        if let Some(head) = head {
            for child in doc.element_children(head) {
                if let Some(key) = classify(doc, child) {
                    index.by_key.entry(key.clone()).or_default().push(child);
                    index.ordered.push((child, key));
                }
            }
        }
        for (node, key) in stray_singletons(doc, head) {
            index.by_key.entry(key).or_default().push(node);
        }
        index
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    /// All elements carrying `key`, in document order.
    pub fn nodes(&self, key: &HeadKey) -> &[NodeId] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, key: &HeadKey) -> Option<NodeId> {
        self.nodes(key).first().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &HeadKey> {
        self.by_key.keys()
    }

    /// Canonical position for a new element with `key`: before the first
    /// classified element whose key sorts after it, else after the last
    /// classified element.
    pub fn insertion_point(&self, key: &HeadKey) -> InsertAt {
        if let Some((node, _)) = self.ordered.iter().find(|(_, k)| k > key) {
            return InsertAt::Before(*node);
        }
        match self.ordered.last() {
            Some((node, _)) => InsertAt::After(*node),
            None => InsertAt::End,
        }
    }
}

/// Classified elements outside `<head>`, in document order.
fn stray_singletons(doc: &Document, head: Option<NodeId>) -> Vec<(NodeId, HeadKey)> {
    let mut out = Vec::new();
    let mut stack = vec![doc.root()];
    while let Some(n) = stack.pop() {
        if Some(n) == head || doc.tag(n).is_some_and(|t| FOREIGN_ROOTS.contains(&t)) {
            continue;
        }
        if let Some(key) = classify(doc, n) {
            out.push((n, key));
        }
        for c in doc.children(n).iter().rev() {
            if doc.is_element(*c) {
                stack.push(*c);
            }
        }
    }
    out
}

// ============================================================================
// Mutation helpers
// ============================================================================

/// Insert `node` into `head` at `at`, cloning the indentation of its
/// neighbours so the new element lands on its own line.
pub fn insert_indented(doc: &mut Document, head: NodeId, node: NodeId, at: InsertAt) {
    match at {
        InsertAt::Before(reference) => {
            let indent = indentation_before(doc, reference);
            doc.insert_before(head, node, reference);
            if let Some(ws) = indent {
                let t = doc.create_text(&ws);
                doc.insert_before(head, t, reference);
            }
        }
        InsertAt::After(anchor) => {
            let indent = indentation_before(doc, anchor);
            let next = next_sibling(doc, anchor);
            let place = |doc: &mut Document, n: NodeId| match next {
                Some(next) => doc.insert_before(head, n, next),
                None => doc.append_child(head, n),
            };
            if let Some(ws) = indent {
                let t = doc.create_text(&ws);
                place(doc, t);
            }
            place(doc, node);
        }
        InsertAt::End => doc.append_child(head, node),
    }
}

/// Detach `node` together with the whitespace-only text node before it.
pub fn remove_with_whitespace(doc: &mut Document, node: NodeId) {
    if let Some(prev) = doc.previous_sibling(node) {
        if doc.text(prev).is_some_and(|t| t.trim().is_empty()) {
            doc.detach(prev);
        }
    }
    doc.detach(node);
}

fn next_sibling(doc: &Document, id: NodeId) -> Option<NodeId> {
    let parent = doc.parent(id)?;
    let siblings = doc.children(parent);
    let pos = siblings.iter().position(|c| *c == id)?;
    siblings.get(pos + 1).copied()
}

/// `"\n" + <spaces after the last newline>` of the whitespace text right
/// before `id`.
fn indentation_before(doc: &Document, id: NodeId) -> Option<String> {
    let prev = doc.previous_sibling(id)?;
    let text = doc.text(prev)?;
    if !text.trim().is_empty() || !text.contains('\n') {
        return None;
    }
    let tail = text.rsplit('\n').next().unwrap_or("");
    Some(format!("\n{tail}"))
}
