//! Patch applier.
//!
//! Operations are applied in a canonical order regardless of plan order:
//!
//! ```text
//!   head upserts (HeadKey order) ─▶ managed style block ─▶ body attributes
//!                                                          (document position,
//!                                                           confidence desc,
//!                                                           plan index)
//! ```
//!
//! A bad operation never aborts the batch. It becomes a [`ManualFixEntry`]
//! and the remaining operations still apply. Nodes are only stamped with
//! [`MARK_ATTR`] when something about them actually changed, which is what
//! makes a second application of the same plan a no-op.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::PipelineConfig;
use crate::css::{self, Declaration};
use crate::digest::fnv1a64;
use crate::dom::{Document, NodeId};
use crate::head::{self, HeadIndex, HeadKey, MetaKind};
use crate::model::{
    AppliedMark, ManualFixEntry, ManualFixReason, MarkAction, PatchOp, PatchOperation, MARK_ATTR,
    MARK_VALUE, SCOPE_ATTR,
};
use crate::resolver::{Anchor, ResolveError};

/// How an operation's target was resolved before apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Head operations are addressed by key, not by reference.
    NotNeeded,
    Resolved(Anchor),
    Failed(ResolveError),
}

/// An operation ready for the applier.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedOp {
    /// Position in the original plan.
    pub index: usize,
    pub op: PatchOp,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    pub marks: Vec<AppliedMark>,
    /// Ordered by plan index.
    pub manual_fix: Vec<ManualFixEntry>,
}

#[derive(Debug, Clone)]
pub struct Applier {
    safe_css: bool,
    confidence_threshold: f32,
}

impl Default for Applier {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

#[derive(Default)]
struct Ledger {
    marks: Vec<AppliedMark>,
    manual: Vec<ManualFixEntry>,
}

impl Ledger {
    fn reject(
        &mut self,
        prepared: &PreparedOp,
        reason: ManualFixReason,
        detail: impl Into<String>,
        confidence: Option<f32>,
    ) {
        let detail = detail.into();
        tracing::warn!(
            audit_id = %prepared.op.audit_id,
            kind = prepared.op.operation.kind(),
            reason = %reason,
            detail = %detail,
            "operation deferred to manual fix"
        );
        self.manual.push(ManualFixEntry {
            op_index: prepared.index,
            operation: prepared.op.clone(),
            reason,
            detail,
            confidence,
        });
    }

    fn mark(
        &mut self,
        prepared: &PreparedOp,
        action: MarkAction,
        location: String,
        confidence: f32,
        ambiguous: bool,
    ) {
        tracing::debug!(
            audit_id = %prepared.op.audit_id,
            kind = prepared.op.operation.kind(),
            location = %location,
            "applied operation"
        );
        self.marks.push(AppliedMark {
            audit_id: prepared.op.audit_id.clone(),
            op_index: prepared.index,
            kind: prepared.op.operation.kind().to_string(),
            action,
            location,
            confidence,
            ambiguous,
        });
    }

    fn finish(mut self) -> ApplyOutcome {
        self.manual.sort_by_key(|e| e.op_index);
        ApplyOutcome {
            marks: self.marks,
            manual_fix: self.manual,
        }
    }
}

impl Applier {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            safe_css: config.safe_css,
            confidence_threshold: config.confidence_threshold,
        }
    }

    pub fn apply(&self, doc: &mut Document, ops: &[PreparedOp]) -> ApplyOutcome {
        let mut ledger = Ledger::default();

        let mut head_ops: BTreeMap<HeadKey, Vec<(&PreparedOp, HeadWrite)>> = BTreeMap::new();
        let mut style_ops: Vec<(&PreparedOp, Anchor)> = Vec::new();
        let mut attr_ops: Vec<(&PreparedOp, Anchor)> = Vec::new();

        for prepared in ops {
            match &prepared.op.operation {
                PatchOperation::ReplaceAttr { .. } | PatchOperation::InsertStyleScoped { .. } => {
                    if matches!(
                        prepared.op.operation,
                        PatchOperation::InsertStyleScoped { .. }
                    ) && !self.safe_css
                    {
                        ledger.reject(
                            prepared,
                            ManualFixReason::Unsafe,
                            "scoped styles are disabled",
                            None,
                        );
                        continue;
                    }
                    let Some(anchor) = self.gate_anchor(prepared, &mut ledger) else {
                        continue;
                    };
                    if matches!(prepared.op.operation, PatchOperation::ReplaceAttr { .. }) {
                        attr_ops.push((prepared, anchor));
                    } else {
                        style_ops.push((prepared, anchor));
                    }
                }
                operation => match head_write(operation) {
                    Ok(write) => head_ops
                        .entry(write.key.clone())
                        .or_default()
                        .push((prepared, write)),
                    Err(detail) => {
                        ledger.reject(prepared, ManualFixReason::Unsafe, detail, None)
                    }
                },
            }
        }

        for (key, group) in &head_ops {
            apply_head_group(doc, key, group, &mut ledger);
        }
        if !style_ops.is_empty() {
            apply_styles(doc, style_ops, &mut ledger);
        }
        let head_keys: BTreeSet<HeadKey> = head_ops.keys().cloned().collect();
        apply_attrs(doc, attr_ops, &head_keys, &mut ledger);

        ledger.finish()
    }

    /// Confidence and resolution gate for body operations.
    fn gate_anchor(&self, prepared: &PreparedOp, ledger: &mut Ledger) -> Option<Anchor> {
        match &prepared.resolution {
            Resolution::Resolved(anchor) if anchor.confidence >= self.confidence_threshold => {
                Some(anchor.clone())
            }
            Resolution::Resolved(anchor) => {
                let reason = if anchor.ambiguous {
                    ManualFixReason::Ambiguous
                } else {
                    ManualFixReason::Unresolvable
                };
                ledger.reject(
                    prepared,
                    reason,
                    format!(
                        "{} match confidence {:.2} is below threshold {:.2}",
                        anchor.strategy, anchor.confidence, self.confidence_threshold
                    ),
                    Some(anchor.confidence),
                );
                None
            }
            Resolution::Failed(ResolveError::Unresolvable { best_confidence }) => {
                ledger.reject(
                    prepared,
                    ManualFixReason::Unresolvable,
                    "no candidate node found",
                    *best_confidence,
                );
                None
            }
            Resolution::Failed(err @ ResolveError::InvalidRef(_)) => {
                ledger.reject(prepared, ManualFixReason::Unresolvable, err.to_string(), None);
                None
            }
            Resolution::NotNeeded => {
                ledger.reject(
                    prepared,
                    ManualFixReason::Unresolvable,
                    "operation target was not resolved",
                    None,
                );
                None
            }
        }
    }
}

/// Reject an anchor that an earlier head upsert detached while collapsing
/// duplicates.
fn detached(doc: &Document, prepared: &PreparedOp, anchor: &Anchor, ledger: &mut Ledger) -> bool {
    if doc.is_attached(anchor.node) {
        return false;
    }
    ledger.reject(
        prepared,
        ManualFixReason::Ambiguous,
        "target was removed as a duplicate head element",
        Some(anchor.confidence),
    );
    true
}

// ============================================================================
// Head upserts
// ============================================================================

/// A validated head upsert.
#[derive(Debug, Clone, PartialEq)]
struct HeadWrite {
    key: HeadKey,
    value: String,
    /// `hreflang` as written by the producer, for new link elements.
    hreflang: Option<String>,
}

fn head_write(op: &PatchOperation) -> Result<HeadWrite, String> {
    let key = head::operation_key(op).ok_or_else(|| "empty identity key".to_string())?;
    let (value, hreflang) = match op {
        PatchOperation::UpsertTitle { text } => (text.trim().to_string(), None),
        PatchOperation::UpsertMetaName { content, .. }
        | PatchOperation::UpsertMetaProperty { content, .. } => (content.trim().to_string(), None),
        PatchOperation::UpsertLinkRel { href, hreflang, .. } => {
            if css::is_script_url(href) {
                return Err("script URL in link href".to_string());
            }
            (
                href.trim().to_string(),
                hreflang.as_deref().map(str::trim).map(str::to_string),
            )
        }
        PatchOperation::ReplaceAttr { .. } | PatchOperation::InsertStyleScoped { .. } => {
            return Err("not a head operation".to_string());
        }
    };
    if value.is_empty() {
        return Err(format!("empty value for {key}"));
    }
    if key == HeadKey::Charset
        && !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!("invalid charset {value:?}"));
    }
    Ok(HeadWrite {
        key,
        value,
        hreflang,
    })
}

fn apply_head_group(
    doc: &mut Document,
    key: &HeadKey,
    group: &[(&PreparedOp, HeadWrite)],
    ledger: &mut Ledger,
) {
    let Some((winner, write)) = group.first() else {
        return;
    };
    for (other, other_write) in &group[1..] {
        if other_write.value != write.value {
            ledger.reject(
                other,
                ManualFixReason::Ambiguous,
                format!("{key} is superseded by operation #{}", winner.index),
                Some(1.0),
            );
        }
    }

    let index = HeadIndex::build(doc);
    let Some(head) = index.head() else {
        ledger.reject(winner, ManualFixReason::Unresolvable, "document has no <head>", None);
        return;
    };

    let existing = index.nodes(key).to_vec();
    match existing.split_first() {
        Some((&first, duplicates)) => {
            let mut changed = false;
            for dup in duplicates {
                head::remove_with_whitespace(doc, *dup);
                changed = true;
            }
            changed |= match head::managed_attr(key) {
                Some(attr) => doc.set_attr(first, attr, &write.value),
                None => doc.set_text(first, &write.value),
            };
            if changed {
                doc.set_attr(first, MARK_ATTR, MARK_VALUE);
                ledger.mark(winner, MarkAction::Updated, key.to_string(), 1.0, false);
            }
        }
        None => {
            let node = doc.create_element(tag_for(key), new_attrs(key, write));
            if *key == HeadKey::Title {
                doc.set_text(node, &write.value);
            }
            head::insert_indented(doc, head, node, index.insertion_point(key));
            ledger.mark(winner, MarkAction::Created, key.to_string(), 1.0, false);
        }
    }
}

fn tag_for(key: &HeadKey) -> &'static str {
    match key {
        HeadKey::Charset | HeadKey::Viewport | HeadKey::Meta { .. } => "meta",
        HeadKey::Title => "title",
        HeadKey::Link { .. } => "link",
        HeadKey::ScopedStyle => "style",
    }
}

fn new_attrs(key: &HeadKey, write: &HeadWrite) -> Vec<(String, String)> {
    let pair = |k: &str, v: &str| (k.to_string(), v.to_string());
    let mut attrs = match key {
        HeadKey::Charset => vec![pair("charset", &write.value)],
        HeadKey::Viewport => vec![pair("name", "viewport"), pair("content", &write.value)],
        HeadKey::Meta {
            key,
            kind: MetaKind::Name,
        } => vec![pair("name", key), pair("content", &write.value)],
        HeadKey::Meta {
            key,
            kind: MetaKind::Property,
        } => vec![pair("property", key), pair("content", &write.value)],
        HeadKey::Link { rel, .. } => {
            let mut attrs = vec![pair("rel", rel)];
            if let Some(lang) = &write.hreflang {
                attrs.push(pair("hreflang", lang));
            }
            attrs.push(pair("href", &write.value));
            attrs
        }
        HeadKey::Title | HeadKey::ScopedStyle => Vec::new(),
    };
    attrs.push(pair(MARK_ATTR, MARK_VALUE));
    attrs
}

// ============================================================================
// Managed style block
// ============================================================================

type RuleKey = (Option<String>, String);

fn plain_rule_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\[data-seofix-scope="(s[0-9a-f]+)"\] \{ (.*) \}$"#).ok()
    })
    .as_ref()
}

fn media_rule_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^@media (.+?) \{ \[data-seofix-scope="(s[0-9a-f]+)"\] \{ (.*) \} \}$"#).ok()
    })
    .as_ref()
}

/// Rules in the managed block, plus lines we did not write.
#[derive(Debug, Default)]
struct StyleSheet {
    preserved: Vec<String>,
    rules: BTreeMap<RuleKey, BTreeMap<String, String>>,
}

impl StyleSheet {
    fn parse(text: &str) -> Self {
        let mut sheet = Self::default();
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match Self::parse_line(line) {
                Some((key, decls)) => {
                    let entry = sheet.rules.entry(key).or_default();
                    for d in decls {
                        entry.insert(d.property, d.value);
                    }
                }
                None => sheet.preserved.push(line.to_string()),
            }
        }
        sheet
    }

    fn parse_line(line: &str) -> Option<(RuleKey, Vec<Declaration>)> {
        if let Some(caps) = media_rule_re().and_then(|re| re.captures(line)) {
            let media = css::check_media_guard(caps.get(1)?.as_str()).ok()?;
            let decls = css::parse_declarations(caps.get(3)?.as_str()).ok()?;
            return Some(((Some(media), caps.get(2)?.as_str().to_string()), decls));
        }
        let caps = plain_rule_re().and_then(|re| re.captures(line))?;
        let decls = css::parse_declarations(caps.get(2)?.as_str()).ok()?;
        Some(((None, caps.get(1)?.as_str().to_string()), decls))
    }

    fn render(&self) -> String {
        let mut lines = self.preserved.clone();
        for ((media, scope), decls) in &self.rules {
            let body = decls
                .iter()
                .map(|(p, v)| format!("{p}: {v};"))
                .collect::<Vec<_>>()
                .join(" ");
            let rule = format!("[{SCOPE_ATTR}=\"{scope}\"] {{ {body} }}");
            lines.push(match media {
                Some(m) => format!("@media {m} {{ {rule} }}"),
                None => rule,
            });
        }
        format!("\n{}\n", lines.join("\n"))
    }
}

/// Scope id for an element: its existing scope attribute, or a digest of its
/// structural path.
pub fn scope_id(doc: &Document, node: NodeId) -> String {
    if let Some(existing) = doc.attr(node, SCOPE_ATTR).filter(|v| !v.is_empty()) {
        return existing.to_string();
    }
    let hash = fnv1a64(doc.structural_path(node).as_bytes());
    format!("s{:012x}", hash & 0xffff_ffff_ffff)
}

fn apply_styles(doc: &mut Document, mut ops: Vec<(&PreparedOp, Anchor)>, ledger: &mut Ledger) {
    ops.sort_by(|(a_op, a), (b_op, b)| {
        a.node
            .cmp(&b.node)
            .then(b.confidence.total_cmp(&a.confidence))
            .then(a_op.index.cmp(&b_op.index))
    });

    let index = HeadIndex::build(doc);
    let Some(head) = index.head() else {
        for (prepared, _) in &ops {
            ledger.reject(prepared, ManualFixReason::Unresolvable, "document has no <head>", None);
        }
        return;
    };
    let block = index.first(&HeadKey::ScopedStyle);
    let before = block.map(|b| doc.text_content(b)).unwrap_or_default();
    let mut sheet = StyleSheet::parse(&before);

    // (media, scope, property) -> winning plan index
    let mut claimed: HashMap<(Option<String>, String, String), (usize, String)> = HashMap::new();
    let mut contributors: Vec<(&PreparedOp, Anchor, bool)> = Vec::new();

    for (prepared, anchor) in ops {
        let PatchOperation::InsertStyleScoped {
            css_rules,
            media_guard,
            ..
        } = &prepared.op.operation
        else {
            continue;
        };

        if detached(doc, prepared, &anchor, ledger) {
            continue;
        }
        let tag = doc.tag(anchor.node).unwrap_or("").to_string();
        let in_head = doc
            .head()
            .is_some_and(|h| h == anchor.node || doc.ancestors(anchor.node).contains(&h));
        if in_head || matches!(tag.as_str(), "script" | "style" | "html") {
            ledger.reject(
                prepared,
                ManualFixReason::Unsafe,
                format!("<{tag}> cannot carry scoped styles"),
                Some(anchor.confidence),
            );
            continue;
        }
        let decls = match css::parse_declarations(css_rules) {
            Ok(d) => d,
            Err(err) => {
                ledger.reject(prepared, ManualFixReason::Unsafe, err.to_string(), Some(anchor.confidence));
                continue;
            }
        };
        let media = match media_guard.as_deref().map(css::check_media_guard).transpose() {
            Ok(m) => m,
            Err(err) => {
                ledger.reject(prepared, ManualFixReason::Unsafe, err.to_string(), Some(anchor.confidence));
                continue;
            }
        };

        let scope = scope_id(doc, anchor.node);
        let mut shadowed_by = None;
        for d in &decls {
            let slot = (media.clone(), scope.clone(), d.property.clone());
            if let Some((winner, value)) = claimed.get(&slot) {
                if *value != d.value {
                    shadowed_by = Some(*winner);
                    break;
                }
            }
        }
        if let Some(winner) = shadowed_by {
            ledger.reject(
                prepared,
                ManualFixReason::Ambiguous,
                format!("style for {scope} is shadowed by operation #{winner}"),
                Some(anchor.confidence),
            );
            continue;
        }

        let rules = sheet.rules.entry((media.clone(), scope.clone())).or_default();
        let mut changed = false;
        for d in decls {
            claimed
                .entry((media.clone(), scope.clone(), d.property.clone()))
                .or_insert((prepared.index, d.value.clone()));
            if rules.get(&d.property) != Some(&d.value) {
                rules.insert(d.property, d.value);
                changed = true;
            }
        }
        if doc.set_attr(anchor.node, SCOPE_ATTR, &scope) {
            changed = true;
        }
        if changed {
            doc.set_attr(anchor.node, MARK_ATTR, MARK_VALUE);
        }
        contributors.push((prepared, anchor, changed));
    }

    let rendered = sheet.render();
    let block_created = block.is_none() && !sheet.rules.is_empty();
    match block {
        Some(b) => {
            if rendered != before && doc.set_text(b, &rendered) {
                doc.set_attr(b, MARK_ATTR, MARK_VALUE);
            }
        }
        None if block_created => {
            let style = doc.create_element("style", vec![(MARK_ATTR.to_string(), MARK_VALUE.to_string())]);
            doc.set_text(style, &rendered);
            head::insert_indented(doc, head, style, index.insertion_point(&HeadKey::ScopedStyle));
        }
        None => {}
    }

    for (prepared, anchor, changed) in contributors {
        if changed {
            let action = if block_created {
                MarkAction::Created
            } else {
                MarkAction::Updated
            };
            let location = doc.structural_path(anchor.node);
            ledger.mark(prepared, action, location, anchor.confidence, anchor.ambiguous);
        }
    }
}

// ============================================================================
// Body attributes
// ============================================================================

/// Attributes that carry a head element's identity; rewriting them could
/// duplicate a singleton key.
const HEAD_IDENTITY_ATTRS: &[&str] = &["name", "property", "rel", "hreflang", "charset"];

/// Tags that can become head singletons wherever they sit.
const METADATA_TAGS: &[&str] = &["meta", "link", "title"];

/// Why an attribute write on a keyed singleton must go through an upsert
/// instead, or `None` when the attribute is not managed.
fn singleton_conflict(
    key: &HeadKey,
    name: &str,
    head_keys: &BTreeSet<HeadKey>,
) -> Option<(ManualFixReason, String)> {
    let managed = head::managed_attr(key) == Some(name) || HEAD_IDENTITY_ATTRS.contains(&name);
    if !managed {
        return None;
    }
    Some(if head_keys.contains(key) {
        (
            ManualFixReason::Ambiguous,
            format!("{name:?} on {key} conflicts with an upsert of the same key"),
        )
    } else {
        (
            ManualFixReason::Unsafe,
            format!("{name:?} is managed on {key}; use an upsert operation"),
        )
    })
}

fn apply_attrs(
    doc: &mut Document,
    mut ops: Vec<(&PreparedOp, Anchor)>,
    head_keys: &BTreeSet<HeadKey>,
    ledger: &mut Ledger,
) {
    ops.sort_by(|(a_op, a), (b_op, b)| {
        a.node
            .cmp(&b.node)
            .then(b.confidence.total_cmp(&a.confidence))
            .then(a_op.index.cmp(&b_op.index))
    });

    let head = doc.head();
    let mut claimed: HashMap<(NodeId, String), (usize, String)> = HashMap::new();

    for (prepared, anchor) in ops {
        let PatchOperation::ReplaceAttr {
            attr_name,
            attr_value,
            ..
        } = &prepared.op.operation
        else {
            continue;
        };
        if detached(doc, prepared, &anchor, ledger) {
            continue;
        }
        let tag = doc.tag(anchor.node).unwrap_or("").to_string();
        if let Some(detail) = css::attribute_rejection(&tag, attr_name, attr_value) {
            ledger.reject(prepared, ManualFixReason::Unsafe, detail, Some(anchor.confidence));
            continue;
        }
        let name = attr_name.trim().to_ascii_lowercase();
        if let Some((reason, detail)) = head::classify(doc, anchor.node)
            .and_then(|key| singleton_conflict(&key, &name, head_keys))
        {
            ledger.reject(prepared, reason, detail, Some(anchor.confidence));
            continue;
        }
        let in_head = head.is_some_and(|h| doc.ancestors(anchor.node).contains(&h));
        if (in_head || METADATA_TAGS.contains(&tag.as_str()))
            && HEAD_IDENTITY_ATTRS.contains(&name.as_str())
        {
            ledger.reject(
                prepared,
                ManualFixReason::Unsafe,
                format!("{name:?} identifies a head element; use an upsert operation"),
                Some(anchor.confidence),
            );
            continue;
        }

        match claimed.get(&(anchor.node, name.clone())) {
            Some((winner, value)) if *value != *attr_value => {
                ledger.reject(
                    prepared,
                    ManualFixReason::Ambiguous,
                    format!("{name} on this node is shadowed by operation #{winner}"),
                    Some(anchor.confidence),
                );
                continue;
            }
            Some(_) => continue,
            None => {
                claimed.insert((anchor.node, name.clone()), (prepared.index, attr_value.clone()));
            }
        }

        if anchor.ambiguous {
            tracing::warn!(
                audit_id = %prepared.op.audit_id,
                confidence = anchor.confidence,
                "applying to the first of several equally matching nodes"
            );
        }
        if doc.set_attr(anchor.node, &name, attr_value) {
            doc.set_attr(anchor.node, MARK_ATTR, MARK_VALUE);
            let location = doc.structural_path(anchor.node);
            ledger.mark(prepared, MarkAction::Updated, location, anchor.confidence, anchor.ambiguous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::SourcePage;
    use crate::model::NodeRef;
    use crate::resolver::StrategyKind;

    const PAGE: &str = "<!DOCTYPE html>\n<html>\n<head>\n  <meta charset=\"utf-8\">\n  <title>Old</title>\n</head>\n\
<body>\n<img src=\"a.png\">\n<p class=\"small\">Text</p>\n<script>var x = 1;</script>\n</body>\n</html>\n";

    fn page() -> SourcePage {
        SourcePage::parse(PAGE, 1 << 20).expect("parse")
    }

    fn head_op(index: usize, operation: PatchOperation) -> PreparedOp {
        PreparedOp {
            index,
            op: PatchOp::new("test", "", operation),
            resolution: Resolution::NotNeeded,
        }
    }

    fn body_op(p: &SourcePage, index: usize, tag: &str, confidence: f32, operation: PatchOperation) -> PreparedOp {
        let node = p
            .doc
            .elements()
            .into_iter()
            .find(|n| p.doc.tag(*n) == Some(tag))
            .expect("node");
        PreparedOp {
            index,
            op: PatchOp::new("test", "", operation),
            resolution: Resolution::Resolved(Anchor {
                node,
                strategy: StrategyKind::Selector,
                confidence,
                ambiguous: false,
                candidates: 1,
            }),
        }
    }

    fn alt(value: &str) -> PatchOperation {
        PatchOperation::ReplaceAttr {
            target: NodeRef::from_selector("img"),
            attr_name: "alt".into(),
            attr_value: value.into(),
        }
    }

    #[test]
    fn updates_title_in_place() {
        let mut p = page();
        let out = Applier::default().apply(
            &mut p.doc,
            &[head_op(0, PatchOperation::UpsertTitle { text: "New".into() })],
        );
        assert_eq!(out.marks.len(), 1);
        assert_eq!(out.marks[0].action, MarkAction::Updated);
        assert!(p
            .doc
            .serialize()
            .contains("<title data-seofix=\"seofix/1\">New</title>"));
    }

    #[test]
    fn inserts_meta_between_charset_and_title() {
        let mut p = page();
        Applier::default().apply(
            &mut p.doc,
            &[head_op(
                0,
                PatchOperation::UpsertMetaName {
                    name: "description".into(),
                    content: "D".into(),
                },
            )],
        );
        let html = p.doc.serialize();
        let charset = html.find("charset").expect("charset");
        let meta = html.find("name=\"description\"").expect("meta");
        let title = html.find("<title>").expect("title");
        assert!(charset < meta && meta < title, "{html}");
    }

    #[test]
    fn conflicting_head_ops_keep_the_first() {
        let mut p = page();
        let out = Applier::default().apply(
            &mut p.doc,
            &[
                head_op(0, PatchOperation::UpsertTitle { text: "A".into() }),
                head_op(1, PatchOperation::UpsertTitle { text: "B".into() }),
            ],
        );
        assert_eq!(out.manual_fix.len(), 1);
        assert_eq!(out.manual_fix[0].reason, ManualFixReason::Ambiguous);
        assert!(p.doc.serialize().contains(">A</title>"));
    }

    #[test]
    fn duplicate_singletons_are_collapsed() {
        let src = "<html><head>\n  <title>One</title>\n  <title>Two</title>\n</head><body></body></html>";
        let mut p = SourcePage::parse(src, 1 << 20).expect("parse");
        Applier::default().apply(
            &mut p.doc,
            &[head_op(0, PatchOperation::UpsertTitle { text: "One".into() })],
        );
        let html = p.doc.serialize();
        assert_eq!(html.matches("<title").count(), 1, "{html}");
    }

    #[test]
    fn replace_attr_respects_threshold() {
        let mut p = page();
        let ok = body_op(&p, 0, "img", 1.0, alt("Logo"));
        let low = body_op(&p, 1, "img", 0.3, alt("Other"));
        let out = Applier::default().apply(&mut p.doc, &[ok, low]);
        assert_eq!(out.marks.len(), 1);
        assert_eq!(out.manual_fix.len(), 1);
        assert_eq!(out.manual_fix[0].reason, ManualFixReason::Unresolvable);
        assert_eq!(out.manual_fix[0].confidence, Some(0.3));
        assert!(p.doc.serialize().contains("alt=\"Logo\""));
    }

    fn description_content(value: &str) -> PatchOperation {
        PatchOperation::ReplaceAttr {
            target: NodeRef::from_selector("meta[name=description]"),
            attr_name: "content".into(),
            attr_value: value.into(),
        }
    }

    #[test]
    fn attribute_writes_cannot_shadow_head_upserts() {
        let src = "<html><head>\n  <meta name=\"description\" content=\"X\">\n</head><body></body></html>";
        let mut p = SourcePage::parse(src, 1 << 20).expect("parse");
        let upsert = head_op(
            0,
            PatchOperation::UpsertMetaName {
                name: "description".into(),
                content: "A".into(),
            },
        );
        let write = body_op(&p, 1, "meta", 1.0, description_content("B"));
        let out = Applier::default().apply(&mut p.doc, &[upsert.clone(), write.clone()]);
        assert_eq!(out.marks.len(), 1);
        assert_eq!(out.manual_fix.len(), 1);
        assert_eq!(out.manual_fix[0].op_index, 1);
        assert_eq!(out.manual_fix[0].reason, ManualFixReason::Ambiguous);
        let once = p.doc.serialize();
        assert!(once.contains("content=\"A\""), "{once}");

        let mut again = SourcePage::parse(&once, 1 << 20).expect("reparse");
        let write = body_op(&again, 1, "meta", 1.0, write.op.operation.clone());
        let out = Applier::default().apply(&mut again.doc, &[upsert, write]);
        assert!(out.marks.is_empty());
        assert_eq!(again.doc.serialize(), once);
    }

    #[test]
    fn managed_attributes_need_an_upsert() {
        let src = "<html><head><meta name=\"description\" content=\"X\"></head>\
<body><meta itemprop=\"sku\" content=\"1\"></body></html>";
        let mut p = SourcePage::parse(src, 1 << 20).expect("parse");
        let write = body_op(&p, 0, "meta", 1.0, description_content("B"));
        let body_meta = p
            .doc
            .elements()
            .into_iter()
            .find(|n| p.doc.attr(*n, "itemprop").is_some())
            .expect("body meta");
        let rename = PreparedOp {
            index: 1,
            op: PatchOp::new(
                "test",
                "",
                PatchOperation::ReplaceAttr {
                    target: NodeRef::from_selector("meta[itemprop]"),
                    attr_name: "name".into(),
                    attr_value: "description".into(),
                },
            ),
            resolution: Resolution::Resolved(Anchor {
                node: body_meta,
                strategy: StrategyKind::Selector,
                confidence: 1.0,
                ambiguous: false,
                candidates: 1,
            }),
        };
        let before = p.doc.serialize();
        let out = Applier::default().apply(&mut p.doc, &[write, rename]);
        let reasons: Vec<ManualFixReason> = out.manual_fix.iter().map(|m| m.reason).collect();
        assert_eq!(reasons, vec![ManualFixReason::Unsafe, ManualFixReason::Unsafe]);
        assert_eq!(p.doc.serialize(), before);
    }

    #[test]
    fn singletons_outside_head_are_updated_not_duplicated() {
        let src = "<html><head>\n  <title>T</title>\n</head><body>\n\
<meta name=\"description\" content=\"old\">\n<link rel=\"canonical\" href=\"https://a.test/old\">\n</body></html>";
        let mut p = SourcePage::parse(src, 1 << 20).expect("parse");
        let out = Applier::default().apply(
            &mut p.doc,
            &[
                head_op(
                    0,
                    PatchOperation::UpsertMetaName {
                        name: "description".into(),
                        content: "new".into(),
                    },
                ),
                head_op(
                    1,
                    PatchOperation::UpsertLinkRel {
                        rel: "canonical".into(),
                        href: "https://a.test/".into(),
                        hreflang: None,
                    },
                ),
            ],
        );
        assert!(out.marks.iter().all(|m| m.action == MarkAction::Updated));
        let html = p.doc.serialize();
        assert_eq!(html.matches("name=\"description\"").count(), 1, "{html}");
        assert_eq!(html.matches("rel=\"canonical\"").count(), 1, "{html}");
        assert!(html.contains("content=\"new\""));
        assert!(html.contains("href=\"https://a.test/\""));
    }

    #[test]
    fn writes_to_collapsed_duplicates_are_deferred() {
        let src = "<html><head>\n  <title>One</title>\n  <title>Two</title>\n</head><body></body></html>";
        let mut p = SourcePage::parse(src, 1 << 20).expect("parse");
        let second = p
            .doc
            .elements()
            .into_iter()
            .filter(|n| p.doc.tag(*n) == Some("title"))
            .nth(1)
            .expect("second title");
        let write = PreparedOp {
            index: 1,
            op: PatchOp::new(
                "test",
                "",
                PatchOperation::ReplaceAttr {
                    target: NodeRef::from_selector("title:nth-of-type(2)"),
                    attr_name: "lang".into(),
                    attr_value: "en".into(),
                },
            ),
            resolution: Resolution::Resolved(Anchor {
                node: second,
                strategy: StrategyKind::Selector,
                confidence: 1.0,
                ambiguous: false,
                candidates: 1,
            }),
        };
        let out = Applier::default().apply(
            &mut p.doc,
            &[head_op(0, PatchOperation::UpsertTitle { text: "One".into() }), write],
        );
        assert_eq!(out.marks.len(), 1);
        assert_eq!(out.manual_fix.len(), 1);
        assert_eq!(out.manual_fix[0].op_index, 1);
        assert!(!p.doc.serialize().contains("lang="));
    }

    #[test]
    fn script_targets_are_unsafe() {
        let mut p = page();
        let op = body_op(
            &p,
            0,
            "script",
            1.0,
            PatchOperation::ReplaceAttr {
                target: NodeRef::from_selector("script"),
                attr_name: "src".into(),
                attr_value: "evil.js".into(),
            },
        );
        let before = p.doc.serialize();
        let out = Applier::default().apply(&mut p.doc, &[op]);
        assert_eq!(out.manual_fix[0].reason, ManualFixReason::Unsafe);
        assert_eq!(p.doc.serialize(), before);
    }

    #[test]
    fn scoped_style_creates_block_and_is_idempotent() {
        let mut p = page();
        let style = PatchOperation::InsertStyleScoped {
            target: NodeRef::from_selector("p.small"),
            css_rules: "font-size: 16px".into(),
            media_guard: None,
        };
        let op = body_op(&p, 0, "p", 1.0, style);
        let out = Applier::default().apply(&mut p.doc, std::slice::from_ref(&op));
        assert_eq!(out.marks.len(), 1);
        let once = p.doc.serialize();
        assert!(once.contains("<style data-seofix=\"seofix/1\">"), "{once}");
        assert!(once.contains("{ font-size: 16px; }"), "{once}");

        let mut again = SourcePage::parse(&once, 1 << 20).expect("parse");
        let op = body_op(&again, 0, "p", 1.0, op.op.operation.clone());
        let out = Applier::default().apply(&mut again.doc, &[op]);
        assert!(out.marks.is_empty());
        assert_eq!(again.doc.serialize(), once);
    }

    #[test]
    fn scoped_style_rejections() {
        let mut p = page();
        let forced = body_op(
            &p,
            0,
            "p",
            1.0,
            PatchOperation::InsertStyleScoped {
                target: NodeRef::from_selector("p"),
                css_rules: "position: fixed !important".into(),
                media_guard: None,
            },
        );
        let before = p.doc.serialize();
        let out = Applier::default().apply(&mut p.doc, &[forced.clone()]);
        assert_eq!(out.manual_fix[0].reason, ManualFixReason::Unsafe);
        assert_eq!(p.doc.serialize(), before);

        let disabled = Applier::new(&PipelineConfig {
            safe_css: false,
            ..PipelineConfig::default()
        });
        let out = disabled.apply(&mut p.doc, &[forced]);
        assert_eq!(out.manual_fix[0].detail, "scoped styles are disabled");
    }
}
