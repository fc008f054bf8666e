//! Data model shared by every pipeline stage.
//!
//! Serialized field names are camelCase; these types cross the boundary to
//! the audit summarizer and the text-generation collaborator as JSON.

use serde::{Deserialize, Serialize};

// ============================================================================
// Markers
// ============================================================================

/// Attribute stamped on every node the applier creates or mutates.
pub const MARK_ATTR: &str = "data-seofix";

/// Tool and schema version carried by [`MARK_ATTR`].
pub const MARK_VALUE: &str = "seofix/1";

/// Attribute linking a body element to its rules in the managed style block.
pub const SCOPE_ATTR: &str = "data-seofix-scope";

// ============================================================================
// References
// ============================================================================

/// Derived fallback signature for a node: its tag/class chain plus a hash of
/// the text around it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    /// Up to three `tag.class1.class2` segments, outermost first, joined by `>`.
    pub chain: String,
    /// FNV-1a digest of the whitespace-normalized text of the parent element.
    pub text_hash: String,
}

/// An abstract reference to a location in a document.
///
/// Before resolution only the locators are meaningful; after resolution the
/// resolver fills `confidence` and the `resolved_*` fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Lighthouse-style `index,TAG,index,TAG,...` path from the root element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_outer_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_context: Option<String>,
}

/// Audit-side name for the same shape.
pub type IssueLocation = NodeRef;

impl NodeRef {
    pub fn from_selector(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            ..Self::default()
        }
    }

    pub fn from_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_snippet(snippet: impl Into<String>) -> Self {
        Self {
            snippet: Some(snippet.into()),
            ..Self::default()
        }
    }

    /// True when at least one locator is present.
    pub fn has_locator(&self) -> bool {
        self.selector.is_some()
            || self.path.is_some()
            || self.snippet.is_some()
            || self.fingerprint.is_some()
    }
}

// ============================================================================
// Issues
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub audit_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub locations: Vec<IssueLocation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub seo_score: i64,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl AuditSummary {
    /// Keep at most `max_locations` locations per issue, in report order.
    pub fn capped(mut self, max_locations: usize) -> Self {
        for issue in &mut self.issues {
            issue.locations.truncate(max_locations);
        }
        self
    }

    pub fn issue(&self, audit_id: &str) -> Option<&Issue> {
        self.issues.iter().find(|i| i.audit_id == audit_id)
    }
}

// ============================================================================
// Patch plan
// ============================================================================

/// The closed set of edits the applier knows how to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PatchOperation {
    #[serde(rename_all = "camelCase")]
    UpsertTitle { text: String },

    #[serde(rename_all = "camelCase")]
    UpsertMetaName { name: String, content: String },

    #[serde(rename_all = "camelCase")]
    UpsertMetaProperty { property: String, content: String },

    #[serde(rename_all = "camelCase")]
    UpsertLinkRel {
        rel: String,
        href: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hreflang: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    ReplaceAttr {
        target: NodeRef,
        attr_name: String,
        attr_value: String,
    },

    #[serde(rename_all = "camelCase")]
    InsertStyleScoped {
        target: NodeRef,
        css_rules: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_guard: Option<String>,
    },
}

impl PatchOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            PatchOperation::UpsertTitle { .. } => "upsertTitle",
            PatchOperation::UpsertMetaName { .. } => "upsertMetaName",
            PatchOperation::UpsertMetaProperty { .. } => "upsertMetaProperty",
            PatchOperation::UpsertLinkRel { .. } => "upsertLinkRel",
            PatchOperation::ReplaceAttr { .. } => "replaceAttr",
            PatchOperation::InsertStyleScoped { .. } => "insertStyleScoped",
        }
    }

    /// The body node this operation is addressed to, if any.
    pub fn target(&self) -> Option<&NodeRef> {
        match self {
            PatchOperation::ReplaceAttr { target, .. }
            | PatchOperation::InsertStyleScoped { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn target_mut(&mut self) -> Option<&mut NodeRef> {
        match self {
            PatchOperation::ReplaceAttr { target, .. }
            | PatchOperation::InsertStyleScoped { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// One operation plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOp {
    pub audit_id: String,
    #[serde(default)]
    pub reason: String,
    #[serde(flatten)]
    pub operation: PatchOperation,
}

impl PatchOp {
    pub fn new(
        audit_id: impl Into<String>,
        reason: impl Into<String>,
        operation: PatchOperation,
    ) -> Self {
        Self {
            audit_id: audit_id.into(),
            reason: reason.into(),
            operation,
        }
    }
}

/// Ordered operations. Order is advisory: the applier imposes its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchPlan {
    #[serde(default)]
    pub operations: Vec<PatchOp>,
}

impl PatchPlan {
    pub fn new(operations: Vec<PatchOp>) -> Self {
        Self { operations }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn push(&mut self, op: PatchOp) {
        self.operations.push(op);
    }
}

// ============================================================================
// Apply results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkAction {
    Created,
    Updated,
}

/// Record of one node the applier created or mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMark {
    pub audit_id: String,
    /// Index of the originating operation in the plan.
    pub op_index: usize,
    pub kind: String,
    pub action: MarkAction,
    /// Head key (`meta[name=description]`) or structural path of the node.
    pub location: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ambiguous: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualFixReason {
    Unresolvable,
    Ambiguous,
    Unsafe,
}

impl std::fmt::Display for ManualFixReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ManualFixReason::Unresolvable => "Unresolvable",
            ManualFixReason::Ambiguous => "Ambiguous",
            ManualFixReason::Unsafe => "Unsafe",
        };
        f.write_str(s)
    }
}

/// An operation the applier declined to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualFixEntry {
    /// Index of the operation in the plan.
    pub op_index: usize,
    pub operation: PatchOp,
    pub reason: ManualFixReason,
    pub detail: String,
    /// Best candidate confidence seen while resolving, when there was one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub diff: String,
    pub applicable: bool,
}

/// A change in a full-document fallback that could not be expressed as a
/// patch operation and was therefore not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnclassifiedChange {
    pub location: String,
    pub detail: String,
}
