//! Seofix core: turn audit findings into minimal, verifiable HTML edits.
//!
//! ```text
//!   Issue.locations ──▶ NodeRef ──▶ resolver ──▶ Anchor (node, confidence)
//!                                                   │
//!   PatchPlan ──────────────────────────────────▶ applier ──▶ modified DOM
//!                                                   │               │
//!                                          ManualFixEntry[]   diff + validate
//!                                                                   │
//!                                                             quick-check
//! ```
//!
//! ## Module Organization
//!
//! - `dom`: arena document built from scraper's html5ever tree, with a
//!   deterministic serializer
//! - `resolver`: selector, structural-path and snippet strategies, tried in
//!   that order
//! - `head`: canonical head keys and ordering
//! - `css`: scoped-style and attribute safety gate
//! - `applier`: executes a resolved plan against the DOM
//! - `diff`: normalization, unified diff, round-trip validation
//! - `quickcheck`: structural re-verification of findings
//! - `fallback`: classify a full replacement document into a plan
//! - `cache`: resolution cache shared across requests
//! - `pipeline`: one request, end to end

pub mod applier;
pub mod cache;
pub mod config;
pub mod css;
pub mod diff;
pub mod digest;
pub mod dom;
pub mod error;
pub mod fallback;
pub mod head;
pub mod model;
pub mod pipeline;
pub mod quickcheck;
pub mod resolver;

// Re-export key types
pub use applier::{Applier, ApplyOutcome, PreparedOp, Resolution};
pub use cache::{CacheKey, CacheStats, ResolutionCache};
pub use config::{ConfigError, PipelineConfig};
pub use diff::{apply_diff, diff_documents, diff_stats, normalize, DiffStats};
pub use dom::{Document, NodeId, SourcePage};
pub use error::PatchError;
pub use fallback::{derive_plan, FallbackDerivation, FALLBACK_AUDIT_ID};
pub use head::HeadKey;
pub use model::{
    AppliedMark, AuditSummary, DiffResult, Fingerprint, Issue, IssueLocation, ManualFixEntry,
    ManualFixReason, MarkAction, NodeRef, PatchOp, PatchOperation, PatchPlan, UnclassifiedChange,
    MARK_ATTR, MARK_VALUE, SCOPE_ATTR,
};
pub use pipeline::{Pipeline, PipelineOutput, PipelineRun, NO_EFFECT_WARNING};
pub use quickcheck::{quick_check, CheckResult, CheckStatus, QuickCheckReport};
pub use resolver::{Anchor, ResolveError, ResolveLimits, Resolver, StrategyKind};
