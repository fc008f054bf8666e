//! One request, end to end.
//!
//! ```text
//!   source ─parse─▶ SourcePage ─resolve─▶ PreparedOp[] ─apply─▶ Document'
//!      │                                                           │
//!      └──────────── canonical serialization ───── diff ◀── serialize
//!                                                   │
//!                                              quick-check
//! ```
//!
//! Stages run strictly in sequence. The only state shared between requests
//! is the optional [`ResolutionCache`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::applier::{Applier, PreparedOp, Resolution};
use crate::cache::{CacheKey, ResolutionCache};
use crate::config::PipelineConfig;
use crate::diff::diff_documents;
use crate::digest::document_digest;
use crate::dom::SourcePage;
use crate::error::PatchError;
use crate::fallback::derive_plan;
use crate::model::{
    AppliedMark, Issue, ManualFixEntry, ManualFixReason, PatchPlan, UnclassifiedChange,
};
use crate::quickcheck::{quick_check, QuickCheckReport};
use crate::resolver::{annotate, ResolveError, ResolveLimits, Resolver};

/// Warning attached when a non-empty plan changed nothing.
pub const NO_EFFECT_WARNING: &str = "plan had no observable effect";

/// The caller-facing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub diff: String,
    pub applicable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_check: Option<QuickCheckReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manual_fix: Vec<ManualFixEntry>,
    #[serde(default)]
    pub applied: Vec<AppliedMark>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_changes: Vec<UnclassifiedChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// The executed plan with every reference annotated.
    pub plan: PatchPlan,
}

/// Output plus the modified document, which is not part of the JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub output: PipelineOutput,
    pub modified_html: String,
}

pub struct Pipeline {
    config: PipelineConfig,
    resolver: Resolver,
    applier: Applier,
    cache: Option<Arc<ResolutionCache>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("cache", &self.cache.as_ref().map(|c| c.stats()))
            .finish()
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PatchError> {
        config.validate()?;
        Ok(Self {
            resolver: Resolver::new(ResolveLimits::from(&config)),
            applier: Applier::new(&config),
            config,
            cache: None,
        })
    }

    /// Share a resolution cache across pipelines.
    pub fn with_cache(mut self, cache: Arc<ResolutionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolve, apply and diff `plan` against `source`. Issues, when given,
    /// are quick-checked against the result.
    pub fn run(
        &self,
        source: &str,
        plan: &PatchPlan,
        issues: &[Issue],
    ) -> Result<PipelineRun, PatchError> {
        let page = SourcePage::parse(source, self.config.max_document_bytes)?;
        self.execute(source, page, plan, issues, Vec::new())
    }

    /// Classify a full replacement document into a plan and run that.
    pub fn run_fallback(
        &self,
        source: &str,
        fallback_html: &str,
        issues: &[Issue],
    ) -> Result<PipelineRun, PatchError> {
        let page = SourcePage::parse(source, self.config.max_document_bytes)?;
        let fallback = SourcePage::parse(fallback_html, self.config.max_document_bytes)?;
        let derived = derive_plan(&page.doc, &fallback.doc);
        self.execute(source, page, &derived.plan, issues, derived.rejected)
    }

    fn execute(
        &self,
        source: &str,
        page: SourcePage,
        plan: &PatchPlan,
        issues: &[Issue],
        rejected_changes: Vec<UnclassifiedChange>,
    ) -> Result<PipelineRun, PatchError> {
        let original = page.doc.serialize();
        let (prepared, mut manual_fix, annotated) = self.prepare(source, &page, plan);
        tracing::info!(
            operations = plan.len(),
            prepared = prepared.len(),
            deferred = manual_fix.len(),
            "resolved plan"
        );

        let mut doc = page.doc.clone();
        let outcome = self.applier.apply(&mut doc, &prepared);
        let modified = doc.serialize();
        tracing::info!(
            applied = outcome.marks.len(),
            manual_fix = outcome.manual_fix.len(),
            "applied plan"
        );

        let diff = diff_documents(&original, &modified, !outcome.marks.is_empty());
        if !diff.applicable {
            return Err(PatchError::DiffInapplicable(
                "generated diff does not reproduce the modified document".into(),
            ));
        }

        let mut warnings = Vec::new();
        if diff.diff.is_empty() && !plan.is_empty() {
            tracing::warn!(operations = plan.len(), "{NO_EFFECT_WARNING}");
            warnings.push(NO_EFFECT_WARNING.to_string());
        }
        for mark in outcome.marks.iter().filter(|m| m.ambiguous) {
            warnings.push(format!(
                "operation #{} ({}) was applied to the first of several matching nodes",
                mark.op_index, mark.audit_id
            ));
        }

        manual_fix.extend(outcome.manual_fix);
        manual_fix.sort_by_key(|e| e.op_index);

        let quick_check = (!issues.is_empty()).then(|| quick_check(&modified, issues));

        Ok(PipelineRun {
            output: PipelineOutput {
                diff: diff.diff,
                applicable: diff.applicable,
                quick_check,
                manual_fix,
                applied: outcome.marks,
                rejected_changes,
                warnings,
                plan: annotated,
            },
            modified_html: modified,
        })
    }

    /// Bound the plan, resolve targets and annotate a copy of the plan.
    fn prepare(
        &self,
        source: &str,
        page: &SourcePage,
        plan: &PatchPlan,
    ) -> (Vec<PreparedOp>, Vec<ManualFixEntry>, PatchPlan) {
        let digest = self.cache.as_ref().map(|_| document_digest(source));
        let mut annotated = plan.clone();
        let mut prepared = Vec::with_capacity(plan.len());
        let mut deferred = Vec::new();
        let mut located: HashMap<&str, usize> = HashMap::new();

        for (index, op) in plan.operations.iter().enumerate() {
            if index >= self.config.max_operations {
                deferred.push(ManualFixEntry {
                    op_index: index,
                    operation: op.clone(),
                    reason: ManualFixReason::Unresolvable,
                    detail: format!(
                        "operation limit of {} exceeded",
                        self.config.max_operations
                    ),
                    confidence: None,
                });
                continue;
            }

            let Some(target) = op.operation.target() else {
                prepared.push(PreparedOp {
                    index,
                    op: op.clone(),
                    resolution: Resolution::NotNeeded,
                });
                continue;
            };

            let seen = located.entry(op.audit_id.as_str()).or_insert(0);
            *seen += 1;
            if *seen > self.config.max_locations_per_issue {
                deferred.push(ManualFixEntry {
                    op_index: index,
                    operation: op.clone(),
                    reason: ManualFixReason::Unresolvable,
                    detail: format!(
                        "more than {} locations for {}",
                        self.config.max_locations_per_issue, op.audit_id
                    ),
                    confidence: None,
                });
                continue;
            }

            let result = self.resolve(page, digest.as_deref(), target);
            if let Err(err) = &result {
                tracing::debug!(audit_id = %op.audit_id, error = %err, "reference not resolved");
            }
            let resolution = match result {
                Ok(anchor) => {
                    if let Some(t) = annotated.operations[index].operation.target_mut() {
                        annotate(&page.doc, t, &anchor);
                    }
                    Resolution::Resolved(anchor)
                }
                Err(err) => Resolution::Failed(err),
            };
            prepared.push(PreparedOp {
                index,
                op: annotated.operations[index].clone(),
                resolution,
            });
        }

        (prepared, deferred, annotated)
    }

    fn resolve(
        &self,
        page: &SourcePage,
        digest: Option<&str>,
        target: &crate::model::NodeRef,
    ) -> Result<crate::resolver::Anchor, ResolveError> {
        match (&self.cache, digest) {
            (Some(cache), Some(digest)) => {
                let key = CacheKey::new(digest, target, self.resolver.limits());
                cache.get_or_resolve(key, || self.resolver.resolve(page, target))
            }
            _ => self.resolver.resolve(page, target),
        }
    }
}
