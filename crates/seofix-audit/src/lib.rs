//! Audit-side collaborators for the Seofix core.
//!
//! - `report`: audit report JSON → [`AuditSummary`]
//! - `synth`: deterministic [`PatchPlan`] synthesis from a summary
//! - `context`: page context handed to the text-generation collaborator
//!
//! [`AuditSummary`]: seofix_core::AuditSummary
//! [`PatchPlan`]: seofix_core::PatchPlan

pub mod context;
pub mod report;
pub mod synth;

pub use context::{page_context, PageContext};
pub use report::{parse_report, parse_report_str, AuditError};
pub use synth::{synthesize_plan, SynthOptions};
