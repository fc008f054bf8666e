//! Terminal rendering for pipeline results.

use std::fmt::Write as _;

use colored::Colorize;

use seofix_core::{CheckStatus, ManualFixReason, PipelineOutput, QuickCheckReport};

pub fn colored_diff(diff: &str) -> String {
    let mut out = String::with_capacity(diff.len());
    for line in diff.lines() {
        let styled = if line.starts_with("+++") || line.starts_with("---") {
            line.bold().to_string()
        } else if line.starts_with("@@") {
            line.cyan().to_string()
        } else if line.starts_with('+') {
            line.green().to_string()
        } else if line.starts_with('-') {
            line.red().to_string()
        } else {
            line.to_string()
        };
        out.push_str(&styled);
        out.push('\n');
    }
    out
}

fn reason_label(reason: ManualFixReason) -> String {
    match reason {
        ManualFixReason::Unsafe => reason.to_string().red().bold().to_string(),
        ManualFixReason::Ambiguous => reason.to_string().yellow().bold().to_string(),
        ManualFixReason::Unresolvable => reason.to_string().yellow().to_string(),
    }
}

pub fn run_summary(output: &PipelineOutput) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} edit(s), {} manual fix(es)",
        "applied".green().bold(),
        output.applied.len(),
        output.manual_fix.len()
    );
    for entry in &output.manual_fix {
        let _ = writeln!(
            out,
            "  #{} {} [{}] {}",
            entry.op_index,
            reason_label(entry.reason),
            entry.operation.audit_id,
            entry.detail
        );
    }
    for change in &output.rejected_changes {
        let _ = writeln!(
            out,
            "  {} {}: {}",
            "not applied".yellow(),
            change.location,
            change.detail
        );
    }
    for warning in &output.warnings {
        let _ = writeln!(out, "{} {warning}", "warning:".yellow().bold());
    }
    if let Some(report) = &output.quick_check {
        out.push_str(&quick_check_table(report));
    }
    out
}

pub fn quick_check_table(report: &QuickCheckReport) -> String {
    let mut out = String::new();
    for result in &report.results {
        let status = match result.status {
            CheckStatus::Pass => "pass".green().bold(),
            CheckStatus::Fail => "fail".red().bold(),
            CheckStatus::Unverifiable => "skip".dimmed(),
        };
        let _ = writeln!(out, "  {status} {:<24} {}", result.audit_id, result.detail);
    }
    let _ = writeln!(
        out,
        "quick-check: {} passed, {} failed, {} unverifiable",
        report.passed, report.failed, report.unverifiable
    );
    out
}
