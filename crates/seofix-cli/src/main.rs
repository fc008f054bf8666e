//! Seofix CLI
//!
//! Command-line surface over the Seofix libraries:
//! - Summarizing an audit report into issues with node references
//! - Synthesizing a deterministic patch plan from the summary
//! - Applying a plan (or a full-document fallback) and printing the diff
//! - Quick-checking a page against the report's findings
//! - Extracting page context for prompt construction

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use seofix_audit::{page_context, parse_report_str, synthesize_plan, SynthOptions};
use seofix_core::{quick_check, AuditSummary, PatchPlan, Pipeline, PipelineConfig, PipelineRun};

mod render;

#[derive(Parser)]
#[command(name = "seofix")]
#[command(author, version, about = "Seofix: minimal, verifiable SEO fixes for HTML documents")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
struct GlobalArgs {
    /// Log debug output to stderr (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Pipeline configuration JSON; environment and flags override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Minimum resolution confidence for an edit to be applied
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// Node references resolved per audit
    #[arg(long, global = true)]
    max_locations: Option<usize>,
    /// Disable scoped style insertion
    #[arg(long, global = true)]
    no_safe_css: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an audit report into an issue summary.
    Summarize {
        /// Audit report JSON
        #[arg(long)]
        report: PathBuf,
        /// Write the summary here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Synthesize a patch plan from an audit report and the page.
    Plan {
        #[arg(long)]
        report: PathBuf,
        #[arg(long)]
        html: PathBuf,
        /// Audited page URL (used for rel=canonical)
        #[arg(long)]
        url: Option<String>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Apply a plan (or a full replacement document) and print the diff.
    Apply(ApplyArgs),

    /// Quick-check a page against the failing audits in a report.
    Check {
        #[arg(long)]
        html: PathBuf,
        #[arg(long)]
        report: PathBuf,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the page context handed to the text-generation collaborator.
    Context {
        #[arg(long)]
        html: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct ApplyArgs {
    /// Source HTML document
    #[arg(long)]
    html: PathBuf,
    /// Patch plan JSON
    #[arg(long, conflicts_with = "fallback", required_unless_present = "fallback")]
    plan: Option<PathBuf>,
    /// Full modified document to classify into a plan
    #[arg(long)]
    fallback: Option<PathBuf>,
    /// Audit report whose failing audits are quick-checked afterwards
    #[arg(long)]
    report: Option<PathBuf>,
    /// Write the modified document here
    #[arg(short, long)]
    out: Option<PathBuf>,
    /// Write the pipeline result JSON here
    #[arg(long)]
    result: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);
    let config = load_config(&cli.global)?;

    match cli.command {
        Commands::Summarize { report, out } => cmd_summarize(&config, &report, out.as_deref()),
        Commands::Plan {
            report,
            html,
            url,
            out,
        } => cmd_plan(&config, &report, &html, url, out.as_deref()),
        Commands::Apply(args) => cmd_apply(config, &args).map(|_| ()),
        Commands::Check { html, report, json } => cmd_check(&config, &html, &report, json),
        Commands::Context { html, json } => cmd_context(&html, json),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

// ============================================================================
// Configuration
// ============================================================================

/// Defaults (or `--config`), then the environment, then flags.
fn load_config(global: &GlobalArgs) -> Result<PipelineConfig> {
    let base = match &global.config {
        Some(path) => {
            let text = read(path)?;
            serde_json::from_str::<PipelineConfig>(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    let mut config = base.with_env_overrides(|name| std::env::var(name).ok())?;
    apply_flags(&mut config, global);
    config.validate()?;
    tracing::debug!(
        threshold = config.confidence_threshold,
        max_locations = config.max_locations_per_issue,
        safe_css = config.safe_css,
        "configuration loaded"
    );
    Ok(config)
}

fn apply_flags(config: &mut PipelineConfig, global: &GlobalArgs) {
    if let Some(t) = global.threshold {
        config.confidence_threshold = t;
    }
    if let Some(n) = global.max_locations {
        config.max_locations_per_issue = n;
    }
    if global.no_safe_css {
        config.safe_css = false;
    }
}

// ============================================================================
// IO helpers
// ============================================================================

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;
    eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
    Ok(())
}

fn emit_json<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => write(path, &format!("{text}\n")),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn load_summary(config: &PipelineConfig, report: &Path) -> Result<AuditSummary> {
    let summary = parse_report_str(&read(report)?)
        .with_context(|| format!("failed to parse report {}", report.display()))?;
    tracing::info!(
        report = %report.display(),
        seo_score = summary.seo_score,
        issues = summary.issues.len(),
        "loaded audit report"
    );
    Ok(summary.capped(config.max_locations_per_issue))
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_summarize(config: &PipelineConfig, report: &Path, out: Option<&Path>) -> Result<()> {
    let summary = load_summary(config, report)?;
    emit_json(&summary, out)
}

fn cmd_plan(
    config: &PipelineConfig,
    report: &Path,
    html: &Path,
    url: Option<String>,
    out: Option<&Path>,
) -> Result<()> {
    let summary = load_summary(config, report)?;
    let source = read(html)?;
    let plan = synthesize_plan(&summary, &source, &SynthOptions { page_url: url });
    eprintln!(
        "{} {} operation(s) for {} issue(s)",
        "planned".green().bold(),
        plan.len(),
        summary.issues.len()
    );
    emit_json(&plan, out)
}

fn cmd_apply(config: PipelineConfig, args: &ApplyArgs) -> Result<PipelineRun> {
    let source = read(&args.html)?;
    let issues = match &args.report {
        Some(report) => load_summary(&config, report)?.issues,
        None => Vec::new(),
    };
    let pipeline = Pipeline::new(config)?;

    let run = match (&args.plan, &args.fallback) {
        (Some(plan_path), _) => {
            let plan: PatchPlan = serde_json::from_str(&read(plan_path)?)
                .with_context(|| format!("invalid plan {}", plan_path.display()))?;
            tracing::info!(plan = %plan_path.display(), operations = plan.len(), "applying plan");
            pipeline.run(&source, &plan, &issues)?
        }
        (None, Some(fallback_path)) => {
            let fallback = read(fallback_path)?;
            tracing::info!(fallback = %fallback_path.display(), "classifying fallback document");
            pipeline.run_fallback(&source, &fallback, &issues)?
        }
        (None, None) => return Err(anyhow!("either --plan or --fallback is required")),
    };

    print!("{}", render::colored_diff(&run.output.diff));
    eprint!("{}", render::run_summary(&run.output));

    if let Some(out) = &args.out {
        write(out, &run.modified_html)?;
    }
    if let Some(result) = &args.result {
        emit_json(&run.output, Some(result))?;
    }
    Ok(run)
}

fn cmd_check(config: &PipelineConfig, html: &Path, report: &Path, json: bool) -> Result<()> {
    let summary = load_summary(config, report)?;
    let result = quick_check(&read(html)?, &summary.issues);
    if json {
        return emit_json(&result, None);
    }
    print!("{}", render::quick_check_table(&result));
    Ok(())
}

fn cmd_context(html: &Path, json: bool) -> Result<()> {
    let context = page_context(&read(html)?);
    if json {
        return emit_json(&context, None);
    }
    print!("{}", context.render());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: &str = "<!DOCTYPE html>\n<html>\n<head>\n  <title></title>\n</head>\n<body>\n  \
<h1>Garden Tools</h1>\n  <img src=\"/img/steel-trowel.jpg\">\n</body>\n</html>\n";

    const REPORT: &str = r#"{
      "seoScore": 0.5,
      "audits": {
        "document-title": { "score": 0, "title": "No title" },
        "image-alt": { "score": 0, "title": "Images lack alt", "details": { "items": [
          { "node": { "selector": "body > img" } }
        ] } }
      }
    }"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn flags_override_file_config() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"confidenceThreshold": 0.9, "maxOperations": 10}"#).expect("write");

        let global = GlobalArgs {
            config: Some(path),
            threshold: Some(0.7),
            no_safe_css: true,
            ..GlobalArgs::default()
        };
        let base: PipelineConfig =
            serde_json::from_str(&read(global.config.as_deref().expect("path")).expect("read"))
                .expect("parse");
        let mut config = base.with_env_overrides(no_env).expect("env");
        apply_flags(&mut config, &global);

        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.max_operations, 10);
        assert!(!config.safe_css);
        assert_eq!(config.max_locations_per_issue, 10);
    }

    #[test]
    fn plan_then_apply_round_trip() {
        let dir = tempdir().expect("tempdir");
        let html = dir.path().join("page.html");
        let report = dir.path().join("lhr.json");
        let plan = dir.path().join("plan.json");
        let out = dir.path().join("out/page.html");
        let result = dir.path().join("out/result.json");
        fs::write(&html, PAGE).expect("write html");
        fs::write(&report, REPORT).expect("write report");

        let config = PipelineConfig::default();
        cmd_plan(&config, &report, &html, None, Some(&plan)).expect("plan");
        let written: PatchPlan =
            serde_json::from_str(&fs::read_to_string(&plan).expect("read plan")).expect("plan json");
        assert_eq!(written.len(), 2);

        let run = cmd_apply(
            config,
            &ApplyArgs {
                html: html.clone(),
                plan: Some(plan),
                fallback: None,
                report: Some(report),
                out: Some(out.clone()),
                result: Some(result.clone()),
            },
        )
        .expect("apply");

        let modified = fs::read_to_string(&out).expect("read out");
        assert_eq!(modified, run.modified_html);
        assert!(modified.contains(">Garden Tools</title>"));
        assert!(modified.contains("alt=\"Steel trowel\""));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&result).expect("read result")).expect("json");
        assert_eq!(json["applicable"], true);
        assert_eq!(json["quickCheck"]["failed"], 0);
    }

    #[test]
    fn missing_input_reports_the_path() {
        let err = read(Path::new("/definitely/not/here.html")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.html"));
    }
}
