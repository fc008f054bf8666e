//! Audit report parsing.
//!
//! Input shape:
//!
//! ```text
//! {
//!   "seoScore": 0.83,
//!   "audits": {
//!     "image-alt": {
//!       "score": 0, "title": "...", "description": "...",
//!       "details": { "items": [ { "node": { "selector", "path", "snippet" } } ] }
//!     }
//!   }
//! }
//! ```
//!
//! Only failing audits (score present and below 1) become issues.

use serde_json::{Map, Value};

use seofix_core::{AuditSummary, Issue, IssueLocation, NodeRef};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("report is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid audit report: {0}")]
    InvalidReport(String),
}

pub fn parse_report_str(raw: &str) -> Result<AuditSummary, AuditError> {
    let value: Value = serde_json::from_str(raw)?;
    parse_report(&value)
}

pub fn parse_report(report: &Value) -> Result<AuditSummary, AuditError> {
    let root = report
        .as_object()
        .ok_or_else(|| AuditError::InvalidReport("top level is not an object".into()))?;
    let audits = root
        .get("audits")
        .and_then(Value::as_object)
        .ok_or_else(|| AuditError::InvalidReport("missing \"audits\" object".into()))?;

    let mut issues: Vec<Issue> = audits
        .iter()
        .filter_map(|(id, audit)| failing_issue(id, audit))
        .collect();
    issues.sort_by(|a, b| a.audit_id.cmp(&b.audit_id));

    let summary = AuditSummary {
        seo_score: seo_score(root),
        issues,
    };
    tracing::info!(
        seo_score = summary.seo_score,
        issues = summary.issues.len(),
        "parsed audit report"
    );
    Ok(summary)
}

/// `seoScore` at the top level, or a Lighthouse `categories.seo.score`.
/// Integer `seoScore` values are already on the 0..=100 scale; fractional
/// ones and the category score are scaled up.
fn seo_score(root: &Map<String, Value>) -> i64 {
    let scale = |s: f64| (s * 100.0).round() as i64;
    let top = root.get("seoScore");
    if let Some(n) = top.and_then(Value::as_i64) {
        return n;
    }
    if let Some(s) = top.and_then(Value::as_f64) {
        return if s <= 1.0 { scale(s) } else { s.round() as i64 };
    }
    root.get("categories")
        .and_then(|c| c.get("seo"))
        .and_then(|s| s.get("score"))
        .and_then(Value::as_f64)
        .map_or(0, scale)
}

fn failing_issue(audit_id: &str, audit: &Value) -> Option<Issue> {
    let score = audit.get("score").and_then(Value::as_f64)?;
    if score >= 1.0 {
        return None;
    }
    let text = |key: &str| audit.get(key).and_then(Value::as_str).map(str::to_string);

    let locations = audit
        .pointer("/details/items")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(item_location).collect())
        .unwrap_or_default();

    Some(Issue {
        audit_id: audit_id.to_string(),
        title: text("title").unwrap_or_default(),
        description: text("description"),
        score: Some(score),
        locations,
    })
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn item_location(item: &Value) -> Option<IssueLocation> {
    if let Some(node) = item.get("node").filter(|n| n.is_object()) {
        let location = NodeRef {
            selector: non_empty(node.get("selector")),
            path: non_empty(node.get("path")),
            snippet: non_empty(node.get("snippet")),
            ..NodeRef::default()
        };
        if location.has_locator() {
            return Some(location);
        }
    }
    if let Some(href) = non_empty(item.get("href")) {
        return Some(NodeRef::from_selector(format!(
            "a[href=\"{}\"]",
            escape_attr_selector(&href)
        )));
    }
    non_empty(item.get("source")).map(NodeRef::from_snippet)
}

fn escape_attr_selector(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"{
      "seoScore": 0.67,
      "audits": {
        "viewport": { "score": 1, "title": "Has a viewport" },
        "meta-description": { "score": 0, "title": "No meta description", "details": { "items": [] } },
        "image-alt": {
          "score": 0,
          "title": "Images lack alt",
          "description": "Informative elements should have alt text.",
          "details": { "items": [
            { "node": { "selector": "div > img.hero", "path": "1,HTML,1,BODY,0,DIV,0,IMG", "snippet": "<img class=\"hero\" src=\"a.png\">" } },
            { "node": { "selector": "", "snippet": "<img src=\"b.png\">" } }
          ] }
        },
        "crawlable-anchors": {
          "score": 0,
          "title": "Links are not crawlable",
          "details": { "items": [ { "href": "javascript:void(0)", "text": "Go" } ] }
        },
        "hreflang": {
          "score": 0.5,
          "title": "Bad hreflang",
          "details": { "items": [ { "source": "<link rel=\"alternate\" hreflang=\"xx\">" } ] }
        },
        "manual": { "score": null, "title": "Manual check" }
      }
    }"#;

    #[test]
    fn failing_audits_become_sorted_issues() {
        let summary = parse_report_str(REPORT).expect("parse");
        assert_eq!(summary.seo_score, 67);
        let ids: Vec<&str> = summary.issues.iter().map(|i| i.audit_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["crawlable-anchors", "hreflang", "image-alt", "meta-description"]
        );
    }

    #[test]
    fn item_shapes_map_to_locations() {
        let summary = parse_report_str(REPORT).expect("parse");

        let alt = summary.issue("image-alt").expect("image-alt");
        assert_eq!(alt.locations.len(), 2);
        assert_eq!(alt.locations[0].selector.as_deref(), Some("div > img.hero"));
        assert_eq!(alt.locations[1].selector, None);
        assert_eq!(alt.locations[1].snippet.as_deref(), Some("<img src=\"b.png\">"));

        let anchors = summary.issue("crawlable-anchors").expect("anchors");
        assert_eq!(
            anchors.locations[0].selector.as_deref(),
            Some("a[href=\"javascript:void(0)\"]")
        );

        let hreflang = summary.issue("hreflang").expect("hreflang");
        assert!(hreflang.locations[0].snippet.is_some());

        assert!(summary.issue("meta-description").expect("meta").locations.is_empty());
    }

    #[test]
    fn lighthouse_category_score_is_used_as_fallback() {
        let summary =
            parse_report_str(r#"{"categories":{"seo":{"score":0.9}},"audits":{}}"#).expect("parse");
        assert_eq!(summary.seo_score, 90);
    }

    #[test]
    fn integer_scores_are_not_rescaled() {
        let score = |json: &str| parse_report_str(json).expect("parse").seo_score;
        assert_eq!(score(r#"{"seoScore": 1, "audits": {}}"#), 1);
        assert_eq!(score(r#"{"seoScore": 0, "audits": {}}"#), 0);
        assert_eq!(score(r#"{"seoScore": 83, "audits": {}}"#), 83);
        assert_eq!(score(r#"{"seoScore": 1.0, "audits": {}}"#), 100);
        assert_eq!(score(r#"{"seoScore": 72.6, "audits": {}}"#), 73);
        assert_eq!(score(r#"{"categories":{"seo":{"score":1}},"audits":{}}"#), 100);
    }

    #[test]
    fn malformed_reports_are_errors() {
        assert!(matches!(parse_report_str("{"), Err(AuditError::Json(_))));
        assert!(matches!(
            parse_report_str(r#"{"seoScore": 50}"#),
            Err(AuditError::InvalidReport(_))
        ));
    }
}
