//! Local, deterministic plan synthesis.
//!
//! Only operations the summary and the document directly imply are emitted;
//! anything that needs judgement (copywriting, layout) is left to the
//! text-generation collaborator.

use scraper::{Html, Selector};

use seofix_core::{
    AuditSummary, Issue, NodeRef, PatchOp, PatchOperation, PatchPlan, Resolver, SourcePage,
};

pub const VIEWPORT_CONTENT: &str = "width=device-width, initial-scale=1";
pub const ROBOTS_CONTENT: &str = "index, follow";
pub const FONT_SIZE_RULE: &str = "font-size: 16px";
pub const TAP_TARGET_RULE: &str = "min-height: 48px; min-width: 48px; padding: 8px";

/// Longest synthesized meta description.
pub const DESCRIPTION_LIMIT: usize = 155;

#[derive(Debug, Clone, Default)]
pub struct SynthOptions {
    /// Absolute URL of the page, used for `rel=canonical`.
    pub page_url: Option<String>,
}

pub fn synthesize_plan(summary: &AuditSummary, html: &str, options: &SynthOptions) -> PatchPlan {
    let parsed = Html::parse_document(html);
    // Located operations need a resolvable page; unparsable input simply
    // yields no located operations.
    let page = SourcePage::parse(html, usize::MAX).ok();
    let mut plan = PatchPlan::default();

    for issue in &summary.issues {
        let before = plan.len();
        synthesize_issue(issue, &parsed, page.as_ref(), options, &mut plan);
        tracing::debug!(
            audit_id = %issue.audit_id,
            operations = plan.len() - before,
            "synthesized operations"
        );
    }
    tracing::info!(operations = plan.len(), "synthesized plan");
    plan
}

fn synthesize_issue(
    issue: &Issue,
    html: &Html,
    page: Option<&SourcePage>,
    options: &SynthOptions,
    plan: &mut PatchPlan,
) {
    let mut push = |reason: &str, operation: PatchOperation| {
        plan.push(PatchOp::new(issue.audit_id.clone(), reason, operation));
    };

    match issue.audit_id.as_str() {
        "viewport" => push(
            "page has no usable viewport",
            PatchOperation::UpsertMetaName {
                name: "viewport".into(),
                content: VIEWPORT_CONTENT.into(),
            },
        ),
        "is-crawlable" => push(
            "page is blocked from indexing",
            PatchOperation::UpsertMetaName {
                name: "robots".into(),
                content: ROBOTS_CONTENT.into(),
            },
        ),
        "document-title" => {
            if let Some(text) = first_text(html, "h1") {
                push(
                    "title taken from the main heading",
                    PatchOperation::UpsertTitle { text },
                );
            }
        }
        "meta-description" => {
            if let Some(text) = first_text(html, "p") {
                push(
                    "description taken from the first paragraph",
                    PatchOperation::UpsertMetaName {
                        name: "description".into(),
                        content: truncate_words(&text, DESCRIPTION_LIMIT),
                    },
                );
            }
        }
        "canonical" => {
            if let Some(url) = options.page_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
                push(
                    "canonical points at the audited URL",
                    PatchOperation::UpsertLinkRel {
                        rel: "canonical".into(),
                        href: url.to_string(),
                        hreflang: None,
                    },
                );
            }
        }
        "image-alt" => {
            let Some(page) = page else {
                return;
            };
            let resolver = Resolver::default();
            for location in &issue.locations {
                let Ok(anchor) = resolver.resolve(page, location) else {
                    continue;
                };
                let Some(alt) = page.doc.attr(anchor.node, "src").and_then(alt_from_src) else {
                    continue;
                };
                push(
                    "alt text derived from the image file name",
                    PatchOperation::ReplaceAttr {
                        target: location.clone(),
                        attr_name: "alt".into(),
                        attr_value: alt,
                    },
                );
            }
        }
        "font-size" => {
            for location in &issue.locations {
                push(
                    "legible base font size",
                    scoped(location, FONT_SIZE_RULE),
                );
            }
        }
        "tap-targets" => {
            for location in &issue.locations {
                push("tap target too small", scoped(location, TAP_TARGET_RULE));
            }
        }
        _ => {}
    }
}

fn scoped(location: &NodeRef, rule: &str) -> PatchOperation {
    PatchOperation::InsertStyleScoped {
        target: location.clone(),
        css_rules: rule.into(),
        media_guard: None,
    }
}

/// Whitespace-normalized text of the first non-empty `tag` element.
fn first_text(html: &Html, tag: &str) -> Option<String> {
    let selector = Selector::parse(tag).ok()?;
    html.select(&selector)
        .map(|el| el.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

/// Cut `text` to at most `limit` characters at a word boundary.
pub fn truncate_words(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out = String::new();
    for word in text.split_whitespace() {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > limit {
            break;
        }
        if extra == 1 {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        // A single word longer than the limit.
        out = text.chars().take(limit).collect();
    }
    out
}

/// `"/img/red-running_shoe.v2.jpg?w=400"` → `"Red running shoe v2"`.
pub fn alt_from_src(src: &str) -> Option<String> {
    let path = src.split(['?', '#']).next().unwrap_or("");
    let file = path.rsplit('/').next().unwrap_or("");
    let stem = match file.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => file,
    };
    let words: Vec<&str> = stem
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !w.chars().all(|c| c.is_ascii_digit()))
        .collect();
    let mut phrase = words.join(" ");
    let first = phrase.chars().next()?;
    let upper: String = first.to_uppercase().collect();
    phrase.replace_range(..first.len_utf8(), &upper);
    Some(phrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<html><head><title></title></head><body>\
<h1>  Fresh   Garden Tools </h1>\
<p>Hand-forged trowels and pruners, built to last a lifetime of weekend gardening.</p>\
<img src=\"/img/steel-trowel_2024.jpg\"><img src=\"/img/123.png\">\
<button class=\"tiny\">Buy</button></body></html>";

    fn issue(id: &str, locations: Vec<NodeRef>) -> Issue {
        Issue {
            audit_id: id.into(),
            title: id.into(),
            description: None,
            score: Some(0.0),
            locations,
        }
    }

    fn kinds(plan: &PatchPlan) -> Vec<&'static str> {
        plan.operations.iter().map(|o| o.operation.kind()).collect()
    }

    #[test]
    fn head_issues_map_to_upserts() {
        let summary = AuditSummary {
            seo_score: 40,
            issues: vec![
                issue("canonical", vec![]),
                issue("document-title", vec![]),
                issue("meta-description", vec![]),
                issue("viewport", vec![]),
            ],
        };
        let plan = synthesize_plan(
            &summary,
            PAGE,
            &SynthOptions {
                page_url: Some("https://example.com/tools".into()),
            },
        );
        assert_eq!(
            kinds(&plan),
            vec!["upsertLinkRel", "upsertTitle", "upsertMetaName", "upsertMetaName"]
        );
        assert_eq!(
            plan.operations[1].operation,
            PatchOperation::UpsertTitle {
                text: "Fresh Garden Tools".into()
            }
        );
    }

    #[test]
    fn canonical_needs_a_page_url() {
        let summary = AuditSummary {
            seo_score: 40,
            issues: vec![issue("canonical", vec![]), issue("largest-contentful-paint", vec![])],
        };
        assert!(synthesize_plan(&summary, PAGE, &SynthOptions::default()).is_empty());
    }

    #[test]
    fn image_alt_uses_file_name_words() {
        let summary = AuditSummary {
            seo_score: 40,
            issues: vec![issue(
                "image-alt",
                vec![
                    NodeRef::from_selector("img[src*=\"trowel\"]"),
                    NodeRef::from_selector("img[src=\"/img/123.png\"]"),
                    NodeRef::from_selector("video"),
                ],
            )],
        };
        let plan = synthesize_plan(&summary, PAGE, &SynthOptions::default());
        assert_eq!(plan.len(), 1);
        match &plan.operations[0].operation {
            PatchOperation::ReplaceAttr { attr_value, .. } => assert_eq!(attr_value, "Steel trowel"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tap_targets_get_scoped_styles() {
        let summary = AuditSummary {
            seo_score: 40,
            issues: vec![issue("tap-targets", vec![NodeRef::from_selector("button.tiny")])],
        };
        let plan = synthesize_plan(&summary, PAGE, &SynthOptions::default());
        assert!(matches!(
            &plan.operations[0].operation,
            PatchOperation::InsertStyleScoped { css_rules, .. } if css_rules == TAP_TARGET_RULE
        ));
    }

    #[test]
    fn truncation_respects_word_boundaries() {
        assert_eq!(truncate_words("alpha beta gamma", 10), "alpha beta");
        assert_eq!(truncate_words("alpha beta", 10), "alpha beta");
        assert_eq!(truncate_words("abcdefghijkl", 5), "abcde");
    }

    #[test]
    fn alt_text_from_urls() {
        assert_eq!(
            alt_from_src("/img/red-running_shoe.v2.jpg?w=400").as_deref(),
            Some("Red running shoe v2")
        );
        assert_eq!(alt_from_src("/img/0042.png"), None);
        assert_eq!(alt_from_src(""), None);
    }
}
