//! Structural re-verification of audit findings against the modified
//! document.
//!
//! Each known audit id maps to a direct check on the parsed output. Anything
//! that cannot be decided structurally (content relevance, performance,
//! rendering) is reported as unverifiable rather than guessed.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::css::is_script_url;
use crate::model::Issue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Unverifiable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub audit_id: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickCheckReport {
    pub results: Vec<CheckResult>,
    pub passed: usize,
    pub failed: usize,
    pub unverifiable: usize,
}

impl QuickCheckReport {
    pub fn status_of(&self, audit_id: &str) -> Option<CheckStatus> {
        self.results
            .iter()
            .find(|r| r.audit_id == audit_id)
            .map(|r| r.status)
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

type Check = Result<(), String>;

/// Check every issue against `modified_html`, in issue order.
pub fn quick_check(modified_html: &str, issues: &[Issue]) -> QuickCheckReport {
    let html = Html::parse_document(modified_html);
    let mut report = QuickCheckReport::default();

    for issue in issues {
        let outcome: Option<Check> = match issue.audit_id.as_str() {
            "document-title" => Some(check_title(&html)),
            "meta-description" => Some(check_meta_description(&html)),
            "is-crawlable" => Some(check_crawlable(&html)),
            "canonical" => Some(check_canonical(&html)),
            "hreflang" => Some(check_hreflang(&html)),
            "image-alt" => Some(check_image_alt(&html)),
            "viewport" => Some(check_viewport(&html)),
            "crawlable-anchors" => Some(check_anchors(&html)),
            "html-has-lang" => Some(check_lang(&html)),
            _ => None,
        };
        let (status, detail) = match outcome {
            Some(Ok(())) => (CheckStatus::Pass, "resolved".to_string()),
            Some(Err(why)) => (CheckStatus::Fail, why),
            None => (
                CheckStatus::Unverifiable,
                "not structurally checkable".to_string(),
            ),
        };
        match status {
            CheckStatus::Pass => report.passed += 1,
            CheckStatus::Fail => report.failed += 1,
            CheckStatus::Unverifiable => report.unverifiable += 1,
        }
        report.results.push(CheckResult {
            audit_id: issue.audit_id.clone(),
            status,
            detail,
        });
    }

    tracing::info!(
        passed = report.passed,
        failed = report.failed,
        unverifiable = report.unverifiable,
        "quick-check complete"
    );
    report
}

fn select<'a>(html: &'a Html, css: &str) -> Result<Vec<ElementRef<'a>>, String> {
    let selector = Selector::parse(css).map_err(|err| format!("selector {css:?}: {err}"))?;
    Ok(html.select(&selector).collect())
}

fn attr<'a>(el: &ElementRef<'a>, name: &str) -> Option<&'a str> {
    el.value().attr(name)
}

fn non_empty(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

fn metas_named<'a>(html: &'a Html, name: &str) -> Result<Vec<ElementRef<'a>>, String> {
    Ok(select(html, "meta[name]")?
        .into_iter()
        .filter(|m| attr(m, "name").is_some_and(|n| n.trim().eq_ignore_ascii_case(name)))
        .collect())
}

fn links_with_rel<'a>(html: &'a Html, rel: &str) -> Result<Vec<ElementRef<'a>>, String> {
    Ok(select(html, "link[rel]")?
        .into_iter()
        .filter(|l| {
            attr(l, "rel").is_some_and(|r| r.split_whitespace().any(|t| t.eq_ignore_ascii_case(rel)))
        })
        .collect())
}

fn is_absolute_http(href: &str) -> bool {
    url::Url::parse(href.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

fn check_title(html: &Html) -> Check {
    let titles = select(html, "head > title")?;
    match titles.as_slice() {
        [] => Err("no <title> element".into()),
        [one] if one.text().collect::<String>().trim().is_empty() => Err("<title> is empty".into()),
        [_] => Ok(()),
        many => Err(format!("{} <title> elements", many.len())),
    }
}

fn check_meta_description(html: &Html) -> Check {
    let metas = metas_named(html, "description")?;
    match metas.as_slice() {
        [] => Err("no meta description".into()),
        [one] if !non_empty(attr(one, "content")) => Err("meta description is empty".into()),
        [_] => Ok(()),
        many => Err(format!("{} meta descriptions", many.len())),
    }
}

fn check_crawlable(html: &Html) -> Check {
    for name in ["robots", "googlebot"] {
        for meta in metas_named(html, name)? {
            let content = attr(&meta, "content").unwrap_or("").to_ascii_lowercase();
            let blocked = content
                .split(',')
                .map(str::trim)
                .any(|d| d == "noindex" || d == "none");
            if blocked {
                return Err(format!("meta {name} blocks indexing"));
            }
        }
    }
    Ok(())
}

fn check_canonical(html: &Html) -> Check {
    let links = links_with_rel(html, "canonical")?;
    match links.as_slice() {
        [] => Err("no canonical link".into()),
        [one] => match attr(one, "href") {
            Some(href) if is_absolute_http(href) => Ok(()),
            Some(href) => Err(format!("canonical href {href:?} is not an absolute URL")),
            None => Err("canonical link has no href".into()),
        },
        many => Err(format!("{} canonical links", many.len())),
    }
}

fn hreflang_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(x-default|[a-z]{2,3}(-[a-z0-9]{2,8})*)$").ok())
        .as_ref()
}

fn check_hreflang(html: &Html) -> Check {
    let mut seen = BTreeSet::new();
    for link in links_with_rel(html, "alternate")? {
        let Some(lang) = attr(&link, "hreflang") else {
            continue;
        };
        let lang = lang.trim();
        if !hreflang_re().is_some_and(|re| re.is_match(lang)) {
            return Err(format!("invalid hreflang {lang:?}"));
        }
        if !seen.insert(lang.to_ascii_lowercase()) {
            return Err(format!("duplicate hreflang {lang:?}"));
        }
        match attr(&link, "href") {
            Some(href) if is_absolute_http(href) => {}
            _ => return Err(format!("hreflang {lang:?} lacks an absolute href")),
        }
    }
    Ok(())
}

fn check_image_alt(html: &Html) -> Check {
    let missing = select(html, "img")?
        .iter()
        .filter(|img| !non_empty(attr(img, "alt")))
        .count();
    if missing == 0 {
        Ok(())
    } else {
        Err(format!("{missing} image(s) without alt text"))
    }
}

fn check_viewport(html: &Html) -> Check {
    let metas = metas_named(html, "viewport")?;
    let ok = metas.iter().any(|m| {
        let content = attr(m, "content").unwrap_or("").to_ascii_lowercase();
        content.contains("width=") || content.contains("initial-scale")
    });
    if ok {
        Ok(())
    } else {
        Err("no usable viewport meta".into())
    }
}

fn check_anchors(html: &Html) -> Check {
    let bad = select(html, "a")?
        .iter()
        .filter(|a| match attr(a, "href") {
            Some(href) => is_script_url(href),
            None => attr(a, "onclick").is_some(),
        })
        .count();
    if bad == 0 {
        Ok(())
    } else {
        Err(format!("{bad} anchor(s) are not crawlable"))
    }
}

fn check_lang(html: &Html) -> Check {
    let roots = select(html, "html")?;
    if roots.first().is_some_and(|r| non_empty(attr(r, "lang"))) {
        Ok(())
    } else {
        Err("<html> has no lang".into())
    }
}
