//! Safety gate for generated CSS and attribute writes.
//!
//! Scoped style rules are parsed into `(property, value)` declarations and
//! checked against a fixed allow-list. Anything that could escape the rule
//! block, load a resource, or force priority is rejected.

use std::sync::OnceLock;

use regex::Regex;

/// Properties `insertStyleScoped` may set.
pub const ALLOWED_PROPERTIES: &[&str] = &[
    "font-size",
    "line-height",
    "letter-spacing",
    "word-spacing",
    "min-height",
    "min-width",
    "max-width",
    "width",
    "height",
    "gap",
    "padding",
    "padding-top",
    "padding-right",
    "padding-bottom",
    "padding-left",
    "margin",
    "margin-top",
    "margin-right",
    "margin-bottom",
    "margin-left",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CssRejection {
    #[error("no declarations")]
    Empty,
    #[error("malformed declaration {0:?}")]
    Malformed(String),
    #[error("property {0:?} is not allowed")]
    DisallowedProperty(String),
    #[error("priority modifier on {0:?} is not allowed")]
    ForcedPriority(String),
    #[error("value {value:?} for {property:?} is not allowed")]
    UnsafeValue { property: String, value: String },
    #[error("media guard {0:?} is not allowed")]
    UnsafeMedia(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

impl Declaration {
    pub fn render(&self) -> String {
        format!("{}: {};", self.property, self.value)
    }
}

// Patterns are compiled once. A pattern that failed to compile rejects
// everything.

fn value_charset() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9 .,%+\-#()]+$").ok())
        .as_ref()
}

fn media_guard_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let feature = r"\(\s*(?:min|max)-(?:width|height)\s*:\s*\d+(?:\.\d+)?(?:px|em|rem)\s*\)";
        let pattern = format!(
            r"^(?:(?:screen|print|all)\s+and\s+)?{feature}(?:\s+and\s+{feature})*$|^(?:screen|print|all)$"
        );
        Regex::new(&pattern).ok()
    })
    .as_ref()
}

const FORBIDDEN_FRAGMENTS: &[&str] = &["{", "}", "<", ">", "url(", "expression(", "@", "\\", "/*", ";"];

/// Parse and vet `css_rules` (`prop: value; prop: value`). Returns the
/// declarations with lowercased property names and trimmed values.
pub fn parse_declarations(css_rules: &str) -> Result<Vec<Declaration>, CssRejection> {
    let mut out = Vec::new();
    for raw in css_rules.split(';') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (prop, value) = raw
            .split_once(':')
            .ok_or_else(|| CssRejection::Malformed(raw.to_string()))?;
        let property = prop.trim().to_ascii_lowercase();
        let value = value.trim();

        if property.is_empty() || value.is_empty() {
            return Err(CssRejection::Malformed(raw.to_string()));
        }
        if value.to_ascii_lowercase().contains("!important") || value.contains('!') {
            return Err(CssRejection::ForcedPriority(property));
        }
        if !ALLOWED_PROPERTIES.contains(&property.as_str()) {
            return Err(CssRejection::DisallowedProperty(property));
        }
        let lowered = value.to_ascii_lowercase();
        if FORBIDDEN_FRAGMENTS.iter().any(|f| lowered.contains(f))
            || !value_charset().is_some_and(|re| re.is_match(value))
        {
            return Err(CssRejection::UnsafeValue {
                property,
                value: value.to_string(),
            });
        }
        out.push(Declaration {
            property,
            value: value.split_whitespace().collect::<Vec<_>>().join(" "),
        });
    }
    if out.is_empty() {
        return Err(CssRejection::Empty);
    }
    Ok(out)
}

/// Normalize and vet a media guard. Only width/height range queries are
/// accepted.
pub fn check_media_guard(guard: &str) -> Result<String, CssRejection> {
    let normalized = guard
        .trim()
        .trim_start_matches("@media")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    if normalized.is_empty() || !media_guard_re().is_some_and(|re| re.is_match(&normalized)) {
        return Err(CssRejection::UnsafeMedia(guard.to_string()));
    }
    Ok(normalized)
}

// ============================================================================
// Attribute gate
// ============================================================================

/// Why a `replaceAttr` was refused, or `None` when it is allowed.
pub fn attribute_rejection(tag: &str, attr_name: &str, attr_value: &str) -> Option<String> {
    let tag = tag.to_ascii_lowercase();
    if tag == "script" || tag == "style" {
        return Some(format!("<{tag}> elements are never modified"));
    }
    let name = attr_name.trim().to_ascii_lowercase();
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
    {
        return Some(format!("invalid attribute name {attr_name:?}"));
    }
    if name.starts_with("on") {
        return Some(format!("event handler attribute {name:?} is not allowed"));
    }
    if name == "style" || name == "srcdoc" {
        return Some(format!("attribute {name:?} is not allowed"));
    }
    if name.starts_with("data-seofix") {
        return Some(format!("attribute {name:?} is reserved"));
    }
    if matches!(name.as_str(), "href" | "xlink:href" | "src" | "action" | "formaction")
        && is_script_url(attr_value)
    {
        return Some(format!("script URL in {name:?}"));
    }
    None
}

/// `javascript:` (or `vbscript:`) URLs, ignoring case and embedded whitespace.
pub fn is_script_url(value: &str) -> bool {
    let compact: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    compact.starts_with("javascript:") || compact.starts_with("vbscript:")
}
