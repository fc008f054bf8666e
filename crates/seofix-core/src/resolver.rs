//! NodeRef resolution.
//!
//! Resolution is an ordered chain of independent strategies. Each one either
//! produces an [`Anchor`] or misses; the chain stops at the first hit and
//! never blends scores across strategies.
//!
//! ```text
//!   selector ──miss──▶ path ──miss──▶ snippet + fingerprint ──miss──▶ Unresolvable
//!   1.0 / 0.85         0.6 ..= 0.8    0.0 ..= 0.55
//! ```
//!
//! The confidence bands do not overlap, so a target found by an earlier
//! strategy always carries at least the confidence it would have had from a
//! later one.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::digest::fnv1a64_digest_bytes;
use crate::dom::{normalize_whitespace, qualified_attrs, Document, NodeData, NodeId, SourcePage};
use crate::model::{Fingerprint, NodeRef, MARK_ATTR, SCOPE_ATTR};

// ============================================================================
// Confidence bands
// ============================================================================

pub const SELECTOR_CONFIDENCE: f32 = 1.0;
/// Subtracted when a selector matches more than one node.
pub const AMBIGUITY_PENALTY: f32 = 0.15;

pub const PATH_BASE_CONFIDENCE: f32 = 0.8;
pub const PATH_STEP_PENALTY: f32 = 0.01;
pub const PATH_WRAPPER_PENALTY: f32 = 0.05;
pub const PATH_MIN_CONFIDENCE: f32 = 0.6;

/// Snippet similarity in `[0, 1]` is scaled into `[0, SNIPPET_BAND]`.
pub const SNIPPET_BAND: f32 = 0.55;

/// Siblings examined past a path index for parser-inserted wrappers.
const PATH_WRAPPER_LOOKAHEAD: usize = 3;

const OUTER_HTML_LIMIT: usize = 512;
const TEXT_SAMPLE_LIMIT: usize = 256;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    Selector,
    Path,
    Snippet,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::Selector => "selector",
            StrategyKind::Path => "path",
            StrategyKind::Snippet => "snippet",
        })
    }
}

/// A concrete node a reference resolved to.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub node: NodeId,
    pub strategy: StrategyKind,
    pub confidence: f32,
    /// More than one candidate scored best; the first in document order won.
    pub ambiguous: bool,
    pub candidates: usize,
}

/// Outcome of one strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Hit(Anchor),
    Miss { best_confidence: Option<f32> },
    /// The reference carries nothing this strategy can use.
    Skip,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("invalid node reference: {0}")]
    InvalidRef(String),
    #[error("no anchor found")]
    Unresolvable { best_confidence: Option<f32> },
}

/// Work bounds for a single resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolveLimits {
    pub max_path_depth: usize,
    pub max_snippet_candidates: usize,
}

impl Default for ResolveLimits {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for ResolveLimits {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_path_depth: config.max_path_depth,
            max_snippet_candidates: config.max_snippet_candidates,
        }
    }
}

pub trait ResolveStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;
    fn attempt(&self, page: &SourcePage, target: &NodeRef, limits: &ResolveLimits) -> Attempt;
}

/// Reject references a producer should never have emitted.
pub fn validate_ref(target: &NodeRef) -> Result<(), ResolveError> {
    if !target.has_locator() {
        return Err(ResolveError::InvalidRef(
            "reference has no selector, path, snippet or fingerprint".into(),
        ));
    }
    let fields = [
        ("selector", target.selector.as_deref()),
        ("path", target.path.as_deref()),
        ("snippet", target.snippet.as_deref()),
    ];
    for (name, value) in fields {
        if value.is_some_and(|v| v.trim().is_empty()) {
            return Err(ResolveError::InvalidRef(format!("empty {name}")));
        }
    }
    Ok(())
}

// ============================================================================
// Chain
// ============================================================================

pub struct Resolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
    limits: ResolveLimits,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.kind()).collect::<Vec<_>>(),
            )
            .field("limits", &self.limits)
            .finish()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolveLimits::default())
    }
}

impl Resolver {
    /// The standard selector → path → snippet chain.
    pub fn new(limits: ResolveLimits) -> Self {
        Self {
            strategies: vec![
                Box::new(SelectorStrategy),
                Box::new(PathStrategy),
                Box::new(SnippetStrategy),
            ],
            limits,
        }
    }

    /// A chain with caller-chosen strategies, tried in the given order.
    pub fn with_strategies(strategies: Vec<Box<dyn ResolveStrategy>>, limits: ResolveLimits) -> Self {
        Self { strategies, limits }
    }

    pub fn limits(&self) -> &ResolveLimits {
        &self.limits
    }

    pub fn resolve(&self, page: &SourcePage, target: &NodeRef) -> Result<Anchor, ResolveError> {
        validate_ref(target)?;

        let mut best: Option<f32> = None;
        for strategy in &self.strategies {
            match strategy.attempt(page, target, &self.limits) {
                Attempt::Hit(anchor) => {
                    tracing::debug!(
                        strategy = %anchor.strategy,
                        confidence = anchor.confidence,
                        candidates = anchor.candidates,
                        "resolved node reference"
                    );
                    return Ok(anchor);
                }
                Attempt::Miss { best_confidence } => {
                    tracing::debug!(strategy = %strategy.kind(), "strategy missed");
                    best = match (best, best_confidence) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        (a, b) => a.or(b),
                    };
                }
                Attempt::Skip => {}
            }
        }
        Err(ResolveError::Unresolvable {
            best_confidence: best,
        })
    }
}

/// Copy the resolution details into `target`.
pub fn annotate(doc: &Document, target: &mut NodeRef, anchor: &Anchor) {
    target.confidence = anchor.confidence;
    target.resolved_outer_html = Some(truncate_chars(&doc.outer_html(anchor.node), OUTER_HTML_LIMIT));
    target.resolved_context = Some(doc.context_chain(anchor.node));
    if anchor.strategy == StrategyKind::Snippet && target.fingerprint.is_none() {
        target.fingerprint = Some(fingerprint(doc, anchor.node));
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// ============================================================================
// Selector
// ============================================================================

pub struct SelectorStrategy;

impl ResolveStrategy for SelectorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Selector
    }

    fn attempt(&self, page: &SourcePage, target: &NodeRef, _limits: &ResolveLimits) -> Attempt {
        let Some(raw) = target.selector.as_deref() else {
            return Attempt::Skip;
        };
        let selector = match Selector::parse(raw.trim()) {
            Ok(s) => s,
            Err(err) => {
                tracing::debug!(selector = raw, error = %err, "unparsable selector");
                return Attempt::Miss {
                    best_confidence: None,
                };
            }
        };

        let mut matches = page.html.select(&selector);
        let Some(first) = matches.next() else {
            return Attempt::Miss {
                best_confidence: None,
            };
        };
        let count = 1 + matches.count();
        let Some(node) = page.node_for(first) else {
            return Attempt::Miss {
                best_confidence: None,
            };
        };

        let ambiguous = count > 1;
        if ambiguous {
            tracing::warn!(
                selector = raw,
                matches = count,
                "selector is ambiguous, using first match in document order"
            );
        }
        Attempt::Hit(Anchor {
            node,
            strategy: StrategyKind::Selector,
            confidence: if ambiguous {
                SELECTOR_CONFIDENCE - AMBIGUITY_PENALTY
            } else {
                SELECTOR_CONFIDENCE
            },
            ambiguous,
            candidates: count,
        })
    }
}

// ============================================================================
// Structural path
// ============================================================================

pub struct PathStrategy;

/// Confidence for a path of `steps` pairs.
pub fn path_confidence(steps: usize, used_wrapper: bool) -> f32 {
    let mut c = PATH_BASE_CONFIDENCE - PATH_STEP_PENALTY * steps as f32;
    if used_wrapper {
        c -= PATH_WRAPPER_PENALTY;
    }
    c.max(PATH_MIN_CONFIDENCE)
}

fn parse_path(raw: &str) -> Option<Vec<(usize, String)>> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.is_empty() || parts.len() % 2 != 0 {
        return None;
    }
    parts
        .chunks(2)
        .map(|pair| {
            let index = pair[0].parse::<usize>().ok()?;
            let tag = pair[1].to_ascii_lowercase();
            (!tag.is_empty()).then_some((index, tag))
        })
        .collect()
}

impl ResolveStrategy for PathStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Path
    }

    fn attempt(&self, page: &SourcePage, target: &NodeRef, limits: &ResolveLimits) -> Attempt {
        let Some(raw) = target.path.as_deref() else {
            return Attempt::Skip;
        };
        let miss = Attempt::Miss {
            best_confidence: None,
        };
        let Some(steps) = parse_path(raw) else {
            tracing::debug!(path = raw, "unparsable structural path");
            return miss;
        };
        if steps.len() > limits.max_path_depth {
            tracing::debug!(path_len = steps.len(), "structural path exceeds depth limit");
            return miss;
        }

        let doc = &page.doc;
        // The first pair names the root element; its index is not meaningful
        // outside the browser that recorded it.
        let (_, root_tag) = &steps[0];
        let mut node = match doc.html_element() {
            Some(html) if doc.tag(html) == Some(root_tag.as_str()) => html,
            _ => match doc
                .elements()
                .into_iter()
                .find(|n| doc.tag(*n) == Some(root_tag.as_str()))
            {
                Some(n) => n,
                None => return miss,
            },
        };

        let mut used_wrapper = false;
        for (index, tag) in &steps[1..] {
            let kids: Vec<NodeId> = doc.element_children(node).collect();
            if *index >= kids.len() {
                return miss;
            }
            if doc.tag(kids[*index]) == Some(tag.as_str()) {
                node = kids[*index];
                continue;
            }
            let end = (*index + PATH_WRAPPER_LOOKAHEAD).min(kids.len());
            match kids[*index..end]
                .iter()
                .find(|k| doc.tag(**k) == Some(tag.as_str()))
            {
                Some(k) => {
                    node = *k;
                    used_wrapper = true;
                }
                None => return miss,
            }
        }

        Attempt::Hit(Anchor {
            node,
            strategy: StrategyKind::Path,
            confidence: path_confidence(steps.len(), used_wrapper),
            ambiguous: false,
            candidates: 1,
        })
    }
}

// ============================================================================
// Snippet + fingerprint
// ============================================================================

pub struct SnippetStrategy;

fn snippet_tag_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*<\s*([A-Za-z][A-Za-z0-9-]*)").ok())
        .as_ref()
}

/// What a snippet tells us about its element.
#[derive(Debug, Clone, PartialEq)]
struct SnippetProfile {
    tag: String,
    tokens: BTreeSet<String>,
    segment: String,
    text: String,
}

fn profile_snippet(snippet: &str) -> Option<SnippetProfile> {
    let normalized = normalize_whitespace(snippet);
    let tag = snippet_tag_re()?
        .captures(&normalized)?
        .get(1)?
        .as_str()
        .to_ascii_lowercase();

    let fragment = Html::parse_fragment(&normalized);
    let element = fragment
        .tree
        .root()
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == tag);

    let (attrs, text): (Vec<(String, String)>, String) = match element {
        Some(el) => (
            qualified_attrs(el.value()),
            el.text().collect::<String>(),
        ),
        None => (Vec::new(), String::new()),
    };

    let text = normalize_whitespace(&text);
    let tokens = token_set(&attrs, &text);
    let segment = segment_for(&tag, attrs.iter().find(|(k, _)| k == "class").map(|(_, v)| v.as_str()));
    Some(SnippetProfile {
        tag,
        tokens,
        segment,
        text,
    })
}

fn token_set(attrs: &[(String, String)], text: &str) -> BTreeSet<String> {
    let mut tokens = BTreeSet::new();
    for (name, value) in attrs {
        let name = name.to_ascii_lowercase();
        if name == MARK_ATTR || name == SCOPE_ATTR {
            continue;
        }
        if name == "class" {
            for class in value.split_whitespace() {
                tokens.insert(format!(".{class}"));
            }
        } else {
            tokens.insert(format!("@{name}={}", normalize_whitespace(value)));
        }
    }
    let sample: String = text.chars().take(TEXT_SAMPLE_LIMIT).collect();
    for word in sample.split(|c: char| !c.is_alphanumeric()) {
        if word.chars().count() >= 2 {
            tokens.insert(word.to_lowercase());
        }
    }
    tokens
}

/// `tag.class1.class2` with classes sorted.
fn segment_for(tag: &str, class: Option<&str>) -> String {
    let mut classes: Vec<&str> = class.map(|c| c.split_whitespace().collect()).unwrap_or_default();
    classes.sort_unstable();
    let mut out = tag.to_string();
    for c in classes {
        out.push('.');
        out.push_str(c);
    }
    out
}

fn node_segment(doc: &Document, id: NodeId) -> String {
    segment_for(doc.tag(id).unwrap_or(""), doc.attr(id, "class"))
}

/// Whitespace-collapsed text prefix. Leading and trailing runs are kept as
/// one space each so that pieces can be joined and trimmed later.
#[derive(Debug, Clone, Default)]
struct Collapsed {
    text: String,
    chars: usize,
}

impl Collapsed {
    /// One char of slack for a leading space, one for a trailing one.
    const CAP: usize = TEXT_SAMPLE_LIMIT + 2;

    fn is_full(&self) -> bool {
        self.chars >= Self::CAP
    }

    fn push_str(&mut self, piece: &str) {
        for ch in piece.chars() {
            if self.is_full() {
                return;
            }
            if ch.is_whitespace() {
                if self.text.ends_with(' ') {
                    continue;
                }
                self.text.push(' ');
            } else {
                self.text.push(ch);
            }
            self.chars += 1;
        }
    }

    fn sample(&self) -> String {
        normalize_whitespace(&self.text)
            .chars()
            .take(TEXT_SAMPLE_LIMIT)
            .collect()
    }
}

/// Bounded text samples for a set of nodes, computed in one bottom-up pass
/// over the subtree at `root`. Every node is visited once and each sample is
/// capped, so the pass is linear in the subtree size. Samples of nodes
/// outside `keep` are dropped once their parent has consumed them.
struct TextSamples {
    samples: Vec<Option<Collapsed>>,
}

impl TextSamples {
    fn build(doc: &Document, root: NodeId, keep: &HashSet<NodeId>) -> Self {
        let mut samples: Vec<Option<Collapsed>> = vec![None; doc.len()];
        for id in doc.descendants(root).into_iter().rev() {
            let mut own = Collapsed::default();
            match doc.data(id) {
                NodeData::Text(t) => own.push_str(t),
                NodeData::Element { .. } | NodeData::Document => {
                    for child in doc.children(id) {
                        if !own.is_full() {
                            if let Some(c) = &samples[*child] {
                                own.push_str(&c.text);
                            }
                        }
                        if !keep.contains(child) {
                            samples[*child] = None;
                        }
                    }
                }
                NodeData::Doctype { .. } | NodeData::Comment(_) => {}
            }
            samples[id] = Some(own);
        }
        Self { samples }
    }

    fn get(&self, id: NodeId) -> String {
        self.samples
            .get(id)
            .and_then(Option::as_ref)
            .map(Collapsed::sample)
            .unwrap_or_default()
    }
}

/// The element and up to two element ancestors, outermost first.
fn segment_chain(doc: &Document, id: NodeId) -> String {
    let mut chain = vec![node_segment(doc, id)];
    let mut cur = doc.parent(id);
    while let Some(p) = cur {
        if chain.len() == 3 {
            break;
        }
        if doc.is_element(p) {
            chain.push(node_segment(doc, p));
        }
        cur = doc.parent(p);
    }
    chain.reverse();
    chain.join(" > ")
}

fn fingerprint_from(doc: &Document, id: NodeId, samples: &TextSamples) -> Fingerprint {
    let context = doc.parent(id).unwrap_or(id);
    Fingerprint {
        chain: segment_chain(doc, id),
        text_hash: fnv1a64_digest_bytes(samples.get(context).as_bytes()),
    }
}

/// Tag/class chain of the node and up to two ancestors, plus a hash of its
/// parent's text.
pub fn fingerprint(doc: &Document, id: NodeId) -> Fingerprint {
    let context = doc.parent(id).unwrap_or(id);
    let samples = TextSamples::build(doc, context, &HashSet::from([context]));
    fingerprint_from(doc, id, &samples)
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / union as f32
}

fn containment(needle: &BTreeSet<String>, hay: &BTreeSet<String>) -> f32 {
    if needle.is_empty() {
        return 0.0;
    }
    needle.intersection(hay).count() as f32 / needle.len() as f32
}

fn indicator(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Similarity of a candidate to the reference, in `[0, 1]`.
///
/// With a snippet: `0.7·containment + 0.1·jaccard + 0.1·signature + 0.1·text`,
/// where signature and text compare against the fingerprint when one is
/// given and against the snippet otherwise. Fingerprint only:
/// `0.5·chain + 0.5·text_hash`.
fn similarity(
    doc: &Document,
    samples: &TextSamples,
    candidate: NodeId,
    profile: Option<&SnippetProfile>,
    fp: Option<&Fingerprint>,
) -> f32 {
    let cand_fp = fp.map(|_| fingerprint_from(doc, candidate, samples));
    let fp_match = |f: &Fingerprint| {
        cand_fp.as_ref().map_or((0.0, 0.0), |c| {
            (indicator(c.chain == f.chain), indicator(c.text_hash == f.text_hash))
        })
    };

    match profile {
        Some(p) => {
            let text = samples.get(candidate);
            let tokens = token_set(doc.attrs(candidate), &text);
            let (sig, txt) = match fp {
                Some(f) => fp_match(f),
                None => (
                    indicator(node_segment(doc, candidate) == p.segment),
                    indicator(p.text.is_empty() || text.contains(p.text.as_str())),
                ),
            };
            let score = 0.7 * containment(&p.tokens, &tokens)
                + 0.1 * jaccard(&p.tokens, &tokens)
                + 0.1 * sig
                + 0.1 * txt;
            score.clamp(0.0, 1.0)
        }
        None => match fp {
            Some(f) => {
                let (chain, txt) = fp_match(f);
                (0.5 * chain + 0.5 * txt).clamp(0.0, 1.0)
            }
            None => 0.0,
        },
    }
}

impl ResolveStrategy for SnippetStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Snippet
    }

    fn attempt(&self, page: &SourcePage, target: &NodeRef, limits: &ResolveLimits) -> Attempt {
        if target.snippet.is_none() && target.fingerprint.is_none() {
            return Attempt::Skip;
        }
        let miss = Attempt::Miss {
            best_confidence: None,
        };

        let profile = target.snippet.as_deref().and_then(profile_snippet);
        let fp = target.fingerprint.as_ref();
        let tag = match (&profile, fp) {
            (Some(p), _) => p.tag.clone(),
            (None, Some(f)) => match f
                .chain
                .rsplit(" > ")
                .next()
                .and_then(|seg| seg.split('.').next())
            {
                Some(t) if !t.is_empty() => t.to_string(),
                _ => return miss,
            },
            (None, None) => return miss,
        };

        let doc = &page.doc;
        let mut candidates: Vec<NodeId> = Vec::new();
        for node in doc.elements() {
            if doc.tag(node) != Some(tag.as_str()) {
                continue;
            }
            if candidates.len() >= limits.max_snippet_candidates {
                tracing::debug!(limit = limits.max_snippet_candidates, "snippet scan truncated");
                break;
            }
            candidates.push(node);
        }
        if candidates.is_empty() {
            return miss;
        }
        let keep: HashSet<NodeId> = candidates
            .iter()
            .flat_map(|n| std::iter::once(*n).chain(doc.parent(*n)))
            .collect();
        let samples = TextSamples::build(doc, doc.root(), &keep);

        let examined = candidates.len();
        let mut best: Option<(NodeId, f32)> = None;
        let mut ties = 0usize;
        for node in candidates {
            let score = similarity(doc, &samples, node, profile.as_ref(), fp);
            match best {
                Some((_, s)) if score > s => {
                    best = Some((node, score));
                    ties = 1;
                }
                Some((_, s)) if score == s => ties += 1,
                Some(_) => {}
                None => {
                    best = Some((node, score));
                    ties = 1;
                }
            }
        }

        match best {
            Some((node, score)) if score > 0.0 => {
                let ambiguous = ties > 1;
                if ambiguous {
                    tracing::warn!(
                        tag = %tag,
                        ties,
                        "snippet candidates tied, using first in document order"
                    );
                }
                Attempt::Hit(Anchor {
                    node,
                    strategy: StrategyKind::Snippet,
                    confidence: SNIPPET_BAND * score,
                    ambiguous,
                    candidates: examined,
                })
            }
            _ => miss,
        }
    }
}
