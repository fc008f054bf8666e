//! Mutable document model.
//!
//! ```text
//!   source ──scraper::Html::parse_document──▶ Html (selectors, read-only)
//!                                              │ pre-order walk
//!                                              ▼
//!                                          Document (arena, mutable)
//!                                              │ serialize()
//!                                              ▼
//!                                        canonical HTML
//! ```
//!
//! Arena ids are assigned in pre-order during conversion, so right after
//! parsing an arena id equals the node's position in
//! `html.tree.root().descendants()`. Nodes created later are appended to the
//! arena; detached nodes stay allocated but unreachable.
//!
//! Every walk here uses an explicit stack.

use std::collections::HashMap;

use scraper::{ElementRef, Html};

use crate::error::PatchError;

pub type NodeId = usize;

/// Elements that never have an end tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

/// Elements whose text children are serialized verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "style", "script", "xmp", "iframe", "noembed", "noframes", "plaintext", "noscript",
];

/// Elements whose leading newline is swallowed by the parser.
const LEADING_NEWLINE_ELEMENTS: &[&str] = &["pre", "textarea", "listing"];

pub fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Document,
    Doctype {
        name: String,
    },
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena-backed HTML tree.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    /// Mirror a parsed `Html` tree node-for-node, in pre-order.
    pub fn from_html(html: &Html) -> Self {
        let mut nodes: Vec<Node> = Vec::new();
        let mut index = HashMap::new();

        for node in html.tree.root().descendants() {
            let data = match node.value() {
                scraper::Node::Document | scraper::Node::Fragment => NodeData::Document,
                scraper::Node::Doctype(doctype) => NodeData::Doctype {
                    name: doctype.name().to_string(),
                },
                scraper::Node::Comment(comment) => {
                    NodeData::Comment(comment.comment.to_string())
                }
                scraper::Node::Text(text) => NodeData::Text(text.text.to_string()),
                scraper::Node::Element(element) => NodeData::Element {
                    name: element.name().to_string(),
                    attrs: qualified_attrs(element),
                },
                // Not produced by the HTML parser; kept as a placeholder so
                // arena ids stay aligned with tree positions.
                scraper::Node::ProcessingInstruction(pi) => {
                    NodeData::Comment(format!("?{} {}", pi.target, pi.data))
                }
            };

            let id = nodes.len();
            let parent = node.parent().and_then(|p| index.get(&p.id()).copied());
            nodes.push(Node {
                data,
                parent,
                children: Vec::new(),
            });
            if let Some(p) = parent {
                nodes[p].children.push(id);
            }
            index.insert(node.id(), id);
        }

        if nodes.is_empty() {
            nodes.push(Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            });
        }

        Self { nodes }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(
            self.nodes.get(id).map(|n| &n.data),
            Some(NodeData::Element { .. })
        )
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id).map(|n| &n.data) {
            Some(NodeData::Element { name, .. }) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.nodes.get(id).map(|n| &n.data) {
            Some(NodeData::Text(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn html_element(&self) -> Option<NodeId> {
        self.element_children(self.root())
            .find(|c| self.tag(*c) == Some("html"))
    }

    pub fn head(&self) -> Option<NodeId> {
        let html = self.html_element()?;
        self.element_children(html)
            .find(|c| self.tag(*c) == Some("head"))
    }

    pub fn body(&self) -> Option<NodeId> {
        let html = self.html_element()?;
        self.element_children(html)
            .find(|c| self.tag(*c) == Some("body"))
    }

    /// All reachable nodes below `id` (inclusive), in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            out.push(n);
            for c in self.children(n).iter().rev() {
                stack.push(*c);
            }
        }
        out
    }

    /// Reachable elements in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .filter(|n| self.is_element(*n))
            .collect()
    }

    /// Whether `id` is still reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cur = id;
        while let Some(p) = self.parent(cur) {
            cur = p;
        }
        cur == self.root()
    }

    /// Element ancestors from the parent outward.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if self.is_element(p) {
                out.push(p);
            }
            cur = self.parent(p);
        }
        out
    }

    // ========================================================================
    // Attributes and text
    // ========================================================================

    pub fn attrs(&self, id: NodeId) -> &[(String, String)] {
        match self.nodes.get(id).map(|n| &n.data) {
            Some(NodeData::Element { attrs, .. }) => attrs.as_slice(),
            _ => &[],
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.attrs(id)
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, appending it if absent. Returns whether anything
    /// changed.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        let Some(NodeData::Element { attrs, .. }) = self.nodes.get_mut(id).map(|n| &mut n.data)
        else {
            return false;
        };
        match attrs.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some((_, v)) if v == value => false,
            Some((_, v)) => {
                *v = value.to_string();
                true
            }
            None => {
                attrs.push((name.to_ascii_lowercase(), value.to_string()));
                true
            }
        }
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for n in self.descendants(id) {
            if let NodeData::Text(t) = &self.nodes[n].data {
                out.push_str(t);
            }
        }
        out
    }

    /// Replace all children of `id` with a single text node (or none, for
    /// empty text). Returns whether anything changed.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> bool {
        if !self.is_element(id) {
            return false;
        }
        let current = self.children(id).to_vec();
        if text.is_empty() && current.is_empty() {
            return false;
        }
        if let [only] = current.as_slice() {
            if self.text(*only) == Some(text) {
                return false;
            }
        }
        for c in current {
            self.detach(c);
        }
        if !text.is_empty() {
            let t = self.create_text(text);
            self.append_child(id, t);
        }
        true
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    pub fn create_element(&mut self, name: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.push(NodeData::Element {
            name: name.to_ascii_lowercase(),
            attrs,
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    /// Insert `child` into `parent` immediately before `reference`. Falls back
    /// to appending when `reference` is not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        self.detach(child);
        self.nodes[child].parent = Some(parent);
        let siblings = &mut self.nodes[parent].children;
        match siblings.iter().position(|c| *c == reference) {
            Some(pos) => siblings.insert(pos, child),
            None => siblings.push(child),
        }
    }

    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id].parent.take() {
            self.nodes[parent].children.retain(|c| *c != id);
        }
    }

    /// Sibling immediately before `id`, if any.
    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let pos = siblings.iter().position(|c| *c == id)?;
        pos.checked_sub(1).map(|p| siblings[p])
    }

    // ========================================================================
    // Addressing
    // ========================================================================

    /// Lighthouse-style path: `index,TAG` pairs from the root element down,
    /// indices counted among element siblings.
    pub fn structural_path(&self, id: NodeId) -> String {
        let mut chain: Vec<NodeId> = self.ancestors(id);
        chain.reverse();
        if self.is_element(id) {
            chain.push(id);
        }

        let mut parts = Vec::with_capacity(chain.len() * 2);
        for n in chain {
            let index = match self.parent(n) {
                Some(p) if p == self.root() => self
                    .children(p)
                    .iter()
                    .take_while(|c| **c != n)
                    .filter(|c| !self.is_blank_text(**c))
                    .count(),
                Some(p) => self.element_children(p).take_while(|c| *c != n).count(),
                None => 0,
            };
            parts.push(index.to_string());
            parts.push(self.tag(n).unwrap_or("").to_ascii_uppercase());
        }
        parts.join(",")
    }

    /// Human-readable ancestor chain, e.g. `html > body > div#main > img.hero`.
    pub fn context_chain(&self, id: NodeId) -> String {
        let mut chain: Vec<NodeId> = self.ancestors(id);
        chain.reverse();
        chain.push(id);
        chain
            .into_iter()
            .map(|n| self.short_label(n))
            .collect::<Vec<_>>()
            .join(" > ")
    }

    /// `tag#id.class1.class2`
    pub fn short_label(&self, id: NodeId) -> String {
        let mut label = self.tag(id).unwrap_or("#text").to_string();
        if let Some(el_id) = self.attr(id, "id").filter(|v| !v.is_empty()) {
            label.push('#');
            label.push_str(el_id);
        }
        if let Some(class) = self.attr(id, "class") {
            for c in class.split_whitespace() {
                label.push('.');
                label.push_str(c);
            }
        }
        label
    }

    fn is_blank_text(&self, id: NodeId) -> bool {
        self.text(id).is_some_and(|t| t.trim().is_empty())
    }

    // ========================================================================
    // Serialization
    // ========================================================================

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for c in self.children(self.root()) {
            self.write_node(*c, &mut out);
        }
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        enum Step {
            Open(NodeId),
            Close(NodeId),
        }

        let mut stack = vec![Step::Open(id)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Close(n) => {
                    if let Some(name) = self.tag(n) {
                        out.push_str("</");
                        out.push_str(name);
                        out.push('>');
                    }
                }
                Step::Open(n) => match &self.nodes[n].data {
                    NodeData::Document => {
                        for c in self.children(n).iter().rev() {
                            stack.push(Step::Open(*c));
                        }
                    }
                    NodeData::Doctype { name } => {
                        out.push_str("<!DOCTYPE ");
                        out.push_str(name);
                        out.push('>');
                    }
                    NodeData::Comment(text) => {
                        out.push_str("<!--");
                        out.push_str(text);
                        out.push_str("-->");
                    }
                    NodeData::Text(text) => {
                        let raw = self
                            .parent(n)
                            .and_then(|p| self.tag(p))
                            .is_some_and(|t| RAW_TEXT_ELEMENTS.contains(&t));
                        if raw {
                            out.push_str(text);
                        } else {
                            escape_text(text, out);
                        }
                    }
                    NodeData::Element { name, attrs } => {
                        out.push('<');
                        out.push_str(name);
                        for (k, v) in attrs {
                            out.push(' ');
                            out.push_str(k);
                            out.push_str("=\"");
                            escape_attr(v, out);
                            out.push('"');
                        }
                        out.push('>');
                        if is_void(name) {
                            continue;
                        }
                        if LEADING_NEWLINE_ELEMENTS.contains(&name.as_str()) {
                            let first_text = self
                                .children(n)
                                .first()
                                .and_then(|c| self.text(*c));
                            if first_text.is_some_and(|t| t.starts_with('\n')) {
                                out.push('\n');
                            }
                        }
                        stack.push(Step::Close(n));
                        for c in self.children(n).iter().rev() {
                            stack.push(Step::Open(*c));
                        }
                    }
                },
            }
        }
    }
}

/// Attributes under their qualified names, so foreign attributes such as
/// `xlink:href` and `xmlns:xlink` keep their prefix through serialization.
pub(crate) fn qualified_attrs(element: &scraper::node::Element) -> Vec<(String, String)> {
    element
        .attrs
        .iter()
        .map(|(name, value)| {
            let key = match name.prefix.as_deref() {
                Some(prefix) => format!("{prefix}:{}", &*name.local),
                None => name.local.to_string(),
            };
            (key, value.to_string())
        })
        .collect()
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

// ============================================================================
// Parsed source page
// ============================================================================

/// A parsed input: the read-only `Html` used for selector matching plus its
/// mutable mirror.
pub struct SourcePage {
    pub html: Html,
    pub doc: Document,
}

impl std::fmt::Debug for SourcePage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourcePage")
            .field("nodes", &self.doc.len())
            .finish()
    }
}

impl SourcePage {
    /// Parse `source`, rejecting inputs that are not HTML at all or that
    /// exceed `max_bytes`.
    pub fn parse(source: &str, max_bytes: usize) -> Result<Self, PatchError> {
        if source.len() > max_bytes {
            return Err(PatchError::DocumentTooLarge {
                actual: source.len(),
                limit: max_bytes,
            });
        }
        if source.trim().is_empty() {
            return Err(PatchError::MalformedDocument("document is empty".into()));
        }
        if source.contains('\0') {
            return Err(PatchError::MalformedDocument(
                "document contains NUL bytes".into(),
            ));
        }
        if !source.contains('<') {
            return Err(PatchError::MalformedDocument(
                "document contains no markup".into(),
            ));
        }

        let html = Html::parse_document(source);
        let doc = Document::from_html(&html);
        if doc.html_element().is_none() {
            return Err(PatchError::MalformedDocument(
                "no root element after parsing".into(),
            ));
        }
        Ok(Self { html, doc })
    }

    /// Arena id of a selector match. Valid only against the unmodified
    /// `doc`, whose ids are pre-order positions.
    pub fn node_for(&self, element: ElementRef<'_>) -> Option<NodeId> {
        let target = element.id();
        self.html
            .tree
            .root()
            .descendants()
            .position(|n| n.id() == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<!DOCTYPE html><html lang=\"en\"><head><title>T</title></head>\
<body><div id=\"main\" class=\"a b\"><img src=\"x.png\"><p>Hi &amp; bye</p></div></body></html>";

    fn page() -> SourcePage {
        SourcePage::parse(PAGE, 1 << 20).expect("parse")
    }

    #[test]
    fn serialization_is_a_fixed_point() {
        let once = page().doc.serialize();
        let twice = SourcePage::parse(&once, 1 << 20)
            .expect("reparse")
            .doc
            .serialize();
        assert_eq!(once, twice);
        assert!(once.contains("<img src=\"x.png\"><p>Hi &amp; bye</p>"));
    }

    #[test]
    fn head_and_body_are_found() {
        let p = page();
        let head = p.doc.head().expect("head");
        let body = p.doc.body().expect("body");
        assert_eq!(p.doc.tag(head), Some("head"));
        assert_eq!(p.doc.tag(body), Some("body"));
    }

    #[test]
    fn selector_matches_map_to_arena_nodes() {
        let p = page();
        let sel = scraper::Selector::parse("img").expect("selector");
        let el = p.html.select(&sel).next().expect("img");
        let id = p.node_for(el).expect("node");
        assert_eq!(p.doc.tag(id), Some("img"));
        assert_eq!(p.doc.attr(id, "src"), Some("x.png"));
    }

    #[test]
    fn structural_path_uses_element_indices() {
        let p = page();
        let img = p
            .doc
            .elements()
            .into_iter()
            .find(|n| p.doc.tag(*n) == Some("img"))
            .expect("img");
        assert_eq!(p.doc.structural_path(img), "1,HTML,1,BODY,0,DIV,0,IMG");
        assert_eq!(p.doc.context_chain(img), "html > body > div#main.a.b > img");
    }

    #[test]
    fn set_attr_reports_changes() {
        let mut p = page();
        let img = p
            .doc
            .elements()
            .into_iter()
            .find(|n| p.doc.tag(*n) == Some("img"))
            .expect("img");
        assert!(p.doc.set_attr(img, "alt", "Logo"));
        assert!(!p.doc.set_attr(img, "alt", "Logo"));
        assert!(p.doc.outer_html(img).contains("alt=\"Logo\""));
    }

    #[test]
    fn raw_text_is_not_escaped() {
        let src = "<html><head><script>if (a < b && c) {}</script></head><body></body></html>";
        let p = SourcePage::parse(src, 1 << 20).expect("parse");
        assert!(p.doc.serialize().contains("<script>if (a < b && c) {}</script>"));
    }

    #[test]
    fn pre_leading_newline_survives_reparse() {
        let src = "<html><body><pre>\n\nx</pre></body></html>";
        let once = SourcePage::parse(src, 1 << 20).expect("parse").doc.serialize();
        let twice = SourcePage::parse(&once, 1 << 20)
            .expect("reparse")
            .doc
            .serialize();
        assert_eq!(once, twice);
    }

    #[test]
    fn foreign_attribute_prefixes_survive_serialization() {
        let src = "<html><body><svg xmlns:xlink=\"http://www.w3.org/1999/xlink\">\
<use xlink:href=\"#icon\"></use></svg></body></html>";
        let once = SourcePage::parse(src, 1 << 20).expect("parse").doc.serialize();
        assert!(
            once.contains("<svg xmlns:xlink=\"http://www.w3.org/1999/xlink\"><use xlink:href=\"#icon\">"),
            "{once}"
        );
        let twice = SourcePage::parse(&once, 1 << 20)
            .expect("reparse")
            .doc
            .serialize();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_non_documents() {
        assert!(matches!(
            SourcePage::parse("   ", 100),
            Err(PatchError::MalformedDocument(_))
        ));
        assert!(matches!(
            SourcePage::parse("plain text only", 100),
            Err(PatchError::MalformedDocument(_))
        ));
        assert!(matches!(
            SourcePage::parse("<p>\0</p>", 100),
            Err(PatchError::MalformedDocument(_))
        ));
        assert!(matches!(
            SourcePage::parse("<p>abc</p>", 4),
            Err(PatchError::DocumentTooLarge { actual: 10, limit: 4 })
        ));
    }
}
