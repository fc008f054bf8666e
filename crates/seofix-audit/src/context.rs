//! Page context for the text-generation collaborator.

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

/// Characters of main text kept in the context.
pub const TEXT_LIMIT: usize = 3000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub titles: Vec<String>,
    pub meta_descriptions: Vec<String>,
    pub headings: Vec<String>,
    /// Text of `<main>` (or `<body>`), truncated to [`TEXT_LIMIT`].
    pub text: String,
}

impl PageContext {
    /// Prompt-ready block, one field per line.
    pub fn render(&self) -> String {
        format!(
            "ALL_TITLES: {}\nALL_META_DESCRIPTIONS: {}\nALL_HEADINGS: {}\nALL_PAGE_TEXT: {}\n",
            self.titles.join(" | "),
            self.meta_descriptions.join(" | "),
            self.headings.join(" | "),
            self.text
        )
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn all_text(html: &Html, css: &str) -> Vec<String> {
    match selector(css) {
        Some(sel) => html.select(&sel).map(element_text).collect(),
        None => Vec::new(),
    }
}

pub fn page_context(source: &str) -> PageContext {
    let html = Html::parse_document(source);

    let meta_descriptions = match selector("meta[name]") {
        Some(sel) => html
            .select(&sel)
            .filter(|m| {
                m.value()
                    .attr("name")
                    .is_some_and(|n| n.trim().eq_ignore_ascii_case("description"))
            })
            .filter_map(|m| m.value().attr("content"))
            .map(|c| c.trim().to_string())
            .collect(),
        None => Vec::new(),
    };

    let main = ["main", "body"]
        .iter()
        .filter_map(|css| selector(css))
        .find_map(|sel| html.select(&sel).next());
    let text = main.map(element_text).unwrap_or_default();
    let text = match text.char_indices().nth(TEXT_LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    };

    PageContext {
        titles: all_text(&html, "title"),
        meta_descriptions,
        headings: all_text(&html, "h1, h2, h3, h4, h5, h6"),
        text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_every_title_description_and_heading() {
        let ctx = page_context(
            "<html><head><title>A</title><title>B</title>\
<meta name=\"description\" content=\" First \"><meta name=\"Description\" content=\"Second\">\
</head><body><nav>Menu</nav><main><h1>Big</h1><h2>Small  print</h2><p>Body text</p></main></body></html>",
        );
        assert_eq!(ctx.titles, vec!["A", "B"]);
        assert_eq!(ctx.meta_descriptions, vec!["First", "Second"]);
        assert_eq!(ctx.headings, vec!["Big", "Small print"]);
        assert_eq!(ctx.text, "Big Small print Body text");
        assert!(ctx.render().contains("ALL_TITLES: A | B\n"));
    }

    #[test]
    fn long_text_is_truncated() {
        let body = "word ".repeat(1000);
        let ctx = page_context(&format!("<html><body><p>{body}</p></body></html>"));
        assert_eq!(ctx.text.chars().count(), TEXT_LIMIT + 3);
        assert!(ctx.text.ends_with("..."));
    }
}
