//! Property-based tests for the apply pipeline.
//!
//! Documents and plans are drawn from a small grammar that exercises head
//! singletons (including pre-existing duplicates and copies the parser left
//! in the body), located body edits and scoped styles.

use proptest::prelude::*;

use seofix_core::resolver::SNIPPET_BAND;
use seofix_core::{
    apply_diff, normalize, NodeRef, PatchOp, PatchOperation, PatchPlan, Pipeline,
    PipelineConfig, Resolver, SourcePage, StrategyKind,
};

// ============================================================================
// Generators
// ============================================================================

#[derive(Debug, Clone)]
enum Block {
    Para(String),
    Image,
    Link,
}

fn word() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "shop", "garden", "tools", "fresh", "local", "summer", "price", "news",
    ])
    .prop_map(str::to_string)
}

fn phrase() -> impl Strategy<Value = String> {
    prop::collection::vec(word(), 1..5).prop_map(|w| w.join(" "))
}

fn block() -> impl Strategy<Value = Block> {
    prop_oneof![
        phrase().prop_map(Block::Para),
        Just(Block::Image),
        Just(Block::Link),
    ]
}

#[derive(Debug, Clone)]
struct PageShape {
    titles: Vec<String>,
    descriptions: Vec<String>,
    og_titles: Vec<String>,
    /// `hreflang` values of alternate links, repeats allowed.
    alternates: Vec<&'static str>,
    stray_description: bool,
    blocks: Vec<Block>,
}

impl PageShape {
    fn render(&self) -> String {
        let mut head = String::from("  <meta charset=\"utf-8\">\n");
        for t in &self.titles {
            head.push_str(&format!("  <title>{t}</title>\n"));
        }
        for d in &self.descriptions {
            head.push_str(&format!("  <meta name=\"description\" content=\"{d}\">\n"));
        }
        for t in &self.og_titles {
            head.push_str(&format!("  <meta property=\"og:title\" content=\"{t}\">\n"));
        }
        for lang in &self.alternates {
            head.push_str(&format!(
                "  <link rel=\"alternate\" hreflang=\"{lang}\" href=\"https://example.com/{lang}/\">\n"
            ));
        }
        let mut body = String::new();
        if self.stray_description {
            body.push_str("  <meta name=\"description\" content=\"stray\">\n");
        }
        for (i, b) in self.blocks.iter().enumerate() {
            body.push_str(&match b {
                Block::Para(text) => format!("  <p class=\"note\">{text}</p>\n"),
                Block::Image => format!("  <img src=\"/img/{i}.png\">\n"),
                Block::Link => format!("  <div><a href=\"/page/{i}\">more</a></div>\n"),
            });
        }
        format!("<!DOCTYPE html>\n<html>\n<head>\n{head}</head>\n<body>\n{body}</body>\n</html>\n")
    }

    fn image_indices(&self) -> Vec<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| matches!(b, Block::Image))
            .map(|(i, _)| i)
            .collect()
    }
}

fn page_shape() -> impl Strategy<Value = PageShape> {
    (
        prop::collection::vec(phrase(), 0..3),
        prop::collection::vec(phrase(), 0..3),
        prop::collection::vec(phrase(), 0..3),
        prop::collection::vec(prop::sample::select(vec!["de", "fr"]), 0..4),
        any::<bool>(),
        prop::collection::vec(block(), 1..8),
    )
        .prop_map(
            |(titles, descriptions, og_titles, alternates, stray_description, blocks)| PageShape {
                titles,
                descriptions,
                og_titles,
                alternates,
                stray_description,
                blocks,
            },
        )
}

fn operation() -> impl Strategy<Value = PatchOperation> {
    prop_oneof![
        phrase().prop_map(|text| PatchOperation::UpsertTitle { text }),
        phrase().prop_map(|content| PatchOperation::UpsertMetaName {
            name: "description".into(),
            content,
        }),
        Just(PatchOperation::UpsertMetaName {
            name: "robots".into(),
            content: "index, follow".into(),
        }),
        Just(PatchOperation::UpsertLinkRel {
            rel: "canonical".into(),
            href: "https://example.com/".into(),
            hreflang: None,
        }),
        phrase().prop_map(|content| PatchOperation::UpsertMetaProperty {
            property: "og:title".into(),
            content,
        }),
        prop::sample::select(vec!["de", "fr"]).prop_map(|lang| PatchOperation::UpsertLinkRel {
            rel: "alternate".into(),
            href: format!("https://example.com/{lang}/home"),
            hreflang: Some(lang.into()),
        }),
        phrase().prop_map(|content| PatchOperation::ReplaceAttr {
            target: NodeRef::from_selector("meta[name=description]"),
            attr_name: "content".into(),
            attr_value: content,
        }),
        (0usize..8, phrase()).prop_map(|(i, alt)| PatchOperation::ReplaceAttr {
            target: NodeRef::from_selector(format!("img[src=\"/img/{i}.png\"]")),
            attr_name: "alt".into(),
            attr_value: alt,
        }),
        (12u32..24).prop_map(|px| PatchOperation::InsertStyleScoped {
            target: NodeRef::from_selector("p.note"),
            css_rules: format!("font-size: {px}px"),
            media_guard: None,
        }),
    ]
}

fn patch_plan() -> impl Strategy<Value = PatchPlan> {
    prop::collection::vec(operation(), 0..6).prop_map(|ops| {
        PatchPlan::new(
            ops.into_iter()
                .map(|op| PatchOp::new("prop", "generated", op))
                .collect(),
        )
    })
}

fn pipeline() -> Pipeline {
    Pipeline::new(PipelineConfig::default()).expect("default config is valid")
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_apply_is_idempotent(shape in page_shape(), plan in patch_plan()) {
        let once = pipeline().run(&shape.render(), &plan, &[]).expect("first run");
        let twice = pipeline().run(&once.modified_html, &plan, &[]).expect("second run");
        prop_assert_eq!(&twice.modified_html, &once.modified_html);
        prop_assert!(twice.output.diff.is_empty());
        prop_assert!(twice.output.applied.is_empty());
    }

    #[test]
    fn prop_touched_head_keys_are_unique(
        shape in page_shape(),
        title in phrase(),
        desc in phrase(),
        og in phrase(),
        shadow in phrase(),
    ) {
        let plan = PatchPlan::new(vec![
            PatchOp::new("document-title", "", PatchOperation::UpsertTitle { text: title }),
            PatchOp::new("meta-description", "", PatchOperation::UpsertMetaName {
                name: "description".into(),
                content: desc.clone(),
            }),
            PatchOp::new("og", "", PatchOperation::UpsertMetaProperty {
                property: "og:title".into(),
                content: og,
            }),
            PatchOp::new("hreflang", "", PatchOperation::UpsertLinkRel {
                rel: "alternate".into(),
                href: "https://example.com/de/home".into(),
                hreflang: Some("de".into()),
            }),
            PatchOp::new("meta-description", "", PatchOperation::ReplaceAttr {
                target: NodeRef::from_selector("meta[name=description]"),
                attr_name: "content".into(),
                attr_value: format!("{shadow} shadow"),
            }),
        ]);
        let run = pipeline().run(&shape.render(), &plan, &[]).expect("run");
        let html = &run.modified_html;
        prop_assert_eq!(html.matches("<title").count(), 1);
        prop_assert_eq!(html.matches("name=\"description\"").count(), 1);
        prop_assert_eq!(html.matches("property=\"og:title\"").count(), 1);
        prop_assert_eq!(html.matches("hreflang=\"de\"").count(), 1);
        let desc_attr = format!("content=\"{}\"", desc);
        prop_assert!(html.contains(&desc_attr));
        prop_assert!(!html.contains(" shadow\""));
        prop_assert!(run.output.manual_fix.iter().any(|m| m.op_index == 4));
    }

    #[test]
    fn prop_diff_round_trips(shape in page_shape(), plan in patch_plan()) {
        let source = shape.render();
        let run = pipeline().run(&source, &plan, &[]).expect("run");
        prop_assert!(run.output.applicable);
        let original = SourcePage::parse(&source, 1 << 20).expect("parse").doc.serialize();
        let rebuilt = apply_diff(&normalize(&original), &run.output.diff).expect("apply diff");
        prop_assert_eq!(rebuilt, normalize(&run.modified_html));
    }

    #[test]
    fn prop_runs_are_deterministic(shape in page_shape(), plan in patch_plan()) {
        let source = shape.render();
        let a = pipeline().run(&source, &plan, &[]).expect("run a");
        let b = pipeline().run(&source, &plan, &[]).expect("run b");
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_confidence_follows_strategy_order(shape in page_shape()) {
        let page = SourcePage::parse(&shape.render(), 1 << 20).expect("parse");
        let resolver = Resolver::default();
        for i in shape.image_indices() {
            let by_selector = resolver
                .resolve(&page, &NodeRef::from_selector(format!("img[src=\"/img/{i}.png\"]")))
                .expect("selector");
            prop_assert_eq!(by_selector.strategy, StrategyKind::Selector);

            let path = page.doc.structural_path(by_selector.node);
            let by_path = resolver.resolve(&page, &NodeRef::from_path(path)).expect("path");
            prop_assert_eq!(by_path.node, by_selector.node);

            let snippet = page.doc.outer_html(by_selector.node);
            let by_snippet = resolver
                .resolve(&page, &NodeRef::from_snippet(snippet))
                .expect("snippet");
            prop_assert_eq!(by_snippet.node, by_selector.node);

            prop_assert!(by_selector.confidence >= by_path.confidence);
            prop_assert!(by_path.confidence >= by_snippet.confidence);
            prop_assert!(by_snippet.confidence <= SNIPPET_BAND);
        }
    }
}
