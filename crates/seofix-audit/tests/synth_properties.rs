use proptest::prelude::*;

use seofix_audit::synth::{alt_from_src, truncate_words, DESCRIPTION_LIMIT};

proptest! {
    #[test]
    fn prop_truncation_is_a_bounded_prefix(text in "[a-z]{1,12}( [a-z]{1,12}){0,40}") {
        let cut = truncate_words(&text, DESCRIPTION_LIMIT);
        prop_assert!(cut.chars().count() <= DESCRIPTION_LIMIT);
        prop_assert!(text.starts_with(&cut));
        prop_assert!(!cut.is_empty());
        // Never ends mid-word.
        let rest = &text[cut.len()..];
        prop_assert!(rest.is_empty() || rest.starts_with(' '));
    }

    #[test]
    fn prop_alt_text_has_no_separators(stem in "[a-z]{1,8}([-_.][a-z0-9]{1,8}){0,4}") {
        let src = format!("/img/{stem}.png?v=1");
        if let Some(alt) = alt_from_src(&src) {
            prop_assert!(!alt.contains(['-', '_', '.', '/', '?']));
            prop_assert!(alt.chars().next().is_some_and(|c| !c.is_lowercase()));
        }
    }
}
