//! Placeholder round-trip and healing properties.

use renlocalize::guard::{
    has_residual_tokens, protect_renpy_syntax, restore_renpy_syntax, validate_integrity,
};

const CORPUS: &[&str] = &[
    "Hello, world.",
    "Hi [player_name]!",
    "You have %(count)d items and %s gold.",
    "{b}Bold{/b} and {i}italic{/i} text.",
    "{color=#ff0000}Warning{/color}: [danger_level] rising.",
    "Nested [inventory[0]] access.",
    "Escaped line\\nbreak and tab\\t here.",
    "Brace format {0} and {name} mixed with {b}tags{/b}.",
    "[a] [b] [c] three variables.",
    "{i}Fully wrapped thought.{/i}",
    "%d%% complete",
    "Plain ASCII with no markup at all",
];

#[test]
fn identity_translation_round_trips_entire_corpus() {
    for case in CORPUS {
        let (protected, map) = protect_renpy_syntax(case);
        let restored = restore_renpy_syntax(&protected, &map);
        assert_eq!(&restored.text, case, "round trip failed for: {case}");
        assert!(restored.unresolved.is_empty());
    }
}

#[test]
fn every_fragment_gets_exactly_one_token_occurrence() {
    for case in CORPUS {
        let (protected, map) = protect_renpy_syntax(case);
        for placeholder in &map.placeholders {
            assert_eq!(
                protected.matches(&placeholder.token).count(),
                1,
                "token {} must appear exactly once in: {protected}",
                placeholder.token
            );
        }
    }
}

#[test]
fn no_tokens_survive_restoration() {
    for case in CORPUS {
        let (protected, map) = protect_renpy_syntax(case);
        let restored = restore_renpy_syntax(&protected, &map);
        assert!(
            !has_residual_tokens(&restored.text),
            "residual token in: {}",
            restored.text
        );
    }
}

#[test]
fn heals_lowercased_and_spaced_tokens() {
    let (protected, map) = protect_renpy_syntax("Take the [item_name], hero!");

    // Case folding plus internal spaces, the two most common engine
    // corruptions, stacked together.
    let corrupted = protected
        .to_lowercase()
        .replace("xrpyxvar00xrpyx", "xrpyx var 00 xrpyx");

    let restored = restore_renpy_syntax(&corrupted, &map);
    assert!(restored.unresolved.is_empty());
    assert!(restored.text.contains("[item_name]"));
    assert!(!has_residual_tokens(&restored.text));
}

#[test]
fn heals_dropped_boundary() {
    let (_, map) = protect_renpy_syntax("Give [name] the key");
    let restored = restore_renpy_syntax("Anahtarı XRPYXVAR00 ver", &map);
    assert!(restored.unresolved.is_empty());
    assert!(restored.text.contains("[name]"));
}

#[test]
fn unresolvable_token_degrades_without_data_loss() {
    let (_, map) = protect_renpy_syntax("Hello [name]");
    let restored = restore_renpy_syntax("Completely rewritten output", &map);

    assert_eq!(restored.unresolved, vec!["[name]".to_string()]);
    assert_eq!(restored.text, "Completely rewritten output");

    let missing = validate_integrity(&restored.text, &map);
    assert_eq!(missing, vec!["[name]".to_string()]);
}

#[test]
fn wrapper_tags_survive_translation_of_inner_text() {
    let (protected, map) = protect_renpy_syntax("{i}{b}Important thought{/b}{/i}");
    assert_eq!(protected, "Important thought");

    let restored = restore_renpy_syntax("Önemli düşünce", &map);
    assert_eq!(restored.text, "{i}{b}Önemli düşünce{/b}{/i}");
}

#[test]
fn duplicated_brackets_from_engines_collapse() {
    let (_, map) = protect_renpy_syntax("Hello [name]!");
    // Engine wrapped the token in an extra bracket pair.
    let restored = restore_renpy_syntax("Merhaba [ XRPYXVAR00XRPYX]!", &map);
    assert_eq!(restored.text, "Merhaba [name]!");
}
