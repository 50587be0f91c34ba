//! Placeholder protection for translation round trips.
//!
//! Translation engines mangle anything that looks like markup: `[name]`
//! becomes `[ name ]`, `{b}` gets lowercased or dropped, `%(count)d` turns
//! into prose. Before a string leaves for an engine, every such fragment is
//! replaced with an opaque token of the form `XRPYXVAR00XRPYX`; after the
//! translation comes back, the tokens are swapped back for the original
//! fragments, healing the common corruptions engines introduce along the
//! way.
//!
//! Tokens are ASCII letters and digits only. Underscores are avoided because
//! several engines split or drop them; the repeated `XRPYX` boundary gives a
//! resync pattern when an engine inserts spaces mid-token.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

const TOKEN_BOUNDARY: &str = "XRPYX";

/// What a protected fragment was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Ren'Py variable interpolation: `[player_name]`
    Var,
    /// Ren'Py text tag: `{b}`, `{/b}`, `{color=#ff0000}`
    Tag,
    /// printf / brace format: `%s`, `%(count)d`, `{0}`
    Fmt,
    /// Escape sequence: `\n`, `\t`
    Esc,
}

impl TokenKind {
    fn label(self) -> &'static str {
        match self {
            TokenKind::Var => "VAR",
            TokenKind::Tag => "TAG",
            TokenKind::Fmt => "FMT",
            TokenKind::Esc => "ESC",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct Placeholder {
    pub token: String,
    pub kind: TokenKind,
    pub index: usize,
    pub original: String,
}

/// Restoration state produced by [`protect_renpy_syntax`].
///
/// `wrapper_prefix`/`wrapper_suffix` hold outermost tag pairs that fully
/// wrapped the string's visible content; those are cut out entirely instead
/// of tokenized, and re-wrapped after restoration.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderMap {
    pub placeholders: Vec<Placeholder>,
    pub wrapper_prefix: String,
    pub wrapper_suffix: String,
}

impl PlaceholderMap {
    pub fn is_empty(&self) -> bool {
        self.placeholders.is_empty()
            && self.wrapper_prefix.is_empty()
            && self.wrapper_suffix.is_empty()
    }
}

/// Result of [`restore_renpy_syntax`]. `unresolved` lists original fragments
/// whose token could not be located in the translated text; callers treat
/// this as degraded-but-usable.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub text: String,
    pub unresolved: Vec<String>,
}

// Ren'Py text tag names; a brace group with any other name is treated as a
// Python format field.
const RENPY_TAG_NAMES: &[&str] = &[
    "b", "i", "u", "s", "a", "w", "p", "nw", "fast", "color", "size", "font",
    "alpha", "cps", "k", "outlinecolor", "plain", "space", "vspace", "image",
    "rt", "rb", "art", "done", "clear", "alt", "noalt", "shader",
];

static FRAGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<esc>\\[nt])
        | (?P<var>\[[^\[\]]+\])
        | (?P<fmt>%\([^)]+\)[sdif] | %[sdif])
        | (?P<brace>\{[^{}]*\})
        ",
    )
    .unwrap()
});

static WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\{([a-zA-Z]+)(=[^{}]*)?\}(.*)\{/([a-zA-Z]+)\}$").unwrap()
});

static VAR_FRAGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\[\]]+\]").unwrap());

fn is_renpy_tag(body: &str) -> bool {
    let name = body.trim_start_matches('/');
    let name = name
        .split(['=', ' ', ':'])
        .next()
        .unwrap_or("");
    RENPY_TAG_NAMES.contains(&name)
}

fn make_token(kind: TokenKind, index: usize) -> String {
    format!("{TOKEN_BOUNDARY}{}{index:02}{TOKEN_BOUNDARY}", kind.label())
}

/// Replace all protectable fragments with opaque tokens.
///
/// Always succeeds: text with nothing to protect is returned unchanged with
/// an empty map. Each fragment occurrence gets its own token, so the
/// protected output contains exactly one occurrence per (kind, index).
pub fn protect_renpy_syntax(text: &str) -> (String, PlaceholderMap) {
    let mut map = PlaceholderMap::default();

    // Strip outermost wrapper tag pairs ({i}...{/i}) before tokenizing.
    let mut payload = text.to_string();
    while let Some(caps) = WRAPPER_RE.captures(&payload) {
        let open_name = caps.get(1).unwrap().as_str();
        let close_name = caps.get(4).unwrap().as_str();
        let inner = caps.get(3).unwrap().as_str();
        // The inner content must not close the wrapper early.
        if open_name != close_name || inner.contains(&format!("{{/{close_name}}}")) {
            break;
        }
        let open = format!(
            "{{{}{}}}",
            open_name,
            caps.get(2).map(|m| m.as_str()).unwrap_or("")
        );
        map.wrapper_prefix.push_str(&open);
        map.wrapper_suffix = format!("{{/{close_name}}}{}", map.wrapper_suffix);
        payload = inner.to_string();
    }

    let mut counters = [0usize; 4];
    let mut out = String::with_capacity(payload.len());
    let mut last_end = 0;

    for caps in FRAGMENT_RE.captures_iter(&payload) {
        let m = caps.get(0).unwrap();
        let (kind, original) = if caps.name("esc").is_some() {
            (TokenKind::Esc, m.as_str())
        } else if caps.name("var").is_some() {
            (TokenKind::Var, m.as_str())
        } else if caps.name("fmt").is_some() {
            (TokenKind::Fmt, m.as_str())
        } else {
            let body = &m.as_str()[1..m.as_str().len() - 1];
            if is_renpy_tag(body) {
                (TokenKind::Tag, m.as_str())
            } else {
                (TokenKind::Fmt, m.as_str())
            }
        };

        let slot = kind as usize;
        let index = counters[slot];
        counters[slot] += 1;

        let token = make_token(kind, index);
        out.push_str(&payload[last_end..m.start()]);
        out.push_str(&token);
        last_end = m.end();

        map.placeholders.push(Placeholder {
            token,
            kind,
            index,
            original: original.to_string(),
        });
    }
    out.push_str(&payload[last_end..]);

    (out, map)
}

/// Swap tokens in a translated string back for their original fragments.
///
/// Healing strategies are tried in order for every token: exact match,
/// case-insensitive, space-tolerant, dropped boundary, and finally a
/// numeric-only fallback keyed on the kind+index group. Fragments that still
/// cannot be located are reported in `unresolved` and the text is returned
/// as the engine produced it; bulk work is never discarded over one token.
pub fn restore_renpy_syntax(translated: &str, map: &PlaceholderMap) -> RestoreOutcome {
    let mut text = translated.to_string();
    let mut unresolved = Vec::new();

    for ph in &map.placeholders {
        if !restore_one(&mut text, ph) {
            tracing::warn!(
                "Could not restore placeholder {} ({})",
                ph.token,
                ph.original
            );
            unresolved.push(ph.original.clone());
        }
    }

    text = heal_brackets(&text);

    let text = format!("{}{}{}", map.wrapper_prefix, text, map.wrapper_suffix);
    RestoreOutcome { text, unresolved }
}

fn restore_one(text: &mut String, ph: &Placeholder) -> bool {
    // 1. Exact.
    if let Some(pos) = text.find(&ph.token) {
        text.replace_range(pos..pos + ph.token.len(), &ph.original);
        return true;
    }

    // 2. Case folding: xrpyxvar00xrpyx.
    let ci = Regex::new(&format!("(?i){}", regex::escape(&ph.token))).unwrap();
    if replace_first(text, &ci, &ph.original) {
        return true;
    }

    // 3. Internal spaces: "XRPYX VAR 00 XRPYX", "X R P Y X ...".
    let spaced: String = ph
        .token
        .chars()
        .map(|c| regex::escape(&c.to_string()))
        .collect::<Vec<_>>()
        .join(r"[\s]*");
    let spaced_re = Regex::new(&format!("(?i){spaced}")).unwrap();
    if replace_first(text, &spaced_re, &ph.original) {
        return true;
    }

    // 4. Dropped boundary: one XRPYX survived, anchor on kind+index.
    let kind = ph.kind.label();
    let idx = format!("{:02}", ph.index);
    for pattern in [
        format!(r"(?i){TOKEN_BOUNDARY}\s*{kind}\s*{idx}"),
        format!(r"(?i){kind}\s*{idx}\s*{TOKEN_BOUNDARY}"),
    ] {
        let re = Regex::new(&pattern).unwrap();
        if replace_first(text, &re, &ph.original) {
            return true;
        }
    }

    // 5. Numeric-only survivor: "VAR 00" or a lone zero-padded index, taken
    // only when the remnant is unambiguous.
    let kind_idx_re = Regex::new(&format!(r"(?i)\b{kind}\s*{idx}\b")).unwrap();
    if replace_first(text, &kind_idx_re, &ph.original) {
        return true;
    }
    let bare_re = Regex::new(&format!(r"\b{idx}\b")).unwrap();
    if bare_re.find_iter(text).count() == 1 {
        return replace_first(text, &bare_re, &ph.original);
    }

    false
}

fn replace_first(text: &mut String, re: &Regex, replacement: &str) -> bool {
    if let Some(m) = re.find(text) {
        text.replace_range(m.range(), replacement);
        true
    } else {
        false
    }
}

/// Collapse bracket duplication introduced when an engine echoes a protected
/// fragment: `[ [name]]` and adjacent identical `[name] [name]` pairs.
pub fn heal_brackets(text: &str) -> String {
    static DOUBLE_WRAP_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[\s*(\[[^\[\]]+\])\s*\]").unwrap());
    static STRAY_OPEN_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\[\s+(\[[^\[\]]+\])").unwrap());

    let text = DOUBLE_WRAP_RE.replace_all(text, "$1");
    let text = STRAY_OPEN_RE.replace_all(&text, "$1");

    // Adjacent identical fragments separated only by whitespace. The regex
    // crate has no backreferences, so this pass is a manual scan.
    let mut out = String::with_capacity(text.len());
    let mut last_end = 0;
    let mut prev: Option<String> = None;
    for m in VAR_FRAGMENT_RE.find_iter(&text) {
        let between = &text[last_end..m.start()];
        if between.trim().is_empty()
            && prev.as_deref() == Some(m.as_str())
        {
            last_end = m.end();
            continue;
        }
        out.push_str(between);
        out.push_str(m.as_str());
        prev = Some(m.as_str().to_string());
        last_end = m.end();
    }
    out.push_str(&text[last_end..]);
    out
}

/// Report which protected fragments are missing from a candidate
/// translation. Diagnostic only; the pipeline accepts the translation
/// regardless.
pub fn validate_integrity(candidate: &str, map: &PlaceholderMap) -> Vec<String> {
    map.placeholders
        .iter()
        .filter(|ph| !candidate.contains(&ph.original))
        .map(|ph| ph.original.clone())
        .collect()
}

/// True when the text still carries an (unrestored) protection token.
pub fn has_residual_tokens(text: &str) -> bool {
    static RESIDUAL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)XRPYX(?:VAR|TAG|FMT|ESC)?\d*").unwrap());
    RESIDUAL_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(s: &str) -> String {
        let (protected, map) = protect_renpy_syntax(s);
        restore_renpy_syntax(&protected, &map).text
    }

    #[test]
    fn identity_roundtrip() {
        let cases = [
            "Hello, world.",
            "Hi [player_name]! You have %(count)d items.",
            "{color=#ff0000}Danger{/color} ahead, [name].",
            "Mixed {b}bold{/b} and [var] and %s and {0}.",
            "Line one.\\nLine two.",
            "[items[0]] looks odd but survives.",
        ];
        for case in cases {
            assert_eq!(roundtrip(case), case, "case: {case}");
        }
    }

    #[test]
    fn protected_text_has_no_original_fragments() {
        let (protected, map) = protect_renpy_syntax("Hi [name], {b}go{/b} %s");
        assert!(!protected.contains("[name]"));
        assert!(!protected.contains("%s"));
        for ph in &map.placeholders {
            assert_eq!(protected.matches(&ph.token).count(), 1);
        }
    }

    #[test]
    fn tokens_are_alphanumeric_only() {
        let (_, map) = protect_renpy_syntax("[a] {b}x{/b} %(n)s \\n");
        for ph in &map.placeholders {
            assert!(ph.token.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn wrapper_tags_are_stripped_and_rewrapped() {
        let (protected, map) = protect_renpy_syntax("{i}Thought text{/i}");
        assert_eq!(protected, "Thought text");
        assert_eq!(map.wrapper_prefix, "{i}");
        assert_eq!(map.wrapper_suffix, "{/i}");
        let restored = restore_renpy_syntax("Pensée", &map);
        assert_eq!(restored.text, "{i}Pensée{/i}");
    }

    #[test]
    fn heals_lowercased_tokens() {
        let (protected, map) = protect_renpy_syntax("Hello [name]!");
        let corrupted = protected.to_lowercase();
        let out = restore_renpy_syntax(&corrupted, &map);
        assert!(out.unresolved.is_empty());
        assert!(out.text.contains("[name]"));
    }

    #[test]
    fn heals_spaced_tokens() {
        let (_, map) = protect_renpy_syntax("Hello [name]!");
        let out = restore_renpy_syntax("Merhaba xrpyx var 00 xrpyx !", &map);
        assert!(out.unresolved.is_empty());
        assert_eq!(out.text, "Merhaba [name] !");
    }

    #[test]
    fn heals_dropped_boundary() {
        let (_, map) = protect_renpy_syntax("Hello [name]!");
        let out = restore_renpy_syntax("Merhaba XRPYXVAR00!", &map);
        assert!(out.unresolved.is_empty());
        assert!(out.text.contains("[name]"));
    }

    #[test]
    fn unresolved_token_is_reported_not_fatal() {
        let (_, map) = protect_renpy_syntax("Hello [name]!");
        let out = restore_renpy_syntax("Merhaba!", &map);
        assert_eq!(out.unresolved, vec!["[name]".to_string()]);
        assert_eq!(out.text, "Merhaba!");
    }

    #[test]
    fn restored_text_has_no_residual_tokens() {
        let (protected, map) =
            protect_renpy_syntax("A [x] B {b}c{/b} D %(n)s E {0} F \\n");
        let out = restore_renpy_syntax(&protected, &map);
        assert!(!has_residual_tokens(&out.text));
    }

    #[test]
    fn bracket_healing_collapses_duplicates() {
        assert_eq!(heal_brackets("[ [name]]"), "[name]");
        assert_eq!(heal_brackets("[name] [name]"), "[name]");
        assert_eq!(heal_brackets("[a] [b]"), "[a] [b]");
    }

    #[test]
    fn validate_reports_missing_fragments() {
        let (_, map) = protect_renpy_syntax("Hi [name], bye {b}x{/b}");
        let missing = validate_integrity("Hi [name], bye x", &map);
        assert_eq!(missing, vec!["{b}".to_string(), "{/b}".to_string()]);
    }

    #[test]
    fn brace_format_vs_tag_classification() {
        let (_, map) = protect_renpy_syntax("{b}x{/b} {count} {0}");
        let kinds: Vec<TokenKind> = map.placeholders.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Tag, TokenKind::Tag, TokenKind::Fmt, TokenKind::Fmt]
        );
    }
}
