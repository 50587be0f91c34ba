//! Common utility functions

pub fn truncate_display(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

/// Strip matching outer quotes and unescape the common Ren'Py sequences.
pub fn unquote(s: &str) -> String {
    let s = s.trim();
    let inner = if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('"') => out.push('"'),
                Some('\'') => out.push('\''),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape a string for embedding in a Ren'Py double-quoted literal.
/// Ren'Py variable references like `[name]` pass through untouched.
pub fn escape_renpy_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

pub const RENPY_KEYWORDS: &[&str] = &[
    // Control flow
    "label ",
    "jump ",
    "call ",
    "return",
    "pass",
    "if ",
    "elif ",
    "else:",
    "for ",
    "while ",
    // Python
    "python:",
    "init ",
    // Definitions
    "define ",
    "default ",
    "image ",
    "transform ",
    "screen ",
    // Display
    "show ",
    "hide ",
    "scene ",
    "with ",
    // Audio
    "play ",
    "stop ",
    "queue ",
    "voice ",
    // UI containers
    "nvl ",
    "window ",
    "pause",
    "add ",
    "use ",
    "vbox",
    "hbox",
    "frame",
    "grid",
    "fixed",
    "side",
    "imagebutton",
    "bar",
    "vbar",
    "key",
    "timer",
    "viewport",
    "vpgrid",
    "drag",
    "draggroup",
    "mousearea",
    "imagemap",
    "hotspot",
    "hotbar",
    "on ",
    "action ",
    "has ",
    "at ",
    "as ",
    "behind ",
    "onlayer ",
    "zorder ",
    // Translate
    "translate ",
];

/// True for lines that open a Ren'Py construct with no translatable payload.
pub fn is_renpy_keyword(line: &str) -> bool {
    RENPY_KEYWORDS.iter().any(|k| line.starts_with(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unquote_strips_and_unescapes() {
        assert_eq!(unquote(r#""Hello \"you\"""#), "Hello \"you\"");
        assert_eq!(unquote(r"'Line one.\nTwo.'"), "Line one.\nTwo.");
        assert_eq!(unquote("bare"), "bare");
    }

    #[test]
    fn escape_round_trips_through_unquote() {
        let original = "He said \"hi\"\nand left.";
        let quoted = format!("\"{}\"", escape_renpy_string(original));
        assert_eq!(unquote(&quoted), original);
    }
}
