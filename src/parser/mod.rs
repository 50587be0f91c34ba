//! Text extraction from Ren'Py scripts
//!
//! Line-oriented parsing with a small indentation-aware state machine.
//! Every line is matched against a fixed priority-ordered table of compiled
//! patterns; dialogue lines dominate real scripts, so they sit first.

pub mod rules;

use anyhow::Result;
use rayon::prelude::*;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

use crate::encoding;
use crate::utils::{is_renpy_keyword, unquote};
use rules::NeverTranslateRules;

/// Classification of an extracted line, used by per-type config filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    Dialogue,
    Menu,
    Ui,
    Config,
    Gui,
    Style,
    Function,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Dialogue => "dialogue",
            EntryType::Menu => "menu",
            EntryType::Ui => "ui",
            EntryType::Config => "config",
            EntryType::Gui => "gui",
            EntryType::Style => "style",
            EntryType::Function => "function",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedText {
    pub text: String,
    pub entry_type: EntryType,
    pub file_path: PathBuf,
    pub line_number: usize,
    pub character: Option<String>,
    pub context_line: String,
    /// Enclosing `label`, when one is in scope. Used for stub block ids.
    pub label: Option<String>,
}

const QUOTED: &str = r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'"#;

macro_rules! line_re {
    ($fmt:literal) => {
        LazyLock::new(|| Regex::new(&format!($fmt, q = QUOTED)).unwrap())
    };
}

static CHAR_DIALOGUE_RE: LazyLock<Regex> =
    line_re!(r#"^\s*(?P<char>[A-Za-z_]\w*)\s+(?P<quote>{q})\s*(?:#.*)?$"#);
static NARRATOR_RE: LazyLock<Regex> =
    line_re!(r#"^\s*(?P<quote>{q})\s*(?:#.*)?$"#);
static MENU_TITLE_RE: LazyLock<Regex> =
    line_re!(r#"^\s*menu\s*(?:\w+\s*)?(?P<quote>{q})?\s*:"#);
static MENU_CHOICE_RE: LazyLock<Regex> =
    line_re!(r#"^\s*(?P<quote>{q})\s*(?:if\s+[^:]+)?\s*:"#);
static SCREEN_TEXT_RE: LazyLock<Regex> =
    line_re!(r#"^\s*(?:text|label|tooltip)\s+(?P<quote>{q})"#);
static TEXTBUTTON_RE: LazyLock<Regex> =
    line_re!(r#"^\s*textbutton\s+(?P<quote>{q})"#);
static CONFIG_RE: LazyLock<Regex> = line_re!(
    r#"^\s*(?:define\s+)?config\.(?:name|version|about|menu_\w*|window_title|save_name)\s*=\s*(?P<quote>{q})"#
);
static GUI_RE: LazyLock<Regex> = line_re!(
    r#"^\s*(?:define\s+)?gui\.\w+(?:\[[^\]]*\])?\s*=\s*(?P<quote>{q})"#
);
static STYLE_RE: LazyLock<Regex> =
    line_re!(r#"^\s*style\s*\.\s*[A-Za-z_]\w*(?:\.\w+)?\s*=\s*(?P<quote>{q})"#);
static PYTHON_CALL_RE: LazyLock<Regex> =
    line_re!(r#"^\s*\$\s+.*?(?:renpy\.)?(?:input|notify)\s*\([^)]*?(?P<quote>{q})"#);
static FUNCTION_CALL_RE: LazyLock<Regex> =
    line_re!(r#"^\s*(?:renpy\.)?(?:input|notify)\s*\([^)]*?(?P<quote>{q})"#);
static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*label\s+([A-Za-z_]\w*)\s*(?:\([^)]*\))?\s*:").unwrap());

static COLOR_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]+$").unwrap());
static PURE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-+]?\d+$").unwrap());
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)+$").unwrap());
static FORMAT_ONLY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^%s[%\s]*$").unwrap());
static PLACEHOLDER_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\[[^\]]+\]|\{[^}]+\}|%s|%\([^)]+\)[sdif])\s*$").unwrap()
});
static HAS_LETTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z\u{00C0}-\u{024F}\u{0400}-\u{04FF}\u{011E}\u{011F}\u{0130}\u{0131}\u{015E}\u{015F}]").unwrap());

// Identifier-style strings that never carry visible prose.
const TECHNICAL_TERMS: &[&str] = &[
    "left", "right", "center", "top", "bottom", "gui", "config", "true",
    "false", "none", "auto", "png", "jpg", "mp3", "ogg", "game_menu", "vbox",
    "hbox", "sync", "input", "overlay", "vertical", "horizontal", "linear",
    "subtitle", "empty", "touch_keyboard",
];

const MEDIA_EXTENSIONS: &[&str] = &[".png", ".jpg", ".webp", ".mp3", ".ogg", ".wav", ".ttf", ".otf"];

/// Regex-driven extractor for `.rpy` source.
pub struct RenpyParser {
    rules: NeverTranslateRules,
}

impl Default for RenpyParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RenpyParser {
    pub fn new() -> Self {
        Self {
            rules: NeverTranslateRules::default(),
        }
    }

    pub fn with_rules(rules: NeverTranslateRules) -> Self {
        Self { rules }
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<ParsedText>> {
        let content = encoding::read_text_lossy(path.as_ref())?;
        Ok(self.parse_str(&content, path.as_ref()))
    }

    pub fn parse_str(&self, content: &str, path: &Path) -> Vec<ParsedText> {
        let mut entries = Vec::new();

        // Label positions are collected up front; entries are attributed to
        // the nearest preceding label after the main pass.
        let labels: Vec<(usize, String)> = content
            .lines()
            .enumerate()
            .filter_map(|(i, l)| {
                LABEL_RE
                    .captures(l)
                    .map(|c| (i + 1, c.get(1).unwrap().as_str().to_string()))
            })
            .collect();

        // menu: blocks are tracked by indentation so their quoted choice
        // lines classify as Menu rather than Narrator.
        let mut menu_indent: Option<usize> = None;
        let mut monologue: Option<(usize, String)> = None;

        for (i, line) in content.lines().enumerate() {
            let line_number = i + 1;
            let trimmed = line.trim();
            let indent = line.len() - line.trim_start().len();

            // Triple-quoted monologue blocks collect until the closing quote
            // and split on blank lines, matching Ren'Py's monologue rule.
            if let Some((start_line, ref mut buf)) = monologue {
                if let Some(end) = trimmed.find("\"\"\"") {
                    buf.push('\n');
                    buf.push_str(&trimmed[..end]);
                    let block = std::mem::take(buf);
                    monologue = None;
                    self.push_monologue(&mut entries, &block, start_line, path, line);
                } else {
                    buf.push('\n');
                    buf.push_str(trimmed);
                }
                continue;
            }
            if let Some(open) = trimmed.find("\"\"\"") {
                let rest = &trimmed[open + 3..];
                if let Some(end) = rest.find("\"\"\"") {
                    self.push_monologue(&mut entries, &rest[..end], line_number, path, line);
                } else {
                    monologue = Some((line_number, rest.to_string()));
                }
                continue;
            }

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(mi) = menu_indent {
                if indent <= mi && !trimmed.is_empty() {
                    menu_indent = None;
                }
            }

            if MENU_TITLE_RE.is_match(line) {
                menu_indent = Some(indent);
                if let Some(caps) = MENU_TITLE_RE.captures(line) {
                    if let Some(q) = caps.name("quote") {
                        self.push(&mut entries, q.as_str(), EntryType::Menu, path, line_number, None, line);
                    }
                }
                continue;
            }

            if menu_indent.is_some() {
                if let Some(caps) = MENU_CHOICE_RE.captures(line) {
                    let q = caps.name("quote").unwrap();
                    self.push(&mut entries, q.as_str(), EntryType::Menu, path, line_number, None, line);
                    continue;
                }
            }

            if let Some(caps) = SCREEN_TEXT_RE.captures(line) {
                let q = caps.name("quote").unwrap();
                self.push(&mut entries, q.as_str(), EntryType::Ui, path, line_number, None, line);
                continue;
            }
            if let Some(caps) = TEXTBUTTON_RE.captures(line) {
                let q = caps.name("quote").unwrap();
                self.push(&mut entries, q.as_str(), EntryType::Ui, path, line_number, None, line);
                continue;
            }
            if let Some(caps) = CONFIG_RE.captures(line) {
                let q = caps.name("quote").unwrap();
                self.push(&mut entries, q.as_str(), EntryType::Config, path, line_number, None, line);
                continue;
            }
            if let Some(caps) = GUI_RE.captures(line) {
                let q = caps.name("quote").unwrap();
                self.push(&mut entries, q.as_str(), EntryType::Gui, path, line_number, None, line);
                continue;
            }
            if let Some(caps) = STYLE_RE.captures(line) {
                let q = caps.name("quote").unwrap();
                self.push(&mut entries, q.as_str(), EntryType::Style, path, line_number, None, line);
                continue;
            }
            if let Some(caps) = PYTHON_CALL_RE.captures(line) {
                let q = caps.name("quote").unwrap();
                self.push(&mut entries, q.as_str(), EntryType::Function, path, line_number, None, line);
                continue;
            }
            if let Some(caps) = FUNCTION_CALL_RE.captures(line) {
                let q = caps.name("quote").unwrap();
                self.push(&mut entries, q.as_str(), EntryType::Function, path, line_number, None, line);
                continue;
            }

            // Only dialogue is ambiguous enough to need the keyword guard:
            // `play music "a.ogg"` would otherwise read as character "play".
            if is_renpy_keyword(trimmed) {
                continue;
            }

            if let Some(caps) = CHAR_DIALOGUE_RE.captures(line) {
                let who = caps.name("char").unwrap().as_str();
                if !TECHNICAL_TERMS.contains(&who) {
                    let q = caps.name("quote").unwrap();
                    self.push(
                        &mut entries,
                        q.as_str(),
                        EntryType::Dialogue,
                        path,
                        line_number,
                        Some(who.to_string()),
                        line,
                    );
                    continue;
                }
            }

            if let Some(caps) = NARRATOR_RE.captures(line) {
                let q = caps.name("quote").unwrap();
                self.push(&mut entries, q.as_str(), EntryType::Dialogue, path, line_number, None, line);
            }
        }

        for entry in &mut entries {
            entry.label = labels
                .iter()
                .rev()
                .find(|(ln, _)| *ln <= entry.line_number)
                .map(|(_, name)| name.clone());
        }

        entries
    }

    /// Parse all `.rpy`/`.rpym` files under a directory, skipping the `tl/`
    /// tree and engine directories. Files are parsed in parallel; a file
    /// that fails to read is logged and skipped.
    pub fn parse_directory<P: AsRef<Path>>(&self, dir: P, exclude: &[&str]) -> Vec<ParsedText> {
        let files: Vec<PathBuf> = WalkDir::new(dir.as_ref())
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && exclude.contains(&name.as_ref()))
            })
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "rpy" || ext == "rpym")
                    .unwrap_or(false)
            })
            .map(|e| e.path().to_path_buf())
            .collect();

        let mut entries: Vec<ParsedText> = files
            .par_iter()
            .flat_map(|path| match self.parse_file(path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    Vec::new()
                }
            })
            .collect();
        entries.sort_by(|a, b| (&a.file_path, a.line_number).cmp(&(&b.file_path, b.line_number)));
        entries
    }

    fn push(
        &self,
        entries: &mut Vec<ParsedText>,
        quoted: &str,
        entry_type: EntryType,
        path: &Path,
        line_number: usize,
        character: Option<String>,
        context_line: &str,
    ) {
        let text = unquote(quoted);
        if !is_meaningful_text(&text) || self.rules.matches(&text) {
            return;
        }
        entries.push(ParsedText {
            text,
            entry_type,
            file_path: path.to_path_buf(),
            line_number,
            character,
            context_line: context_line.trim().to_string(),
            label: None,
        });
    }

    fn push_monologue(
        &self,
        entries: &mut Vec<ParsedText>,
        block: &str,
        start_line: usize,
        path: &Path,
        context_line: &str,
    ) {
        // Blank lines split a monologue block into independent say entries.
        for part in block.split("\n\n") {
            let text = part.trim().replace('\n', " ");
            if is_meaningful_text(&text) && !self.rules.matches(&text) {
                entries.push(ParsedText {
                    text,
                    entry_type: EntryType::Dialogue,
                    file_path: path.to_path_buf(),
                    line_number: start_line,
                    character: None,
                    context_line: context_line.trim().to_string(),
                    label: None,
                });
            }
        }
    }
}

/// Filter out strings with no visible prose: color codes, font filenames,
/// pure numbers, format-only strings, bare placeholders, and known
/// technical identifiers. Version-like strings (`1.0.2`) are retained.
pub fn is_meaningful_text(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < 2 {
        return false;
    }

    let lower = trimmed.to_lowercase();
    if TECHNICAL_TERMS.contains(&lower.as_str()) {
        return false;
    }
    if PLACEHOLDER_ONLY_RE.is_match(trimmed) {
        return false;
    }
    if COLOR_CODE_RE.is_match(trimmed)
        || FORMAT_ONLY_RE.is_match(trimmed)
        || PURE_NUMBER_RE.is_match(trimmed)
    {
        return false;
    }
    if MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return false;
    }
    if VERSION_RE.is_match(trimmed) {
        return true;
    }
    HAS_LETTER_RE.is_match(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Vec<ParsedText> {
        RenpyParser::new().parse_str(content, Path::new("script.rpy"))
    }

    #[test]
    fn classifies_character_dialogue() {
        let entries = parse("label start:\n    e \"Hello, world.\"\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::Dialogue);
        assert_eq!(entries[0].character.as_deref(), Some("e"));
        assert_eq!(entries[0].text, "Hello, world.");
        assert_eq!(entries[0].line_number, 2);
        assert_eq!(entries[0].label.as_deref(), Some("start"));
    }

    #[test]
    fn classifies_narration() {
        let entries = parse("    \"Just narration here.\"\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::Dialogue);
        assert!(entries[0].character.is_none());
    }

    #[test]
    fn menu_choices_with_conditions() {
        let content = r#"
menu:
    "Take the sword" if has_sword:
        jump fight
    "Run away":
        jump flee
"#;
        let entries = parse(content);
        let menus: Vec<_> = entries
            .iter()
            .filter(|e| e.entry_type == EntryType::Menu)
            .collect();
        assert_eq!(menus.len(), 2);
        assert_eq!(menus[0].text, "Take the sword");
        assert_eq!(menus[1].text, "Run away");
    }

    #[test]
    fn screen_language_and_assignments() {
        let content = concat!(
            "screen about():\n",
            "    text \"Made with love\"\n",
            "    textbutton \"Close\" action Return()\n",
            "define config.name = \"My Game\"\n",
            "define gui.about = \"An about blurb\"\n",
            "style.tooltip_text = \"Hover here\"\n",
            "    $ renpy.notify(\"Saved!\")\n",
        );
        let entries = parse(content);
        let types: Vec<EntryType> = entries.iter().map(|e| e.entry_type).collect();
        assert_eq!(
            types,
            vec![
                EntryType::Ui,
                EntryType::Ui,
                EntryType::Config,
                EntryType::Gui,
                EntryType::Style,
                EntryType::Function,
            ]
        );
    }

    #[test]
    fn drops_pure_numbers_keeps_versions() {
        assert!(!is_meaningful_text("42"));
        assert!(is_meaningful_text("1.0.2"));
        assert!(!is_meaningful_text("#ff0000"));
        assert!(!is_meaningful_text("[player_name]"));
        assert!(!is_meaningful_text("DejaVuSans.ttf"));
        assert!(is_meaningful_text("Hello"));
    }

    #[test]
    fn monologue_splits_on_blank_lines() {
        let content = "label start:\n    \"\"\"\n    First paragraph.\n\n    Second paragraph.\n    \"\"\"\n";
        let entries = parse(content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "First paragraph.");
        assert_eq!(entries[1].text, "Second paragraph.");
    }

    #[test]
    fn escaped_quotes_survive() {
        let entries = parse("    e \"She said \\\"hi\\\" to me.\"\n");
        assert_eq!(entries[0].text, "She said \"hi\" to me.");
    }
}
