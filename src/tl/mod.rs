//! Ren'Py translation file parsing and writing.
//!
//! A TL file under `game/tl/<lang>/` holds two block shapes:
//!
//! ```text
//! # game/script.rpy:14
//! translate turkish start_9f8a1b2c:
//!
//!     # e "Hello, world."
//!     e "Hello, world."
//!
//! translate turkish strings:
//!
//!     old "Yes"
//!     new ""
//! ```
//!
//! Parsing keeps the raw line buffer so translations can be spliced back
//! into place without disturbing comments, indentation, or untouched
//! entries.

use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

use crate::encoding;
use crate::parser::{EntryType, ParsedText};
use crate::utils::escape_renpy_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlEntryType {
    Dialogue,
    Menu,
    Ui,
    String,
    Rpymc,
}

impl TlEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TlEntryType::Dialogue => "dialogue",
            TlEntryType::Menu => "menu",
            TlEntryType::Ui => "ui",
            TlEntryType::String => "string",
            TlEntryType::Rpymc => "rpymc",
        }
    }
}

/// One translatable row of a TL file.
#[derive(Debug, Clone)]
pub struct TranslationEntry {
    pub original_text: String,
    pub translated_text: String,
    pub file_path: PathBuf,
    pub line_number: usize,
    pub entry_type: TlEntryType,
    pub character: Option<String>,
    pub block_id: Option<String>,
    pub context_path: Vec<String>,
    pub translation_id: String,
    /// Index into the owning file's line buffer of the editable line.
    pub line_index: usize,
}

impl TranslationEntry {
    pub fn is_translated(&self) -> bool {
        !self.translated_text.is_empty() && self.translated_text != self.original_text
    }
}

/// A parsed TL file: ordered entries plus the raw line buffer needed to
/// write edits back in place.
#[derive(Debug, Clone)]
pub struct TranslationFile {
    pub file_path: PathBuf,
    pub lines: Vec<String>,
    pub entries: Vec<TranslationEntry>,
}

impl TranslationFile {
    pub fn untranslated(&self) -> Vec<&TranslationEntry> {
        self.entries.iter().filter(|e| !e.is_translated()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TranslationStats {
    pub total: usize,
    pub translated: usize,
    pub untranslated: usize,
}

pub fn translation_stats(files: &[TranslationFile]) -> TranslationStats {
    let mut stats = TranslationStats::default();
    for file in files {
        for entry in &file.entries {
            stats.total += 1;
            if entry.is_translated() {
                stats.translated += 1;
            } else {
                stats.untranslated += 1;
            }
        }
    }
    stats
}

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^translate\s+(\w+)\s+([A-Za-z_]\w*)\s*:").unwrap());
static COMMENT_DIALOGUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*#\s*(?:(?P<char>[A-Za-z_]\w*)\s+)?"(?P<text>(?:[^"\\]|\\.)*)"\s*$"#).unwrap()
});
static ACTIVE_DIALOGUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<indent>\s*)(?:(?P<char>[A-Za-z_]\w*)\s+)?"(?P<text>(?:[^"\\]|\\.)*)"(?P<rest>.*)$"#,
    )
    .unwrap()
});
static OLD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*old\s+"(?P<text>(?:[^"\\]|\\.)*)"\s*$"#).unwrap()
});
static NEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?P<indent>\s*)new\s+"(?P<text>(?:[^"\\]|\\.)*)"\s*$"#).unwrap()
});

/// Deterministic id for a TL entry. Identical inputs produce identical ids
/// across runs.
pub fn make_translation_id(
    file_path: &Path,
    line_number: usize,
    original_text: &str,
    context_path: &[String],
) -> String {
    let normalized = file_path.to_string_lossy().replace('\\', "/");
    let payload = format!(
        "{}:{}:{}:{}",
        normalized,
        line_number,
        original_text,
        context_path.join("/")
    );
    format!("{:x}", md5::compute(payload.as_bytes()))
}

fn unescape(text: &str) -> String {
    crate::utils::unquote(&format!("\"{}\"", text))
}

#[derive(Default)]
pub struct TlParser;

impl TlParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<TranslationFile> {
        let content = encoding::read_text_lossy(path.as_ref())?;
        Ok(self.parse_str(&content, path.as_ref()))
    }

    pub fn parse_str(&self, content: &str, path: &Path) -> TranslationFile {
        let lines: Vec<String> = content.lines().map(|l| l.to_string()).collect();
        let mut entries = Vec::new();

        #[derive(PartialEq)]
        enum Mode {
            None,
            Dialogue { block_id: String },
            Strings,
        }

        let mut mode = Mode::None;
        let mut pending_comment: Option<(Option<String>, String)> = None;
        let mut pending_old: Option<String> = None;

        for (i, line) in lines.iter().enumerate() {
            if let Some(caps) = HEADER_RE.captures(line) {
                let id = caps.get(2).unwrap().as_str();
                mode = if id == "strings" {
                    Mode::Strings
                } else {
                    Mode::Dialogue {
                        block_id: id.to_string(),
                    }
                };
                pending_comment = None;
                pending_old = None;
                continue;
            }

            match &mode {
                Mode::Dialogue { block_id } => {
                    if let Some(caps) = COMMENT_DIALOGUE_RE.captures(line) {
                        pending_comment = Some((
                            caps.name("char").map(|m| m.as_str().to_string()),
                            unescape(caps.name("text").unwrap().as_str()),
                        ));
                        continue;
                    }
                    if line.trim().is_empty() || line.trim().starts_with('#') {
                        continue;
                    }
                    let Some(caps) = ACTIVE_DIALOGUE_RE.captures(line) else {
                        continue;
                    };
                    // voice/pause statements share the block with the say
                    // line; they must not consume the pending original.
                    if let Some(speaker) = caps.name("char") {
                        if matches!(
                            speaker.as_str(),
                            "voice" | "play" | "queue" | "stop" | "show" | "hide" | "pause"
                                | "window" | "nvl"
                        ) {
                            continue;
                        }
                    }
                    if let Some((character, original)) = pending_comment.take() {
                        let current = unescape(caps.name("text").unwrap().as_str());
                        let translated = if current == original {
                            String::new()
                        } else {
                            current
                        };
                        let context_path = vec![block_id.clone()];
                        entries.push(TranslationEntry {
                            translation_id: make_translation_id(path, i + 1, &original, &context_path),
                            original_text: original,
                            translated_text: translated,
                            file_path: path.to_path_buf(),
                            line_number: i + 1,
                            entry_type: TlEntryType::Dialogue,
                            character,
                            block_id: Some(block_id.clone()),
                            context_path,
                            line_index: i,
                        });
                    }
                }
                Mode::Strings => {
                    if let Some(caps) = OLD_RE.captures(line) {
                        pending_old = Some(unescape(caps.name("text").unwrap().as_str()));
                        continue;
                    }
                    if let (Some(original), Some(caps)) =
                        (pending_old.clone(), NEW_RE.captures(line))
                    {
                        pending_old = None;
                        let translated = unescape(caps.name("text").unwrap().as_str());
                        let translated = if translated == original {
                            String::new()
                        } else {
                            translated
                        };
                        entries.push(TranslationEntry {
                            translation_id: make_translation_id(path, i + 1, &original, &[]),
                            original_text: original,
                            translated_text: translated,
                            file_path: path.to_path_buf(),
                            line_number: i + 1,
                            entry_type: TlEntryType::String,
                            character: None,
                            block_id: None,
                            context_path: Vec::new(),
                            line_index: i,
                        });
                    }
                }
                Mode::None => {}
            }
        }

        TranslationFile {
            file_path: path.to_path_buf(),
            lines,
            entries,
        }
    }

    /// Parse every `.rpy` file under `tl/<lang>/`.
    ///
    /// `stop` is checked before each file; on cancellation the files parsed
    /// so far are returned, matching the per-item contract of the
    /// translate and save loops.
    pub fn parse_directory<P: AsRef<Path>>(
        &self,
        lang_dir: P,
        stop: Option<&AtomicBool>,
    ) -> Vec<TranslationFile> {
        let mut files = Vec::new();
        for entry in WalkDir::new(lang_dir.as_ref())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "rpy").unwrap_or(false))
        {
            if stop.map(|s| s.load(Ordering::SeqCst)).unwrap_or(false) {
                break;
            }
            match self.parse_file(entry.path()) {
                Ok(f) => files.push(f),
                Err(err) => {
                    tracing::warn!("Failed to parse TL file {}: {}", entry.path().display(), err);
                }
            }
        }
        files
    }

    /// Splice translations into the file's line buffer and write it back
    /// atomically. `translations` maps `translation_id` (or original text as
    /// a fallback key) to translated text. Returns the number of entries
    /// updated.
    pub fn save_translations(
        &self,
        file: &mut TranslationFile,
        translations: &HashMap<String, String>,
    ) -> Result<usize> {
        let mut updated = 0;

        for entry in &mut file.entries {
            let translated = translations
                .get(&entry.translation_id)
                .or_else(|| translations.get(&entry.original_text));
            let Some(translated) = translated else {
                continue;
            };
            if translated.is_empty() || *translated == entry.original_text {
                continue;
            }

            let line = &file.lines[entry.line_index];
            let new_line = match entry.entry_type {
                TlEntryType::String => {
                    let caps = NEW_RE.captures(line);
                    let indent = caps
                        .as_ref()
                        .and_then(|c| c.name("indent"))
                        .map(|m| m.as_str())
                        .unwrap_or("    ");
                    format!("{}new \"{}\"", indent, escape_renpy_string(translated))
                }
                _ => {
                    let Some(caps) = ACTIVE_DIALOGUE_RE.captures(line) else {
                        continue;
                    };
                    let indent = caps.name("indent").map(|m| m.as_str()).unwrap_or("    ");
                    let speaker = caps
                        .name("char")
                        .map(|m| format!("{} ", m.as_str()))
                        .unwrap_or_default();
                    let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
                    format!(
                        "{}{}\"{}\"{}",
                        indent,
                        speaker,
                        escape_renpy_string(translated),
                        rest
                    )
                }
            };

            file.lines[entry.line_index] = new_line;
            entry.translated_text = translated.clone();
            updated += 1;
        }

        if updated > 0 {
            let content = file.lines.join("\n");
            encoding::write_atomic(&file.file_path, &content)?;
        }
        Ok(updated)
    }
}

/// Generates stub TL files for a language from extracted source entries.
/// Dialogue becomes `translate <lang> <block_id>:` blocks mirroring the
/// source layout; everything else lands in a shared strings file.
pub struct StubGenerator {
    lang: String,
}

impl StubGenerator {
    pub fn new(lang: &str) -> Self {
        Self {
            lang: lang.to_string(),
        }
    }

    /// Ren'Py-style block id: `<label>_<hash8>` where the hash covers the
    /// source location and text.
    pub fn block_id(entry: &ParsedText) -> String {
        let label = entry
            .label
            .clone()
            .unwrap_or_else(|| "strings".to_string());
        let digest = md5::compute(
            format!(
                "{}:{}:{}",
                entry.file_path.display(),
                entry.line_number,
                entry.text
            )
            .as_bytes(),
        );
        let hex = format!("{:x}", digest);
        format!("{}_{}", label, &hex[..8])
    }

    /// Write stub files under `tl_lang_dir`. Returns the created paths.
    pub fn write_stubs(
        &self,
        tl_lang_dir: &Path,
        game_dir: &Path,
        entries: &[ParsedText],
    ) -> Result<Vec<PathBuf>> {
        let mut dialogue_by_file: HashMap<PathBuf, Vec<&ParsedText>> = HashMap::new();
        let mut strings: Vec<&ParsedText> = Vec::new();

        for entry in entries {
            match entry.entry_type {
                EntryType::Dialogue => {
                    // Stubs always land as .rpy, even when harvested from
                    // compiled scripts.
                    let rel = entry
                        .file_path
                        .strip_prefix(game_dir)
                        .unwrap_or(&entry.file_path)
                        .with_extension("rpy");
                    dialogue_by_file.entry(rel).or_default().push(entry);
                }
                _ => strings.push(entry),
            }
        }

        let mut created = Vec::new();

        let mut files: Vec<_> = dialogue_by_file.into_iter().collect();
        files.sort_by(|a, b| a.0.cmp(&b.0));
        for (rel, mut file_entries) in files {
            file_entries.sort_by_key(|e| e.line_number);
            let mut out = String::new();
            out.push_str(&format!(
                "# Translation stubs for {}\n\n",
                rel.display()
            ));
            for entry in file_entries {
                let speaker = entry
                    .character
                    .as_ref()
                    .map(|c| format!("{} ", c))
                    .unwrap_or_default();
                let escaped = escape_renpy_string(&entry.text);
                out.push_str(&format!(
                    "# {}:{}\ntranslate {} {}:\n\n    # {}\"{}\"\n    {}\"{}\"\n\n",
                    rel.display(),
                    entry.line_number,
                    self.lang,
                    Self::block_id(entry),
                    speaker,
                    escaped,
                    speaker,
                    escaped,
                ));
            }

            let dest = tl_lang_dir.join(&rel);
            encoding::write_atomic(&dest, &out)?;
            created.push(dest);
        }

        if !strings.is_empty() {
            let mut seen = std::collections::HashSet::new();
            let mut out = String::new();
            out.push_str(&format!("translate {} strings:\n\n", self.lang));
            for entry in strings {
                if !seen.insert(entry.text.clone()) {
                    continue;
                }
                let rel = entry
                    .file_path
                    .strip_prefix(game_dir)
                    .unwrap_or(&entry.file_path);
                let escaped = escape_renpy_string(&entry.text);
                out.push_str(&format!(
                    "    # {}:{}\n    old \"{}\"\n    new \"\"\n\n",
                    rel.display(),
                    entry.line_number,
                    escaped
                ));
            }
            let dest = tl_lang_dir.join("strings.rpy");
            encoding::write_atomic(&dest, &out)?;
            created.push(dest);
        }

        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# Translation stubs for script.rpy

# script.rpy:2
translate turkish start_9f8a1b2c:

    # e "Hello, world."
    e "Hello, world."

translate turkish strings:

    # script.rpy:5
    old "Yes"
    new ""

    old "No"
    new "Hayır"
"#;

    #[test]
    fn parses_both_block_shapes() {
        let file = TlParser::new().parse_str(SAMPLE, Path::new("tl/turkish/script.rpy"));
        assert_eq!(file.entries.len(), 3);

        let dialogue = &file.entries[0];
        assert_eq!(dialogue.entry_type, TlEntryType::Dialogue);
        assert_eq!(dialogue.original_text, "Hello, world.");
        assert_eq!(dialogue.character.as_deref(), Some("e"));
        assert_eq!(dialogue.block_id.as_deref(), Some("start_9f8a1b2c"));
        assert!(!dialogue.is_translated());

        let yes = &file.entries[1];
        assert_eq!(yes.entry_type, TlEntryType::String);
        assert!(!yes.is_translated());

        let no = &file.entries[2];
        assert_eq!(no.translated_text, "Hayır");
        assert!(no.is_translated());
    }

    #[test]
    fn untranslated_lists_only_pending() {
        let file = TlParser::new().parse_str(SAMPLE, Path::new("tl/turkish/script.rpy"));
        let pending: Vec<&str> = file
            .untranslated()
            .iter()
            .map(|e| e.original_text.as_str())
            .collect();
        assert_eq!(pending, vec!["Hello, world.", "Yes"]);
    }

    #[test]
    fn splice_preserves_structure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("script.rpy");
        std::fs::write(&path, SAMPLE).unwrap();

        let mut file = TlParser::new().parse_file(&path).unwrap();
        let mut translations = HashMap::new();
        translations.insert(file.entries[0].translation_id.clone(), "Merhaba, dünya.".to_string());
        translations.insert("Yes".to_string(), "Evet".to_string());

        let updated = TlParser::new().save_translations(&mut file, &translations).unwrap();
        assert_eq!(updated, 2);

        let written = encoding::read_text_lossy(&path).unwrap();
        assert!(written.contains("    # e \"Hello, world.\""), "comment untouched");
        assert!(written.contains("    e \"Merhaba, dünya.\""));
        assert!(written.contains("    old \"Yes\""));
        assert!(written.contains("    new \"Evet\""));
        assert!(written.contains("    new \"Hayır\""), "existing translation untouched");
    }

    #[test]
    fn directory_parse_observes_stop_flag() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rpy"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("b.rpy"), SAMPLE).unwrap();

        let parser = TlParser::new();
        assert_eq!(parser.parse_directory(dir.path(), None).len(), 2);

        // A pre-set flag is observed before the first file.
        let stop = AtomicBool::new(true);
        assert!(parser.parse_directory(dir.path(), Some(&stop)).is_empty());
    }

    #[test]
    fn translation_ids_are_deterministic() {
        let a = make_translation_id(Path::new("x.rpy"), 3, "Hi", &["start".into()]);
        let b = make_translation_id(Path::new("x.rpy"), 3, "Hi", &["start".into()]);
        let c = make_translation_id(Path::new("x.rpy"), 4, "Hi", &["start".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
