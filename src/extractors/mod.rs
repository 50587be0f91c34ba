//! Pluggable extractors for auxiliary data formats.
//!
//! Some games keep dialogue or UI text in JSON/YAML data files instead of
//! script code. Extractors identify translatable values by key-name
//! heuristics (an include list, a skip list, and a value shape check) and
//! can write translated values back by key path.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use walkdir::WalkDir;

/// A single translatable string extracted from a data file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntry {
    pub file: PathBuf,
    /// Dot-separated path, e.g. `chapters.0.dialogue.2.text`.
    pub key_path: String,
    pub original: String,
}

// Keys whose values never carry prose.
const SKIP_KEYS: &[&str] = &[
    "id", "key", "path", "file", "image", "icon", "sound", "music", "audio",
    "sfx", "bg", "sprite", "animation", "script", "code", "class", "type",
    "tag", "version", "color", "font", "style", "xpos", "ypos", "xsize",
    "ysize", "xanchor", "yanchor", "xoffset", "yoffset",
];

// Keys whose values are always worth extracting.
const INCLUDE_KEYS: &[&str] = &[
    "text", "dialogue", "message", "name", "title", "description", "label",
    "caption", "tooltip", "hint", "prompt", "question", "answer", "option",
    "choice", "button", "menu_text", "notification", "summary", "bio", "note",
];

static NON_PROSE_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://|/|\\|#[0-9a-fA-F]{3,8}$|\d+(\.\d+)?$)").unwrap()
});
static HAS_LETTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z\u{00C0}-\u{024F}\u{0400}-\u{04FF}]").unwrap());

fn is_translatable(key_path: &str, value: &str) -> bool {
    if value.len() < 2 || NON_PROSE_VALUE_RE.is_match(value) {
        return false;
    }
    let base_key = key_path.rsplit('.').next().unwrap_or(key_path).to_lowercase();
    // Numeric segments (array indexes) defer to the parent key.
    let base_key = if base_key.chars().all(|c| c.is_ascii_digit()) {
        key_path
            .rsplit('.')
            .find(|seg| !seg.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or("")
            .to_lowercase()
    } else {
        base_key
    };

    if SKIP_KEYS.contains(&base_key.as_str()) {
        return false;
    }
    if INCLUDE_KEYS.contains(&base_key.as_str()) {
        return true;
    }
    value.len() >= 3 && HAS_LETTER_RE.is_match(value)
}

/// Format-specific extraction and write-back.
pub trait DataExtractor: Send + Sync {
    fn can_handle(&self, path: &Path) -> bool;
    fn extract(&self, path: &Path) -> Result<Vec<ExtractedEntry>>;
    /// Write translated values back by key path. Returns the count applied.
    fn write_back(&self, path: &Path, translations: &HashMap<String, String>) -> Result<usize>;
}

#[derive(Default)]
pub struct JsonExtractor;

impl DataExtractor for JsonExtractor {
    fn can_handle(&self, path: &Path) -> bool {
        path.extension().map(|e| e == "json").unwrap_or(false)
    }

    fn extract(&self, path: &Path) -> Result<Vec<ExtractedEntry>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: serde_json::Value =
            serde_json::from_str(&content).context("Failed to parse JSON")?;
        let mut entries = Vec::new();
        walk_json(&value, "", path, &mut entries);
        Ok(entries)
    }

    fn write_back(&self, path: &Path, translations: &HashMap<String, String>) -> Result<usize> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut value: serde_json::Value =
            serde_json::from_str(&content).context("Failed to parse JSON")?;
        let applied = apply_json(&mut value, "", translations);
        if applied > 0 {
            let out = serde_json::to_string_pretty(&value)?;
            crate::encoding::write_atomic(path, &out)?;
        }
        Ok(applied)
    }
}

fn walk_json(
    value: &serde_json::Value,
    prefix: &str,
    path: &Path,
    entries: &mut Vec<ExtractedEntry>,
) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let child = join_path(prefix, key);
                walk_json(val, &child, path, entries);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, val) in items.iter().enumerate() {
                let child = join_path(prefix, &i.to_string());
                walk_json(val, &child, path, entries);
            }
        }
        serde_json::Value::String(s) => {
            if is_translatable(prefix, s) {
                entries.push(ExtractedEntry {
                    file: path.to_path_buf(),
                    key_path: prefix.to_string(),
                    original: s.clone(),
                });
            }
        }
        _ => {}
    }
}

fn apply_json(
    value: &mut serde_json::Value,
    prefix: &str,
    translations: &HashMap<String, String>,
) -> usize {
    match value {
        serde_json::Value::Object(map) => {
            let mut applied = 0;
            for (key, val) in map.iter_mut() {
                let child = join_path(prefix, key);
                applied += apply_json(val, &child, translations);
            }
            applied
        }
        serde_json::Value::Array(items) => {
            let mut applied = 0;
            for (i, val) in items.iter_mut().enumerate() {
                let child = join_path(prefix, &i.to_string());
                applied += apply_json(val, &child, translations);
            }
            applied
        }
        serde_json::Value::String(s) => {
            if let Some(translated) = translations.get(prefix) {
                *s = translated.clone();
                1
            } else {
                0
            }
        }
        _ => 0,
    }
}

#[derive(Default)]
pub struct YamlExtractor;

impl DataExtractor for YamlExtractor {
    fn can_handle(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false)
    }

    fn extract(&self, path: &Path) -> Result<Vec<ExtractedEntry>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: serde_yaml::Value =
            serde_yaml::from_str(&content).context("Failed to parse YAML")?;
        let mut entries = Vec::new();
        walk_yaml(&value, "", path, &mut entries);
        Ok(entries)
    }

    fn write_back(&self, path: &Path, translations: &HashMap<String, String>) -> Result<usize> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut value: serde_yaml::Value =
            serde_yaml::from_str(&content).context("Failed to parse YAML")?;
        let applied = apply_yaml(&mut value, "", translations);
        if applied > 0 {
            let out = serde_yaml::to_string(&value)?;
            crate::encoding::write_atomic(path, &out)?;
        }
        Ok(applied)
    }
}

fn walk_yaml(
    value: &serde_yaml::Value,
    prefix: &str,
    path: &Path,
    entries: &mut Vec<ExtractedEntry>,
) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (key, val) in map {
                if let Some(key) = key.as_str() {
                    let child = join_path(prefix, key);
                    walk_yaml(val, &child, path, entries);
                }
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for (i, val) in items.iter().enumerate() {
                let child = join_path(prefix, &i.to_string());
                walk_yaml(val, &child, path, entries);
            }
        }
        serde_yaml::Value::String(s) => {
            if is_translatable(prefix, s) {
                entries.push(ExtractedEntry {
                    file: path.to_path_buf(),
                    key_path: prefix.to_string(),
                    original: s.clone(),
                });
            }
        }
        _ => {}
    }
}

fn apply_yaml(
    value: &mut serde_yaml::Value,
    prefix: &str,
    translations: &HashMap<String, String>,
) -> usize {
    match value {
        serde_yaml::Value::Mapping(map) => {
            let mut applied = 0;
            for (key, val) in map.iter_mut() {
                if let Some(key) = key.as_str().map(|s| s.to_string()) {
                    let child = join_path(prefix, &key);
                    applied += apply_yaml(val, &child, translations);
                }
            }
            applied
        }
        serde_yaml::Value::Sequence(items) => {
            let mut applied = 0;
            for (i, val) in items.iter_mut().enumerate() {
                let child = join_path(prefix, &i.to_string());
                applied += apply_yaml(val, &child, translations);
            }
            applied
        }
        serde_yaml::Value::String(s) => {
            if let Some(translated) = translations.get(prefix) {
                *s = translated.clone();
                1
            } else {
                0
            }
        }
        _ => 0,
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Registry dispatching files to whichever extractor claims them.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn DataExtractor>>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self {
            extractors: vec![Box::new(JsonExtractor), Box::new(YamlExtractor)],
        }
    }
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract_file(&self, path: &Path) -> Result<Vec<ExtractedEntry>> {
        for extractor in &self.extractors {
            if extractor.can_handle(path) {
                return extractor.extract(path);
            }
        }
        Ok(Vec::new())
    }

    pub fn write_back(
        &self,
        path: &Path,
        translations: &HashMap<String, String>,
    ) -> Result<usize> {
        for extractor in &self.extractors {
            if extractor.can_handle(path) {
                return extractor.write_back(path, translations);
            }
        }
        Ok(0)
    }

    /// Extract from every handled file under `dir`. Per-file failures are
    /// logged and skipped.
    pub fn extract_directory<P: AsRef<Path>>(&self, dir: P) -> Vec<ExtractedEntry> {
        let mut entries = Vec::new();
        for entry in WalkDir::new(dir.as_ref())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if !self.extractors.iter().any(|x| x.can_handle(path)) {
                continue;
            }
            match self.extract_file(path) {
                Ok(mut found) => entries.append(&mut found),
                Err(e) => tracing::warn!("Data extraction failed for {}: {}", path.display(), e),
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn json_extraction_uses_key_heuristics() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{
                "chapters": [
                    {"id": "ch1", "title": "The Beginning", "bg": "forest.png"}
                ],
                "speed": 3,
                "greeting": "Welcome back, traveler"
            }"#,
        )
        .unwrap();

        let entries = JsonExtractor.extract(&path).unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key_path.as_str()).collect();
        assert!(keys.contains(&"chapters.0.title"));
        assert!(keys.contains(&"greeting"));
        assert!(!keys.contains(&"chapters.0.id"));
        assert!(!keys.contains(&"chapters.0.bg"));
    }

    #[test]
    fn json_write_back_applies_by_key_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.json");
        fs::write(&path, r#"{"title": "Hello", "id": "x9"}"#).unwrap();

        let mut translations = HashMap::new();
        translations.insert("title".to_string(), "Merhaba".to_string());
        let applied = JsonExtractor.write_back(&path, &translations).unwrap();
        assert_eq!(applied, 1);

        let content = crate::encoding::read_text_lossy(&path).unwrap();
        assert!(content.contains("Merhaba"));
        assert!(content.contains("x9"));
    }

    #[test]
    fn yaml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("strings.yaml");
        fs::write(&path, "menu:\n  - text: Start Game\n  - text: Quit\n").unwrap();

        let entries = YamlExtractor.extract(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key_path, "menu.0.text");

        let mut translations = HashMap::new();
        translations.insert("menu.0.text".to_string(), "Oyuna Başla".to_string());
        let applied = YamlExtractor.write_back(&path, &translations).unwrap();
        assert_eq!(applied, 1);
    }

    #[test]
    fn registry_routes_by_extension() {
        let registry = ExtractorRegistry::new();
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.json"), r#"{"message": "Hi there"}"#).unwrap();
        fs::write(dir.path().join("b.yml"), "prompt: Type your name\n").unwrap();
        fs::write(dir.path().join("c.txt"), "ignored").unwrap();

        let entries = registry.extract_directory(dir.path());
        assert_eq!(entries.len(), 2);
    }
}
