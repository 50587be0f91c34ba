//! Per-project never-translate rules.
//!
//! A JSON file with three rule groups prunes extraction candidates:
//!
//! ```json
//! { "exact": ["OK"], "contains": ["DLC"], "regex": ["^Chapter \\d+$"] }
//! ```
//!
//! Invalid regexes are logged and skipped; they never abort a parse.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
struct RawRules {
    #[serde(default)]
    exact: Vec<String>,
    #[serde(default)]
    contains: Vec<String>,
    #[serde(default)]
    regex: Vec<String>,
}

#[derive(Debug, Default)]
pub struct NeverTranslateRules {
    exact: Vec<String>,
    contains: Vec<String>,
    patterns: Vec<Regex>,
}

impl NeverTranslateRules {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read rules file {}", path.as_ref().display()))?;
        let raw: RawRules =
            serde_json::from_str(&content).context("Failed to parse never-translate rules")?;

        let mut patterns = Vec::with_capacity(raw.regex.len());
        for pattern in &raw.regex {
            match Regex::new(pattern) {
                Ok(re) => patterns.push(re),
                Err(e) => {
                    tracing::warn!("Skipping invalid never-translate regex '{}': {}", pattern, e);
                }
            }
        }

        Ok(Self {
            exact: raw.exact,
            contains: raw.contains.into_iter().filter(|c| !c.is_empty()).collect(),
            patterns,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.contains.is_empty() && self.patterns.is_empty()
    }

    /// True when `text` is covered by any rule and must not be translated.
    pub fn matches(&self, text: &str) -> bool {
        let trimmed = text.trim();
        self.exact.iter().any(|e| trimmed == e)
            || self.contains.iter().any(|c| trimmed.contains(c))
            || self.patterns.iter().any(|re| re.is_match(trimmed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rules_prune_candidates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("never_translate.json");
        fs::write(
            &path,
            r#"{"exact": ["SKIP ME"], "contains": ["Steam"], "regex": ["^v\\d+"]}"#,
        )
        .unwrap();

        let rules = NeverTranslateRules::load(&path).unwrap();
        assert!(rules.matches("SKIP ME"));
        assert!(rules.matches("Buy on Steam now"));
        assert!(rules.matches("v12 beta"));
        assert!(!rules.matches("Hello"));
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        fs::write(&path, r#"{"regex": ["[unclosed", "^OK$"]}"#).unwrap();

        let rules = NeverTranslateRules::load(&path).unwrap();
        assert!(rules.matches("OK"));
        assert!(!rules.matches("[unclosed"));
    }
}
