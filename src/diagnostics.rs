//! Structured per-run diagnostics.
//!
//! The pipeline never aborts over a single bad file or a dropped
//! placeholder; everything it skips or merely tolerates lands here and is
//! serialized as JSON next to the translation output.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct SkippedEntry {
    pub reason: String,
    pub text_preview: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileDiagnostics {
    pub extracted: usize,
    pub translated: usize,
    pub written: usize,
    pub skipped: Vec<SkippedEntry>,
}

#[derive(Debug, Default, Serialize)]
pub struct DiagnosticReport {
    pub project: String,
    pub target_language: String,
    pub files: BTreeMap<String, FileDiagnostics>,
    pub integrity_warnings: Vec<String>,
    pub sanitizer_counts: BTreeMap<String, usize>,
}

impl DiagnosticReport {
    pub fn new() -> Self {
        Self::default()
    }

    fn file_mut(&mut self, file: &Path) -> &mut FileDiagnostics {
        self.files
            .entry(file.to_string_lossy().replace('\\', "/"))
            .or_default()
    }

    pub fn add_extracted(&mut self, file: &Path, count: usize) {
        self.file_mut(file).extracted += count;
    }

    pub fn add_translated(&mut self, file: &Path, count: usize) {
        self.file_mut(file).translated += count;
    }

    pub fn add_written(&mut self, file: &Path, count: usize) {
        self.file_mut(file).written += count;
    }

    pub fn mark_skipped(&mut self, file: &Path, reason: &str, text: &str) {
        self.file_mut(file).skipped.push(SkippedEntry {
            reason: reason.to_string(),
            text_preview: crate::utils::truncate_display(text, 120),
        });
    }

    pub fn add_integrity_warning(&mut self, message: String) {
        self.integrity_warnings.push(message);
    }

    pub fn count_sanitized(&mut self, reason: &str) {
        *self.sanitizer_counts.entry(reason.to_string()).or_default() += 1;
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize diagnostics")?;
        crate::encoding::write_atomic(path.as_ref(), &json)
            .context("Failed to write diagnostics report")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn report_serializes_counts() {
        let mut report = DiagnosticReport::new();
        report.target_language = "turkish".to_string();
        let file = PathBuf::from("game/script.rpy");
        report.add_extracted(&file, 3);
        report.add_translated(&file, 2);
        report.mark_skipped(&file, "placeholder_only", "[player_name]");
        report.count_sanitized("length_inflation");

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("diagnostic_turkish.json");
        report.write(&path).unwrap();

        let content = crate::encoding::read_text_lossy(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["files"]["game/script.rpy"]["extracted"], 3);
        assert_eq!(parsed["sanitizer_counts"]["length_inflation"], 1);
    }
}
