//! Encoding detection and normalization for game text files.
//!
//! Ren'Py's loader reads translation files with strict UTF-8, so everything
//! we emit is rewritten as UTF-8 with a BOM and LF newlines. Input files can
//! arrive in whatever encoding the game's author happened to use; reading is
//! tolerant and never fails on bad bytes.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Read a text file, sniffing the encoding from its leading bytes.
///
/// Order: UTF-8 BOM, UTF-16 LE/BE BOM, strict UTF-8, then a lossy
/// windows-1252 fallback so a stray byte never aborts extraction.
pub fn read_text_lossy<P: AsRef<Path>>(path: P) -> Result<String> {
    let raw = fs::read(path.as_ref())
        .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
    Ok(decode_bytes(&raw))
}

pub fn decode_bytes(raw: &[u8]) -> String {
    if raw.starts_with(UTF8_BOM) {
        return String::from_utf8_lossy(&raw[3..]).into_owned();
    }
    if raw.starts_with(&[0xFF, 0xFE]) {
        let (text, _, _) = encoding_rs::UTF_16LE.decode(&raw[2..]);
        return text.into_owned();
    }
    if raw.starts_with(&[0xFE, 0xFF]) {
        let (text, _, _) = encoding_rs::UTF_16BE.decode(&raw[2..]);
        return text.into_owned();
    }
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(raw);
            text.into_owned()
        }
    }
}

/// Write `content` to `path` as UTF-8 with BOM and LF line endings.
///
/// The write is atomic: content goes to a temp file in the same directory,
/// is flushed and synced, then renamed over the destination.
pub fn write_atomic<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    let path = path.as_ref();
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .context("Failed to create temporary file")?;

    tmp.write_all(UTF8_BOM)?;
    for (i, line) in normalize_newlines(content).split('\n').enumerate() {
        if i > 0 {
            tmp.write_all(b"\n")?;
        }
        tmp.write_all(line.trim_end().as_bytes())?;
    }
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn normalize_newlines(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Rewrite an existing file as UTF-8-with-BOM + LF. Returns true when the
/// file was actually rewritten (i.e. its bytes changed).
pub fn normalize_to_utf8_bom<P: AsRef<Path>>(path: P) -> Result<bool> {
    let path = path.as_ref();
    let raw = fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let text = decode_bytes(&raw);

    let mut expected = Vec::with_capacity(raw.len() + 3);
    expected.extend_from_slice(UTF8_BOM);
    for (i, line) in normalize_newlines(&text).split('\n').enumerate() {
        if i > 0 {
            expected.push(b'\n');
        }
        expected.extend_from_slice(line.trim_end().as_bytes());
    }
    if expected == raw {
        return Ok(false);
    }

    write_atomic(path, &text)?;
    Ok(true)
}

/// Normalize every `.rpy` file under `dir`. Returns the rewrite count;
/// individual failures are logged and skipped.
pub fn normalize_tree<P: AsRef<Path>>(dir: P) -> usize {
    let mut count = 0;
    for entry in walkdir::WalkDir::new(dir.as_ref())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "rpy").unwrap_or(false))
    {
        match normalize_to_utf8_bom(entry.path()) {
            Ok(true) => count += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Encoding normalize failed for {}: {}", entry.path().display(), e);
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn decodes_utf16le_with_bom() {
        let mut raw = vec![0xFF, 0xFE];
        for unit in "merhaba".encode_utf16() {
            raw.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(decode_bytes(&raw), "merhaba");
    }

    #[test]
    fn write_emits_bom_and_lf() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.rpy");
        write_atomic(&path, "one\r\ntwo  \r\nthree").unwrap();

        let raw = fs::read(&path).unwrap();
        assert!(raw.starts_with(UTF8_BOM));
        assert!(!raw.contains(&b'\r'));
        assert_eq!(&raw[3..], b"one\ntwo\nthree");
    }

    #[test]
    fn normalize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("script.rpy");
        fs::write(&path, "a\r\nb\r\n").unwrap();

        assert!(normalize_to_utf8_bom(&path).unwrap());
        assert!(!normalize_to_utf8_bom(&path).unwrap());
    }
}
