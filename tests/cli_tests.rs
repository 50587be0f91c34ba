//! CLI smoke tests driving the compiled binary.

use std::fs;
use std::process::Command;
use tempfile::TempDir;

fn bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_renlocalize"))
}

#[test]
fn scan_reports_extracted_entries() {
    let temp_dir = TempDir::new().unwrap();
    let script = temp_dir.path().join("script.rpy");
    fs::write(
        &script,
        "label start:\n    e \"Hello there.\"\n    \"Narration line.\"\n",
    )
    .unwrap();

    let output = bin()
        .args(["scan", script.to_str().unwrap()])
        .output()
        .expect("Failed to run scan");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("2 translatable"), "stdout: {stdout}");
    assert!(stdout.contains("dialogue: 2"));
}

#[test]
fn scan_exports_json() {
    let temp_dir = TempDir::new().unwrap();
    let script = temp_dir.path().join("script.rpy");
    fs::write(&script, "    e \"Exported line.\"\n").unwrap();
    let export = temp_dir.path().join("entries.json");

    let status = bin()
        .args([
            "scan",
            script.to_str().unwrap(),
            "--export",
            export.to_str().unwrap(),
        ])
        .status()
        .expect("Failed to run scan");

    assert!(status.success());
    let content = fs::read_to_string(&export).unwrap();
    let content = content.trim_start_matches('\u{feff}');
    let parsed: serde_json::Value = serde_json::from_str(content).unwrap();
    assert_eq!(parsed[0]["text"], "Exported line.");
    assert_eq!(parsed[0]["entry_type"], "dialogue");
}

#[test]
fn repack_then_unpack_roundtrip() {
    let temp_dir = TempDir::new().unwrap();

    let source_dir = temp_dir.path().join("source");
    fs::create_dir(&source_dir).unwrap();
    let test_content = "Hello, Ren'Py!";
    fs::write(source_dir.join("test.rpy"), test_content).unwrap();

    let rpa_path = temp_dir.path().join("test.rpa");
    let status = bin()
        .args([
            "repack",
            source_dir.to_str().unwrap(),
            "-o",
            rpa_path.to_str().unwrap(),
        ])
        .status()
        .expect("Failed to run repack");
    assert!(status.success(), "Repack should succeed");
    assert!(rpa_path.exists());

    let extract_dir = temp_dir.path().join("extracted");
    let status = bin()
        .args([
            "unpack",
            rpa_path.to_str().unwrap(),
            "-o",
            extract_dir.to_str().unwrap(),
            "-f",
        ])
        .status()
        .expect("Failed to run unpack");
    assert!(status.success(), "Unpack should succeed");

    let extracted = fs::read_to_string(extract_dir.join("test.rpy")).unwrap();
    assert_eq!(extracted, test_content);
}

#[test]
fn unpack_rejects_missing_input() {
    let output = bin()
        .args(["unpack", "/nonexistent/archive.rpa"])
        .output()
        .expect("Failed to run unpack");
    assert!(!output.status.success());
}
