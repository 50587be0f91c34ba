//! Extraction-only `scan` command.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::cli::ScanArgs;
use crate::extractors::ExtractorRegistry;
use crate::parser::RenpyParser;
use crate::rpyc;
use crate::utils::truncate_display;

#[derive(Debug, Serialize)]
struct ExportEntry {
    text: String,
    entry_type: String,
    file: String,
    line: usize,
    character: Option<String>,
}

pub fn run(args: ScanArgs) -> Result<()> {
    let input = &args.input;
    if !input.exists() {
        anyhow::bail!("Input path does not exist: {}", input.display());
    }

    println!("{}", format!("[Scan] {}", input.display()).green());

    let parser = RenpyParser::new();
    let mut export: Vec<ExportEntry> = Vec::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();

    let parsed = if input.is_file() {
        parser.parse_file(input)?
    } else {
        parser.parse_directory(input, &["tl", "renpy", "common", "lib"])
    };
    for entry in parsed {
        *counts.entry(entry.entry_type.as_str().to_string()).or_default() += 1;
        export.push(ExportEntry {
            text: entry.text,
            entry_type: entry.entry_type.as_str().to_string(),
            file: entry.file_path.display().to_string(),
            line: entry.line_number,
            character: entry.character,
        });
    }

    if args.rpyc {
        let compiled = compiled_files(input);
        println!("  Reading {} compiled script(s)", compiled.len());
        for path in compiled {
            match rpyc::extract_file(&path) {
                Ok(entries) => {
                    for entry in entries {
                        *counts.entry(format!("rpyc_{}", entry.entry_type)).or_default() += 1;
                        export.push(ExportEntry {
                            text: entry.text,
                            entry_type: entry.entry_type.to_string(),
                            file: path.display().to_string(),
                            line: entry.line,
                            character: entry.character,
                        });
                    }
                }
                Err(e) => {
                    eprintln!(
                        "{}",
                        format!("[WARN] Skipping {}: {}", path.display(), e).yellow()
                    );
                }
            }
        }
    }

    if args.data && input.is_dir() {
        let registry = ExtractorRegistry::new();
        for entry in registry.extract_directory(input) {
            *counts.entry("data".to_string()).or_default() += 1;
            export.push(ExportEntry {
                text: entry.original,
                entry_type: "data".to_string(),
                file: entry.file.display().to_string(),
                line: 0,
                character: None,
            });
        }
    }

    println!("  Found {} translatable entr(ies)", export.len());
    for (entry_type, count) in &counts {
        println!("    {entry_type}: {count}");
    }
    for entry in export.iter().take(10) {
        println!("    {} {}", "·".dimmed(), truncate_display(&entry.text, 60));
    }

    if let Some(path) = &args.export {
        let json = serde_json::to_string_pretty(&export)?;
        crate::encoding::write_atomic(path, &json)?;
        println!("{}", format!("[OK] Exported to {}", path.display()).green());
    }

    Ok(())
}

fn compiled_files(input: &Path) -> Vec<std::path::PathBuf> {
    if input.is_file() {
        return if input
            .extension()
            .map(|e| e == "rpyc" || e == "rpymc")
            .unwrap_or(false)
        {
            vec![input.to_path_buf()]
        } else {
            Vec::new()
        };
    }
    WalkDir::new(input)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "rpyc" || ext == "rpymc")
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}
