//! RPA packing command.

use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

use crate::cli::RepackArgs;
use crate::rpa;

pub fn run(args: RepackArgs) -> Result<()> {
    let input = &args.input;
    if !input.is_dir() {
        anyhow::bail!("Input must be a directory: {}", input.display());
    }

    let output = args.output.clone().unwrap_or_else(|| {
        let stem = input
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".to_string());
        PathBuf::from(format!("{stem}.rpa"))
    });

    let owned: Vec<String>;
    let extensions: Vec<&str> = match &args.extensions {
        Some(list) => {
            owned = list.clone();
            owned.iter().map(|s| s.as_str()).collect()
        }
        None => vec!["rpy", "rpyc", "json"],
    };

    println!("{}", format!("[Repack] {}", input.display()).green());
    let count = rpa::pack_directory(input, &output, &extensions)?;

    println!(
        "{}",
        format!("[OK] Packed {} file(s) into {}", count, output.display()).green()
    );
    Ok(())
}
