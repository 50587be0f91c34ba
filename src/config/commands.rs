//! `config` subcommand handlers.

use anyhow::{Context, Result};
use colored::Colorize;

use super::Config;
use crate::cli::{ConfigAction, ConfigArgs};

pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => show(),
        ConfigAction::Init { force } => init(force),
        ConfigAction::Set { key, value } => set(&key, &value),
        ConfigAction::Get { key } => get(&key),
        ConfigAction::Path => path(),
    }
}

fn show() -> Result<()> {
    let config = Config::load()?;
    let mut rendered = toml::to_string_pretty(&config).context("Failed to render config")?;

    // Keys are secrets; show only their presence.
    for (name, value) in &config.api_keys {
        if !value.is_empty() {
            rendered = rendered.replace(value, "********");
        }
        let _ = name;
    }
    println!("{rendered}");
    Ok(())
}

fn init(force: bool) -> Result<()> {
    if let Some(path) = Config::config_path() {
        if path.exists() && !force {
            anyhow::bail!(
                "Config file already exists: {} (use --force to overwrite)",
                path.display()
            );
        }
    }
    let path = Config::default().save()?;
    println!("{}", format!("[OK] Config written to {}", path.display()).green());
    Ok(())
}

fn set(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;
    apply(&mut config, key, value)?;
    config.save()?;
    println!("{}", format!("[OK] {key} = {value}").green());
    Ok(())
}

fn get(key: &str) -> Result<()> {
    let config = Config::load()?;
    let rendered = toml::to_string_pretty(&config)?;
    let value: toml::Value = toml::from_str(&rendered)?;

    let mut cursor = &value;
    for part in key.split('.') {
        cursor = cursor
            .get(part)
            .with_context(|| format!("Unknown config key: {key}"))?;
    }
    println!("{cursor}");
    Ok(())
}

fn path() -> Result<()> {
    let path = Config::config_path().context("Could not determine config path")?;
    println!("{}", path.display());
    Ok(())
}

/// Apply a dotted-key assignment by round-tripping through the TOML tree,
/// so every config field stays settable without a hand-written match per
/// option.
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    // api_keys entries are open-ended; everything else must address an
    // existing field.
    if let Some(provider) = key.strip_prefix("api_keys.") {
        if provider.is_empty() {
            anyhow::bail!("Empty provider name in {key}");
        }
        config
            .api_keys
            .insert(provider.to_lowercase(), value.to_string());
        return Ok(());
    }

    let rendered = toml::to_string_pretty(&*config)?;
    let mut tree: toml::Value = toml::from_str(&rendered)?;

    let parts: Vec<&str> = key.split('.').collect();
    if parts.is_empty() {
        anyhow::bail!("Empty config key");
    }

    let mut cursor = &mut tree;
    for part in &parts[..parts.len() - 1] {
        cursor = cursor
            .get_mut(*part)
            .with_context(|| format!("Unknown config section: {part}"))?;
    }

    let leaf = parts[parts.len() - 1];
    let existing = cursor.get(leaf);
    let new_value = match existing {
        Some(toml::Value::Boolean(_)) => toml::Value::Boolean(
            value
                .parse()
                .with_context(|| format!("{key} expects true/false"))?,
        ),
        Some(toml::Value::Integer(_)) => toml::Value::Integer(
            value
                .parse()
                .with_context(|| format!("{key} expects an integer"))?,
        ),
        Some(toml::Value::Float(_)) => toml::Value::Float(
            value
                .parse()
                .with_context(|| format!("{key} expects a number"))?,
        ),
        // New keys (api_keys entries) and strings take the raw value.
        _ => toml::Value::String(value.to_string()),
    };

    match cursor {
        toml::Value::Table(table) => {
            table.insert(leaf.to_string(), new_value);
        }
        _ => anyhow::bail!("Config key {key} does not address a table"),
    }

    *config = tree
        .try_into()
        .with_context(|| format!("Value rejected for {key}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_sets_nested_values() {
        let mut config = Config::default();
        apply(&mut config, "translation.target_lang", "japanese").unwrap();
        assert_eq!(config.translation.target_lang, "japanese");

        apply(&mut config, "translation.enable_deep_scan", "true").unwrap();
        assert!(config.translation.enable_deep_scan);

        apply(&mut config, "api_keys.openai", "sk-test").unwrap();
        assert_eq!(config.api_keys.get("openai").unwrap(), "sk-test");
    }

    #[test]
    fn apply_rejects_bad_types() {
        let mut config = Config::default();
        assert!(apply(&mut config, "translation.max_retries", "lots").is_err());
        assert!(apply(&mut config, "nonsense.key", "x").is_err());
    }
}
