//! Configuration management

pub mod commands;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const CONFIG_FILE_NAME: &str = "config.toml";
const APP_NAME: &str = "renlocalize";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub translation: TranslationConfig,

    /// One key per backend that needs one: `openai`, `gemini`, `deepl`.
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,

    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default = "default_source_lang")]
    pub source_lang: String,

    #[serde(default = "default_target_lang")]
    pub target_lang: String,

    /// Engine used when the CLI does not name one.
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Cap on concurrent translation requests (the dispatch semaphore).
    #[serde(default = "default_concurrency")]
    pub max_concurrent_threads: usize,

    /// Delay in milliseconds inserted between dispatches, for rate-shy
    /// endpoints.
    #[serde(default)]
    pub request_delay: u64,

    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_retries")]
    pub max_retries: u32,

    /// Per-request timeout in seconds for web engines.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Character budget per multi-query slice.
    #[serde(default = "default_max_chars")]
    pub max_chars_per_request: usize,

    /// Enables the batched multi-query transport for engines that have
    /// one.
    #[serde(default = "default_true")]
    pub use_multi_endpoint: bool,

    #[serde(default)]
    pub glossary_path: Option<PathBuf>,

    #[serde(default)]
    pub never_translate_rules_path: Option<PathBuf>,

    // Per-type extraction filters.
    #[serde(default = "default_true")]
    pub translate_dialogue: bool,
    #[serde(default = "default_true")]
    pub translate_menu: bool,
    #[serde(default = "default_true")]
    pub translate_ui: bool,
    #[serde(default)]
    pub translate_config: bool,
    #[serde(default)]
    pub translate_gui: bool,
    #[serde(default)]
    pub translate_style: bool,
    #[serde(default = "default_true")]
    pub translate_functions: bool,

    /// Deprecated: read for compatibility, never acted on.
    #[serde(default)]
    pub enable_fuzzy_match: bool,

    /// Also scan source files for strings the stub generator missed.
    #[serde(default)]
    pub enable_deep_scan: bool,

    /// Read compiled `.rpyc` files when no `.rpy` source exists.
    #[serde(default)]
    pub enable_rpyc_reader: bool,

    /// Scan `.rpymc` screen caches for UI strings.
    #[serde(default)]
    pub scan_rpymc_files: bool,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,
    #[serde(default)]
    pub openai_base_url: Option<String>,

    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_gemini_safety")]
    pub gemini_safety_level: String,

    #[serde(default = "default_local_model")]
    pub local_llm_model: String,
    #[serde(default = "default_local_url")]
    pub local_llm_url: String,

    #[serde(default = "default_temperature")]
    pub ai_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub ai_max_tokens: u32,
    #[serde(default = "default_ai_batch")]
    pub ai_batch_size: usize,
    #[serde(default = "default_ai_concurrency")]
    pub ai_concurrency: usize,
    /// Overrides the built-in system prompt; `{source_lang}` and
    /// `{target_lang}` are substituted.
    #[serde(default)]
    pub ai_system_prompt: Option<String>,
    /// Re-prompt when an LLM echoes the input unchanged.
    #[serde(default)]
    pub aggressive_retry_translation: bool,

    #[serde(default = "default_true")]
    pub force_runtime_translation: bool,
    #[serde(default = "default_true")]
    pub auto_generate_hook: bool,

    #[serde(default = "default_true")]
    pub use_global_cache: bool,
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_source_lang() -> String {
    "en".to_string()
}
fn default_target_lang() -> String {
    "turkish".to_string()
}
fn default_engine() -> String {
    "google".to_string()
}
fn default_concurrency() -> usize {
    64
}
fn default_batch_size() -> usize {
    500
}
fn default_retries() -> u32 {
    2
}
fn default_timeout() -> u64 {
    15
}
fn default_max_chars() -> usize {
    6000
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}
fn default_gemini_safety() -> String {
    "BLOCK_NONE".to_string()
}
fn default_local_model() -> String {
    "llama3.2".to_string()
}
fn default_local_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_ai_batch() -> usize {
    50
}
fn default_ai_concurrency() -> usize {
    2
}
fn default_cache_capacity() -> usize {
    20_000
}
fn default_true() -> bool {
    true
}

impl Default for TranslationConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config deserializes from defaults")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub auto_rotate: bool,

    /// Seconds between free-proxy list refreshes.
    #[serde(default = "default_proxy_interval")]
    pub update_interval: u64,

    /// Failures before a free proxy is disabled. Personal proxies are
    /// exempt.
    #[serde(default = "default_proxy_failures")]
    pub max_failures: u64,

    #[serde(default)]
    pub personal_proxy_url: String,

    #[serde(default)]
    pub manual_proxies: Vec<String>,
}

fn default_proxy_interval() -> u64 {
    3600
}
fn default_proxy_failures() -> u64 {
    10
}

impl Default for ProxyConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty config deserializes from defaults")
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Load config from default location
    pub fn load() -> Result<Self> {
        let path = Self::config_path().context("Could not determine config path")?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to default location
    pub fn save(&self) -> Result<PathBuf> {
        let dir = Self::config_dir().context("Could not determine config directory")?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = dir.join(CONFIG_FILE_NAME);
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, content).context("Failed to write config file")?;
        Ok(path)
    }

    /// API key for a provider, falling back to the conventional
    /// environment variable.
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let provider = provider.to_lowercase();
        if let Some(key) = self.api_keys.get(&provider) {
            if !key.trim().is_empty() {
                return Some(key.clone());
            }
        }
        let env_var = match provider.as_str() {
            "openai" => "OPENAI_API_KEY",
            "gemini" => "GEMINI_API_KEY",
            "deepl" => "DEEPL_API_KEY",
            _ => return None,
        };
        std::env::var(env_var).ok().filter(|k| !k.is_empty())
    }

    /// On-disk location of the shared translation cache.
    pub fn cache_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.translation.cache_path {
            if !path.as_os_str().is_empty() {
                return Some(path.clone());
            }
        }
        dirs::cache_dir().map(|p| p.join(APP_NAME).join("translations.json"))
    }

    /// Whether extraction keeps entries of the given type.
    pub fn type_enabled(&self, entry_type: crate::parser::EntryType) -> bool {
        use crate::parser::EntryType;
        let t = &self.translation;
        match entry_type {
            EntryType::Dialogue => t.translate_dialogue,
            EntryType::Menu => t.translate_menu,
            EntryType::Ui => t.translate_ui,
            EntryType::Config => t.translate_config,
            EntryType::Gui => t.translate_gui,
            EntryType::Style => t.translate_style,
            EntryType::Function => t.translate_functions,
        }
    }
}

/// Ren'Py language folder name → API language code.
pub fn renpy_lang_to_api(lang: &str) -> &str {
    match lang.to_lowercase().as_str() {
        "turkish" => "tr",
        "english" => "en",
        "german" => "de",
        "french" => "fr",
        "spanish" => "es",
        "italian" => "it",
        "portuguese" => "pt",
        "russian" => "ru",
        "polish" => "pl",
        "dutch" => "nl",
        "japanese" => "ja",
        "korean" => "ko",
        "chinese" => "zh",
        "schinese" => "zh-CN",
        "tchinese" => "zh-TW",
        "thai" => "th",
        "vietnamese" => "vi",
        "indonesian" => "id",
        "arabic" => "ar",
        "czech" => "cs",
        "danish" => "da",
        "finnish" => "fi",
        "greek" => "el",
        "hungarian" => "hu",
        "norwegian" => "no",
        "romanian" => "ro",
        "swedish" => "sv",
        "ukrainian" => "uk",
        _ => "",
    }
}

/// API code → Ren'Py folder name, identity for already-native names.
pub fn api_lang_to_renpy(lang: &str) -> String {
    let lower = lang.to_lowercase();
    for candidate in [
        "turkish",
        "english",
        "german",
        "french",
        "spanish",
        "italian",
        "portuguese",
        "russian",
        "polish",
        "dutch",
        "japanese",
        "korean",
        "chinese",
        "thai",
        "vietnamese",
        "indonesian",
        "arabic",
        "czech",
        "danish",
        "finnish",
        "greek",
        "hungarian",
        "norwegian",
        "romanian",
        "swedish",
        "ukrainian",
    ] {
        if renpy_lang_to_api(candidate) == lower {
            return candidate.to_string();
        }
    }
    lower
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.translation.engine, "google");
        assert!(config.translation.translate_dialogue);
        assert!(!config.translation.translate_gui);
        assert!(config.translation.use_global_cache);
        assert!(!config.proxy.enabled);
        assert_eq!(config.proxy.max_failures, 10);
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
[translation]
target_lang = "japanese"
enable_rpyc_reader = true

[api_keys]
deepl = "key:fx"
"#,
        )
        .unwrap();
        assert_eq!(config.translation.target_lang, "japanese");
        assert!(config.translation.enable_rpyc_reader);
        assert_eq!(config.translation.source_lang, "en");
        assert_eq!(config.api_keys.get("deepl").unwrap(), "key:fx");
    }

    #[test]
    fn lang_mapping_roundtrip() {
        assert_eq!(renpy_lang_to_api("turkish"), "tr");
        assert_eq!(api_lang_to_renpy("tr"), "turkish");
        assert_eq!(api_lang_to_renpy("turkish"), "turkish");
    }
}
