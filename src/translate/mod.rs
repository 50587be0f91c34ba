//! Translation subsystem: request/result types, the LRU cache, the proxy
//! pool, backend adapters, and the dispatching manager.

pub mod cache;
pub mod engines;
pub mod glossary;
pub mod manager;
pub mod proxy;
pub mod types;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use cache::TranslationCache;
use engines::deepl::DeepLTranslator;
use engines::google::{GoogleOptions, GoogleTranslator};
use engines::llm::{LlmOptions, LlmTranslator};
use glossary::Glossary;
use manager::{ManagerOptions, TranslationManager};
use proxy::ProxyPool;
use types::Engine;

/// Build a manager with every engine the configuration can support, plus
/// the shared proxy pool when proxying is enabled. Engines missing
/// required keys are simply not registered; requesting one later yields an
/// `engine_missing` failure result rather than an error here.
pub fn build_manager(
    config: &Config,
) -> Result<(TranslationManager, Option<Arc<ProxyPool>>)> {
    let t = &config.translation;

    let options = ManagerOptions {
        max_retries: t.max_retries,
        request_delay: std::time::Duration::from_millis(t.request_delay),
        max_concurrent_requests: t.max_concurrent_threads,
        cache_capacity: t.cache_capacity,
        ..Default::default()
    };
    let mut manager = TranslationManager::new(options);

    let proxy_pool = if config.proxy.enabled {
        Some(Arc::new(ProxyPool::new(config.proxy.clone())))
    } else {
        None
    };

    let glossary = match &t.glossary_path {
        Some(path) if !path.as_os_str().is_empty() => match Glossary::load(path) {
            Ok(glossary) => {
                tracing::info!("Loaded {} glossary terms", glossary.len());
                glossary
            }
            Err(e) => {
                tracing::warn!("Failed to load glossary: {e}");
                Glossary::new()
            }
        },
        _ => Glossary::new(),
    };

    let google_options = GoogleOptions {
        max_chars_per_request: t.max_chars_per_request,
        multi_q_concurrency: if t.use_multi_endpoint { 8 } else { 1 },
        timeout: std::time::Duration::from_secs(t.timeout),
        use_proxy: config.proxy.enabled,
    };
    let google: Arc<dyn engines::Translator> =
        Arc::new(GoogleTranslator::new(google_options, proxy_pool.clone()));
    manager.add_translator(google.clone());

    if let Some(key) = config.api_key("deepl") {
        manager.add_translator(Arc::new(DeepLTranslator::new(key)));
    }

    let llm_common = |mut options: LlmOptions| {
        options.temperature = t.ai_temperature;
        options.max_tokens = t.ai_max_tokens;
        options.batch_size = t.ai_batch_size;
        options.singleton_concurrency = t.ai_concurrency;
        options.max_retries = t.max_retries;
        options.system_prompt_override = t.ai_system_prompt.clone();
        options.aggressive_retry = t.aggressive_retry_translation;
        LlmTranslator::new(options)
            .with_glossary(glossary.clone())
            .with_fallback(google.clone())
    };

    if let Some(key) = config.api_key("openai") {
        manager.add_translator(Arc::new(llm_common(LlmOptions::openai(
            &t.openai_model,
            t.openai_base_url.as_deref(),
            Some(key),
        ))));
    }
    if let Some(key) = config.api_key("gemini") {
        manager.add_translator(Arc::new(llm_common(LlmOptions::gemini(
            &t.gemini_model,
            key,
            &t.gemini_safety_level,
        ))));
    }
    manager.add_translator(Arc::new(llm_common(LlmOptions::local(
        &t.local_llm_model,
        &t.local_llm_url,
    ))));

    // A shared cache file lets repeated runs skip the network entirely.
    if t.use_global_cache {
        if let Some(path) = config.cache_file() {
            if path.exists() {
                match manager.cache().load(&path) {
                    Ok(count) => tracing::info!("Loaded {count} cached translations"),
                    Err(e) => tracing::warn!("Cache load failed: {e}"),
                }
            }
        }
    }

    Ok((manager, proxy_pool))
}

/// Persist the cache if the configuration asks for it.
pub fn persist_cache(config: &Config, cache: &TranslationCache) {
    if !config.translation.use_global_cache {
        return;
    }
    if let Some(path) = config.cache_file() {
        if let Err(e) = cache.save(&path) {
            tracing::warn!("Cache save failed: {e}");
        }
    }
}

/// Resolve the engine named in config/CLI, defaulting to the free web
/// engine.
pub fn resolve_engine(name: &str) -> Engine {
    Engine::parse(name).unwrap_or(Engine::Google)
}
