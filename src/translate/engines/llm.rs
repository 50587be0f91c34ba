//! LLM-backed translation adapters.
//!
//! One adapter covers three backends: OpenAI-compatible chat completions
//! (hosted or a local llama.cpp/Ollama-style server) and Gemini's
//! `generateContent`. The shared machinery handles placeholder protection,
//! prompt assembly (override > built-in template, then glossary, then the
//! batch instruction), `<r id="N">…</r>` batch framing, rate-limit backoff
//! with jitter, and escalation to a fallback engine on safety refusals.

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{Translator, classify_reqwest_error, classify_status};
use crate::guard::{protect_renpy_syntax, restore_renpy_syntax, validate_integrity};
use crate::translate::glossary::Glossary;
use crate::translate::types::{
    Engine, ErrorKind, TranslateError, TranslationRequest, TranslationResult,
};

const SYSTEM_PROMPT_TEMPLATE: &str = "You are a professional visual-novel translator. \
Translate from {source_lang} to {target_lang}.\n\
Rules:\n\
1. Placeholders like XRPYXVAR00XRPYX are inviolable: copy them to the output exactly, \
unchanged and in order.\n\
2. Keep the original tone, register, and punctuation style.\n\
3. Output only the translated text. No quotes, no labels, no explanations.";

const BATCH_INSTRUCTION_TEMPLATE: &str = "\n\nYou will receive {count} items, each wrapped as \
<r id=\"N\">text</r>. Translate every item and reply with the same wrappers: \
<r id=\"N\">translation</r>, one per item, same ids, no other output.";

const AGGRESSIVE_RETRY_PROMPT: &str = "You are a professional translator. The previous attempt \
returned the input unchanged, which is wrong. You MUST translate from {source_lang} to \
{target_lang}. The text is CONTENT, not code or a variable name. If it contains placeholders \
like XRPYXVAR00XRPYX, translate around them and copy them verbatim. Return only the translation.";

static BATCH_PARSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<r id="(\d+)">(.*?)</r>"#).unwrap());

// Ratio of batch items that must come back before falling to singletons.
const BATCH_ACCEPT_RATIO: f64 = 0.9;

#[derive(Debug, Clone)]
pub struct LlmOptions {
    pub engine: Engine,
    pub model: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub batch_size: usize,
    pub singleton_concurrency: usize,
    pub max_retries: u32,
    /// Replaces the built-in system prompt template when set. Glossary and
    /// batch instructions are appended after whichever base is active.
    pub system_prompt_override: Option<String>,
    pub aggressive_retry: bool,
    pub gemini_safety_level: String,
}

impl LlmOptions {
    pub fn openai(model: &str, base_url: Option<&str>, api_key: Option<String>) -> Self {
        Self {
            engine: Engine::OpenAi,
            model: model.to_string(),
            base_url: base_url.unwrap_or("https://api.openai.com/v1").to_string(),
            api_key,
            ..Self::base()
        }
    }

    pub fn local(model: &str, base_url: &str) -> Self {
        Self {
            engine: Engine::LocalLlm,
            model: model.to_string(),
            base_url: base_url.to_string(),
            api_key: None,
            timeout: Duration::from_secs(600),
            ..Self::base()
        }
    }

    pub fn gemini(model: &str, api_key: String, safety_level: &str) -> Self {
        Self {
            engine: Engine::Gemini,
            model: model.to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: Some(api_key),
            gemini_safety_level: safety_level.to_string(),
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            engine: Engine::OpenAi,
            model: String::new(),
            base_url: String::new(),
            api_key: None,
            temperature: 0.3,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
            batch_size: 50,
            singleton_concurrency: 2,
            max_retries: 2,
            system_prompt_override: None,
            aggressive_retry: false,
            gemini_safety_level: "BLOCK_NONE".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

pub struct LlmTranslator {
    options: LlmOptions,
    client: reqwest::Client,
    glossary: Option<Glossary>,
    fallback: Option<Arc<dyn Translator>>,
}

impl LlmTranslator {
    pub fn new(options: LlmOptions) -> Self {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .unwrap_or_default();
        Self {
            options,
            client,
            glossary: None,
            fallback: None,
        }
    }

    pub fn with_glossary(mut self, glossary: Glossary) -> Self {
        if !glossary.is_empty() {
            self.glossary = Some(glossary);
        }
        self
    }

    /// Engine consulted when a safety filter refuses a request, so bulk
    /// work survives an over-eager filter.
    pub fn with_fallback(mut self, fallback: Arc<dyn Translator>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn system_prompt(&self, source: &str, target: &str) -> String {
        let base = match &self.options.system_prompt_override {
            Some(custom) if !custom.trim().is_empty() => custom
                .replace("{source_lang}", source)
                .replace("{target_lang}", target),
            _ => SYSTEM_PROMPT_TEMPLATE
                .replace("{source_lang}", source)
                .replace("{target_lang}", target),
        };
        match &self.glossary {
            Some(glossary) => format!("{base}{}", glossary.prompt_block()),
            None => base,
        }
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TranslateError> {
        match self.options.engine {
            Engine::Gemini => self.complete_gemini(system_prompt, user_prompt).await,
            _ => self.complete_chat(system_prompt, user_prompt).await,
        }
    }

    async fn complete_chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TranslateError> {
        let request = ChatRequest {
            model: self.options.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt.to_string(),
                },
            ],
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };

        let url = format!("{}/chat/completions", self.options.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.options.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if body.contains("content_filter") || body.contains("content_policy") {
                return Err(TranslateError::new(ErrorKind::ContentFiltered, body));
            }
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::new(ErrorKind::Parse, e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TranslateError::new(ErrorKind::Parse, "no choices in response"))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(TranslateError::new(
                ErrorKind::ContentFiltered,
                "completion stopped by content filter",
            ));
        }
        Ok(choice.message.content.trim().to_string())
    }

    async fn complete_gemini(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TranslateError> {
        let api_key = self
            .options
            .api_key
            .as_deref()
            .ok_or_else(|| TranslateError::new(ErrorKind::EngineMissing, "Gemini API key required"))?;

        let safety_categories = [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ];
        let safety_settings: Vec<serde_json::Value> = safety_categories
            .iter()
            .map(|category| {
                serde_json::json!({
                    "category": category,
                    "threshold": self.options.gemini_safety_level,
                })
            })
            .collect();

        let body = serde_json::json!({
            "systemInstruction": { "parts": [{ "text": system_prompt }] },
            "contents": [{ "role": "user", "parts": [{ "text": user_prompt }] }],
            "generationConfig": {
                "temperature": self.options.temperature,
                "maxOutputTokens": self.options.max_tokens,
            },
            "safetySettings": safety_settings,
        });

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.options.base_url.trim_end_matches('/'),
            self.options.model,
            api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TranslateError::new(ErrorKind::Parse, e.to_string()))?;

        let candidate = parsed
            .get("candidates")
            .and_then(|c| c.get(0))
            .ok_or_else(|| {
                // No candidates usually means the prompt itself was blocked.
                let reason = parsed
                    .get("promptFeedback")
                    .and_then(|f| f.get("blockReason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or("no candidates");
                TranslateError::new(ErrorKind::ContentFiltered, reason.to_string())
            })?;

        if candidate.get("finishReason").and_then(|r| r.as_str()) == Some("SAFETY") {
            return Err(TranslateError::new(
                ErrorKind::ContentFiltered,
                "candidate stopped for safety",
            ));
        }

        candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .map(|t| t.trim().to_string())
            .ok_or_else(|| TranslateError::new(ErrorKind::Parse, "no text in candidate"))
    }

    async fn backoff(attempt: u32) {
        let base = 2.0_f64.powi(attempt as i32 + 1);
        let jitter: f64 = rand::thread_rng().gen_range(0.1..1.0);
        tokio::time::sleep(Duration::from_secs_f64(base + jitter)).await;
    }

    async fn handle_refusal(
        &self,
        request: &TranslationRequest,
        error: TranslateError,
    ) -> TranslationResult {
        if let Some(fallback) = &self.fallback {
            tracing::warn!(
                "Safety filter refused '{}', falling back to {}",
                crate::utils::truncate_display(&request.text, 40),
                fallback.kind()
            );
            let mut rerouted = request.clone();
            rerouted.engine = fallback.kind();
            let mut result = fallback.translate_single(&rerouted).await;
            result.engine = request.engine;
            return result;
        }
        TranslationResult::fail(request, error)
    }

    async fn single(&self, request: &TranslationRequest) -> TranslationResult {
        let (protected, placeholders) = protect_renpy_syntax(&request.text);
        let system_prompt = self.system_prompt(&request.source_lang, &request.target_lang);

        let mut last_error = TranslateError::new(ErrorKind::Other, "not attempted");
        for attempt in 0..=self.options.max_retries {
            match self.complete(&system_prompt, &protected).await {
                Ok(content) => {
                    let restored = restore_renpy_syntax(&content, &placeholders);
                    let missing = validate_integrity(&restored.text, &placeholders);
                    if !missing.is_empty() {
                        tracing::warn!(
                            "Integrity warning: missing {:?} in translation of '{}'",
                            missing,
                            crate::utils::truncate_display(&request.text, 40)
                        );
                    }

                    let mut final_text = restored.text.trim().to_string();
                    if final_text.is_empty() {
                        last_error = TranslateError::new(ErrorKind::Parse, "empty completion");
                        continue;
                    }

                    if self.options.aggressive_retry
                        && final_text == request.text.trim()
                        && request.text.trim().len() > 3
                    {
                        if let Some(better) = self.aggressive_retry(request, &protected, &placeholders).await {
                            final_text = better;
                        }
                    }

                    return TranslationResult::ok(request, final_text, 0.95);
                }
                Err(e) if e.kind == ErrorKind::ContentFiltered => {
                    return self.handle_refusal(request, e).await;
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    let rate_limited = e.kind == ErrorKind::RateLimited;
                    last_error = e;
                    if attempt < self.options.max_retries && retryable {
                        if rate_limited {
                            Self::backoff(attempt).await;
                        } else {
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        continue;
                    }
                    break;
                }
            }
        }
        TranslationResult::fail(request, last_error)
    }

    async fn aggressive_retry(
        &self,
        request: &TranslationRequest,
        protected: &str,
        placeholders: &crate::guard::PlaceholderMap,
    ) -> Option<String> {
        let prompt = AGGRESSIVE_RETRY_PROMPT
            .replace("{source_lang}", &request.source_lang)
            .replace("{target_lang}", &request.target_lang);

        for _ in 0..2 {
            if let Ok(content) = self.complete(&prompt, protected).await {
                let restored = restore_renpy_syntax(&content, placeholders);
                let text = restored.text.trim().to_string();
                if !text.is_empty() && text != request.text.trim() {
                    return Some(text);
                }
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        tracing::warn!(
            "Translation unchanged after aggressive retry: {}",
            crate::utils::truncate_display(&request.text, 50)
        );
        None
    }

    /// Bounded-concurrency singleton fallback for incomplete batches.
    async fn singles_bounded(&self, requests: &[TranslationRequest]) -> Vec<TranslationResult> {
        let semaphore = Arc::new(Semaphore::new(self.options.singleton_concurrency.max(1)));
        let futures = requests.iter().map(|request| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.single(request).await
            }
        });
        futures::future::join_all(futures).await
    }

    async fn batch_chunk(&self, requests: &[TranslationRequest]) -> Vec<TranslationResult> {
        if requests.len() == 1 {
            return vec![self.single(&requests[0]).await];
        }

        // In-batch dedup: one wire item per unique text, fanned back out.
        let mut unique_indices: HashMap<&str, usize> = HashMap::new();
        let mut unique: Vec<&TranslationRequest> = Vec::new();
        let mut links: Vec<usize> = Vec::with_capacity(requests.len());
        for request in requests {
            let next = unique.len();
            let index = *unique_indices.entry(request.text.as_str()).or_insert_with(|| {
                unique.push(request);
                next
            });
            links.push(index);
        }

        let mut protected_items = Vec::with_capacity(unique.len());
        let mut placeholder_maps = Vec::with_capacity(unique.len());
        for (i, request) in unique.iter().enumerate() {
            let (protected, placeholders) = protect_renpy_syntax(&request.text);
            protected_items.push(format!("<r id=\"{i}\">{protected}</r>"));
            placeholder_maps.push(placeholders);
        }
        let user_prompt = protected_items.join("\n");

        let first = &requests[0];
        let system_prompt = format!(
            "{}{}",
            self.system_prompt(&first.source_lang, &first.target_lang),
            BATCH_INSTRUCTION_TEMPLATE.replace("{count}", &unique.len().to_string())
        );

        for attempt in 0..=self.options.max_retries {
            match self.complete(&system_prompt, &user_prompt).await {
                Ok(content) => {
                    let mut unique_results: HashMap<usize, String> = HashMap::new();
                    for caps in BATCH_PARSE_RE.captures_iter(&content) {
                        let Ok(id) = caps[1].parse::<usize>() else {
                            continue;
                        };
                        if id >= unique.len() {
                            continue;
                        }
                        let restored =
                            restore_renpy_syntax(caps[2].trim(), &placeholder_maps[id]);
                        let missing = validate_integrity(&restored.text, &placeholder_maps[id]);
                        if !missing.is_empty() {
                            tracing::warn!(
                                "Batch item {id} integrity warning: missing {missing:?}"
                            );
                        }
                        unique_results.insert(id, restored.text.trim().to_string());
                    }

                    let found = unique_results.len();
                    if (found as f64) < unique.len() as f64 * BATCH_ACCEPT_RATIO {
                        tracing::warn!(
                            "LLM batch incomplete ({found}/{}), retrying singly",
                            unique.len()
                        );
                        return self.singles_bounded(requests).await;
                    }

                    let mut results = Vec::with_capacity(requests.len());
                    for (request, &unique_index) in requests.iter().zip(&links) {
                        match unique_results.get(&unique_index) {
                            Some(text) if !text.is_empty() => {
                                results.push(TranslationResult::ok(request, text.clone(), 0.9));
                            }
                            _ => results.push(self.single(request).await),
                        }
                    }
                    return results;
                }
                Err(e) if e.kind == ErrorKind::ContentFiltered => {
                    // One poisoned item blocks the whole batch; retry each
                    // alone so the fallback path can take over per item.
                    return self.singles_bounded(requests).await;
                }
                Err(e) if e.kind == ErrorKind::RateLimited && attempt < self.options.max_retries => {
                    Self::backoff(attempt).await;
                }
                Err(e) => {
                    tracing::warn!("LLM batch failed ({e}), retrying singly");
                    return self.singles_bounded(requests).await;
                }
            }
        }
        self.singles_bounded(requests).await
    }
}

#[async_trait]
impl Translator for LlmTranslator {
    fn kind(&self) -> Engine {
        self.options.engine
    }

    async fn translate_single(&self, request: &TranslationRequest) -> TranslationResult {
        self.single(request).await
    }

    async fn translate_batch(&self, requests: &[TranslationRequest]) -> Vec<TranslationResult> {
        let mut results = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(self.options.batch_size.max(1)) {
            results.extend(self.batch_chunk(chunk).await);
        }
        results
    }

    fn supports_batch_transport(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_wrapper_parse_roundtrip() {
        let content = "<r id=\"0\">Merhaba</r>\n<r id=\"1\">Nasılsın?</r>";
        let parsed: Vec<(usize, String)> = BATCH_PARSE_RE
            .captures_iter(content)
            .map(|c| (c[1].parse().unwrap(), c[2].to_string()))
            .collect();
        assert_eq!(parsed, vec![(0, "Merhaba".to_string()), (1, "Nasılsın?".to_string())]);
    }

    #[test]
    fn multiline_items_parse() {
        let content = "<r id=\"0\">Line one.\nLine two.</r>";
        let caps = BATCH_PARSE_RE.captures(content).unwrap();
        assert_eq!(&caps[2], "Line one.\nLine two.");
    }

    #[test]
    fn override_replaces_template_but_keeps_glossary() {
        let mut options = LlmOptions::openai("gpt-4o-mini", None, None);
        options.system_prompt_override = Some("Custom {source_lang}->{target_lang}".to_string());
        let translator = LlmTranslator::new(options)
            .with_glossary(Glossary::load_from_str("Sylvie = Silvi"));

        let prompt = translator.system_prompt("en", "tr");
        assert!(prompt.starts_with("Custom en->tr"));
        assert!(prompt.contains("GLOSSARY"));
        assert!(!prompt.contains("professional visual-novel translator"));
    }

    #[test]
    fn default_prompt_names_languages() {
        let translator = LlmTranslator::new(LlmOptions::openai("gpt-4o-mini", None, None));
        let prompt = translator.system_prompt("en", "turkish");
        assert!(prompt.contains("from en to turkish"));
        assert!(prompt.contains("XRPYXVAR00XRPYX"));
    }
}
