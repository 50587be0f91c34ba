//! Request/result contract shared by every translation backend.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::guard::PlaceholderMap;

/// A translation backend. Web engines scrape free endpoints, API engines
/// need a key, LLM engines speak a chat-completion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Google,
    DeepL,
    OpenAi,
    Gemini,
    LocalLlm,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Google => "google",
            Engine::DeepL => "deepl",
            Engine::OpenAi => "openai",
            Engine::Gemini => "gemini",
            Engine::LocalLlm => "local_llm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "google" => Some(Engine::Google),
            "deepl" => Some(Engine::DeepL),
            "openai" | "gpt" => Some(Engine::OpenAi),
            "gemini" => Some(Engine::Gemini),
            "local_llm" | "local" | "ollama" => Some(Engine::LocalLlm),
            _ => None,
        }
    }

    pub fn is_llm(&self) -> bool {
        matches!(self, Engine::OpenAi | Engine::Gemini | Engine::LocalLlm)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimited,
    Http,
    ContentFiltered,
    Parse,
    EngineMissing,
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Http => "http",
            ErrorKind::ContentFiltered => "content_filtered",
            ErrorKind::Parse => "parse",
            ErrorKind::EngineMissing => "engine_missing",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {detail}")]
pub struct TranslateError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl TranslateError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Transient failures are worth retrying; the rest are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Http
        )
    }
}

/// Provenance carried from extraction through dispatch and back.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub file_path: Option<PathBuf>,
    pub line_number: usize,
    pub character: Option<String>,
    /// The text before placeholder protection was applied.
    pub original_text: Option<String>,
    pub placeholder_map: Option<PlaceholderMap>,
    pub translation_id: Option<String>,
    pub extra: HashMap<String, String>,
}

/// Immutable record of one translation to perform.
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub engine: Engine,
    pub metadata: RequestMetadata,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source: &str, target: &str, engine: Engine) -> Self {
        Self {
            text: text.into(),
            source_lang: source.to_string(),
            target_lang: target.to_string(),
            engine,
            metadata: RequestMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: RequestMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of one translation. Invariant: `success` implies a non-empty
/// `translated_text`; failure carries an error describing the kind.
#[derive(Debug, Clone)]
pub struct TranslationResult {
    pub original_text: String,
    pub translated_text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub engine: Engine,
    pub success: bool,
    pub error: Option<TranslateError>,
    pub confidence: f32,
    pub metadata: RequestMetadata,
    pub quota_exceeded: bool,
}

impl TranslationResult {
    pub fn ok(request: &TranslationRequest, translated: String, confidence: f32) -> Self {
        debug_assert!(!translated.is_empty());
        Self {
            original_text: request.text.clone(),
            translated_text: translated,
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            engine: request.engine,
            success: true,
            error: None,
            confidence,
            metadata: request.metadata.clone(),
            quota_exceeded: false,
        }
    }

    pub fn fail(request: &TranslationRequest, error: TranslateError) -> Self {
        let quota_exceeded = error.kind == ErrorKind::RateLimited;
        Self {
            original_text: request.text.clone(),
            translated_text: String::new(),
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            engine: request.engine,
            success: false,
            error: Some(error),
            confidence: 0.0,
            metadata: request.metadata.clone(),
            quota_exceeded,
        }
    }

    /// Same result re-attributed to another request (dedup fan-out).
    pub fn for_request(&self, request: &TranslationRequest) -> Self {
        let mut copy = self.clone();
        copy.original_text = request.text.clone();
        copy.metadata = request.metadata.clone();
        copy
    }
}

/// Cache key: uniqueness of the 4-tuple identifies one translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub engine: &'static str,
    pub source_lang: String,
    pub target_lang: String,
    pub text: String,
}

impl CacheKey {
    pub fn for_request(request: &TranslationRequest) -> Self {
        Self {
            engine: request.engine.as_str(),
            source_lang: request.source_lang.clone(),
            target_lang: request.target_lang.clone(),
            text: request.text.clone(),
        }
    }
}
