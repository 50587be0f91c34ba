//! DeepL API adapter.
//!
//! Form-encoded `v2/translate` calls with up to 50 texts per request.
//! Free-tier keys (suffix `:fx`) route to the `api-free` host.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{Translator, classify_reqwest_error, classify_status};
use crate::translate::types::{
    Engine, ErrorKind, TranslateError, TranslationRequest, TranslationResult,
};

const BATCH_SIZE: usize = 50;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

pub struct DeepLTranslator {
    api_key: String,
    client: reqwest::Client,
}

impl DeepLTranslator {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { api_key, client }
    }

    fn endpoint(&self) -> &'static str {
        if self.api_key.ends_with(":fx") {
            "https://api-free.deepl.com/v2/translate"
        } else {
            "https://api.deepl.com/v2/translate"
        }
    }

    fn normalize_lang(lang: &str) -> String {
        // DeepL wants upper-case ISO codes and rejects "auto" as target.
        match lang.to_lowercase().as_str() {
            "zh-cn" | "zh_cn" | "chinese" => "ZH".to_string(),
            other => other.to_uppercase(),
        }
    }

    async fn request_chunk(
        &self,
        requests: &[TranslationRequest],
    ) -> Result<Vec<String>, TranslateError> {
        let mut form: Vec<(&str, String)> = requests
            .iter()
            .map(|r| ("text", r.text.clone()))
            .collect();
        form.push(("target_lang", Self::normalize_lang(&requests[0].target_lang)));
        if requests[0].source_lang != "auto" {
            form.push(("source_lang", Self::normalize_lang(&requests[0].source_lang)));
        }

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .form(&form)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: DeepLResponse = response
            .json()
            .await
            .map_err(|e| TranslateError::new(ErrorKind::Parse, e.to_string()))?;

        if parsed.translations.len() != requests.len() {
            return Err(TranslateError::new(
                ErrorKind::Parse,
                "response count does not match request count",
            ));
        }
        Ok(parsed.translations.into_iter().map(|t| t.text).collect())
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    fn kind(&self) -> Engine {
        Engine::DeepL
    }

    async fn translate_single(&self, request: &TranslationRequest) -> TranslationResult {
        if self.api_key.is_empty() {
            return TranslationResult::fail(
                request,
                TranslateError::new(ErrorKind::EngineMissing, "DeepL API key required"),
            );
        }
        match self.request_chunk(std::slice::from_ref(request)).await {
            Ok(mut texts) => {
                let text = texts.remove(0);
                if text.is_empty() {
                    TranslationResult::fail(
                        request,
                        TranslateError::new(ErrorKind::Parse, "empty translation"),
                    )
                } else {
                    TranslationResult::ok(request, text, 0.95)
                }
            }
            Err(e) => TranslationResult::fail(request, e),
        }
    }

    async fn translate_batch(&self, requests: &[TranslationRequest]) -> Vec<TranslationResult> {
        let mut results = Vec::with_capacity(requests.len());
        for chunk in requests.chunks(BATCH_SIZE) {
            match self.request_chunk(chunk).await {
                Ok(texts) => {
                    for (request, text) in chunk.iter().zip(texts) {
                        if text.is_empty() {
                            results.push(TranslationResult::fail(
                                request,
                                TranslateError::new(ErrorKind::Parse, "empty translation"),
                            ));
                        } else {
                            results.push(TranslationResult::ok(request, text, 0.95));
                        }
                    }
                }
                Err(e) => {
                    for request in chunk {
                        results.push(TranslationResult::fail(request, e.clone()));
                    }
                }
            }
        }
        results
    }

    fn supports_batch_transport(&self) -> bool {
        true
    }
}
