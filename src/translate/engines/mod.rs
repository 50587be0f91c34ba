//! Translation backend adapters.
//!
//! Every backend satisfies the same small contract: translate one request,
//! translate an order-preserving batch, close. Caching, deduplication,
//! retry, and concurrency limits all live in the manager; adapters only
//! talk to their service.

pub mod deepl;
pub mod google;
pub mod llm;

use async_trait::async_trait;

use super::types::{Engine, TranslationRequest, TranslationResult};

#[async_trait]
pub trait Translator: Send + Sync {
    fn kind(&self) -> Engine;

    async fn translate_single(&self, request: &TranslationRequest) -> TranslationResult;

    /// Order-preserving: the i-th result corresponds to `requests[i]` and
    /// the lengths match, whatever the transport does internally.
    async fn translate_batch(&self, requests: &[TranslationRequest]) -> Vec<TranslationResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.translate_single(request).await);
        }
        results
    }

    /// True when the backend has a genuine multi-query transport worth
    /// routing whole batches through.
    fn supports_batch_transport(&self) -> bool {
        false
    }

    async fn close(&self) {}
}

/// Map a reqwest failure onto the typed error taxonomy.
pub(crate) fn classify_reqwest_error(e: &reqwest::Error) -> super::types::TranslateError {
    use super::types::{ErrorKind, TranslateError};

    if e.is_timeout() {
        TranslateError::new(ErrorKind::Timeout, e.to_string())
    } else if let Some(status) = e.status() {
        if status.as_u16() == 429 {
            TranslateError::new(ErrorKind::RateLimited, e.to_string())
        } else {
            TranslateError::new(ErrorKind::Http, e.to_string())
        }
    } else {
        TranslateError::new(ErrorKind::Network, e.to_string())
    }
}

pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> super::types::TranslateError {
    use super::types::{ErrorKind, TranslateError};

    let detail = format!("HTTP {}: {}", status, crate::utils::truncate_display(body, 200));
    if status.as_u16() == 429 {
        TranslateError::new(ErrorKind::RateLimited, detail)
    } else {
        TranslateError::new(ErrorKind::Http, detail)
    }
}
