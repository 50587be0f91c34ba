//! Web-scraping Google Translate adapter.
//!
//! Uses the free `translate_a/single` endpoint with `client=gtx`. Batches
//! ride a multi-query transport: unique texts are sliced into groups
//! bounded by a character budget, issued with bounded concurrency, and the
//! returned segments are mapped back to their originating requests by
//! accumulating original-text lengths.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use super::{Translator, classify_reqwest_error, classify_status};
use crate::translate::proxy::ProxyPool;
use crate::translate::types::{
    Engine, ErrorKind, TranslateError, TranslationRequest, TranslationResult,
};

const BASE_URL: &str = "https://translate.googleapis.com/translate_a/single";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = "Mozilla/5.0";

#[derive(Debug, Clone)]
pub struct GoogleOptions {
    /// Character budget per multi-query slice.
    pub max_chars_per_request: usize,
    /// Concurrent multi-query calls in flight.
    pub multi_q_concurrency: usize,
    pub timeout: Duration,
    pub use_proxy: bool,
}

impl Default for GoogleOptions {
    fn default() -> Self {
        Self {
            max_chars_per_request: 6000,
            multi_q_concurrency: 8,
            timeout: DEFAULT_TIMEOUT,
            use_proxy: false,
        }
    }
}

pub struct GoogleTranslator {
    options: GoogleOptions,
    client: reqwest::Client,
    proxy_pool: Option<Arc<ProxyPool>>,
    // reqwest binds a proxy at client construction, so rotation keeps a
    // client per proxy URL.
    proxy_clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl GoogleTranslator {
    pub fn new(options: GoogleOptions, proxy_pool: Option<Arc<ProxyPool>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            options,
            client,
            proxy_pool,
            proxy_clients: Mutex::new(HashMap::new()),
        }
    }

    fn pick_client(&self) -> (reqwest::Client, Option<String>) {
        if !self.options.use_proxy {
            return (self.client.clone(), None);
        }
        let Some(pool) = &self.proxy_pool else {
            return (self.client.clone(), None);
        };
        let Some(proxy) = pool.next_proxy() else {
            return (self.client.clone(), None);
        };
        let url = proxy.url();

        let mut clients = self.proxy_clients.lock().unwrap();
        if let Some(client) = clients.get(&url) {
            return (client.clone(), Some(url));
        }
        match reqwest::Proxy::all(&url)
            .and_then(|p| {
                reqwest::Client::builder()
                    .proxy(p)
                    .timeout(self.options.timeout)
                    .user_agent(USER_AGENT)
                    .build()
            }) {
            Ok(client) => {
                clients.insert(url.clone(), client.clone());
                (client, Some(url))
            }
            Err(_) => (self.client.clone(), None),
        }
    }

    fn report_proxy(&self, proxy_url: &Option<String>, ok: bool) {
        if let (Some(pool), Some(url)) = (&self.proxy_pool, proxy_url) {
            if ok {
                pool.mark_success(url);
            } else {
                pool.mark_failure(url);
            }
        }
    }

    async fn fetch(&self, query_pairs: &[(&str, &str)]) -> Result<serde_json::Value, TranslateError> {
        let query: String = query_pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{BASE_URL}?{query}");

        let (client, proxy_url) = self.pick_client();
        let response = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                self.report_proxy(&proxy_url, false);
                return Err(classify_reqwest_error(&e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.report_proxy(&proxy_url, false);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        self.report_proxy(&proxy_url, true);

        serde_json::from_str(&body)
            .map_err(|e| TranslateError::new(ErrorKind::Parse, e.to_string()))
    }

    async fn single(&self, request: &TranslationRequest) -> TranslationResult {
        let data = match self
            .fetch(&[
                ("client", "gtx"),
                ("sl", &request.source_lang),
                ("tl", &request.target_lang),
                ("dt", "t"),
                ("q", &request.text),
            ])
            .await
        {
            Ok(data) => data,
            Err(e) => return TranslationResult::fail(request, e),
        };

        let mut translated = String::new();
        if let Some(outer) = data.get(0).and_then(|v| v.as_array()) {
            for item in outer {
                if let Some(part) = item.get(0).and_then(|v| v.as_str()) {
                    translated.push_str(part);
                }
            }
        }

        if translated.is_empty() {
            TranslationResult::fail(
                request,
                TranslateError::new(ErrorKind::Parse, "no translation segments in response"),
            )
        } else {
            TranslationResult::ok(request, translated, 0.9)
        }
    }

    /// One HTTP call carrying several `q` parameters. Segment boundaries
    /// come back merged, so translated text is reassembled by accumulating
    /// original fragments until they equal the expected source text.
    async fn multi_q(&self, batch: &[TranslationRequest]) -> Vec<TranslationResult> {
        if batch.is_empty() {
            return Vec::new();
        }
        if batch.len() == 1 {
            return vec![self.single(&batch[0]).await];
        }

        let mut pairs: Vec<(&str, &str)> = vec![
            ("client", "gtx"),
            ("sl", &batch[0].source_lang),
            ("tl", &batch[0].target_lang),
            ("dt", "t"),
        ];
        for request in batch {
            pairs.push(("q", &request.text));
        }

        match self.fetch(&pairs).await.and_then(|data| self.map_segments(batch, &data)) {
            Ok(results) => results,
            Err(e) => {
                tracing::debug!("multi-query transport failed ({e}), retrying singly");
                let mut results = Vec::with_capacity(batch.len());
                for request in batch {
                    results.push(self.single(request).await);
                }
                results
            }
        }
    }

    fn map_segments(
        &self,
        batch: &[TranslationRequest],
        data: &serde_json::Value,
    ) -> Result<Vec<TranslationResult>, TranslateError> {
        let segments = data
            .get(0)
            .and_then(|v| v.as_array())
            .ok_or_else(|| TranslateError::new(ErrorKind::Parse, "no segments"))?;

        let mut mapped: Vec<Option<String>> = vec![None; batch.len()];
        let mut idx = 0;
        let mut acc_original = String::new();
        let mut acc_translated = String::new();

        for segment in segments {
            let translated = segment.get(0).and_then(|v| v.as_str()).unwrap_or("");
            let Some(original) = segment.get(1).and_then(|v| v.as_str()) else {
                continue;
            };
            acc_original.push_str(original);
            acc_translated.push_str(translated);

            if idx < batch.len() {
                let expected = &batch[idx].text;
                if acc_original.trim_end() == expected.trim_end()
                    || acc_original.len() >= expected.len()
                {
                    if acc_original.len() > expected.len() + 20 {
                        return Err(TranslateError::new(
                            ErrorKind::Parse,
                            "segment alignment drifted",
                        ));
                    }
                    mapped[idx] = Some(acc_translated.trim().to_string());
                    idx += 1;
                    acc_original.clear();
                    acc_translated.clear();
                    if idx >= batch.len() {
                        break;
                    }
                }
            }
        }

        if mapped.iter().any(|m| m.is_none()) {
            return Err(TranslateError::new(ErrorKind::Parse, "incomplete multi-query mapping"));
        }

        Ok(batch
            .iter()
            .zip(mapped)
            .map(|(request, text)| TranslationResult::ok(request, text.unwrap(), 0.9))
            .collect())
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    fn kind(&self) -> Engine {
        Engine::Google
    }

    async fn translate_single(&self, request: &TranslationRequest) -> TranslationResult {
        self.single(request).await
    }

    async fn translate_batch(&self, requests: &[TranslationRequest]) -> Vec<TranslationResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        // Mixed language pairs cannot share one multi-query call.
        let uniform = requests.iter().all(|r| {
            r.source_lang == requests[0].source_lang && r.target_lang == requests[0].target_lang
        });
        if !uniform {
            let mut results = Vec::with_capacity(requests.len());
            for request in requests {
                results.push(self.single(request).await);
            }
            return results;
        }

        // Slice into groups bounded by the character budget.
        let mut slices: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_chars = 0usize;
        for (i, request) in requests.iter().enumerate() {
            let len = request.text.len();
            if !current.is_empty() && current_chars + len > self.options.max_chars_per_request {
                slices.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            current.push(i);
            current_chars += len;
        }
        if !current.is_empty() {
            slices.push(current);
        }

        let semaphore = Arc::new(Semaphore::new(self.options.multi_q_concurrency.max(1)));
        let futures = slices.into_iter().map(|indices| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let slice: Vec<TranslationRequest> =
                    indices.iter().map(|&i| requests[i].clone()).collect();
                let results = self.multi_q(&slice).await;
                indices.into_iter().zip(results).collect::<Vec<_>>()
            }
        });

        let mut ordered: Vec<Option<TranslationResult>> = vec![None; requests.len()];
        for pairs in futures::future::join_all(futures).await {
            for (i, result) in pairs {
                ordered[i] = Some(result);
            }
        }

        ordered
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.unwrap_or_else(|| {
                    TranslationResult::fail(
                        &requests[i],
                        TranslateError::new(ErrorKind::Other, "slice produced no result"),
                    )
                })
            })
            .collect()
    }

    fn supports_batch_transport(&self) -> bool {
        true
    }
}
