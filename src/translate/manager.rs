//! Translation dispatch: caching, deduplication, retry, and adaptive
//! concurrency on top of the engine adapters.
//!
//! The manager owns everything the adapters do not: it consults the LRU
//! cache before dispatch, collapses duplicate texts inside a batch,
//! guarantees at most one in-flight call per cache key, retries transient
//! failures with exponential backoff plus jitter, and tunes the dispatch
//! semaphore from a sliding window of latency/failure telemetry.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, Semaphore};

use super::cache::{CacheStats, TranslationCache};
use super::engines::Translator;
use super::types::{
    CacheKey, Engine, ErrorKind, TranslateError, TranslationRequest, TranslationResult,
};

const METRICS_WINDOW: usize = 500;
const MIN_SAMPLES_TO_ADAPT: usize = 20;

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Pause inserted before every adapter call, for rate-shy endpoints.
    pub request_delay: Duration,
    pub max_concurrent_requests: usize,
    pub concurrency_floor: usize,
    pub concurrency_cap: usize,
    pub adapt_interval: Duration,
    pub adaptive_enabled: bool,
    pub cache_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(200),
            request_delay: Duration::ZERO,
            max_concurrent_requests: 64,
            concurrency_floor: 4,
            concurrency_cap: 512,
            adapt_interval: Duration::from_secs(5),
            adaptive_enabled: true,
            cache_capacity: 20_000,
        }
    }
}

#[derive(Debug, Default)]
struct MetricsWindow {
    samples: VecDeque<(f64, bool)>,
    last_adapt: Option<Instant>,
}

pub struct TranslationManager {
    translators: HashMap<Engine, Arc<dyn Translator>>,
    cache: Arc<TranslationCache>,
    options: ManagerOptions,
    // The semaphore is sized at the cap; lowering the effective limit
    // parks "blocker" permits instead, since a tokio semaphore cannot
    // shrink.
    dispatch: Arc<Semaphore>,
    blockers: Mutex<Vec<tokio::sync::OwnedSemaphorePermit>>,
    current_limit: AtomicUsize,
    metrics: Mutex<MetricsWindow>,
    inflight: Mutex<HashMap<CacheKey, Arc<Notify>>>,
    adapter_invocations: AtomicU64,
}

impl TranslationManager {
    pub fn new(options: ManagerOptions) -> Self {
        let cap = options.concurrency_cap.max(1);
        let initial = options
            .max_concurrent_requests
            .clamp(options.concurrency_floor.max(1), cap);
        let dispatch = Arc::new(Semaphore::new(cap));

        // Park the difference between cap and the starting limit, one
        // permit per blocker so the limit can move in steps of one.
        let mut blockers = Vec::with_capacity(cap - initial);
        for _ in 0..cap - initial {
            blockers.push(
                dispatch
                    .clone()
                    .try_acquire_owned()
                    .expect("fresh semaphore has all permits"),
            );
        }

        Self {
            translators: HashMap::new(),
            cache: Arc::new(TranslationCache::with_capacity(options.cache_capacity)),
            dispatch,
            blockers: Mutex::new(blockers),
            current_limit: AtomicUsize::new(initial),
            metrics: Mutex::new(MetricsWindow::default()),
            inflight: Mutex::new(HashMap::new()),
            adapter_invocations: AtomicU64::new(0),
            options,
        }
    }

    pub fn add_translator(&mut self, translator: Arc<dyn Translator>) {
        self.translators.insert(translator.kind(), translator);
    }

    pub fn remove_translator(&mut self, engine: Engine) {
        self.translators.remove(&engine);
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Adapter calls actually issued (cache hits and dedup fan-outs do not
    /// count). Test scenarios assert on this.
    pub fn adapter_invocations(&self) -> u64 {
        self.adapter_invocations.load(Ordering::Relaxed)
    }

    pub fn current_concurrency(&self) -> usize {
        self.current_limit.load(Ordering::Relaxed)
    }

    pub async fn close_all(&self) {
        for translator in self.translators.values() {
            translator.close().await;
        }
    }

    /// Translate one request with cache consult, single-flight, and retry.
    pub async fn translate_with_retry(&self, request: &TranslationRequest) -> TranslationResult {
        let Some(translator) = self.translators.get(&request.engine) else {
            return TranslationResult::fail(
                request,
                TranslateError::new(
                    ErrorKind::EngineMissing,
                    format!("translator {} not available", request.engine),
                ),
            );
        };

        let key = CacheKey::for_request(request);
        loop {
            if let Some(hit) = self.cache.get_result(request) {
                return hit;
            }

            // Single flight: the first caller for a key does the work,
            // everyone else waits and re-checks the cache. Interest is
            // registered while the map lock is held; the leader removes
            // its entry under the same lock before notifying, so a waiter
            // either sees the entry and gets woken, or misses it and
            // takes the lead itself.
            {
                let mut inflight = self.inflight.lock().await;
                if let Some(existing) = inflight.get(&key) {
                    let notify = existing.clone();
                    let notified = notify.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    drop(inflight);
                    notified.await;
                    continue;
                }
                inflight.insert(key.clone(), Arc::new(Notify::new()));
            }

            let result = self.dispatch_with_retry(translator.as_ref(), request).await;

            if result.success {
                self.cache.put(key.clone(), &result);
            }
            let notify = self.inflight.lock().await.remove(&key);
            if let Some(notify) = notify {
                notify.notify_waiters();
            }
            // Waiters of a failed flight re-check the cache, find nothing,
            // and take their own turn; the retry budget is per caller.
            return result;
        }
    }

    async fn dispatch_with_retry(
        &self,
        translator: &dyn Translator,
        request: &TranslationRequest,
    ) -> TranslationResult {
        let _permit = self
            .dispatch
            .acquire()
            .await
            .expect("dispatch semaphore closed");

        if !self.options.request_delay.is_zero() {
            tokio::time::sleep(self.options.request_delay).await;
        }

        let mut last: Option<TranslationResult> = None;
        for attempt in 0..=self.options.max_retries {
            if attempt > 0 {
                let exp = self.options.retry_base_delay.as_secs_f64()
                    * 2f64.powi(attempt as i32 - 1);
                let jitter: f64 = {
                    use rand::Rng;
                    rand::thread_rng().gen_range(0.0..0.1)
                };
                tokio::time::sleep(Duration::from_secs_f64(exp + jitter)).await;
            }

            let start = Instant::now();
            self.adapter_invocations.fetch_add(1, Ordering::Relaxed);
            let result = translator.translate_single(request).await;
            let elapsed = start.elapsed().as_secs_f64();
            self.record_metric(elapsed, result.success).await;

            if result.success {
                return result;
            }
            let retryable = result
                .error
                .as_ref()
                .map(|e| e.is_retryable())
                .unwrap_or(true);
            last = Some(result);
            if !retryable {
                break;
            }
        }
        last.unwrap_or_else(|| {
            TranslationResult::fail(
                request,
                TranslateError::new(ErrorKind::Other, "no attempts made"),
            )
        })
    }

    /// Order-preserving batch translation with engine grouping, in-batch
    /// deduplication, and cache pre-filtering.
    pub async fn translate_batch(
        &self,
        requests: &[TranslationRequest],
    ) -> Vec<TranslationResult> {
        if requests.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<Option<TranslationResult>> = vec![None; requests.len()];

        // Group by engine; each group keeps its original indices.
        let mut groups: HashMap<Engine, Vec<usize>> = HashMap::new();
        for (i, request) in requests.iter().enumerate() {
            groups.entry(request.engine).or_default().push(i);
        }

        for (engine, indices) in groups {
            let Some(translator) = self.translators.get(&engine) else {
                for &i in &indices {
                    results[i] = Some(TranslationResult::fail(
                        &requests[i],
                        TranslateError::new(
                            ErrorKind::EngineMissing,
                            format!("translator {engine} not available"),
                        ),
                    ));
                }
                continue;
            };

            // Cache pass and dedup: one representative per unique
            // (source, target, text) goes to the adapter.
            let mut representative: HashMap<CacheKey, usize> = HashMap::new();
            let mut pending: Vec<usize> = Vec::new();
            let mut shared: HashMap<usize, Vec<usize>> = HashMap::new();

            for &i in &indices {
                let request = &requests[i];
                if request.text.trim().is_empty() {
                    results[i] = Some(TranslationResult::fail(
                        request,
                        TranslateError::new(ErrorKind::Other, "empty source text"),
                    ));
                    continue;
                }
                if let Some(hit) = self.cache.get_result(request) {
                    results[i] = Some(hit);
                    continue;
                }
                let key = CacheKey::for_request(request);
                match representative.get(&key) {
                    Some(&leader) => shared.entry(leader).or_default().push(i),
                    None => {
                        representative.insert(key, i);
                        pending.push(i);
                    }
                }
            }

            if pending.is_empty() {
                continue;
            }

            let unique: Vec<TranslationRequest> =
                pending.iter().map(|&i| requests[i].clone()).collect();

            let unique_results = if translator.supports_batch_transport() && unique.len() > 1 {
                self.adapter_invocations
                    .fetch_add(unique.len() as u64, Ordering::Relaxed);
                let start = Instant::now();
                let batch = translator.translate_batch(&unique).await;
                let elapsed = start.elapsed().as_secs_f64() / unique.len().max(1) as f64;
                for result in &batch {
                    self.record_metric(elapsed, result.success).await;
                }
                if batch.len() == unique.len() {
                    batch
                } else {
                    // A misbehaving transport never breaks order: fall
                    // back to gated singles.
                    self.gated_singles(&unique).await
                }
            } else {
                self.gated_singles(&unique).await
            };

            for (&i, result) in pending.iter().zip(unique_results) {
                if result.success {
                    self.cache.put(CacheKey::for_request(&requests[i]), &result);
                }
                if let Some(followers) = shared.get(&i) {
                    for &f in followers {
                        results[f] = Some(result.for_request(&requests[f]));
                    }
                }
                results[i] = Some(result);
            }
        }

        self.maybe_adapt().await;

        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.unwrap_or_else(|| {
                    TranslationResult::fail(
                        &requests[i],
                        TranslateError::new(ErrorKind::Other, "request produced no result"),
                    )
                })
            })
            .collect()
    }

    async fn gated_singles(&self, requests: &[TranslationRequest]) -> Vec<TranslationResult> {
        let futures = requests
            .iter()
            .map(|request| self.translate_with_retry(request));
        futures::future::join_all(futures).await
    }

    async fn record_metric(&self, duration: f64, success: bool) {
        if !self.options.adaptive_enabled {
            return;
        }
        let should_adapt = {
            let mut metrics = self.metrics.lock().await;
            metrics.samples.push_back((duration, success));
            while metrics.samples.len() > METRICS_WINDOW {
                metrics.samples.pop_front();
            }
            metrics.samples.len() % 25 == 0
        };
        if should_adapt {
            self.maybe_adapt().await;
        }
    }

    /// Re-evaluate the concurrency limit from the telemetry window:
    /// >20% failures or >1.5s average latency shrinks to 0.8x (never below
    /// the floor); <5% failures and <0.5s latency grows by max(+1, 1.1x)
    /// up to the cap.
    async fn maybe_adapt(&self) {
        if !self.options.adaptive_enabled {
            return;
        }
        let mut metrics = self.metrics.lock().await;
        if metrics.samples.len() < MIN_SAMPLES_TO_ADAPT {
            return;
        }
        if let Some(last) = metrics.last_adapt {
            if last.elapsed() < self.options.adapt_interval {
                return;
            }
        }
        metrics.last_adapt = Some(Instant::now());

        let total = metrics.samples.len() as f64;
        let avg_latency = metrics.samples.iter().map(|(d, _)| d).sum::<f64>() / total;
        let failures = metrics.samples.iter().filter(|(_, ok)| !ok).count() as f64;
        let fail_rate = failures / total;
        drop(metrics);

        let old = self.current_limit.load(Ordering::Relaxed);
        let new = if fail_rate > 0.2 || avg_latency > 1.5 {
            ((old as f64 * 0.8) as usize).max(self.options.concurrency_floor)
        } else if fail_rate < 0.05 && avg_latency < 0.5 {
            ((old as f64 * 1.1) as usize)
                .max(old + 1)
                .min(self.options.concurrency_cap)
        } else {
            old
        };

        if new != old {
            self.set_concurrency(new).await;
            tracing::info!(
                "Adaptive concurrency {old} -> {new} (latency {avg_latency:.3}s, failures {:.1}%)",
                fail_rate * 100.0
            );
        }
    }

    /// Move the effective limit by parking or releasing blocker permits.
    pub async fn set_concurrency(&self, target: usize) {
        let target = target.clamp(
            self.options.concurrency_floor.max(1),
            self.options.concurrency_cap,
        );
        let mut blockers = self.blockers.lock().await;
        let current = self.current_limit.load(Ordering::Relaxed);

        if target < current {
            let mut need = current - target;
            while need > 0 {
                match self.dispatch.clone().try_acquire_owned() {
                    Ok(permit) => {
                        blockers.push(permit);
                        need -= 1;
                    }
                    // All remaining permits are in use; the limit settles
                    // once they come back.
                    Err(_) => break,
                }
            }
            let acquired = current - target - need;
            self.current_limit.store(current - acquired, Ordering::Relaxed);
        } else if target > current {
            let release = (target - current).min(blockers.len());
            for _ in 0..release {
                drop(blockers.pop());
            }
            self.current_limit.store(current + release, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Identity "translation" with an invocation counter.
    struct MockEngine {
        kind: Engine,
        calls: AtomicU64,
        fail_texts: Vec<String>,
    }

    impl MockEngine {
        fn new(kind: Engine) -> Self {
            Self {
                kind,
                calls: AtomicU64::new(0),
                fail_texts: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Translator for MockEngine {
        fn kind(&self) -> Engine {
            self.kind
        }

        async fn translate_single(&self, request: &TranslationRequest) -> TranslationResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_texts.contains(&request.text) {
                return TranslationResult::fail(
                    request,
                    TranslateError::new(ErrorKind::Parse, "mock failure"),
                );
            }
            TranslationResult::ok(request, format!("TR:{}", request.text), 1.0)
        }
    }

    fn manager_with_mock() -> (TranslationManager, Arc<MockEngine>) {
        let engine = Arc::new(MockEngine::new(Engine::Google));
        let mut manager = TranslationManager::new(ManagerOptions {
            max_retries: 0,
            ..Default::default()
        });
        manager.add_translator(engine.clone());
        (manager, engine)
    }

    fn request(text: &str) -> TranslationRequest {
        TranslationRequest::new(text, "en", "tr", Engine::Google)
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let (manager, engine) = manager_with_mock();
        let first = manager.translate_with_retry(&request("Hello")).await;
        let second = manager.translate_with_retry(&request("Hello")).await;

        assert_eq!(first.translated_text, second.translated_text);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_same_key_invokes_adapter_once() {
        let (manager, engine) = manager_with_mock();
        let manager = Arc::new(manager);

        let futures: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                async move { manager.translate_with_retry(&request("Hello")).await }
            })
            .collect();
        let results = futures::future::join_all(futures).await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_preserves_order_with_duplicates() {
        let (manager, _engine) = manager_with_mock();
        let texts = ["b", "a", "b", "", "c", "a"];
        let requests: Vec<_> = texts.iter().map(|t| request(t)).collect();

        let results = manager.translate_batch(&requests).await;
        assert_eq!(results.len(), requests.len());
        for (req, res) in requests.iter().zip(&results) {
            assert_eq!(res.original_text, req.text);
            if !req.text.is_empty() {
                assert_eq!(res.translated_text, format!("TR:{}", req.text));
            } else {
                assert!(!res.success);
            }
        }
    }

    #[tokio::test]
    async fn batch_dedupes_unique_texts() {
        let (manager, engine) = manager_with_mock();
        let requests: Vec<_> = ["a", "a", "a", "b"].iter().map(|t| request(t)).collect();
        let results = manager.translate_batch(&requests).await;

        assert!(results.iter().all(|r| r.success));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2, "one call per unique text");
    }

    #[tokio::test]
    async fn missing_engine_fails_without_panic() {
        let manager = TranslationManager::new(ManagerOptions::default());
        let result = manager.translate_with_retry(&request("Hello")).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, ErrorKind::EngineMissing);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let engine = Arc::new(MockEngine {
            kind: Engine::Google,
            calls: AtomicU64::new(0),
            fail_texts: vec!["bad".to_string()],
        });
        let mut manager = TranslationManager::new(ManagerOptions {
            max_retries: 0,
            ..Default::default()
        });
        manager.add_translator(engine.clone());

        let first = manager.translate_with_retry(&request("bad")).await;
        let second = manager.translate_with_retry(&request("bad")).await;
        assert!(!first.success && !second.success);
        assert_eq!(engine.calls.load(Ordering::SeqCst), 2, "failures bypass the cache");
    }

    #[tokio::test]
    async fn concurrency_moves_between_floor_and_cap() {
        let (manager, _engine) = manager_with_mock();
        let initial = manager.current_concurrency();

        manager.set_concurrency(4).await;
        assert_eq!(manager.current_concurrency(), 4);

        manager.set_concurrency(100_000).await;
        assert_eq!(manager.current_concurrency(), 512, "clamped to the cap");

        manager.set_concurrency(1).await;
        assert_eq!(manager.current_concurrency(), 4, "clamped to the floor");
        assert!(initial >= 4);
    }
}
