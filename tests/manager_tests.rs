//! Manager-level cache, deduplication, and ordering properties.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use renlocalize::translate::engines::Translator;
use renlocalize::translate::manager::{ManagerOptions, TranslationManager};
use renlocalize::translate::types::{
    Engine, ErrorKind, TranslateError, TranslationRequest, TranslationResult,
};

struct CountingEngine {
    kind: Engine,
    calls: AtomicU64,
    delay_ms: u64,
}

impl CountingEngine {
    fn new(kind: Engine) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicU64::new(0),
            delay_ms: 0,
        })
    }

    fn slow(kind: Engine, delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicU64::new(0),
            delay_ms,
        })
    }
}

#[async_trait]
impl Translator for CountingEngine {
    fn kind(&self) -> Engine {
        self.kind
    }

    async fn translate_single(&self, request: &TranslationRequest) -> TranslationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if request.text == "FAIL" {
            return TranslationResult::fail(
                request,
                TranslateError::new(ErrorKind::Parse, "requested failure"),
            );
        }
        TranslationResult::ok(request, format!("{}:{}", self.kind, request.text), 1.0)
    }
}

fn manager() -> TranslationManager {
    TranslationManager::new(ManagerOptions {
        max_retries: 0,
        ..Default::default()
    })
}

fn request(text: &str, engine: Engine) -> TranslationRequest {
    TranslationRequest::new(text, "en", "tr", engine)
}

#[tokio::test]
async fn sequential_calls_hit_cache_without_second_invocation() {
    let engine = CountingEngine::new(Engine::Google);
    let mut m = manager();
    m.add_translator(engine.clone());

    let first = m.translate_with_retry(&request("Hello", Engine::Google)).await;
    let second = m.translate_with_retry(&request("Hello", Engine::Google)).await;

    assert!(first.success && second.success);
    assert_eq!(first.translated_text, second.translated_text);
    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(m.cache_stats().hits, 1);
}

#[tokio::test]
async fn k_parallel_callers_one_invocation() {
    let engine = CountingEngine::slow(Engine::Google, 20);
    let mut m = manager();
    m.add_translator(engine.clone());
    let m = Arc::new(m);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let m = m.clone();
            tokio::spawn(async move { m.translate_with_retry(&request("Same", Engine::Google)).await })
        })
        .collect();

    for task in tasks {
        let result = task.await.unwrap();
        assert!(result.success);
        assert_eq!(result.translated_text, "google:Same");
    }
    assert_eq!(
        engine.calls.load(Ordering::SeqCst),
        1,
        "single-flight must collapse concurrent identical requests"
    );
}

#[tokio::test]
async fn eviction_removes_exactly_the_overflow() {
    let engine = CountingEngine::new(Engine::Google);
    let mut m = TranslationManager::new(ManagerOptions {
        max_retries: 0,
        cache_capacity: 10,
        ..Default::default()
    });
    m.add_translator(engine.clone());

    for i in 0..15 {
        let text = format!("text-{i}");
        let result = m.translate_with_retry(&request(&text, Engine::Google)).await;
        assert!(result.success);
    }
    assert_eq!(m.cache_stats().size, 10);

    // The five oldest are gone, the five newest still hit.
    for i in 10..15 {
        let text = format!("text-{i}");
        m.translate_with_retry(&request(&text, Engine::Google)).await;
    }
    assert_eq!(engine.calls.load(Ordering::SeqCst), 15, "newest entries stay cached");
}

#[tokio::test]
async fn batch_order_matches_input_order() {
    let google = CountingEngine::new(Engine::Google);
    let local = CountingEngine::new(Engine::LocalLlm);
    let mut m = manager();
    m.add_translator(google);
    m.add_translator(local);

    // Duplicates, an empty string, and mixed engines in one batch.
    let requests = vec![
        request("alpha", Engine::Google),
        request("beta", Engine::LocalLlm),
        request("alpha", Engine::Google),
        request("", Engine::Google),
        request("gamma", Engine::LocalLlm),
        request("alpha", Engine::LocalLlm),
    ];

    let results = m.translate_batch(&requests).await;
    assert_eq!(results.len(), requests.len());

    for (req, res) in requests.iter().zip(&results) {
        assert_eq!(res.original_text, req.text, "results must align with input order");
        assert_eq!(res.engine, req.engine);
    }
    assert_eq!(results[0].translated_text, "google:alpha");
    assert_eq!(results[1].translated_text, "local_llm:beta");
    assert_eq!(results[2].translated_text, "google:alpha");
    assert!(!results[3].success, "empty text is a per-request failure");
    assert_eq!(results[5].translated_text, "local_llm:alpha");
}

#[tokio::test]
async fn per_request_failures_do_not_poison_the_batch() {
    let engine = CountingEngine::new(Engine::Google);
    let mut m = manager();
    m.add_translator(engine);

    let requests = vec![
        request("good one", Engine::Google),
        request("FAIL", Engine::Google),
        request("good two", Engine::Google),
    ];
    let results = m.translate_batch(&requests).await;

    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[2].success);
    assert_eq!(results[1].error.as_ref().unwrap().kind, ErrorKind::Parse);
}

#[tokio::test]
async fn missing_engine_yields_typed_failure() {
    let m = manager();
    let results = m.translate_batch(&[request("x", Engine::DeepL)]).await;
    assert!(!results[0].success);
    assert_eq!(
        results[0].error.as_ref().unwrap().kind,
        ErrorKind::EngineMissing
    );
}

#[tokio::test]
async fn retry_succeeds_after_transient_failures() {
    struct FlakyEngine {
        calls: AtomicU64,
    }

    #[async_trait]
    impl Translator for FlakyEngine {
        fn kind(&self) -> Engine {
            Engine::Google
        }
        async fn translate_single(&self, request: &TranslationRequest) -> TranslationResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                TranslationResult::fail(
                    request,
                    TranslateError::new(ErrorKind::Network, "connection reset"),
                )
            } else {
                TranslationResult::ok(request, "finally".to_string(), 1.0)
            }
        }
    }

    let engine = Arc::new(FlakyEngine {
        calls: AtomicU64::new(0),
    });
    let mut m = TranslationManager::new(ManagerOptions {
        max_retries: 3,
        retry_base_delay: std::time::Duration::from_millis(1),
        ..Default::default()
    });
    m.add_translator(engine.clone());

    let result = m.translate_with_retry(&request("x", Engine::Google)).await;
    assert!(result.success);
    assert_eq!(result.translated_text, "finally");
    assert_eq!(engine.calls.load(Ordering::SeqCst), 3);
}
