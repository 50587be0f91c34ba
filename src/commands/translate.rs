//! Full-pipeline `translate` command.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cli::TranslateArgs;
use crate::config::Config;
use crate::pipeline::events::EventSink;
use crate::pipeline::{Pipeline, spawn_console_renderer};

pub fn run(args: TranslateArgs) -> Result<()> {
    let mut config = Config::load().unwrap_or_default();
    apply_overrides(&mut config, &args);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_async(config, args))
}

fn apply_overrides(config: &mut Config, args: &TranslateArgs) {
    let t = &mut config.translation;
    if let Some(lang) = &args.lang {
        t.target_lang = lang.clone();
    }
    if let Some(lang) = &args.source_lang {
        t.source_lang = lang.clone();
    }
    if let Some(engine) = &args.engine {
        t.engine = engine.clone();
    }
    if args.deep_scan {
        t.enable_deep_scan = true;
    }
    if args.rpyc {
        t.enable_rpyc_reader = true;
    }
    if let Some(path) = &args.glossary {
        t.glossary_path = Some(path.clone());
    }
    if args.proxy {
        config.proxy.enabled = true;
    }
}

async fn run_async(config: Config, args: TranslateArgs) -> Result<()> {
    let (manager, proxy_pool) = crate::translate::build_manager(&config)?;
    let manager = Arc::new(manager);

    if let Some(pool) = &proxy_pool {
        if !pool.has_personal_proxy() {
            if let Err(e) = pool.update().await {
                tracing::warn!("Proxy list refresh failed: {e}");
            }
        }
    }

    let (sender, receiver) = mpsc::unbounded_channel();
    let renderer = spawn_console_renderer(receiver);

    let engine = args.engine.as_deref().map(crate::translate::resolve_engine);
    let mut pipeline = Pipeline::new(config, manager.clone(), EventSink::new(sender));
    pipeline.configure(
        &args.input,
        args.lang.as_deref(),
        args.source_lang.as_deref(),
        engine,
        !args.no_auto_extract,
        args.template_only,
    );

    let stop = pipeline.stop_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let result = pipeline.run().await;
    manager.close_all().await;
    ctrl_c.abort();
    drop(pipeline);
    let _ = renderer.await;

    if result.success {
        Ok(())
    } else {
        anyhow::bail!("{}", result.message)
    }
}
