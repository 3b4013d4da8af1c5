use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use career_nav::config::{AppConfig, StoreBackend};
use career_nav::context::{ContextStore, JsonFileStore, LibSqlStore, MemoryStore};
use career_nav::llm::{LlmProvider, RateLimiter, ThrottledCaller, create_provider};
use career_nav::orchestrator::Orchestrator;
use career_nav::routes::{OrchestratorRouteState, career_routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&config);

    eprintln!("🧭 Career Nav v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Store: {:?}", config.store.backend);
    eprintln!(
        "   API: http://{}:{}/api",
        config.server.host, config.server.port
    );

    // ── Generation service ──────────────────────────────────────────────
    let raw = create_provider(&config.llm.to_llm_config()?)?;
    let limiter = Arc::new(RateLimiter::new(config.throttle.min_interval));
    let llm: Arc<dyn LlmProvider> =
        Arc::new(ThrottledCaller::new(raw, limiter, config.retry.clone()));

    // ── Context store ───────────────────────────────────────────────────
    let store: Arc<dyn ContextStore> = match config.store.backend {
        StoreBackend::File => Arc::new(
            JsonFileStore::open(&config.store.data_dir)
                .await
                .with_context(|| format!("Failed to open {}", config.store.data_dir.display()))?,
        ),
        StoreBackend::LibSql => Arc::new(
            LibSqlStore::new_local(&config.store.db_path)
                .await
                .with_context(|| format!("Failed to open {}", config.store.db_path.display()))?,
        ),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };

    let orchestrator = Arc::new(Orchestrator::new(llm, store, config.pipeline.clone()));
    let app = career_routes(OrchestratorRouteState { orchestrator });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Career Nav server started");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "career-nav.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}
