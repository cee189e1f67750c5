use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use wastewise::api;
use wastewise::artifacts::{JsonReportWriter, ReportRenderer};
use wastewise::config::{AppConfig, WorkerConfig};
use wastewise::extraction::{AnthropicExtractor, DocumentExtractor};
use wastewise::skills::SkillRegistry;
use wastewise::skills::builtin::register_builtin;
use wastewise::store::{JobStore, LibSqlBackend};
use wastewise::worker::{Worker, spawn_repair_loop};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("Invalid configuration")?;

    // ── Tracing ─────────────────────────────────────────────────────────
    let (file_writer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wastewise.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
        }))
        .init();

    eprintln!("♻️  WasteWise v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Reports: {}", config.report_dir.display());
    eprintln!("   API: http://0.0.0.0:{}/api/jobs", config.api_port);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn JobStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );

    // ── Skills ───────────────────────────────────────────────────────────
    let extractor: Option<Arc<dyn DocumentExtractor>> = config
        .extraction
        .as_ref()
        .map(|extraction| Arc::new(AnthropicExtractor::new(extraction)) as Arc<dyn DocumentExtractor>);
    eprintln!(
        "   Extraction: {}",
        if extractor.is_some() { "enabled" } else { "disabled (ANTHROPIC_API_KEY not set)" }
    );
    let renderer: Arc<dyn ReportRenderer> = Arc::new(JsonReportWriter::new(&config.report_dir));

    let mut registry = SkillRegistry::new();
    register_builtin(&mut registry, extractor, renderer).context("Failed to register skills")?;
    let registry = Arc::new(registry);
    eprintln!("   Skills ({}): {}", registry.len(), registry.list().join(", "));

    // ── Workers ──────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let mut workers = Vec::with_capacity(config.workers);
    for index in 0..config.workers {
        let worker_config = WorkerConfig {
            worker_id: if config.workers == 1 {
                config.worker.worker_id.clone()
            } else {
                format!("{}-{index}", config.worker.worker_id)
            },
            ..config.worker.clone()
        };
        let worker = Worker::new(Arc::clone(&store), Arc::clone(&registry), worker_config);
        let shutdown = shutdown.clone();
        workers.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }
    eprintln!("   Workers: {}", config.workers);

    let repair = spawn_repair_loop(Arc::clone(&store), config.repair.clone(), shutdown.clone());

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = api::routes(Arc::clone(&store), Arc::clone(&registry));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.api_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.api_port))?;
    tracing::info!(port = config.api_port, "API server started");
    let server = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested; waiting for running jobs");
    shutdown.cancel();

    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task ended abnormally");
        }
    }
    if let Err(e) = repair.await {
        tracing::error!(error = %e, "Repair task ended abnormally");
    }
    match server.await {
        Ok(Err(e)) => tracing::error!(error = %e, "API server error"),
        Err(e) => tracing::error!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    tracing::info!("WasteWise stopped");
    Ok(())
}
