use std::sync::Arc;

use anyhow::Context;
use db::DbService;
use server::{AppState, config::Config, http};
use services::services::{
    mailer::{Mailer, RecordingMailer, SmtpMailer},
    renderer::TemplateEngine,
    worker::{QueueWorker, WorkerConfig},
};
use tracing_subscriber::{EnvFilter, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},db={level},utils={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).context("Failed to create tracing filter")?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config = Config::from_env();
    let db = DbService::new(&config.database_url)
        .await
        .context("Failed to open database")?;

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(
            SmtpMailer::new(smtp).map_err(|e| anyhow::anyhow!("SMTP setup failed: {e}"))?,
        ),
        None => {
            tracing::warn!(
                "no SMTP transport configured (MAILROOM_SMTP_HOST); outgoing email is recorded in memory only"
            );
            Arc::new(RecordingMailer::new())
        }
    };
    let renderer = Arc::new(TemplateEngine::new());

    let worker = Arc::new(QueueWorker::new(
        db.clone(),
        mailer.clone(),
        renderer.clone(),
        WorkerConfig {
            tick_interval: config.worker_tick_interval,
            base_hourly_rate: config.base_hourly_rate,
            ..Default::default()
        },
    ));
    let worker_handle = worker.spawn();

    let state = AppState::new(db, config.clone(), mailer, renderer);
    let router = http::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("mailroom listening on {}", config.bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    worker_handle.shutdown().await;
    Ok(())
}
