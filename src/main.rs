use std::sync::Arc;

use anyhow::Context;

use task_authz::app::{self, AppState};
use task_authz::authz::SqliteRoleAssignmentSource;
use task_authz::config::AppConfig;
use task_authz::db;
use task_authz::events::AccessLogWorkers;
use task_authz::jwt::JwtConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::from_env()?;
    let jwt = JwtConfig::from_env()?;
    let pool = db::init(&config.database_url).await?;

    let workers = AccessLogWorkers::spawn(
        pool.clone(),
        config.access_log_workers,
        config.access_log_queue_capacity,
    );
    let role_source = Arc::new(SqliteRoleAssignmentSource::new(pool.clone()));
    let state = AppState::new(pool, jwt, workers.handle(), role_source);
    let app = app::create_app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Handlers are gone; flush what they queued.
    workers.shutdown(config.access_log_shutdown).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
