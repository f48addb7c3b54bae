use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use ratecache::config::Config;
use ratecache::engine::{CacheSettings, RateCacheEngine};
use ratecache::quota::QuotaAccountant;
use ratecache::revalidator;
use ratecache::server::{self, AppState};
use ratecache::store::{KvStore, RedisStore};
use ratecache::upstream::RateApiClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("ratecache={}", config.log_level).parse()?),
        )
        .init();

    // The store is the only shared mutable state; everything that needs it
    // gets this one handle, constructed here and nowhere else.
    let store: Arc<dyn KvStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .with_context(|| format!("failed to connect to Redis at {}", config.redis_url))?,
    );

    let upstream = RateApiClient::new(
        &config.rate_api_url,
        &config.rate_api_token,
        config.upstream_timeout,
    )?;
    let quota = Arc::new(QuotaAccountant::new(store.clone(), config.rate_api_quota));
    let engine = Arc::new(RateCacheEngine::new(
        store.clone(),
        upstream,
        quota.clone(),
        CacheSettings {
            cache_ttl: config.cache_ttl,
            lock_ttl: config.lock_ttl,
            lock_retries: config.lock_retries,
            lock_retry_delay: config.lock_retry_delay,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let revalidator_task = tokio::spawn(revalidator::run(
        engine.clone(),
        config.refresh_interval,
        shutdown_rx,
    ));

    let state = Arc::new(AppState {
        engine,
        store,
        quota,
    });
    let app = server::router(state);

    let addr = format!("{}:{}", config.http_host, config.http_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    // The shutdown signal has already been broadcast; let the revalidator
    // finish its current cycle before exiting.
    let _ = revalidator_task.await;
    tracing::info!("shutdown complete");

    Ok(())
}

/// Resolves when the process receives SIGINT or SIGTERM, after telling the
/// revalidator to stop.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }

    let _ = shutdown_tx.send(true);
}
