use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod auth;
mod cache;
mod config;
mod db;
mod error;
mod models;
mod rate;
mod solana;
#[cfg(test)]
mod testutil;

use api::AppState;
use auth::KeyStore;
use cache::BalanceCache;
use config::Config;
use db::MongoBackend;
use rate::LimiterMap;
use solana::RpcClient;

const LIMITER_IDLE_TTL: Duration = Duration::from_secs(300);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solapi=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    if config.helius_rpc_url.is_empty() {
        tracing::warn!("HELIUS_RPC_URL is empty; balance fetches will fail until it is set");
    }

    tracing::info!(
        port = config.port,
        mongo_db = %config.mongo_db,
        rpm = config.rate_limit_rpm,
        max_concurrency = config.max_concurrency,
        "starting solapi gateway"
    );

    let backend = MongoBackend::connect(&config.mongo_uri, &config.mongo_db)
        .await
        .context("mongo connect / index create failed")?;

    let fetcher = Arc::new(RpcClient::new(
        config.helius_rpc_url.clone(),
        config.sol_commitment.clone(),
    ));
    let limiter = LimiterMap::new(config.rate_limit_rpm, LIMITER_IDLE_TTL);

    let state = AppState {
        cache: BalanceCache::new(config.cache_ttl),
        limiter: limiter.clone(),
        keys: KeyStore::new(Arc::new(backend), config.key_cache_ttl),
        fetcher,
        config: config.clone(),
    };

    let app = api::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut graceful_rx = shutdown_rx.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = graceful_rx.changed().await;
        tracing::info!("shutting down");
    })
    .into_future();

    let mut grace_rx = shutdown_rx.clone();
    tokio::select! {
        result = server => result.context("server error")?,
        _ = async move {
            let _ = grace_rx.changed().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!("grace period elapsed; aborting in-flight requests");
        }
    }

    limiter.stop();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
