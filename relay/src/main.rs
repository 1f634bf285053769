//! Hookrelay web server.
//!
//! Wires the routing table, recent-request log, jq evaluator and sinks into a
//! single axum service and serves it until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hookrelay::recent::RedisRecentStore;
use hookrelay::routing::{MemoryEndpointStore, PgEndpointStore};
use hookrelay::sink::TRELLO_COMMENT_KIND;
use hookrelay::{
    router, AppState, Config, EndpointStore, FanOutDispatcher, JqEvaluator, RecentRequestLog,
    SinkRegistry, TrelloApi, TrelloCommentSink, TrelloIdentity,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("hookrelay_starting");

    let config = Config::from_env();
    info!(
        port = config.port,
        service_url = ?config.service_url,
        database_configured = config.database_url.is_some(),
        redis_configured = config.redis_url.is_some(),
        trello_key_configured = !config.trello_api_key.is_empty(),
        filter_timeout_ms = config.filter_timeout_ms,
        dispatch_timeout_ms = config.dispatch_timeout_ms,
        "config_loaded"
    );

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let trello = TrelloApi::new(client, &config.trello_api_url, config.trello_api_key.clone())
        .context("Invalid TRELLO_API_URL")?;

    let endpoints: Arc<dyn EndpointStore> = match &config.database_url {
        Some(url) => Arc::new(
            PgEndpointStore::connect(url)
                .await
                .context("Failed to connect to Postgres")?,
        ),
        None => {
            warn!("database_url_missing_using_memory_store");
            Arc::new(MemoryEndpointStore::new())
        }
    };

    let recent = match &config.redis_url {
        Some(url) => {
            let store = RedisRecentStore::connect(url, config.recent_log_timeout())
                .await
                .context("Failed to connect to Redis")?;
            Some(RecentRequestLog::new(Arc::new(store), &config))
        }
        None => {
            info!("recent_request_log_disabled");
            None
        }
    };

    let sinks = SinkRegistry::new().register(
        TRELLO_COMMENT_KIND,
        Arc::new(TrelloCommentSink::new(trello.clone())),
    );
    info!(kinds = ?sinks.kinds(), "sinks_registered");

    let dispatcher = FanOutDispatcher::new(
        Arc::new(JqEvaluator::new(&config.jq_path)),
        sinks,
        config.filter_timeout(),
        config.dispatch_timeout(),
    );

    let port = config.port;
    let state = AppState {
        config: Arc::new(config),
        endpoints,
        recent,
        dispatcher,
        identity: Arc::new(TrelloIdentity::new(trello)),
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "hookrelay_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("hookrelay_shutdown_complete");

    Ok(())
}

/// Completes when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received_sigint"),
        _ = terminate => info!("received_sigterm"),
    }

    info!("hookrelay_shutting_down");
}
