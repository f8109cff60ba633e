//! Crossnostr bridge binary.
//!
//! Wires the Telegram poller, the ingestion loop, the relay pool and the
//! health API together, and tears them down in order on SIGTERM/SIGINT.

use crossnostr_bridge::config;
use crossnostr_bridge::{
    app, run_poller, AppState, Bridge, CommandHandler, HttpUploader, PollSettings, Publisher,
    TelegramClient,
};
use crossnostr_channels::{ChannelDirectory, SqliteChannelDirectory};
use crossnostr_identity::SqliteCredentialStore;
use crossnostr_relay::{RelayPool, WsConnector};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("CROSSNOSTR_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration — the bridge cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    config
        .validate()
        .expect("invalid configuration — check the telegram, relays and upload sections");

    // Initialize database
    let pool = crossnostr_db::create_pool(
        &config.database.path,
        crossnostr_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool — check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            crossnostr_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(config.telegram.request_timeout())
        .build()
        .expect("failed to build HTTP client");

    let telegram = Arc::new(TelegramClient::new(
        http.clone(),
        &config.telegram.api_base_url,
        &config.telegram.bot_token,
    ));
    let me = telegram
        .get_me()
        .await
        .expect("failed to reach the Telegram Bot API — check telegram.bot_token");
    tracing::info!(
        bot_id = me.id,
        bot_username = me.username.as_deref().unwrap_or_default(),
        "authorized on Telegram"
    );

    let cancel = CancellationToken::new();

    // Not tied to `cancel`: posts closed before shutdown still need the pool
    // while ingestion drains. `relays.shutdown()` stops it afterwards.
    let relays = RelayPool::connect(
        &config.relays.urls,
        Arc::new(WsConnector),
        config.relays.pool_config(),
        CancellationToken::new(),
    )
    .await;

    let directory: Arc<dyn ChannelDirectory> = Arc::new(SqliteChannelDirectory::new(pool.clone()));
    let credentials = Arc::new(SqliteCredentialStore::new(pool.clone()));
    let publisher = Arc::new(Publisher::new(
        credentials.clone(),
        telegram.clone(),
        Arc::new(HttpUploader::new(http.clone(), &config.upload)),
        Arc::new(relays.clone()),
    ));
    let commands = Arc::new(CommandHandler::new(
        directory.clone(),
        credentials,
        telegram.clone(),
    ));

    let (tx, rx) = mpsc::channel(config.telegram.queue_capacity);
    let poller = tokio::spawn(run_poller(
        telegram.clone(),
        tx,
        PollSettings {
            timeout_secs: config.telegram.poll_timeout_secs,
            retry_delay: Duration::from_secs(config.telegram.retry_delay_secs),
        },
        cancel.clone(),
    ));
    let ingestion = tokio::spawn(
        Bridge::new(
            publisher,
            directory,
            commands,
            telegram,
            config.aggregator.idle_flush(),
        )
        .run(rx, cancel.clone()),
    );

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    // Build application
    let app = app(AppState {
        relays: relays.clone(),
    });
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting crossnostr health API");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address — is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await
        .expect("server error");

    // The server only returns once shutdown has begun.
    if let Err(e) = poller.await {
        tracing::error!(error = %e, "poller task failed");
    }
    if let Err(e) = ingestion.await {
        tracing::error!(error = %e, "ingestion task failed");
    }
    relays.shutdown().await;

    tracing::info!("crossnostr bridge shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
