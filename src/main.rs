use anyhow::{Context, Result};
use kudos::api::{create_router, AppState};
use kudos::auth::{run_session_purge, AuthManager};
use kudos::config::KudosConfig;
use kudos::poller::Poller;
use kudos::router::Router as CommandRouter;
use kudos::store::{CredentialStore, CursorStore, SessionStore, SqliteStore};
use kudos::strava::{ActivitiesClient, OauthClient};
use kudos::telegram::{NotificationSink, TelegramNotifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kudos=info".into()),
        )
        .init();

    info!("kudos starting...");

    // Load configuration; the file is optional, the env overlay is not
    let config_path =
        std::env::var("KUDOS_CONFIG").unwrap_or_else(|_| "kudos.toml".to_string());
    let mut config = if std::path::Path::new(&config_path).exists() {
        let config = kudos::config::load_config(&config_path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", config_path, e))?;
        info!(path = %config_path, "Configuration loaded");
        config
    } else {
        info!(path = %config_path, "No config file, using defaults");
        KudosConfig::default()
    };
    config.apply_env_overrides();

    if config.storage.encryption_key.is_empty() {
        anyhow::bail!("KUDOS_ENCRYPTION_KEY is required (base64-encoded 32-byte key)");
    }
    if config.telegram.bot_token.is_empty() {
        anyhow::bail!("KUDOS_TELEGRAM_BOT_TOKEN is required");
    }

    let http_timeout = Duration::from_secs(config.auth.http_timeout_secs);

    // Stores (one SQLite file backs credentials, sessions and cursors)
    let store = Arc::new(
        SqliteStore::new(&config.storage.db_path, &config.storage.encryption_key)
            .context("Failed to initialize store")?,
    );
    info!(db_path = %config.storage.db_path, "Store initialized");

    // External clients
    let redirect_uri = format!("{}/auth/callback", config.server.callback_base_url);
    let oauth = OauthClient::new(&config.strava, redirect_uri, http_timeout);
    let activities = Arc::new(ActivitiesClient::new(
        config.strava.api_base_url.clone(),
        http_timeout,
    ));
    let notifier: Arc<dyn NotificationSink> = Arc::new(TelegramNotifier::new(
        config.telegram.api_base_url.clone(),
        config.telegram.bot_token.clone(),
        http_timeout,
    ));

    // Core
    let auth = Arc::new(AuthManager::new(
        Arc::clone(&store) as Arc<dyn CredentialStore>,
        Arc::clone(&store) as Arc<dyn SessionStore>,
        oauth,
        &config.auth,
    ));
    let command_router = Arc::new(CommandRouter::new(Arc::clone(&auth)));

    // Background tasks
    let purge_handle = tokio::spawn(run_session_purge(
        Arc::clone(&auth),
        config.auth.purge_interval_secs,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = Arc::new(Poller::new(
        Arc::clone(&auth),
        Arc::clone(&store) as Arc<dyn CredentialStore>,
        Arc::clone(&store) as Arc<dyn CursorStore>,
        activities,
        Arc::clone(&notifier),
        config.poller.clone(),
    ));
    let poller_handle = poller.start(shutdown_rx);

    // HTTP server
    let app = create_router(AppState {
        command_router,
        notifier,
    });
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .context("Failed to bind server address")?;
    info!(bind = %config.server.bind, "Webhook server listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Webhook server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown: the poller finishes its in-flight tick
    let _ = shutdown_tx.send(true);
    let _ = poller_handle.await;
    server_handle.abort();
    purge_handle.abort();
    info!("kudos stopped");

    Ok(())
}
