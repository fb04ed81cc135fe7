//! Runtime configuration.
//!
//! One `KudosConfig` struct is loaded at startup and passed explicitly to the
//! components that need it. Secrets (API credentials, encryption key) are
//! read from the environment in exactly one place, `apply_env_overrides`.

use serde::Deserialize;

/// Complete kudos configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KudosConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub strava: StravaConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the webhook/callback server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Public base URL the OAuth provider redirects back to
    #[serde(default = "default_callback_base_url")]
    pub callback_base_url: String,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_callback_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            callback_base_url: default_callback_base_url(),
        }
    }
}

/// Strava OAuth application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StravaConfig {
    /// OAuth client ID (usually from KUDOS_STRAVA_CLIENT_ID)
    #[serde(default)]
    pub client_id: String,
    /// OAuth client secret (usually from KUDOS_STRAVA_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret: String,
    /// Base URL for the OAuth endpoints (overridable for tests)
    #[serde(default = "default_strava_oauth_base")]
    pub oauth_base_url: String,
    /// Base URL for the Strava REST API (overridable for tests)
    #[serde(default = "default_strava_api_base")]
    pub api_base_url: String,
    /// Requested OAuth scopes
    #[serde(default = "default_strava_scopes")]
    pub scopes: Vec<String>,
}

fn default_strava_oauth_base() -> String {
    "https://www.strava.com".to_string()
}

fn default_strava_api_base() -> String {
    "https://www.strava.com/api/v3".to_string()
}

fn default_strava_scopes() -> Vec<String> {
    vec!["read".to_string(), "activity:read".to_string()]
}

impl Default for StravaConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            oauth_base_url: default_strava_oauth_base(),
            api_base_url: default_strava_api_base(),
            scopes: default_strava_scopes(),
        }
    }
}

/// Telegram bot configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token (usually from KUDOS_TELEGRAM_BOT_TOKEN)
    #[serde(default)]
    pub bot_token: String,
    /// Base URL for the Bot API (overridable for tests)
    #[serde(default = "default_telegram_api_base")]
    pub api_base_url: String,
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: default_telegram_api_base(),
        }
    }
}

/// Auth state machine tuning
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// How long a pending authorization attempt stays valid (seconds)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: i64,
    /// Refresh the access token when expiry is within this margin (seconds)
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: i64,
    /// Timeout applied to every outbound network call (seconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// How often expired pending sessions are purged (seconds)
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

fn default_session_ttl() -> i64 {
    300
}

fn default_refresh_margin() -> i64 {
    900
}

fn default_http_timeout() -> u64 {
    12
}

fn default_purge_interval() -> u64 {
    60
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            refresh_margin_secs: default_refresh_margin(),
            http_timeout_secs: default_http_timeout(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

/// Polling scheduler tuning
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Wake interval between polling ticks (seconds)
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Lookback bound when no cursor exists for an identity (hours)
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: i64,
    /// Maximum identities processed concurrently per tick
    #[serde(default = "default_poll_concurrency")]
    pub concurrency: usize,
}

fn default_poll_interval() -> u64 {
    600
}

fn default_lookback_hours() -> i64 {
    12
}

fn default_poll_concurrency() -> usize {
    4
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            lookback_hours: default_lookback_hours(),
            concurrency: default_poll_concurrency(),
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Base64-encoded 32-byte master key (usually from KUDOS_ENCRYPTION_KEY)
    #[serde(default)]
    pub encryption_key: String,
}

fn default_db_path() -> String {
    "kudos.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            encryption_key: String::new(),
        }
    }
}

impl Default for KudosConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            strava: StravaConfig::default(),
            telegram: TelegramConfig::default(),
            auth: AuthConfig::default(),
            poller: PollerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl KudosConfig {
    /// Overlay secrets and deployment-specific values from the environment.
    ///
    /// This is the only place in the codebase that reads environment
    /// variables. A variable that is unset leaves the file-provided value
    /// alone.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("KUDOS_STRAVA_CLIENT_ID") {
            self.strava.client_id = v;
        }
        if let Ok(v) = std::env::var("KUDOS_STRAVA_CLIENT_SECRET") {
            self.strava.client_secret = v;
        }
        if let Ok(v) = std::env::var("KUDOS_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Ok(v) = std::env::var("KUDOS_ENCRYPTION_KEY") {
            self.storage.encryption_key = v;
        }
        if let Ok(v) = std::env::var("KUDOS_DB_PATH") {
            self.storage.db_path = v;
        }
        if let Ok(v) = std::env::var("KUDOS_CALLBACK_BASE_URL") {
            self.server.callback_base_url = v;
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &str) -> Result<KudosConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: KudosConfig = toml::from_str(&contents)?;
    Ok(config)
}
