//! HTTP surface: Telegram webhook ingestion and the OAuth callback page.
//!
//! The webhook handler unwraps a Telegram update into an `(identity, text)`
//! pair, hands it to the command router and sends any reply through the
//! notification sink. The callback route is where the provider redirect
//! lands; it renders a static page showing the `code state` paste string.
//! Correlation back to the requesting chat happens when the user pastes it,
//! not here.

use crate::router::Router as CommandRouter;
use crate::telegram::NotificationSink;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared application state for the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub command_router: Arc<CommandRouter>,
    pub notifier: Arc<dyn NotificationSink>,
}

/// Telegram webhook update (only the fields the bot reads)
#[derive(Deserialize, Debug)]
pub struct Update {
    #[serde(default)]
    message: Option<IncomingMessage>,
}

#[derive(Deserialize, Debug)]
struct IncomingMessage {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/auth/callback", get(oauth_callback))
        .route("/health", get(health))
        .with_state(Arc::new(state))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /webhook
///
/// Receives Telegram updates. Non-message updates and messages without text
/// are acknowledged and dropped.
async fn webhook(
    State(state): State<Arc<AppState>>,
    Json(update): Json<Update>,
) -> Json<serde_json::Value> {
    let Some(message) = update.message else {
        return Json(json!({ "status": "ok" }));
    };
    let Some(text) = message.text else {
        return Json(json!({ "status": "ok" }));
    };

    let identity = message.chat.id.to_string();
    debug!(identity = %identity, "Webhook update received");

    if let Some(reply) = state.command_router.handle(&identity, &text).await {
        if let Err(e) = state.notifier.send(&identity, &reply).await {
            // The state transition already happened; losing the reply is a
            // delivery problem, not a routing one.
            error!(identity = %identity, error = %e, "Failed to send reply");
        }
    }

    Json(json!({ "status": "ok" }))
}

/// GET /auth/callback
///
/// Landing page for the provider redirect. Shows the code/state pair for
/// the user to paste back into the chat.
async fn oauth_callback(Query(callback): Query<OAuthCallback>) -> Response {
    if let Some(error) = callback.error {
        warn!(error = %error, "Authorization denied at provider");
        return (
            StatusCode::BAD_REQUEST,
            Html(render_denied_page(&error)),
        )
            .into_response();
    }

    match (callback.code, callback.state) {
        (Some(code), Some(state)) => {
            info!("Authorization callback received");
            Html(render_success_page(&code, &state)).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Html("<p>No authorization code received.</p>".to_string()),
        )
            .into_response(),
    }
}

fn render_success_page(code: &str, state: &str) -> String {
    let paste = format!("{} {}", html_escape(code), html_escape(state));
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Strava Authorization Success</title>
    <style>
        body {{ font-family: Arial, sans-serif; max-width: 600px; margin: 40px auto; padding: 20px; text-align: center; }}
        .code-box {{ background-color: #f5f5f5; border: 1px solid #ddd; border-radius: 4px; padding: 15px; margin: 20px 0; font-family: monospace; font-size: 16px; cursor: pointer; }}
        .instructions {{ color: #666; margin: 20px 0; }}
    </style>
</head>
<body>
    <h1>✅ Authorization Successful!</h1>
    <div class="instructions"><p>Your authorization code is:</p></div>
    <div class="code-box" id="codeBox" onclick="copyCode()">{paste}</div>
    <div class="instructions">
        <p>Click the text above to copy it, then paste it into your Telegram chat with the bot.</p>
    </div>
    <script>
        function copyCode() {{
            navigator.clipboard.writeText(document.getElementById('codeBox').textContent.trim());
        }}
    </script>
</body>
</html>"#
    )
}

fn render_denied_page(error: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"font-family: Arial, sans-serif; text-align: center;\">\
         <h1>❌ Authorization Failed</h1><p>The provider reported: {}</p>\
         <p>Go back to the chat and send /connect to try again.</p></body></html>",
        html_escape(error)
    )
}

/// Minimal escaping for values echoed into the callback page.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
