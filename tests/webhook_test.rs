// Integration tests for the webhook and callback surface

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use kudos::api::{create_router, AppState};
use kudos::auth::AuthManager;
use kudos::config::{AuthConfig, StravaConfig};
use kudos::router::Router as CommandRouter;
use kudos::store::{CredentialStore, MemoryStore, SessionStore};
use kudos::strava::OauthClient;
use kudos::telegram::NotificationSink;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Captures outbound messages instead of talking to Telegram.
#[derive(Default)]
struct CapturingSink {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl NotificationSink for CapturingSink {
    async fn send(&self, identity: &str, text: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((identity.to_string(), text.to_string()));
        Ok(())
    }
}

fn create_test_app(oauth_base_url: &str) -> (Router, Arc<CapturingSink>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let strava = StravaConfig {
        client_id: "1234".to_string(),
        client_secret: "sekrit".to_string(),
        oauth_base_url: oauth_base_url.to_string(),
        ..StravaConfig::default()
    };
    let oauth = OauthClient::new(
        &strava,
        "http://localhost:3000/auth/callback".to_string(),
        std::time::Duration::from_secs(5),
    );
    let auth = Arc::new(AuthManager::new(
        Arc::clone(&store) as Arc<dyn CredentialStore>,
        Arc::clone(&store) as Arc<dyn SessionStore>,
        oauth,
        &AuthConfig::default(),
    ));
    let sink = Arc::new(CapturingSink::default());

    let app = create_router(AppState {
        command_router: Arc::new(CommandRouter::new(auth)),
        notifier: Arc::clone(&sink) as Arc<dyn NotificationSink>,
    });

    (app, sink, store)
}

fn webhook_request(chat_id: i64, text: &str) -> Request<Body> {
    let body = serde_json::json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "chat": { "id": chat_id, "type": "private" },
            "text": text,
        }
    });
    Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _, _) = create_test_app("https://www.strava.com");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_connect_command_replies_with_authorize_url() {
    let (app, sink, _) = create_test_app("https://www.strava.com");

    let response = app.oneshot(webhook_request(7, "/connect")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let sent = sink.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "7");
    assert!(sent[0].1.contains("https://www.strava.com/oauth/authorize?"));
    assert!(sent[0].1.contains("state="));
}

#[tokio::test]
async fn test_unrelated_text_gets_no_reply() {
    let (app, sink, _) = create_test_app("https://www.strava.com");

    let response = app
        .oneshot(webhook_request(7, "nice weather today"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(sink.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_update_without_message_is_acknowledged() {
    let (app, sink, _) = create_test_app("https://www.strava.com");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhook")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"update_id": 99}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(sink.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_callback_renders_paste_string() {
    let (app, _, _) = create_test_app("https://www.strava.com");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/callback?code=abc123&state=nonce-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("abc123 nonce-1"));
}

#[tokio::test]
async fn test_callback_without_code_rejected() {
    let (app, _, _) = create_test_app("https://www.strava.com");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/callback")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_with_provider_error() {
    let (app, _, _) = create_test_app("https://www.strava.com");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/auth/callback?error=access_denied")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(body.to_vec()).unwrap();
    assert!(html.contains("access_denied"));
}
