//! Strava OAuth 2.0 operations.
//!
//! Wraps the three provider calls the auth state machine depends on:
//! building the authorization URL, exchanging an authorization code, and
//! refreshing an access token. The base URL is overridable so tests can
//! point the client at a mock server.

use super::ApiError;
use crate::config::StravaConfig;
use crate::store::Credential;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Strava's fallback access-token lifetime when the response omits
/// `expires_in` (six hours).
const DEFAULT_EXPIRES_IN_SECS: i64 = 21_600;

/// Token endpoint response for both exchange and refresh.
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Result of a token refresh.
///
/// `refresh_token` is `None` when the provider did not rotate it; the caller
/// keeps the previous one.
#[derive(Debug, Clone)]
pub struct RefreshGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Client for the Strava OAuth endpoints.
pub struct OauthClient {
    client_id: String,
    client_secret: String,
    base_url: String,
    redirect_uri: String,
    scopes: Vec<String>,
    http_client: reqwest::Client,
}

impl OauthClient {
    /// Build a client from configuration.
    ///
    /// `redirect_uri` is the public callback URL the provider redirects to
    /// after authorization. All requests carry `timeout`.
    pub fn new(config: &StravaConfig, redirect_uri: String, timeout: std::time::Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            base_url: config.oauth_base_url.trim_end_matches('/').to_string(),
            redirect_uri,
            scopes: config.scopes.clone(),
            http_client,
        }
    }

    /// Build the authorization URL the user visits, embedding `nonce` as the
    /// OAuth `state` parameter.
    pub fn authorize_url(&self, nonce: &str) -> String {
        let scopes = self.scopes.join(",");
        format!(
            "{}/oauth/authorize?client_id={}&response_type=code&redirect_uri={}&approval_prompt=force&scope={}&state={}",
            self.base_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(nonce)
        )
    }

    /// Exchange an authorization code for a credential.
    pub async fn exchange_code(&self, code: &str) -> Result<Credential, ApiError> {
        debug!("Exchanging authorization code for token");

        let mut form = HashMap::new();
        form.insert("client_id", self.client_id.as_str());
        form.insert("client_secret", self.client_secret.as_str());
        form.insert("code", code);
        form.insert("grant_type", "authorization_code");

        let response = self.post_token(&form).await?;

        let refresh_token = response.refresh_token.unwrap_or_default();
        if refresh_token.is_empty() {
            // Strava always issues one on exchange; treat absence as a
            // malformed grant rather than storing an unrefreshable record.
            return Err(ApiError::Provider {
                status: 200,
                body: "token response missing refresh_token".to_string(),
            });
        }

        Ok(Credential {
            access_token: response.access_token,
            refresh_token,
            expires_at: expires_at_from(response.expires_in),
        })
    }

    /// Refresh an access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, ApiError> {
        debug!("Refreshing access token");

        let mut form = HashMap::new();
        form.insert("client_id", self.client_id.as_str());
        form.insert("client_secret", self.client_secret.as_str());
        form.insert("refresh_token", refresh_token);
        form.insert("grant_type", "refresh_token");

        let response = self.post_token(&form).await?;

        Ok(RefreshGrant {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: expires_at_from(response.expires_in),
        })
    }

    async fn post_token(&self, form: &HashMap<&str, &str>) -> Result<TokenResponse, ApiError> {
        let url = format!("{}/oauth/token", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(ApiError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        response.json::<TokenResponse>().await.map_err(ApiError::Parse)
    }
}

fn expires_at_from(expires_in: Option<i64>) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
}
