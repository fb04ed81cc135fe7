//! Activity fetching.

use super::ApiError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One recorded activity.
#[derive(Debug, Clone, Deserialize)]
pub struct Activity {
    pub id: u64,
    pub name: String,
    /// Category tag ("Run", "Ride", ...)
    #[serde(rename = "type", default)]
    pub sport: String,
    /// Moving time in seconds
    #[serde(default)]
    pub moving_time: u64,
    /// Distance in meters
    #[serde(default)]
    pub distance: f64,
    /// When the activity started (UTC)
    pub start_date: DateTime<Utc>,
}

/// Source of new activities for the polling scheduler.
///
/// Implemented by the Strava client in production and by in-memory fakes in
/// tests.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Fetch activities started strictly after `since`.
    async fn fetch_since(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Activity>, ApiError>;
}

/// HTTP client for the Strava activities API.
pub struct ActivitiesClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl ActivitiesClient {
    /// `base_url` is the API root, e.g. `https://www.strava.com/api/v3`.
    pub fn new(base_url: String, timeout: std::time::Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }
}

#[async_trait]
impl ActivitySource for ActivitiesClient {
    async fn fetch_since(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Activity>, ApiError> {
        let url = format!(
            "{}/athlete/activities?after={}&per_page=50",
            self.base_url,
            since.timestamp()
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
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

        response.json::<Vec<Activity>>().await.map_err(ApiError::Parse)
    }
}
