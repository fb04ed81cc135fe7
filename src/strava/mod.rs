//! Strava API integration.
//!
//! Two thin clients: [`oauth::OauthClient`] wraps the three OAuth 2.0
//! operations (authorize-URL construction, code exchange, token refresh) and
//! [`activities::ActivitiesClient`] fetches recent activities. Both are
//! stateless; credentials are supplied per call and owned by the stores.

use thiserror::Error;

pub mod activities;
pub mod oauth;

pub use activities::{ActivitiesClient, Activity, ActivitySource};
pub use oauth::{OauthClient, RefreshGrant};

/// Failure talking to the Strava API.
///
/// Timeouts and 5xx responses are retryable; the auth state machine never
/// mutates stored state on a retryable failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("failed to parse provider response: {0}")]
    Parse(#[source] reqwest::Error),
}

impl ApiError {
    /// Classify a reqwest failure, separating timeouts from other transport
    /// errors.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Transport(err)
        }
    }

    /// True when retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Timeout | ApiError::Transport(_) => true,
            ApiError::Provider { status, .. } => *status >= 500,
            ApiError::Parse(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_retryability() {
        let server_side = ApiError::Provider {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert!(server_side.is_retryable());

        let rejected = ApiError::Provider {
            status: 400,
            body: "invalid_grant".to_string(),
        };
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        assert!(ApiError::Timeout.is_retryable());
    }
}
