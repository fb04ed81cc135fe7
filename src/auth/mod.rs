//! Auth lifecycle state machine.
//!
//! Owns the per-identity transition between Unauthenticated, Pending,
//! Connected and refresh failure. All state lives in the injected stores;
//! the manager itself holds no per-user data, so any number of webhook
//! handlers and scheduler workers can share one instance. No lock is held
//! across a network call: `submit_code` exchanges the code first and only
//! then consumes the pending session atomically, which is what makes a
//! same-identity race resolve to exactly one winner.

use crate::config::AuthConfig;
use crate::store::{Credential, CredentialStore, PendingSession, SessionStore};
use crate::strava::{ApiError, OauthClient};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;


/// Failure of an auth state-machine operation.
///
/// Each kind maps to one distinct user-facing reply in the command router;
/// raw transport detail stays in the source chain for logs.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("an authorization attempt is already in progress")]
    AlreadyPending,

    #[error("this chat is already connected")]
    AlreadyConnected,

    #[error("no authorization attempt is in progress")]
    NoSession,

    #[error("the authorization attempt has expired")]
    SessionExpired,

    #[error("authorization state does not match this attempt")]
    NonceMismatch,

    #[error("code exchange failed: {0}")]
    ExchangeFailed(#[source] ApiError),

    #[error("token refresh failed: {0}")]
    RefreshFailed(#[source] ApiError),

    #[error("this chat is not connected")]
    NotConnected,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Where an identity currently stands.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStatus {
    Unauthenticated,
    Pending,
    Connected { expires_at: DateTime<Utc> },
}

/// Result of [`AuthManager::ensure_fresh`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshOutcome {
    /// Expiry was outside the safety margin; nothing was done.
    Fresh,
    /// The token was refreshed and the credential persisted.
    Refreshed,
}

pub struct AuthManager {
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    oauth: OauthClient,
    session_ttl: Duration,
    refresh_margin: Duration,
}

impl AuthManager {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        oauth: OauthClient,
        config: &AuthConfig,
    ) -> Self {
        Self {
            credentials,
            sessions,
            oauth,
            session_ttl: Duration::seconds(config.session_ttl_secs),
            refresh_margin: Duration::seconds(config.refresh_margin_secs),
        }
    }

    /// Begin an authorization handshake.
    ///
    /// Rejects when the identity is already connected or already has a live
    /// pending session; a logically expired session is replaced. On success
    /// returns the provider authorization URL carrying a fresh nonce.
    pub fn start_connect(&self, identity: &str) -> Result<String, AuthError> {
        if self.credentials.get(identity)?.is_some() {
            return Err(AuthError::AlreadyConnected);
        }

        let now = Utc::now();
        if let Some(session) = self.sessions.get(identity)? {
            if !session.is_expired(self.session_ttl, now) {
                return Err(AuthError::AlreadyPending);
            }
        }

        let nonce = Uuid::new_v4().to_string();
        let session = PendingSession {
            nonce: nonce.clone(),
            created_at: now,
        };
        self.sessions.put(identity, &session)?;

        info!(identity = %identity, "Authorization handshake started");

        Ok(self.oauth.authorize_url(&nonce))
    }

    /// Complete the handshake with the code and echoed state from the
    /// provider callback.
    ///
    /// Fails closed on a state mismatch without touching the session, so a
    /// mistyped paste can be retried. An exchange failure likewise preserves
    /// the session. Only after a successful exchange is the session consumed
    /// atomically and the credential written; when two submissions race,
    /// the loser of the consume observes [`AuthError::NoSession`].
    pub async fn submit_code(
        &self,
        identity: &str,
        code: &str,
        state: &str,
    ) -> Result<(), AuthError> {
        let session = self.sessions.get(identity)?.ok_or(AuthError::NoSession)?;

        let now = Utc::now();
        if session.is_expired(self.session_ttl, now) {
            self.sessions.delete(identity)?;
            debug!(identity = %identity, "Stale pending session removed");
            return Err(AuthError::SessionExpired);
        }

        if session.nonce != state {
            warn!(identity = %identity, "Authorization state mismatch");
            return Err(AuthError::NonceMismatch);
        }

        let credential = self
            .oauth
            .exchange_code(code)
            .await
            .map_err(AuthError::ExchangeFailed)?;

        match self.sessions.take(identity)? {
            Some(taken) if taken.nonce == session.nonce => {
                self.credentials.put(identity, &credential)?;
                info!(identity = %identity, "Account connected");
                Ok(())
            }
            Some(other) => {
                // The session was replaced while we were exchanging. Not
                // ours to consume; restore it.
                self.sessions.put(identity, &other)?;
                Err(AuthError::NoSession)
            }
            None => Err(AuthError::NoSession),
        }
    }

    /// Remove the identity's credential.
    ///
    /// Outwardly idempotent: the returned flag says whether a credential
    /// existed, and callers word their reply accordingly instead of erroring.
    pub fn disconnect(&self, identity: &str) -> Result<bool, AuthError> {
        let existed = self.credentials.delete(identity)?;
        if existed {
            info!(identity = %identity, "Account disconnected");
        }
        Ok(existed)
    }

    /// Refresh the access token when expiry is inside the safety margin.
    ///
    /// Outside the margin this performs no network call and leaves the
    /// credential untouched. On a refresh failure the stored credential is
    /// also left untouched, so the last-known-good record stays available;
    /// the caller decides how often to surface the failure.
    pub async fn ensure_fresh(&self, identity: &str) -> Result<RefreshOutcome, AuthError> {
        let credential = self.credentials.get(identity)?.ok_or(AuthError::NotConnected)?;

        if credential.expires_at - Utc::now() > self.refresh_margin {
            return Ok(RefreshOutcome::Fresh);
        }

        let grant = self
            .oauth
            .refresh(&credential.refresh_token)
            .await
            .map_err(AuthError::RefreshFailed)?;

        let updated = Credential {
            access_token: grant.access_token,
            // Keep the prior refresh token when the provider does not rotate
            refresh_token: grant.refresh_token.unwrap_or(credential.refresh_token),
            expires_at: grant.expires_at,
        };
        self.credentials.put(identity, &updated)?;

        info!(identity = %identity, expires_at = %updated.expires_at, "Access token refreshed");

        Ok(RefreshOutcome::Refreshed)
    }

    /// Pure read of the identity's state. No side effects: an expired
    /// pending session reads as `Unauthenticated` but is left in place for
    /// the explicit purge (deleting here would race an in-flight
    /// `submit_code`). A credential wins over a leftover session.
    pub fn query_status(&self, identity: &str) -> Result<AuthStatus, AuthError> {
        if let Some(credential) = self.credentials.get(identity)? {
            return Ok(AuthStatus::Connected {
                expires_at: credential.expires_at,
            });
        }

        match self.sessions.get(identity)? {
            Some(session) if !session.is_expired(self.session_ttl, Utc::now()) => {
                Ok(AuthStatus::Pending)
            }
            _ => Ok(AuthStatus::Unauthenticated),
        }
    }

    /// Remove pending sessions past their TTL. Returns how many were purged.
    ///
    /// Consume-and-check: a session that turns out to be live (replaced
    /// since the candidate scan) is put back untouched.
    pub fn purge_expired_sessions(&self) -> Result<usize, AuthError> {
        let now = Utc::now();
        let mut purged = 0;

        for identity in self.sessions.list_identities()? {
            let Some(candidate) = self.sessions.get(&identity)? else {
                continue;
            };
            if !candidate.is_expired(self.session_ttl, now) {
                continue;
            }
            if let Some(taken) = self.sessions.take(&identity)? {
                if taken.is_expired(self.session_ttl, now) {
                    purged += 1;
                } else {
                    self.sessions.put(&identity, &taken)?;
                }
            }
        }

        if purged > 0 {
            debug!(purged = purged, "Expired pending sessions removed");
        }

        Ok(purged)
    }
}

/// Background task that periodically purges expired pending sessions.
pub async fn run_session_purge(manager: Arc<AuthManager>, interval_secs: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;
        if let Err(e) = manager.purge_expired_sessions() {
            warn!(error = %e, "Session purge failed");
        }
    }
}
