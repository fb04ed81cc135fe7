//! Durable state for the auth lifecycle.
//!
//! Two records share the identity key and are mutually exclusive in meaning:
//! a [`PendingSession`] marks an in-flight authorization handshake, a
//! [`Credential`] marks a completed one. Both are reached through store
//! traits so backends can be swapped (SQLite for deployment, in-process maps
//! for tests) without touching the state machine. Every operation is atomic
//! per key; cross-key consistency is never assumed.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

mod encryption;
pub mod memory;
pub mod sqlite;

pub use encryption::{open_token, seal_token, validate_key};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// One authorized linkage between a chat identity and a Strava account.
///
/// At most one credential exists per identity; a reconnect overwrites it.
/// The access token must never be used past `expires_at` without a
/// preceding successful refresh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    /// OAuth access token (used for API requests)
    pub access_token: String,
    /// OAuth refresh token (used to obtain new access tokens)
    pub refresh_token: String,
    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,
}

/// One in-flight authorization attempt.
///
/// Created when a connect command is accepted, consumed on successful code
/// exchange. A session older than the configured TTL is logically expired
/// even while the record still exists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingSession {
    /// Anti-replay state token embedded in the authorization URL
    pub nonce: String,
    /// When the connect command was accepted (UTC)
    pub created_at: DateTime<Utc>,
}

impl PendingSession {
    /// True once the session has outlived `ttl`.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > ttl
    }
}

/// Storage for [`Credential`] records, keyed by identity.
pub trait CredentialStore: Send + Sync {
    fn get(&self, identity: &str) -> Result<Option<Credential>>;

    /// Insert or replace (upsert).
    fn put(&self, identity: &str, credential: &Credential) -> Result<()>;

    /// Returns true if a record existed and was removed.
    fn delete(&self, identity: &str) -> Result<bool>;

    /// All identities that currently hold a credential.
    fn list_identities(&self) -> Result<Vec<String>>;
}

/// Storage for [`PendingSession`] records, keyed by identity.
pub trait SessionStore: Send + Sync {
    fn get(&self, identity: &str) -> Result<Option<PendingSession>>;

    /// Insert or replace (upsert).
    fn put(&self, identity: &str, session: &PendingSession) -> Result<()>;

    /// Returns true if a record existed and was removed.
    fn delete(&self, identity: &str) -> Result<bool>;

    /// Atomically remove and return the session. When two callers race on
    /// the same identity, exactly one observes the record.
    fn take(&self, identity: &str) -> Result<Option<PendingSession>>;

    /// All identities with a session record, expired or not.
    fn list_identities(&self) -> Result<Vec<String>>;
}

/// Per-identity watermark of the newest activity already notified.
///
/// Keeps overlapping poll windows from re-announcing the same activity and
/// lets a delayed tick resume where it left off.
pub trait CursorStore: Send + Sync {
    fn last_seen(&self, identity: &str) -> Result<Option<DateTime<Utc>>>;
    fn set_last_seen(&self, identity: &str, ts: DateTime<Utc>) -> Result<()>;
}
