//! SQLite-backed stores with tokens encrypted at rest.
//!
//! One database file holds all three tables. The connection runs in
//! serialized mode behind a `Mutex`, which gives every trait method per-key
//! atomicity; `take` performs its read and delete under a single lock
//! acquisition so concurrent consumers cannot both observe a session.
//!
//! # Schema
//! ```sql
//! CREATE TABLE credentials (
//!     identity TEXT PRIMARY KEY,
//!     access_token TEXT NOT NULL,   -- sealed (AES-256-GCM)
//!     refresh_token TEXT NOT NULL,  -- sealed (AES-256-GCM)
//!     expires_at TEXT NOT NULL,     -- RFC 3339
//!     created_at TEXT NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//! CREATE TABLE pending_sessions (
//!     identity TEXT PRIMARY KEY,
//!     nonce TEXT NOT NULL,
//!     created_at TEXT NOT NULL
//! );
//! CREATE TABLE poll_cursors (
//!     identity TEXT PRIMARY KEY,
//!     last_seen TEXT NOT NULL
//! );
//! ```

use super::{encryption, Credential, CredentialStore, CursorStore, PendingSession, SessionStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    encryption_key: Vec<u8>,
}

impl SqliteStore {
    /// Creates or opens the store.
    ///
    /// `encryption_key` is the base64-encoded 32-byte master key used to
    /// seal token columns.
    pub fn new<P: AsRef<Path>>(db_path: P, encryption_key: &str) -> Result<Self> {
        let key_bytes =
            encryption::validate_key(encryption_key).context("Invalid encryption key")?;

        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                identity TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pending_sessions (
                identity TEXT PRIMARY KEY,
                nonce TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS poll_cursors (
                identity TEXT PRIMARY KEY,
                last_seen TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            encryption_key: key_bytes,
        })
    }

    fn row_to_credential(&self, access: String, refresh: String, expires: String) -> Result<Credential> {
        Ok(Credential {
            access_token: encryption::open_token(&access, &self.encryption_key)
                .context("Failed to decrypt access token")?,
            refresh_token: encryption::open_token(&refresh, &self.encryption_key)
                .context("Failed to decrypt refresh token")?,
            expires_at: parse_ts(&expires)?,
        })
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .context("Failed to parse stored timestamp")
}

impl CredentialStore for SqliteStore {
    fn get(&self, identity: &str) -> Result<Option<Credential>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at FROM credentials WHERE identity = ?1",
                params![identity],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()
            .context("Failed to query credential")?;

        match row {
            Some((access, refresh, expires)) => {
                Ok(Some(self.row_to_credential(access, refresh, expires)?))
            }
            None => Ok(None),
        }
    }

    fn put(&self, identity: &str, credential: &Credential) -> Result<()> {
        let access = encryption::seal_token(&credential.access_token, &self.encryption_key)
            .context("Failed to encrypt access token")?;
        let refresh = encryption::seal_token(&credential.refresh_token, &self.encryption_key)
            .context("Failed to encrypt refresh token")?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO credentials (identity, access_token, refresh_token, expires_at, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                ON CONFLICT(identity) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    identity,
                    access,
                    refresh,
                    credential.expires_at.to_rfc3339(),
                    now,
                ],
            )
            .context("Failed to store credential")?;

        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute("DELETE FROM credentials WHERE identity = ?1", params![identity])
            .context("Failed to delete credential")?;
        Ok(rows > 0)
    }

    fn list_identities(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT identity FROM credentials ORDER BY identity")
            .context("Failed to prepare query")?;
        let identities = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to list credentials")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;
        Ok(identities)
    }
}

impl SessionStore for SqliteStore {
    fn get(&self, identity: &str) -> Result<Option<PendingSession>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT nonce, created_at FROM pending_sessions WHERE identity = ?1",
                params![identity],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("Failed to query session")?;

        match row {
            Some((nonce, created)) => Ok(Some(PendingSession {
                nonce,
                created_at: parse_ts(&created)?,
            })),
            None => Ok(None),
        }
    }

    fn put(&self, identity: &str, session: &PendingSession) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO pending_sessions (identity, nonce, created_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(identity) DO UPDATE SET
                    nonce = excluded.nonce,
                    created_at = excluded.created_at
                "#,
                params![identity, session.nonce, session.created_at.to_rfc3339()],
            )
            .context("Failed to store session")?;
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM pending_sessions WHERE identity = ?1",
                params![identity],
            )
            .context("Failed to delete session")?;
        Ok(rows > 0)
    }

    fn take(&self, identity: &str) -> Result<Option<PendingSession>> {
        // Read and delete under one lock acquisition so a racing consumer
        // observes None.
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT nonce, created_at FROM pending_sessions WHERE identity = ?1",
                params![identity],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .context("Failed to query session")?;

        let Some((nonce, created)) = row else {
            return Ok(None);
        };

        conn.execute(
            "DELETE FROM pending_sessions WHERE identity = ?1",
            params![identity],
        )
        .context("Failed to consume session")?;

        Ok(Some(PendingSession {
            nonce,
            created_at: parse_ts(&created)?,
        }))
    }

    fn list_identities(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT identity FROM pending_sessions ORDER BY identity")
            .context("Failed to prepare query")?;
        let identities = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to list sessions")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;
        Ok(identities)
    }
}

impl CursorStore for SqliteStore {
    fn last_seen(&self, identity: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT last_seen FROM poll_cursors WHERE identity = ?1",
                params![identity],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("Failed to query cursor")?;
        row.map(|s| parse_ts(&s)).transpose()
    }

    fn set_last_seen(&self, identity: &str, ts: DateTime<Utc>) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO poll_cursors (identity, last_seen)
                VALUES (?1, ?2)
                ON CONFLICT(identity) DO UPDATE SET last_seen = excluded.last_seen
                "#,
                params![identity, ts.to_rfc3339()],
            )
            .context("Failed to store cursor")?;
        Ok(())
    }
}
