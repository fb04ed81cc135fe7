//! In-process store backend.
//!
//! Backs all three store traits with `DashMap`s. Entry-level locking gives
//! the same per-key atomicity contract as the SQLite backend; `take` maps
//! directly onto `DashMap::remove`, so exactly one of two racing consumers
//! observes the record. Used by tests and ephemeral deployments where
//! linkage loss on restart is acceptable.

use super::{Credential, CredentialStore, CursorStore, PendingSession, SessionStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Default)]
pub struct MemoryStore {
    credentials: DashMap<String, Credential>,
    sessions: DashMap<String, PendingSession>,
    cursors: DashMap<String, DateTime<Utc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, identity: &str) -> Result<Option<Credential>> {
        Ok(self.credentials.get(identity).map(|r| r.value().clone()))
    }

    fn put(&self, identity: &str, credential: &Credential) -> Result<()> {
        self.credentials
            .insert(identity.to_string(), credential.clone());
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<bool> {
        Ok(self.credentials.remove(identity).is_some())
    }

    fn list_identities(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.credentials.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, identity: &str) -> Result<Option<PendingSession>> {
        Ok(self.sessions.get(identity).map(|r| r.value().clone()))
    }

    fn put(&self, identity: &str, session: &PendingSession) -> Result<()> {
        self.sessions.insert(identity.to_string(), session.clone());
        Ok(())
    }

    fn delete(&self, identity: &str) -> Result<bool> {
        Ok(self.sessions.remove(identity).is_some())
    }

    fn take(&self, identity: &str) -> Result<Option<PendingSession>> {
        Ok(self.sessions.remove(identity).map(|(_, v)| v))
    }

    fn list_identities(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

impl CursorStore for MemoryStore {
    fn last_seen(&self, identity: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.cursors.get(identity).map(|r| *r.value()))
    }

    fn set_last_seen(&self, identity: &str, ts: DateTime<Utc>) -> Result<()> {
        self.cursors.insert(identity.to_string(), ts);
        Ok(())
    }
}
