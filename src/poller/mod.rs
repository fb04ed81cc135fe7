//! Polling scheduler.
//!
//! Wakes on a fixed interval, walks every identity holding a credential,
//! refreshes tokens that are near expiry, fetches activities newer than the
//! identity's cursor and cheers each one. Identities are independent units
//! of work: a failure for one is logged and never aborts the rest, and up to
//! `concurrency` identities are processed at a time.
//!
//! A refresh failure is surfaced to the user once per failure episode. The
//! episode ends with the next successful refresh, not the next tick.

use crate::auth::{AuthError, AuthManager};
use crate::config::PollerConfig;
use crate::store::{CredentialStore, CursorStore};
use crate::strava::{ActivitySource, Activity};
use crate::telegram::NotificationSink;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use dashmap::DashSet;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REFRESH_FAILED_NOTICE: &str = "⚠️ I couldn't refresh your Strava access — the link \
may have been revoked. Send /connect to re-link your account.";

pub struct Poller {
    auth: Arc<AuthManager>,
    credentials: Arc<dyn CredentialStore>,
    cursors: Arc<dyn CursorStore>,
    activities: Arc<dyn ActivitySource>,
    notifier: Arc<dyn NotificationSink>,
    config: PollerConfig,
    /// Identities already told about the current refresh-failure episode
    refresh_alerted: DashSet<String>,
}

impl Poller {
    pub fn new(
        auth: Arc<AuthManager>,
        credentials: Arc<dyn CredentialStore>,
        cursors: Arc<dyn CursorStore>,
        activities: Arc<dyn ActivitySource>,
        notifier: Arc<dyn NotificationSink>,
        config: PollerConfig,
    ) -> Self {
        Self {
            auth,
            credentials,
            cursors,
            activities,
            notifier,
            config,
            refresh_alerted: DashSet::new(),
        }
    }

    /// Spawn the scheduler loop.
    ///
    /// Flipping the watch sender stops the loop after the in-flight tick
    /// finishes; a partially processed identity set is never abandoned
    /// mid-identity.
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.interval_secs,
                concurrency = self.config.concurrency,
                "Polling scheduler started"
            );

            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(self.config.interval_secs));

            loop {
                tokio::select! {
                    _ = interval.tick() => self.run_tick().await,
                    _ = shutdown.changed() => {
                        info!("Polling scheduler stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Run one full tick over all connected identities.
    pub async fn run_tick(&self) {
        let identities = match self.credentials.list_identities() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to enumerate credentials, skipping tick");
                return;
            }
        };

        if identities.is_empty() {
            return;
        }

        debug!(identity_count = identities.len(), "Polling tick");

        futures::stream::iter(identities)
            .for_each_concurrent(self.config.concurrency, |identity| async move {
                if let Err(e) = self.poll_identity(&identity).await {
                    warn!(identity = %identity, error = %e, "Polling failed for identity");
                }
            })
            .await;
    }

    async fn poll_identity(&self, identity: &str) -> Result<()> {
        match self.auth.ensure_fresh(identity).await {
            Ok(_) => {
                // A success ends any refresh-failure episode
                self.refresh_alerted.remove(identity);
            }
            Err(AuthError::RefreshFailed(source)) => {
                warn!(identity = %identity, error = %source, "Token refresh failed");
                if self.refresh_alerted.insert(identity.to_string()) {
                    if let Err(e) = self.notifier.send(identity, REFRESH_FAILED_NOTICE).await {
                        warn!(identity = %identity, error = %e, "Failed to send refresh notice");
                        // Not delivered; let the next tick try again
                        self.refresh_alerted.remove(identity);
                    }
                }
                return Ok(());
            }
            Err(AuthError::NotConnected) => {
                // Credential deleted between enumeration and refresh
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let Some(credential) = self.credentials.get(identity)? else {
            return Ok(());
        };

        let floor = Utc::now() - Duration::hours(self.config.lookback_hours);
        let since = match self.cursors.last_seen(identity)? {
            Some(ts) => ts.max(floor),
            None => floor,
        };

        let activities = self
            .activities
            .fetch_since(&credential.access_token, since)
            .await
            .context("Activity fetch failed")?;

        if activities.is_empty() {
            return Ok(());
        }

        info!(
            identity = %identity,
            activity_count = activities.len(),
            "New activities found"
        );

        // The cursor only advances over activities that were actually sent;
        // a failed send is retried (and may duplicate its predecessors,
        // which the delivery contract allows).
        let mut newest = since;
        for activity in &activities {
            self.notifier
                .send(identity, &cheer(activity))
                .await
                .context("Notification send failed")?;
            if activity.start_date > newest {
                newest = activity.start_date;
                self.cursors.set_last_seen(identity, newest)?;
            }
        }

        Ok(())
    }
}

/// Render the celebratory message for one activity.
fn cheer(activity: &Activity) -> String {
    let minutes = activity.moving_time / 60;
    let emoji = match activity.sport.as_str() {
        "Ride" | "VirtualRide" => "🚴",
        "Swim" => "🏊",
        "Hike" => "🥾",
        _ => "🏃",
    };
    format!(
        "{} <b>Kudos to {}!</b>\n{} minutes well spent!",
        emoji, activity.name, minutes
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, StravaConfig};
    use crate::store::{Credential, MemoryStore, SessionStore};
    use crate::strava::{ApiError, OauthClient};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeSource {
        /// `since` argument of every fetch call
        calls: Mutex<Vec<DateTime<Utc>>>,
        /// Scripted responses, one per call; empty list once drained
        responses: Mutex<VecDeque<Result<Vec<Activity>, ApiError>>>,
    }

    impl FakeSource {
        fn scripted(responses: Vec<Result<Vec<Activity>, ApiError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl ActivitySource for FakeSource {
        async fn fetch_since(
            &self,
            _access_token: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<Activity>, ApiError> {
            self.calls.lock().unwrap().push(since);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![]))
        }
    }

    #[derive(Default)]
    struct FakeSink {
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationSink for FakeSink {
        async fn send(&self, identity: &str, text: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((identity.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn activity(id: u64, name: &str, start: DateTime<Utc>) -> Activity {
        Activity {
            id,
            name: name.to_string(),
            sport: "Run".to_string(),
            moving_time: 1800,
            distance: 5000.0,
            start_date: start,
        }
    }

    fn manager_with(store: &Arc<MemoryStore>, oauth_base_url: &str) -> Arc<AuthManager> {
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
        Arc::new(AuthManager::new(
            Arc::clone(store) as Arc<dyn CredentialStore>,
            Arc::clone(store) as Arc<dyn SessionStore>,
            oauth,
            &AuthConfig::default(),
        ))
    }

    fn poller_with(
        store: &Arc<MemoryStore>,
        oauth_base_url: &str,
        source: Arc<FakeSource>,
        sink: Arc<FakeSink>,
    ) -> Poller {
        Poller::new(
            manager_with(store, oauth_base_url),
            Arc::clone(store) as Arc<dyn CredentialStore>,
            Arc::clone(store) as Arc<dyn CursorStore>,
            source,
            sink,
            PollerConfig::default(),
        )
    }

    fn connect(store: &Arc<MemoryStore>, identity: &str, expires_in: Duration) {
        CredentialStore::put(
            store.as_ref(),
            identity,
            &Credential {
                access_token: format!("at_{}", identity),
                refresh_token: format!("rt_{}", identity),
                expires_at: Utc::now() + expires_in,
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn tick_cheers_new_activities_and_advances_cursor() {
        let store = Arc::new(MemoryStore::new());
        connect(&store, "u1", Duration::hours(6));

        let ran_at = Utc::now() - Duration::hours(1);
        let source = FakeSource::scripted(vec![Ok(vec![activity(1, "Morning Run", ran_at)])]);
        let sink = Arc::new(FakeSink::default());
        let poller = poller_with(&store, "https://www.strava.com", Arc::clone(&source), Arc::clone(&sink));

        poller.run_tick().await;

        let sent = sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "u1");
        assert!(sent[0].1.contains("Kudos to Morning Run!"));
        assert!(sent[0].1.contains("30 minutes"));

        // Second tick fetches from the cursor, not the wall-clock window
        poller.run_tick().await;
        let calls = source.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], ran_at);
        // No duplicate cheer
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_tick_uses_lookback_floor() {
        let store = Arc::new(MemoryStore::new());
        connect(&store, "u1", Duration::hours(6));

        let source = FakeSource::scripted(vec![Ok(vec![])]);
        let sink = Arc::new(FakeSink::default());
        let poller = poller_with(&store, "https://www.strava.com", Arc::clone(&source), sink);

        let before = Utc::now();
        poller.run_tick().await;

        let calls = source.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        let floor = calls[0];
        assert!(floor <= before - Duration::hours(11));
        assert!(floor >= before - Duration::hours(13));
    }

    #[tokio::test]
    async fn one_identity_failure_does_not_abort_others() {
        let store = Arc::new(MemoryStore::new());
        connect(&store, "a", Duration::hours(6));
        connect(&store, "b", Duration::hours(6));

        // Identity order is sorted; "a" errors, "b" has one activity
        let source = FakeSource::scripted(vec![
            Err(ApiError::Timeout),
            Ok(vec![activity(2, "Lunch Ride", Utc::now() - Duration::hours(1))]),
        ]);
        let sink = Arc::new(FakeSink::default());
        let mut config = PollerConfig::default();
        config.concurrency = 1; // deterministic ordering for the script
        let poller = Poller::new(
            manager_with(&store, "https://www.strava.com"),
            Arc::clone(&store) as Arc<dyn CredentialStore>,
            Arc::clone(&store) as Arc<dyn CursorStore>,
            source,
            Arc::clone(&sink) as Arc<dyn NotificationSink>,
            config,
        );

        poller.run_tick().await;

        let sent = sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "b");
    }

    #[tokio::test]
    async fn refresh_failure_notifies_once_per_episode() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(500)
            .with_body("boom")
            .expect_at_least(2)
            .create_async()
            .await;

        let store = Arc::new(MemoryStore::new());
        // Near expiry forces a refresh attempt every tick
        connect(&store, "u1", Duration::minutes(5));

        let source = FakeSource::scripted(vec![]);
        let sink = Arc::new(FakeSink::default());
        let poller = poller_with(&store, &server.url(), source, Arc::clone(&sink));

        poller.run_tick().await;
        poller.run_tick().await;

        let sent = sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1, "one notice per failure episode");
        assert!(sent[0].1.contains("couldn't refresh"));
    }

    #[tokio::test]
    async fn no_activities_means_no_messages() {
        let store = Arc::new(MemoryStore::new());
        connect(&store, "u1", Duration::hours(6));

        let source = FakeSource::scripted(vec![Ok(vec![])]);
        let sink = Arc::new(FakeSink::default());
        let poller = poller_with(&store, "https://www.strava.com", source, Arc::clone(&sink));

        poller.run_tick().await;
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn cheer_formats_duration_and_sport() {
        let a = Activity {
            id: 1,
            name: "Evening Ride".to_string(),
            sport: "Ride".to_string(),
            moving_time: 3725,
            distance: 30123.0,
            start_date: Utc::now(),
        };
        let text = cheer(&a);
        assert!(text.starts_with("🚴"));
        assert!(text.contains("Kudos to Evening Ride!"));
        assert!(text.contains("62 minutes"));
    }
}
