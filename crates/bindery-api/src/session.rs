// Credential store and single-flight token refresher
//
// Each bridge has one credential slot. `TokenRefresher::get_valid_token`
// hands out the cached credential while it is outside the safety margin
// and otherwise joins (or starts) the single in-flight refresh for that
// bridge. All waiters of one refresh observe the same outcome.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::auth::{Credential, TokenSource, expires_within};
use crate::error::Error;

// ── Policy ──────────────────────────────────────────────────────────

/// When to refresh and how hard to try.
#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    /// Refresh when the credential expires within this window.
    pub margin: Duration,
    /// Total attempts per refresh; only transient failures are retried.
    pub attempts: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            margin: Duration::from_secs(60),
            attempts: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl RefreshPolicy {
    fn margin_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.margin).unwrap_or(TimeDelta::MAX)
    }
}

// ── CredentialStore ─────────────────────────────────────────────────

#[derive(Default)]
struct Entry {
    current: Option<Credential>,
    /// Expiry as reported by the vendor for `current`, before clamping.
    valid_until: Option<DateTime<Utc>>,
    refresh_token: Option<SecretString>,
    /// Latest expiry ever stored; survives invalidation.
    high_water: Option<DateTime<Utc>>,
}

/// Current credential per bridge.
///
/// Writes go through [`CredentialStore::replace`], which keeps the
/// published expiry monotonic per bridge. Freshness checks use the expiry
/// the vendor actually reported, so a clamped credential is still renewed
/// on time.
#[derive(Default)]
pub struct CredentialStore {
    entries: DashMap<String, Entry>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached credential, if any.
    pub fn get(&self, bridge: &str) -> Option<Credential> {
        self.entries.get(bridge).and_then(|e| e.current.clone())
    }

    /// The cached credential unless it expires within `margin` of `now`,
    /// judged by the vendor-reported expiry.
    pub fn get_fresh(
        &self,
        bridge: &str,
        margin: TimeDelta,
        now: DateTime<Utc>,
    ) -> Option<Credential> {
        let entry = self.entries.get(bridge)?;
        let current = entry.current.as_ref()?;
        let valid_until = entry.valid_until.unwrap_or(current.expires_at);
        if expires_within(valid_until, margin, now) {
            None
        } else {
            Some(current.clone())
        }
    }

    /// The refresh token held for a bridge, even after invalidation.
    pub fn refresh_token(&self, bridge: &str) -> Option<SecretString> {
        self.entries.get(bridge).and_then(|e| e.refresh_token.clone())
    }

    /// Store a freshly obtained credential and return what was stored.
    ///
    /// An expiry earlier than any previously stored one is clamped up.
    pub fn replace(&self, bridge: &str, mut credential: Credential) -> Credential {
        let mut entry = self.entries.entry(bridge.to_owned()).or_default();
        entry.valid_until = Some(credential.expires_at);
        if let Some(previous) = entry.high_water {
            if credential.expires_at < previous {
                debug!(
                    bridge,
                    reported = %credential.expires_at,
                    %previous,
                    "clamping credential expiry"
                );
                credential.expires_at = previous;
            }
        }
        entry.high_water = Some(credential.expires_at);
        if credential.refresh_token.is_some() {
            entry.refresh_token.clone_from(&credential.refresh_token);
        }
        entry.current = Some(credential.clone());
        credential
    }

    /// Drop the cached access token; the refresh token is kept.
    pub fn invalidate(&self, bridge: &str) {
        if let Some(mut entry) = self.entries.get_mut(bridge) {
            entry.current = None;
            entry.valid_until = None;
        }
    }

    /// Drop the cached access token only if it is `rejected`.
    ///
    /// Returns whether anything was dropped. A newer credential stored by
    /// a concurrent refresh is left alone.
    pub fn invalidate_if(&self, bridge: &str, rejected: &Credential) -> bool {
        let Some(mut entry) = self.entries.get_mut(bridge) else {
            return false;
        };
        if entry.current.as_ref().is_some_and(|c| c.same_token(rejected)) {
            entry.current = None;
            entry.valid_until = None;
            true
        } else {
            false
        }
    }

    /// Forget everything about a bridge.
    pub fn remove(&self, bridge: &str) {
        self.entries.remove(bridge);
    }
}

// ── TokenRefresher ──────────────────────────────────────────────────

/// Failure shared among all waiters of one refresh.
#[derive(Debug, Clone)]
struct RefreshFailure {
    message: String,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, RefreshFailure>>>;

struct Bridge {
    source: Arc<dyn TokenSource>,
    policy: RefreshPolicy,
    inflight: Mutex<Option<SharedRefresh>>,
}

/// Obtains and renews credentials, at most one refresh per bridge at a
/// time.
pub struct TokenRefresher {
    store: Arc<CredentialStore>,
    bridges: DashMap<String, Arc<Bridge>>,
}

impl Default for TokenRefresher {
    fn default() -> Self {
        Self::new(Arc::new(CredentialStore::new()))
    }
}

impl TokenRefresher {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            bridges: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Register (or replace) the token source for a bridge.
    ///
    /// Replacing a bridge drops its cached credential.
    pub fn register(
        &self,
        bridge: impl Into<String>,
        source: Arc<dyn TokenSource>,
        policy: RefreshPolicy,
    ) {
        let bridge = bridge.into();
        self.store.remove(&bridge);
        self.bridges.insert(
            bridge,
            Arc::new(Bridge {
                source,
                policy,
                inflight: Mutex::new(None),
            }),
        );
    }

    pub fn unregister(&self, bridge: &str) {
        self.bridges.remove(bridge);
        self.store.remove(bridge);
    }

    /// Drop the cached credential so the next call refreshes.
    pub fn invalidate(&self, bridge: &str) {
        debug!(bridge, "invalidating credential");
        self.store.invalidate(bridge);
    }

    /// Drop the cached credential if it is the one the vendor rejected.
    ///
    /// A late rejection of an already replaced token is ignored, so the
    /// retry reuses the newer credential instead of refreshing again.
    pub fn invalidate_if(&self, bridge: &str, rejected: &Credential) {
        if self.store.invalidate_if(bridge, rejected) {
            debug!(bridge, "invalidated rejected credential");
        } else {
            debug!(bridge, "rejected credential already replaced");
        }
    }

    /// A credential outside the safety margin, refreshing if needed.
    pub async fn get_valid_token(&self, bridge: &str) -> Result<Credential, Error> {
        let entry = self
            .bridges
            .get(bridge)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| Error::UnknownBridge {
                bridge: bridge.to_owned(),
            })?;

        let margin = entry.policy.margin_delta();
        if let Some(credential) = self.fresh(bridge, margin) {
            return Ok(credential);
        }

        let refresh = {
            let mut inflight = entry.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            // A refresh may have completed between the check above and
            // taking the lock; it stores before clearing `inflight`.
            if let Some(credential) = self.fresh(bridge, margin) {
                return Ok(credential);
            }
            if let Some(existing) = inflight.as_ref() {
                debug!(bridge, "joining in-flight refresh");
                existing.clone()
            } else {
                let started = self.start_refresh(bridge, &entry);
                *inflight = Some(started.clone());
                started
            }
        };

        refresh
            .await
            .map_err(|failure| Error::Authentication {
                message: failure.message,
            })
    }

    fn fresh(&self, bridge: &str, margin: TimeDelta) -> Option<Credential> {
        self.store.get_fresh(bridge, margin, Utc::now())
    }

    fn start_refresh(&self, bridge: &str, entry: &Arc<Bridge>) -> SharedRefresh {
        let bridge = bridge.to_owned();
        let entry = Arc::clone(entry);
        let store = Arc::clone(&self.store);

        async move {
            let refresh_token = store.refresh_token(&bridge);
            let outcome = fetch_with_retry(&bridge, &entry, refresh_token.as_ref()).await;
            let result = match outcome {
                Ok(credential) => {
                    let stored = store.replace(&bridge, credential);
                    info!(bridge = %bridge, expires_at = %stored.expires_at, "credential refreshed");
                    Ok(stored)
                }
                Err(e) => {
                    warn!(bridge = %bridge, error = %e, "credential refresh failed");
                    Err(RefreshFailure {
                        message: e.to_string(),
                    })
                }
            };
            *entry
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = None;
            result
        }
        .boxed()
        .shared()
    }
}

async fn fetch_with_retry(
    bridge: &str,
    entry: &Bridge,
    refresh_token: Option<&SecretString>,
) -> Result<Credential, Error> {
    let attempts = entry.policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match entry.source.fetch_token(refresh_token).await {
            Ok(credential) => return Ok(credential),
            Err(e) if e.is_transient() && attempt < attempts => {
                debug!(bridge, attempt, error = %e, "transient token failure, retrying");
                attempt += 1;
                tokio::time::sleep(entry.policy.retry_delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
