// ── Engine ──
//
// Facade owning bridges, devices, the snapshot store and the sink.
// Each initialized device gets its own poll task; the engine's root
// cancellation token parents every task token, so `shutdown()` stops
// them all.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bindery_api::{
    DeviceApi, HttpDeviceClient, OAuthTokenSource, RawPayload, RequestSpec, StaticTokenSource,
    TokenRefresher, TokenSource,
};

use crate::config::{BridgeAuth, BridgeConfig, DeviceConfig};
use crate::error::CoreError;
use crate::health::{HealthTracker, Transition};
use crate::model::{BridgeId, DeviceHealth, DeviceId, DeviceIdentity, Snapshot};
use crate::normalize::normalize;
use crate::poller::{CycleVerdict, PollCycle, PollState, Poller, RefreshRequest};
use crate::schema::{Schema, SchemaRegistry};
use crate::sink::StateSink;
use crate::store::SnapshotStore;

/// Serializes a cycle's writes with disposal of its device.
type CommitLock = Arc<Mutex<()>>;

struct DeviceEntry {
    config: DeviceConfig,
    /// `None` when the configuration was rejected.
    poller: Option<Poller>,
    commit: CommitLock,
}

struct EngineInner {
    refresher: Arc<TokenRefresher>,
    schemas: SchemaRegistry,
    bridges: DashMap<BridgeId, Arc<dyn DeviceApi>>,
    devices: DashMap<DeviceId, DeviceEntry>,
    store: Arc<SnapshotStore>,
    health: Arc<HealthTracker>,
    sink: Arc<dyn StateSink>,
    cancel: CancellationToken,
}

/// Multi-device polling engine.
///
/// Cheaply cloneable via `Arc<EngineInner>`. Must be used inside a tokio
/// runtime: initializing a device spawns its poll task.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(schemas: SchemaRegistry, sink: Arc<dyn StateSink>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                refresher: Arc::new(TokenRefresher::default()),
                schemas,
                bridges: DashMap::new(),
                devices: DashMap::new(),
                store: Arc::new(SnapshotStore::new()),
                health: Arc::new(HealthTracker::new()),
                sink,
                cancel: CancellationToken::new(),
            }),
        }
    }

    // ── Bridges ─────────────────────────────────────────────────────

    /// Validate a bridge, register its token source and build its HTTP
    /// client. Replacing a bridge drops its cached credential; devices
    /// already polling keep their old client until re-initialized.
    pub fn register_bridge(&self, config: &BridgeConfig) -> Result<(), CoreError> {
        config.validate()?;
        let bridge = config.id.as_str();

        let source: Arc<dyn TokenSource> = match &config.auth {
            BridgeAuth::OAuth {
                token_url,
                client_id,
                client_secret,
                username,
                password,
                scope,
            } => {
                let mut source = OAuthTokenSource::new(
                    token_url.clone(),
                    client_id.as_str(),
                    username.as_str(),
                    password.clone(),
                    &config.transport,
                )?;
                if let Some(secret) = client_secret {
                    source = source.with_client_secret(secret.clone());
                }
                if let Some(scope) = scope {
                    source = source.with_scope(scope.as_str());
                }
                Arc::new(source)
            }
            BridgeAuth::Basic { username, password } => {
                Arc::new(StaticTokenSource::basic(username, password))
            }
            BridgeAuth::Bearer { token } => Arc::new(StaticTokenSource::bearer(token.clone())),
        };

        self.inner
            .refresher
            .register(bridge, source, config.refresh.clone());
        let client = HttpDeviceClient::new(
            bridge,
            config.base_url.clone(),
            Arc::clone(&self.inner.refresher),
            &config.transport,
        )?;
        self.register_client(config.id.clone(), Arc::new(client));
        info!(bridge = %config.id, base_url = %config.base_url, "bridge registered");
        Ok(())
    }

    /// Attach a ready-made client to a bridge id.
    pub fn register_client(&self, bridge: impl Into<BridgeId>, api: Arc<dyn DeviceApi>) {
        self.inner.bridges.insert(bridge.into(), api);
    }

    pub fn refresher(&self) -> &Arc<TokenRefresher> {
        &self.inner.refresher
    }

    // ── Device lifecycle ────────────────────────────────────────────

    /// Validate a device and start polling it.
    ///
    /// A rejected configuration still registers the device (status
    /// `ConfigError`, nothing scheduled) so it can be inspected and
    /// re-initialized; the error is returned as well.
    pub fn initialize_device(&self, config: DeviceConfig) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        let device = config.identity.device.clone();
        if self.inner.devices.contains_key(&device) {
            return Err(CoreError::DuplicateDevice {
                device: device.to_string(),
            });
        }

        let token = self.inner.cancel.child_token();
        let commit = CommitLock::default();
        let prepared = self.prepare(&config, token.clone(), Arc::clone(&commit));

        let Entry::Vacant(slot) = self.inner.devices.entry(device.clone()) else {
            return Err(CoreError::DuplicateDevice {
                device: device.to_string(),
            });
        };
        self.inner.health.reset(&device);

        match prepared {
            Ok((cycle, interval)) => {
                let poller = Poller::spawn(Arc::new(cycle), interval, token);
                slot.insert(DeviceEntry {
                    config,
                    poller: Some(poller),
                    commit,
                });
                info!(device = %device, interval_secs = interval.as_secs(), "device initialized");
                Ok(())
            }
            Err(e) => {
                let detail = e.to_string();
                warn!(device = %device, error = %detail, "device configuration rejected");
                slot.insert(DeviceEntry {
                    config,
                    poller: None,
                    commit,
                });
                let transition = self.inner.health.record_config_error(&device, &detail);
                self.inner.sink.update_connectivity(
                    &device,
                    transition.health.status,
                    transition.health.detail.as_deref(),
                );
                Err(e)
            }
        }
    }

    /// Stop polling a device and forget everything about it.
    ///
    /// Does not wait: a cycle already in flight completes in the
    /// background and its result is discarded. A cycle that is writing
    /// its result finishes before the device's state is removed.
    pub fn dispose_device(&self, device: &DeviceId) -> Result<(), CoreError> {
        let (_, entry) =
            self.inner
                .devices
                .remove(device)
                .ok_or_else(|| CoreError::UnknownDevice {
                    device: device.to_string(),
                })?;
        let _commit = entry.commit.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(poller) = &entry.poller {
            poller.cancel();
        }
        self.inner.store.remove(device);
        self.inner.health.remove(device);
        debug!(device = %device, "device disposed");
        Ok(())
    }

    /// Dispose and initialize again with the stored configuration.
    /// Leaves `Suspended` and `ConfigError` states.
    pub fn reinitialize(&self, device: &DeviceId) -> Result<(), CoreError> {
        let config = self
            .inner
            .devices
            .get(device)
            .map(|entry| entry.config.clone())
            .ok_or_else(|| CoreError::UnknownDevice {
                device: device.to_string(),
            })?;
        self.dispose_device(device)?;
        self.initialize_device(config)
    }

    /// Replace a device's configuration.
    pub fn update_device(&self, config: DeviceConfig) -> Result<(), CoreError> {
        let device = config.identity.device.clone();
        if self.inner.devices.contains_key(&device) {
            self.dispose_device(&device)?;
        }
        self.initialize_device(config)
    }

    /// Out-of-band cycle for one device. Skipped while a cycle runs.
    pub fn refresh_now(&self, device: &DeviceId) -> Result<RefreshRequest, CoreError> {
        let entry = self
            .inner
            .devices
            .get(device)
            .ok_or_else(|| CoreError::UnknownDevice {
                device: device.to_string(),
            })?;
        Ok(entry
            .poller
            .as_ref()
            .map_or(RefreshRequest::Inactive, Poller::refresh_now))
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Send a control request (power, mode, set point) to a device.
    ///
    /// Goes through the device's bridge client, so credentials, the
    /// single 401 retry and the result-code envelope apply as for polls.
    /// On success an out-of-band poll is requested to pick up the new
    /// state; it is skipped when a cycle is already running.
    pub async fn send_command(
        &self,
        device: &DeviceId,
        request: &RequestSpec,
    ) -> Result<RawPayload, CoreError> {
        let bridge = self
            .inner
            .devices
            .get(device)
            .map(|entry| entry.config.identity.bridge.clone())
            .ok_or_else(|| CoreError::UnknownDevice {
                device: device.to_string(),
            })?;
        let api = self
            .inner
            .bridges
            .get(&bridge)
            .map(|api| Arc::clone(api.value()))
            .ok_or_else(|| CoreError::UnknownBridge {
                bridge: bridge.to_string(),
            })?;

        debug!(device = %device, path = %request.path, "sending command");
        let payload = api.fetch(device.as_str(), request).await.map_err(|e| {
            warn!(device = %device, error = %e, "command failed");
            CoreError::from(e)
        })?;

        // the device may have been disposed meanwhile
        if let Ok(refresh) = self.refresh_now(device) {
            debug!(device = %device, ?refresh, "command sent, polling for new state");
        }
        Ok(payload)
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn snapshot(&self, device: &DeviceId) -> Option<Arc<Snapshot>> {
        self.inner.store.get(device)
    }

    pub fn status(&self, device: &DeviceId) -> Option<DeviceHealth> {
        self.inner.health.get(device)
    }

    pub fn poll_state(&self, device: &DeviceId) -> Option<PollState> {
        self.inner.devices.get(device).map(|entry| {
            entry
                .poller
                .as_ref()
                .map_or(PollState::Stopped, Poller::state)
        })
    }

    pub fn watch_poll_state(&self, device: &DeviceId) -> Option<watch::Receiver<PollState>> {
        self.inner
            .devices
            .get(device)
            .and_then(|entry| entry.poller.as_ref().map(Poller::watch_state))
    }

    /// Registered device ids, sorted.
    pub fn devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self
            .inner
            .devices
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.inner.store
    }

    // ── One-shot ────────────────────────────────────────────────────

    /// Fetch and normalize once, without scheduling or touching health,
    /// the store or the sink.
    pub async fn poll_once(&self, config: &DeviceConfig) -> Result<Snapshot, CoreError> {
        let (api, schema) = self.resolve(config)?;
        let identity = &config.identity;
        let payload = api.fetch(identity.device.as_str(), &config.request).await?;
        Ok(normalize(&payload, &schema, identity, Utc::now())?)
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Stop every poll task and wait for in-flight cycles to finish.
    pub async fn shutdown(&self) {
        info!("shutting down engine");
        self.inner.cancel.cancel();
        for id in self.devices() {
            let poller = self
                .inner
                .devices
                .remove(&id)
                .and_then(|(_, entry)| entry.poller);
            if let Some(poller) = poller {
                poller.stop().await;
            }
        }
    }

    // ── Internals ───────────────────────────────────────────────────

    fn resolve(
        &self,
        config: &DeviceConfig,
    ) -> Result<(Arc<dyn DeviceApi>, Arc<Schema>), CoreError> {
        let identity = &config.identity;
        let api = self
            .inner
            .bridges
            .get(&identity.bridge)
            .map(|api| Arc::clone(api.value()))
            .ok_or_else(|| CoreError::UnknownBridge {
                bridge: identity.bridge.to_string(),
            })?;
        let schema = self.inner.schemas.get(&identity.device_type).ok_or_else(|| {
            CoreError::UnknownDeviceType {
                device_type: identity.device_type.to_string(),
            }
        })?;
        Ok((api, schema))
    }

    fn prepare(
        &self,
        config: &DeviceConfig,
        cancel: CancellationToken,
        commit: CommitLock,
    ) -> Result<(DeviceCycle, Duration), CoreError> {
        let interval = config.validate()?;
        let (api, schema) = self.resolve(config)?;
        let cycle = DeviceCycle {
            identity: config.identity.clone(),
            request: config.request.clone(),
            api,
            schema,
            store: Arc::clone(&self.inner.store),
            health: Arc::clone(&self.inner.health),
            sink: Arc::clone(&self.inner.sink),
            cancel,
            commit,
        };
        Ok((cycle, interval))
    }
}

// ── DeviceCycle ─────────────────────────────────────────────────────

/// One device's fetch → normalize → health → store/sink pipeline.
struct DeviceCycle {
    identity: DeviceIdentity,
    request: RequestSpec,
    api: Arc<dyn DeviceApi>,
    schema: Arc<Schema>,
    store: Arc<SnapshotStore>,
    health: Arc<HealthTracker>,
    sink: Arc<dyn StateSink>,
    cancel: CancellationToken,
    commit: CommitLock,
}

impl DeviceCycle {
    async fn fetch(&self) -> Result<Snapshot, CoreError> {
        let device = &self.identity.device;
        let payload = self.api.fetch(device.as_str(), &self.request).await?;
        Ok(normalize(&payload, &self.schema, &self.identity, Utc::now())?)
    }

    fn apply(&self, snapshot: Snapshot) -> Transition {
        let device = &self.identity.device;
        let transition = self.health.record_success(device, &snapshot, Utc::now());

        let previous = self.store.get(device);
        for (channel, value) in snapshot.changed_since(previous.as_deref()) {
            self.sink.publish(device, channel, value);
        }
        self.store.upsert(snapshot);
        transition
    }

    /// Record a cycle's outcome, unless the device was disposed.
    fn commit(&self, result: Result<Snapshot, CoreError>) -> Option<Transition> {
        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        if self.cancel.is_cancelled() {
            return None;
        }
        let device = &self.identity.device;
        let transition = match result {
            Ok(snapshot) => {
                debug!(device = %device, fields = snapshot.fields.len(), "poll succeeded");
                self.apply(snapshot)
            }
            Err(e) => self
                .health
                .record_failure(device, e.kind(), &e.to_string()),
        };
        self.report(&transition);
        Some(transition)
    }

    fn report(&self, transition: &Transition) {
        if transition.changed {
            self.sink.update_connectivity(
                &self.identity.device,
                transition.health.status,
                transition.health.detail.as_deref(),
            );
        }
    }
}

#[async_trait]
impl PollCycle for DeviceCycle {
    async fn run(&self) -> CycleVerdict {
        let device = &self.identity.device;
        let result = self.fetch().await;

        // disposed while the request was in flight
        let Some(transition) = self.commit(result) else {
            debug!(device = %device, "discarding result of cancelled cycle");
            return CycleVerdict::Continue;
        };

        if transition.suspend {
            CycleVerdict::Suspend
        } else {
            CycleVerdict::Continue
        }
    }
}
