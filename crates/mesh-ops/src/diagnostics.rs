//! `ping`, `latency`, `capacity`, `whoami`, `sync/state` (spec.md §4.5): the
//! diagnostic operations that only run on controller Terminals. Latency and
//! capacity checks persist their result in the peer's measurement record;
//! `sync/state` drives the stop-sync protocol (spec.md §4.9).
//!
//! The registry must be built and frozen before a Crane exists (spec.md
//! §4.5: "locked before any Crane is started"), but `whoami`/`sync/state`
//! need to reach back into the very Crane they're running on. [`CraneHandle`]
//! is the seam: the registration closures capture the handle, and the
//! caller binds it to the real Crane once `Crane::launch` returns.

use async_trait::async_trait;
use mesh_core::{CraneId, MeshError};
use mesh_crane::Crane;
use mesh_terminal::{FactoryOutcome, Operation, OperationContext, Permissions, Registry};
use mesh_wire::MsgType;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const CONTROLLER_ONLY: Permissions = Permissions { is_crane_controller: true };
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// A late-bound reference to the Crane a diagnostic operation's factory is
/// registered under. Empty until [`CraneHandle::bind`] is called.
#[derive(Clone, Default)]
pub struct CraneHandle(Arc<Mutex<Option<Weak<Crane>>>>);

impl CraneHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, crane: &Arc<Crane>) {
        *self.0.lock() = Some(Arc::downgrade(crane));
    }

    fn get(&self) -> Option<Arc<Crane>> {
        self.0.lock().as_ref().and_then(Weak::upgrade)
    }
}

/// An Operation that answers exactly once, then stops itself. Covers
/// `ping`/`whoami`, which are a single request/response and nothing more.
struct ReplyOnce;

#[async_trait]
impl Operation for ReplyOnce {
    async fn deliver(&self, _payload: Vec<u8>, _is_priority: bool) {}
    async fn stop(&self, _err: MeshError) {}
}

fn spawn_reply(ctx: OperationContext, reply: Vec<u8>) -> FactoryOutcome {
    tokio::spawn(async move {
        let _ = ctx.send(MsgType::Data, reply, REPLY_TIMEOUT).await;
        ctx.stop(None);
    });
    FactoryOutcome::Created(Arc::new(ReplyOnce))
}

pub fn register_ping(registry: &Registry) {
    registry.register("ping", CONTROLLER_ONLY, |ctx, payload| spawn_reply(ctx, payload));
}

#[derive(Debug, Serialize, Deserialize)]
struct WhoAmIReply {
    hub_id: Option<String>,
    mine: bool,
    public: bool,
}

pub fn register_whoami(registry: &Registry, handle: CraneHandle) {
    registry.register("whoami", CONTROLLER_ONLY, move |ctx, _payload| {
        let Some(crane) = handle.get() else {
            return FactoryOutcome::Failed(MeshError::local(mesh_core::ErrorId::Internal));
        };
        let reply = WhoAmIReply {
            hub_id: crane.peer_hub_id().map(|id| id.as_hex()),
            mine: crane.is_mine(),
            public: crane.is_public(),
        };
        let mut body = Vec::new();
        if ciborium::ser::into_writer(&reply, &mut body).is_err() {
            return FactoryOutcome::Failed(MeshError::local(mesh_core::ErrorId::Internal));
        }
        spawn_reply(ctx, body)
    });
}

/// What's known about a peer Crane from prior `latency`/`capacity` checks
/// (spec.md: "persist their results in the peer's measurement record").
#[derive(Debug, Clone, Copy, Default)]
pub struct Measurement {
    pub latency: Option<Duration>,
    pub capacity: Option<usize>,
}

#[derive(Default)]
pub struct MeasurementStore {
    by_hub: Mutex<HashMap<CraneId, Measurement>>,
}

impl MeasurementStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, hub: CraneId) -> Measurement {
        self.by_hub.lock().get(&hub).copied().unwrap_or_default()
    }

    fn record_latency(&self, hub: CraneId, latency: Duration) {
        self.by_hub.lock().entry(hub).or_default().latency = Some(latency);
    }

    fn record_capacity(&self, hub: CraneId, capacity: usize) {
        self.by_hub.lock().entry(hub).or_default().capacity = Some(capacity);
    }
}

pub fn register_latency(registry: &Registry) {
    registry.register("latency", CONTROLLER_ONLY, |ctx, payload| spawn_reply(ctx, payload));
}

pub fn register_capacity(registry: &Registry) {
    registry.register("capacity", CONTROLLER_ONLY, |ctx, payload| spawn_reply(ctx, payload));
}

struct LatencyProbe {
    reply_tx: tokio::sync::mpsc::Sender<()>,
}

#[async_trait]
impl Operation for LatencyProbe {
    async fn deliver(&self, _payload: Vec<u8>, _is_priority: bool) {
        let _ = self.reply_tx.send(()).await;
    }
    async fn stop(&self, _err: MeshError) {}
}

/// Initiator-side helper: run a `latency` round trip against `crane`'s
/// controller Terminal and record the result in `store`. The responder
/// side is the plain echo factory registered by [`register_latency`].
pub async fn measure_latency(crane: &Arc<Crane>, store: &MeasurementStore) -> mesh_core::Result<Duration> {
    let controller = crane.controller();
    let started = Instant::now();
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::channel(1);
    let probe = Arc::new(LatencyProbe { reply_tx });
    controller.start_operation("latency", probe, Vec::new(), REPLY_TIMEOUT).await?;
    reply_rx.recv().await;
    let latency = started.elapsed();
    if let Some(hub) = crane.peer_hub_id() {
        store.record_latency(hub, latency);
    }
    Ok(latency)
}

struct CapacityProbe {
    reply_tx: tokio::sync::mpsc::Sender<usize>,
}

#[async_trait]
impl Operation for CapacityProbe {
    async fn deliver(&self, payload: Vec<u8>, _is_priority: bool) {
        let _ = self.reply_tx.send(payload.len()).await;
    }
    async fn stop(&self, _err: MeshError) {}
}

/// Initiator-side helper for `capacity`: send a fixed-size probe payload
/// and measure how many bytes round-tripped, as a rough throughput stand-in
/// since real bandwidth estimation is out of scope here.
pub async fn measure_capacity(crane: &Arc<Crane>, probe_size: usize, store: &MeasurementStore) -> mesh_core::Result<usize> {
    let controller = crane.controller();
    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::channel(1);
    let probe = Arc::new(CapacityProbe { reply_tx });
    controller
        .start_operation("capacity", probe, vec![0u8; probe_size], REPLY_TIMEOUT)
        .await?;
    let echoed = reply_rx.recv().await.unwrap_or(0);
    if let Some(hub) = crane.peer_hub_id() {
        store.record_capacity(hub, echoed);
    }
    Ok(echoed)
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct SyncState {
    stopping: bool,
    request_stopping: bool,
}

struct SyncStateOperation {
    handle: CraneHandle,
}

#[async_trait]
impl Operation for SyncStateOperation {
    async fn deliver(&self, payload: Vec<u8>, _is_priority: bool) {
        apply_sync_state(&self.handle, &payload);
    }

    async fn stop(&self, _err: MeshError) {}
}

fn apply_sync_state(handle: &CraneHandle, payload: &[u8]) {
    let Ok(state) = ciborium::de::from_reader::<SyncState, _>(payload) else {
        return;
    };
    if let Some(crane) = handle.get() {
        if state.request_stopping {
            crane.note_peer_stopping_requested(true);
        }
    }
}

pub fn register_sync_state(registry: &Registry, handle: CraneHandle) {
    registry.register("sync/state", CONTROLLER_ONLY, move |_ctx, payload| {
        apply_sync_state(&handle, &payload);
        FactoryOutcome::Created(Arc::new(SyncStateOperation { handle: handle.clone() }))
    });
}

/// Send this Crane's current stop-sync state to the peer's controller
/// Terminal, starting or continuing a `sync/state` exchange.
pub async fn send_sync_state(crane: &Arc<Crane>, handle: CraneHandle) -> mesh_core::Result<()> {
    let state = SyncState {
        stopping: crane.is_stopped(),
        request_stopping: crane.stopping_requested(),
    };
    let mut body = Vec::new();
    ciborium::ser::into_writer(&state, &mut body).map_err(|err| MeshError::new(mesh_core::ErrorId::Internal, err.to_string()))?;
    let controller = crane.controller();
    controller
        .start_operation("sync/state", Arc::new(SyncStateOperation { handle }), body, REPLY_TIMEOUT)
        .await?;
    Ok(())
}

pub fn register_all(registry: &Registry, handle: CraneHandle) {
    register_ping(registry);
    register_whoami(registry, handle.clone());
    register_latency(registry);
    register_capacity(registry);
    register_sync_state(registry, handle);
}
