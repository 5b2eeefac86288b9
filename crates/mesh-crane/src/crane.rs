//! The Crane itself (spec.md §4.4): owns one physical stream, runs the init
//! handshake, then the four steady-state loops (unloader/handler/loader/
//! stop-sync) for as long as the stream lives.

use crate::handshake::{self, HandshakeOutcome};
use crate::identity::HubIdentity;
use mesh_core::config::{BatchingConfig, RoleTimeouts};
use mesh_core::{AllocatorRole, CancellationToken, CraneId, ErrorId, IdAllocator, MeshError};
use mesh_flow::Shipped;
use mesh_scheduler::Scheduler;
use mesh_terminal::{ChaChaSession, CryptoSession, NullSession, Permissions, Registry, Terminal};
use mesh_wire::{read_frame, segment, shipment, write_frame, MsgType, PhysicalStream, ShipmentSegments, TerminalOpts};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::split;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The floor a Crane's outbound shipments target before flushing (spec.md
/// §4.4's "target_load >= 3072").
pub const MIN_TARGET_LOAD: usize = 3072;
/// Bytes reserved for the outer frame's own overhead: crypto tag/nonce
/// bookkeeping plus the varint length prefix.
pub const OUTER_OVERHEAD: usize = 25;
/// How long the Loader waits, from the first queued byte, before flushing a
/// shipment that hasn't yet reached `target_load`.
const LOADER_MAX_WAIT: Duration = Duration::from_millis(5);
const STOP_SYNC_POLL: Duration = Duration::from_secs(5);
const STOP_SYNC_BOUND: Duration = Duration::from_secs(6 * 3600);
const STOP_SYNC_SHUTDOWN_BOUND: Duration = Duration::from_secs(10);

/// Which side of the physical stream this Crane is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Dialer,
    Listener,
}

impl Role {
    fn allocator_role(self) -> AllocatorRole {
        match self {
            Role::Dialer => AllocatorRole::Dialer,
            Role::Listener => AllocatorRole::Listener,
        }
    }
}

/// Everything `Crane::launch` needs beyond the physical stream and role.
pub struct CraneConfig {
    /// Whether this Crane faces arbitrary inbound peers (wider idle
    /// timeout) or a known client.
    pub public: bool,
    /// Whether the stop-sync bound is this process's responsibility to
    /// enforce (spec.md §4.9: "the Crane-owning peer applies...").
    pub mine: bool,
    pub mtu: usize,
    pub shipment_padding: u16,
    pub scheduler: Scheduler,
    pub registry: Arc<Registry>,
    pub timeouts: RoleTimeouts,
    pub batching: BatchingConfig,
    pub identity: Option<Arc<dyn HubIdentity>>,
    /// Sent as the controller Terminal's opts when dialing; ignored when
    /// listening (the listener takes whatever opts the dialer's `Start`
    /// frame carried).
    pub controller_opts: TerminalOpts,
    /// Whether the physical stream already provides confidentiality (e.g.
    /// TLS), so the handshake can skip the outer encrypted `Start`.
    pub already_secure: bool,
}

pub struct Crane {
    id: CraneId,
    mine: bool,
    public: AtomicBool,
    stopping: AtomicBool,
    stopped: AtomicBool,
    stopping_requested: AtomicBool,
    stopping_requested_by_peer: AtomicBool,
    marked_stopping_at: Mutex<Option<Instant>>,
    peer_hub_id: Mutex<Option<CraneId>>,
    terminal_ids: IdAllocator,
    target_load: usize,
    terminals: RwLock<HashMap<u32, Arc<Terminal>>>,
    registry: Arc<Registry>,
    scheduler: Scheduler,
    timeouts: RoleTimeouts,
    batching: BatchingConfig,
    cancel: CancellationToken,
    terminal_tx: mpsc::Sender<Shipped>,
    outer_session: Mutex<Box<dyn CryptoSession>>,
    outer_key: Option<[u8; 32]>,
    shipment_padding: u16,
    shutting_down_process: AtomicBool,
    self_ref: Weak<Crane>,
}

/// Smallest MTU-multiple window that is still >= [`MIN_TARGET_LOAD`], minus
/// the outer-frame overhead (spec.md §4.4).
pub fn compute_target_load(mtu: usize) -> usize {
    let mtu = mtu.max(1);
    let multiples = (MIN_TARGET_LOAD + mtu - 1) / mtu;
    let window = multiples * mtu;
    window.saturating_sub(OUTER_OVERHEAD)
}

/// Per-Terminal encryption key, derived deterministically since real
/// per-Terminal key agreement is out of scope (spec.md §1): the Crane's
/// outer session key (or a fixed constant if the Crane itself isn't
/// encrypted) XORed against the Terminal's own ID.
pub fn derive_terminal_key(outer_key: Option<[u8; 32]>, terminal_id: u32) -> [u8; 32] {
    let mut key = outer_key.unwrap_or([0x5a; 32]);
    for (byte, id_byte) in key.iter_mut().zip(terminal_id.to_le_bytes()) {
        *byte ^= id_byte;
    }
    key
}

fn terminal_crypto(outer_key: Option<[u8; 32]>, terminal_id: u32, encrypt: bool) -> Box<dyn CryptoSession> {
    if encrypt {
        Box::new(ChaChaSession::new(derive_terminal_key(outer_key, terminal_id)))
    } else {
        Box::new(NullSession)
    }
}

impl Crane {
    /// Run the init handshake over `stream`, then spawn the controller
    /// Terminal and the four steady-state loops.
    pub async fn launch<S: PhysicalStream>(stream: S, role: Role, config: CraneConfig) -> mesh_core::Result<Arc<Crane>> {
        let target_load = compute_target_load(config.mtu);
        let (unloading_tx, unloading_rx) = mpsc::channel::<Vec<u8>>(256);
        let (controller_tx, controller_rx) = mpsc::channel::<Shipped>(256);
        let (terminal_tx, terminal_rx) = mpsc::channel::<Shipped>(1024);

        let mut stream = stream;
        let HandshakeOutcome {
            controller_opts,
            peer_hub_id,
            outer_session,
            outer_key,
        } = match role {
            Role::Listener => handshake::run_listener(&mut stream, config.identity.as_ref()).await?,
            Role::Dialer => {
                handshake::run_dialer(&mut stream, config.already_secure, config.identity.as_ref(), config.controller_opts).await?
            }
        };

        let crane = Arc::new_cyclic(|weak| Crane {
            id: CraneId::random(),
            mine: config.mine,
            public: AtomicBool::new(config.public),
            stopping: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stopping_requested: AtomicBool::new(false),
            stopping_requested_by_peer: AtomicBool::new(false),
            marked_stopping_at: Mutex::new(None),
            peer_hub_id: Mutex::new(peer_hub_id),
            terminal_ids: IdAllocator::new(role.allocator_role()),
            target_load,
            terminals: RwLock::new(HashMap::new()),
            registry: config.registry,
            scheduler: config.scheduler,
            timeouts: config.timeouts,
            batching: config.batching,
            cancel: CancellationToken::new(),
            terminal_tx: terminal_tx.clone(),
            outer_session: Mutex::new(outer_session),
            outer_key,
            shipment_padding: config.shipment_padding,
            shutting_down_process: AtomicBool::new(false),
            self_ref: weak.clone(),
        });

        let controller_crypto = terminal_crypto(crane.outer_key, 0, controller_opts.encrypt);
        let controller = Terminal::spawn(
            0,
            role.allocator_role(),
            controller_opts,
            Permissions { is_crane_controller: true },
            crane.scheduler.clone(),
            crane.registry.clone(),
            crane.timeouts,
            crane.batching,
            controller_crypto,
            controller_tx,
        );
        crane.terminals.write().insert(0, controller);

        let (read_half, write_half) = split(stream);
        tokio::spawn(unloader_loop(crane.clone(), read_half, unloading_tx));
        tokio::spawn(handler_loop(crane.clone(), unloading_rx));
        tokio::spawn(loader_loop(crane.clone(), write_half, controller_rx, terminal_rx));
        tokio::spawn(stop_sync_loop(crane.clone()));

        Ok(crane)
    }

    pub fn id(&self) -> CraneId {
        self.id
    }

    pub fn is_mine(&self) -> bool {
        self.mine
    }

    pub fn is_public(&self) -> bool {
        self.public.load(Ordering::Acquire)
    }

    pub fn peer_hub_id(&self) -> Option<CraneId> {
        *self.peer_hub_id.lock()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn terminal(&self, id: u32) -> Option<Arc<Terminal>> {
        self.terminals.read().get(&id).cloned()
    }

    /// The controller Terminal (ID 0), always present (spec.md §4.4).
    pub fn controller(&self) -> Arc<Terminal> {
        self.terminal(0).expect("controller terminal is installed during launch")
    }

    fn arc(&self) -> Arc<Crane> {
        self.self_ref.upgrade().expect("crane outlives its own background tasks")
    }

    /// Idempotent. Drains every Terminal, then cancels the steady-state
    /// loops; the loops' own stream halves drop when they return.
    pub fn stop(&self, err: MeshError) {
        if self.stopping.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        let crane = self.arc();
        tokio::spawn(run_stop(crane, err));
    }

    // --- stop-sync (spec.md §4.9) ---

    pub fn request_stopping(&self) {
        self.stopping_requested.store(true, Ordering::Release);
        self.maybe_mark_stopping();
    }

    pub fn note_peer_stopping_requested(&self, requested: bool) {
        self.stopping_requested_by_peer.store(requested, Ordering::Release);
        self.maybe_mark_stopping();
    }

    pub fn stopping_requested(&self) -> bool {
        self.stopping_requested.load(Ordering::Acquire)
    }

    pub fn peer_stopping_requested(&self) -> bool {
        self.stopping_requested_by_peer.load(Ordering::Acquire)
    }

    pub fn marked_stopping_at(&self) -> Option<Instant> {
        *self.marked_stopping_at.lock()
    }

    /// Shortens the stop-sync bound from six hours to ten seconds, for use
    /// when the whole process is going down rather than just this Crane.
    pub fn begin_process_shutdown(&self) {
        self.shutting_down_process.store(true, Ordering::Release);
    }

    fn maybe_mark_stopping(&self) {
        if self.stopping_requested.load(Ordering::Acquire) && self.stopping_requested_by_peer.load(Ordering::Acquire) {
            let mut marked = self.marked_stopping_at.lock();
            if marked.is_none() {
                *marked = Some(Instant::now());
            }
        }
    }
}

/// Establish a new Terminal from this side (spec.md §4.4's "establish-new-
/// Terminal"): allocate the next local ID, register it, and send its Init
/// directly through the Crane's own `terminal_tx` — a Crane-layer Init,
/// distinct from a Terminal's own Operation-layer Init.
pub async fn establish_terminal(crane: &Arc<Crane>, opts: TerminalOpts, permissions: Permissions) -> mesh_core::Result<Arc<Terminal>> {
    if crane.stopping.load(Ordering::Acquire) {
        return Err(MeshError::local(ErrorId::Stopping));
    }
    let id = crane.terminal_ids.next_id();
    let crypto = terminal_crypto(crane.outer_key, id, opts.encrypt);
    let terminal = Terminal::spawn(
        id,
        AllocatorRole::Dialer,
        opts,
        permissions,
        crane.scheduler.clone(),
        crane.registry.clone(),
        crane.timeouts,
        crane.batching,
        crypto,
        crane.terminal_tx.clone(),
    );
    crane.terminals.write().insert(id, terminal.clone());

    crane
        .terminal_tx
        .send(Shipped {
            id,
            msg_type: MsgType::Init,
            payload: opts.encode(),
        })
        .await
        .map_err(|_| MeshError::local(ErrorId::AbandonedTerminal))?;

    Ok(terminal)
}

async fn run_stop(crane: Arc<Crane>, err: MeshError) {
    warn!(crane_id = %crane.id, error = %err.id(), "crane stopping");

    let terminals: Vec<Arc<Terminal>> = crane.terminals.read().values().cloned().collect();
    for terminal in terminals {
        terminal.abandon(MeshError::new(err.id(), err.message().to_string()));
    }

    crane.cancel.cancel();
    crane.stopped.store(true, Ordering::Release);
}

async fn unloader_loop<R: tokio::io::AsyncRead + Unpin>(crane: Arc<Crane>, mut reader: R, unloading_tx: mpsc::Sender<Vec<u8>>) {
    loop {
        if crane.cancel.is_cancelled() {
            return;
        }
        match read_frame(&mut reader).await {
            Ok(Some(payload)) => {
                if unloading_tx.send(payload).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                crane.stop(MeshError::local(ErrorId::Stopping));
                return;
            }
            Err(err) => {
                crane.stop(MeshError::new(ErrorId::MalformedData, err.to_string()));
                return;
            }
        }
    }
}

async fn handler_loop(crane: Arc<Crane>, mut unloading_rx: mpsc::Receiver<Vec<u8>>) {
    loop {
        let raw = tokio::select! {
            _ = crane.cancel.cancelled() => return,
            next = unloading_rx.recv() => match next {
                Some(raw) => raw,
                None => return,
            },
        };

        let decrypted = crane.outer_session.lock().open(&raw);
        let decrypted = match decrypted {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(crane_id = %crane.id, error = %err.id(), "failed to open crane envelope");
                crane.stop(MeshError::local(ErrorId::Integrity));
                return;
            }
        };

        for parsed in ShipmentSegments::parse(&decrypted) {
            match parsed {
                Ok((id, msg_type, payload)) => dispatch_segment(&crane, id, msg_type, payload).await,
                Err(err) => {
                    warn!(crane_id = %crane.id, error = %err, "malformed segment in shipment");
                    crane.stop(MeshError::from(err));
                    break;
                }
            }
        }
    }
}

async fn dispatch_segment(crane: &Arc<Crane>, id: u32, msg_type: MsgType, payload: &[u8]) {
    match msg_type {
        MsgType::Init => {
            let already_known = crane.terminals.read().contains_key(&id);
            if already_known {
                debug!(crane_id = %crane.id, id, "ignoring init for an already-established terminal id");
            } else {
                handle_unknown_terminal_init(crane, id, payload).await;
            }
        }
        MsgType::Data | MsgType::PriorityData => {
            let terminal = crane.terminals.read().get(&id).cloned();
            match terminal {
                Some(terminal) => {
                    let unit = crane.scheduler.new_unit();
                    if matches!(msg_type, MsgType::PriorityData) {
                        unit.make_high_priority();
                    }
                    if let Err(err) = terminal.deliver_raw(msg_type, payload, unit).await {
                        debug!(crane_id = %crane.id, id, error = %err.id(), "terminal rejected delivery");
                    }
                }
                None => {
                    debug!(crane_id = %crane.id, id, "data for unknown terminal id");
                }
            }
        }
        MsgType::Stop => {
            if let Some(terminal) = crane.terminals.write().remove(&id) {
                let err = match mesh_core::varint::decode(payload) {
                    Ok((code, _)) => MeshError::from_wire(ErrorId::from_code(code as u8)),
                    Err(_) => MeshError::from_wire(ErrorId::MalformedData),
                };
                terminal.abandon(err);
            }
        }
    }
}

async fn handle_unknown_terminal_init(crane: &Arc<Crane>, id: u32, payload: &[u8]) {
    let opts = match TerminalOpts::decode(payload) {
        Ok(opts) => opts,
        Err(err) => {
            warn!(crane_id = %crane.id, id, %err, "malformed terminal init opts");
            return;
        }
    };

    let mut timeouts = crane.timeouts;
    timeouts.idle_timeout = if crane.is_public() {
        Duration::from_secs(30 * 60)
    } else {
        Duration::from_secs(15 * 60)
    };

    let crypto = terminal_crypto(crane.outer_key, id, opts.encrypt);
    let terminal = Terminal::spawn(
        id,
        AllocatorRole::Listener,
        opts,
        Permissions::default(),
        crane.scheduler.clone(),
        crane.registry.clone(),
        timeouts,
        crane.batching,
        crypto,
        crane.terminal_tx.clone(),
    );
    crane.terminals.write().insert(id, terminal);
}

async fn loader_loop<W: tokio::io::AsyncWrite + Unpin>(
    crane: Arc<Crane>,
    mut writer: W,
    mut controller_rx: mpsc::Receiver<Shipped>,
    mut terminal_rx: mpsc::Receiver<Shipped>,
) {
    loop {
        if crane.cancel.is_cancelled() {
            return;
        }

        let mut segments: Vec<Vec<u8>> = Vec::new();
        let mut total_len = 0usize;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            let msg: Option<Shipped> = match deadline {
                Some(dl) => {
                    tokio::select! {
                        biased;
                        _ = crane.cancel.cancelled() => return,
                        _ = tokio::time::sleep_until(dl) => break,
                        msg = controller_rx.recv() => msg,
                        msg = terminal_rx.recv() => msg,
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        _ = crane.cancel.cancelled() => return,
                        msg = controller_rx.recv() => msg,
                        msg = terminal_rx.recv() => msg,
                    }
                }
            };

            // `recv()` only ever returns `None` once a channel is closed for
            // good (the Crane itself holds the matching sender, so this
            // means the Crane is being torn down).
            let Some(shipped) = msg else { return };

            match segment::encode_segment(shipped.id, shipped.msg_type, &shipped.payload) {
                Ok(encoded) => {
                    total_len += encoded.len();
                    segments.push(encoded);
                }
                Err(err) => {
                    warn!(crane_id = %crane.id, %err, "dropping oversize outbound segment");
                    continue;
                }
            }

            if deadline.is_none() {
                deadline = Some(tokio::time::Instant::now() + LOADER_MAX_WAIT);
            }
            if total_len >= crane.target_load {
                break;
            }
        }

        if segments.is_empty() {
            continue;
        }

        let padding = crane.shipment_padding.max(1) as usize;
        let floor = total_len.max(crane.target_load);
        let pad_to = ((floor + padding - 1) / padding) * padding;
        let shipment = shipment::build(&segments, pad_to);
        let sealed = crane.outer_session.lock().seal(&shipment);

        if let Err(err) = write_frame(&mut writer, &sealed).await {
            crane.stop(MeshError::new(ErrorId::ShipSunk, err.to_string()));
            return;
        }
    }
}

async fn stop_sync_loop(crane: Arc<Crane>) {
    loop {
        tokio::select! {
            _ = crane.cancel.cancelled() => return,
            _ = tokio::time::sleep(STOP_SYNC_POLL) => {}
        }

        if crane.is_stopped() {
            return;
        }
        if !crane.mine {
            continue;
        }
        let Some(marked_at) = crane.marked_stopping_at() else {
            continue;
        };
        let bound = if crane.shutting_down_process.load(Ordering::Acquire) {
            STOP_SYNC_SHUTDOWN_BOUND
        } else {
            STOP_SYNC_BOUND
        };
        if marked_at.elapsed() >= bound {
            crane.stop(MeshError::local(ErrorId::Stopping));
            return;
        }
    }
}
