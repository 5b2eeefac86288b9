//! The Terminal (spec.md §4.3): a multiplexed logical channel running
//! inside exactly one Crane. Owns framing/batching of operation messages
//! into super-messages, the inner crypto session, idle timeout, and the
//! abandon/drain protocol.
//!
//! A Terminal never talks to a physical stream directly — it hands framed
//! [`Shipped`] bytes to whatever channel its owning Crane gave it
//! (`crane_outbound`), and receives raw Crane-layer segments back through
//! [`Terminal::deliver_raw`].

use crate::crypto::CryptoSession;
use crate::error::TerminalError;
use crate::operation::{FactoryOutcome, Operation, OperationContext, Permissions, Registry};
use crate::session::{suspicion_factor, Session};
use mesh_core::config::{BatchingConfig, FlowControlConfig, RoleTimeouts};
use mesh_core::{AllocatorRole, CancellationToken, ErrorId, IdAllocator, MeshError};
use mesh_flow::{FlowControl, Shipped};
use mesh_scheduler::{Scheduler, Unit};
use mesh_wire::{segment, shipment, FlowControlKind, Msg, MsgType, ShipmentSegments, TerminalOpts};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

struct PendingSegment {
    op_id: u32,
    msg_type: MsgType,
    payload: Vec<u8>,
}

pub struct Terminal {
    id: u32,
    permissions: Permissions,
    opts: TerminalOpts,
    timeouts: RoleTimeouts,
    batching: BatchingConfig,
    registry: Arc<Registry>,
    scheduler: Scheduler,
    crypto: Mutex<Box<dyn CryptoSession>>,
    flow: FlowControl,
    pending_tx: mpsc::Sender<PendingSegment>,
    op_id_allocator: IdAllocator,
    active_ops: RwLock<HashMap<u32, Arc<dyn Operation>>>,
    abandoning: AtomicBool,
    activity_counter: AtomicU64,
    unknown_op_id_streak: AtomicU64,
    cancel: CancellationToken,
    session: Session,
    self_ref: Weak<Terminal>,
}

/// Consecutive unknown-operation-id deliveries after which a Terminal gives
/// up and abandons itself, beyond the warn-every-1000 softening (spec.md
/// §4.3's TODO, resolved in SPEC_FULL.md's Open Question section).
const UNKNOWN_OP_ID_ABANDON_THRESHOLD: u64 = 10_000;
const UNKNOWN_OP_ID_WARN_INTERVAL: u64 = 1_000;

impl Terminal {
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        id: u32,
        role: AllocatorRole,
        opts: TerminalOpts,
        permissions: Permissions,
        scheduler: Scheduler,
        registry: Arc<Registry>,
        timeouts: RoleTimeouts,
        batching: BatchingConfig,
        crypto: Box<dyn CryptoSession>,
        crane_outbound: mpsc::Sender<Shipped>,
    ) -> Arc<Terminal> {
        let (flow, flow_recv_rx) = match opts.flow_control {
            FlowControlKind::Dfq => FlowControl::dfq(
                id,
                FlowControlConfig {
                    queue_size: opts.flow_control_size,
                    report_threshold: 0.75,
                },
                crane_outbound,
            ),
            FlowControlKind::None => FlowControl::none(opts.flow_control_size, crane_outbound),
        };
        let (pending_tx, pending_rx) = mpsc::channel(256);

        let terminal = Arc::new_cyclic(|weak| Terminal {
            id,
            permissions,
            opts,
            timeouts,
            batching,
            registry,
            scheduler: scheduler.clone(),
            crypto: Mutex::new(crypto),
            flow,
            pending_tx,
            op_id_allocator: IdAllocator::new(role),
            active_ops: RwLock::new(HashMap::new()),
            abandoning: AtomicBool::new(false),
            activity_counter: AtomicU64::new(0),
            unknown_op_id_streak: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            session: Session::new(),
            self_ref: weak.clone(),
        });

        tokio::spawn(send_loop(terminal.clone(), pending_rx));
        tokio::spawn(recv_loop(terminal.clone(), flow_recv_rx));
        tokio::spawn(idle_timeout_loop(terminal.clone()));

        terminal
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn arc(&self) -> Arc<Terminal> {
        self.self_ref.upgrade().expect("terminal outlives its own background tasks")
    }

    /// Assign `op` the next Terminal-local operation ID, register it, and
    /// send an Init message carrying `type_tag` and `init_payload`.
    pub async fn start_operation(
        &self,
        type_tag: &str,
        op: Arc<dyn Operation>,
        init_payload: Vec<u8>,
        timeout: Duration,
    ) -> mesh_core::Result<u32> {
        if self.abandoning.load(Ordering::Acquire) {
            return Err(TerminalError::Abandoning.into());
        }
        let op_id = self.op_id_allocator.next_id();
        self.active_ops.write().insert(op_id, op);

        let mut payload = Vec::with_capacity(1 + type_tag.len() + init_payload.len());
        mesh_core::varint::encode_into(type_tag.len() as u64, &mut payload);
        payload.extend_from_slice(type_tag.as_bytes());
        payload.extend_from_slice(&init_payload);

        if let Err(err) = self.send_operation_msg_internal(op_id, MsgType::Init, payload, timeout).await {
            self.active_ops.write().remove(&op_id);
            return Err(err);
        }
        Ok(op_id)
    }

    /// Idempotent: logs, sends a Stop frame (unless `err` came from the
    /// peer), and removes the operation from the active-ops map.
    pub async fn stop_operation(&self, op_id: u32, err: Option<MeshError>) {
        let removed = self.active_ops.write().remove(&op_id);
        let Some(op) = removed else {
            return;
        };
        let err_id = err.as_ref().map(|e| e.id()).unwrap_or(ErrorId::Stopping);
        let is_external = err.as_ref().map(|e| e.is_external()).unwrap_or(false);
        debug!(terminal_id = self.id, op_id, error = %err_id, "stopping operation");

        op.stop(err.unwrap_or_else(|| MeshError::local(ErrorId::Stopping))).await;

        if !is_external {
            let payload = mesh_core::varint::encode(err_id.code() as u64);
            let _ = self
                .send_operation_msg_internal(op_id, MsgType::Stop, payload, Duration::from_secs(5))
                .await;
        }
    }

    /// Submit an operation message to the send queue. Waits on a fresh
    /// scheduler unit first (spec.md §4.3: "Waits on the scheduler unit
    /// first").
    pub async fn send_operation_msg(
        &self,
        op_id: u32,
        msg_type: MsgType,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> mesh_core::Result<()> {
        if self.abandoning.load(Ordering::Acquire) {
            return Err(TerminalError::Abandoning.into());
        }
        self.send_operation_msg_internal(op_id, msg_type, payload, timeout).await
    }

    /// Like [`Terminal::send_operation_msg`] but without the abandoning
    /// gate, for the internal Stop frames the abandon protocol itself must
    /// still be able to send after `abandoning` flips true.
    async fn send_operation_msg_internal(
        &self,
        op_id: u32,
        msg_type: MsgType,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> mesh_core::Result<()> {
        let unit = self.scheduler.new_unit();
        if matches!(msg_type, MsgType::PriorityData) {
            unit.make_high_priority();
        }
        tokio::time::timeout(timeout, unit.wait_for_slot())
            .await
            .map_err(|_| TerminalError::Timeout)?;
        unit.finish();
        self.activity_counter.fetch_add(1, Ordering::Relaxed);
        self.pending_tx
            .send(PendingSegment { op_id, msg_type, payload })
            .await
            .map_err(|_| MeshError::local(ErrorId::AbandonedTerminal))?;
        Ok(())
    }

    /// Entry point from the Crane: a raw Crane-layer segment destined for
    /// this Terminal.
    pub async fn deliver_raw(&self, msg_type: MsgType, raw: &[u8], unit: Unit) -> mesh_core::Result<()> {
        if self.abandoning.load(Ordering::Acquire) {
            return Err(TerminalError::Abandoning.into());
        }
        self.flow.deliver(self.id, msg_type, raw, unit).await.map_err(Into::into)
    }

    pub async fn flush(&self, timeout: Duration) -> mesh_core::Result<()> {
        self.flow.flush(timeout).await.map_err(Into::into)
    }

    /// Idempotent; starts the shutdown worker (spec.md §4.3 seven-step
    /// abandon protocol).
    pub fn abandon(&self, err: MeshError) {
        if self
            .abandoning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let terminal = self.arc();
        tokio::spawn(async move {
            terminal.run_abandon(err).await;
        });
    }

    async fn run_abandon(self: Arc<Self>, err: MeshError) {
        warn!(terminal_id = self.id, error = %err.id(), "terminal abandoning");

        let op_ids: Vec<u32> = self.active_ops.read().keys().copied().collect();
        for op_id in op_ids {
            self.stop_operation(op_id, None).await;
        }

        let deadline = tokio::time::Instant::now() + self.timeouts.abandon_drain_timeout;
        while !self.active_ops.read().is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!(terminal_id = self.id, "abandon drain timed out with operations still active");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if !err.is_external() {
            let payload = mesh_core::varint::encode(err.id().code() as u64);
            let _ = self
                .send_operation_msg_internal(self.id, MsgType::Stop, payload, Duration::from_secs(5))
                .await;
        }

        let _ = tokio::time::timeout(self.timeouts.flush_timeout, self.flow.flush(self.timeouts.flush_timeout)).await;

        self.cancel.cancel();
        self.flow.shutdown();
    }

    async fn dispatch_operation_message(&self, op_id: u32, msg_type: MsgType, payload: &[u8]) {
        match msg_type {
            MsgType::Init => self.handle_init(op_id, payload).await,
            MsgType::Data | MsgType::PriorityData => self.handle_data(op_id, msg_type, payload).await,
            MsgType::Stop => self.handle_stop(op_id, payload).await,
        }
    }

    async fn handle_init(&self, op_id: u32, payload: &[u8]) {
        if self.abandoning.load(Ordering::Acquire) {
            return;
        }
        let Ok((tag_len, consumed)) = mesh_core::varint::decode(payload) else {
            self.session.report_suspicious_activity(suspicion_factor::UNUSUAL);
            warn!(terminal_id = self.id, op_id, "malformed init payload");
            return;
        };
        let tag_len = tag_len as usize;
        if payload.len() < consumed || tag_len > payload.len() - consumed {
            self.session.report_suspicious_activity(suspicion_factor::UNUSUAL);
            warn!(terminal_id = self.id, op_id, "init payload truncated before its type tag");
            return;
        }
        let Ok(type_tag) = std::str::from_utf8(&payload[consumed..consumed + tag_len]) else {
            self.session.report_suspicious_activity(suspicion_factor::UNUSUAL);
            warn!(terminal_id = self.id, op_id, "init type tag is not valid utf-8");
            return;
        };
        let type_tag = type_tag.to_string();
        let init_payload = payload[consumed + tag_len..].to_vec();

        let ctx = OperationContext::new(op_id, self.arc());
        match self.registry.invoke(&type_tag, self.permissions, ctx, init_payload) {
            Ok(Some(FactoryOutcome::Created(op))) => {
                self.active_ops.write().insert(op_id, op);
            }
            Ok(Some(FactoryOutcome::Done)) => {
                self.ack_init(op_id, ErrorId::ExplicitAck).await;
            }
            Ok(Some(FactoryOutcome::Failed(err))) => {
                self.ack_init(op_id, err.id()).await;
            }
            Ok(None) => {
                warn!(terminal_id = self.id, op_id, type_tag, "unknown operation type");
                self.session.report_suspicious_activity(suspicion_factor::UNUSUAL);
                self.ack_init(op_id, ErrorId::UnknownOpType).await;
            }
            Err(TerminalError::PermissionDenied) => {
                warn!(terminal_id = self.id, op_id, type_tag, "operation requires elevated permissions");
                self.session.report_suspicious_activity(suspicion_factor::QUITE_UNUSUAL);
                self.ack_init(op_id, ErrorId::PermissionDenied).await;
            }
            Err(_) => {}
        }
    }

    async fn ack_init(&self, op_id: u32, err_id: ErrorId) {
        let payload = mesh_core::varint::encode(err_id.code() as u64);
        let _ = self
            .send_operation_msg_internal(op_id, MsgType::Stop, payload, Duration::from_secs(5))
            .await;
    }

    async fn handle_data(&self, op_id: u32, msg_type: MsgType, payload: &[u8]) {
        let op = self.active_ops.read().get(&op_id).cloned();
        match op {
            Some(op) => {
                self.unknown_op_id_streak.store(0, Ordering::Relaxed);
                op.deliver(payload.to_vec(), matches!(msg_type, MsgType::PriorityData)).await;
            }
            None => {
                let streak = self.unknown_op_id_streak.fetch_add(1, Ordering::Relaxed) + 1;
                if streak % UNKNOWN_OP_ID_WARN_INTERVAL == 0 {
                    warn!(terminal_id = self.id, op_id, streak, "repeated delivery for unknown operation id");
                    self.ack_init(op_id, ErrorId::UnknownOpId).await;
                }
                if streak >= UNKNOWN_OP_ID_ABANDON_THRESHOLD {
                    warn!(terminal_id = self.id, "abandoning after sustained unknown-operation-id traffic");
                    self.abandon(MeshError::local(ErrorId::UnknownOpId));
                }
            }
        }
    }

    async fn handle_stop(&self, op_id: u32, payload: &[u8]) {
        let err = match mesh_core::varint::decode(payload) {
            Ok((code, _)) => MeshError::from_wire(ErrorId::from_code(code as u8)),
            Err(_) => MeshError::from_wire(ErrorId::MalformedData),
        };
        self.stop_operation(op_id, Some(err)).await;
    }
}

async fn send_loop(terminal: Arc<Terminal>, mut pending_rx: mpsc::Receiver<PendingSegment>) {
    let mut batch: Vec<PendingSegment> = Vec::new();
    let mut batch_bytes: usize = 0;

    loop {
        if batch.is_empty() {
            tokio::select! {
                _ = terminal.cancel.cancelled() => return,
                next = pending_rx.recv() => {
                    match next {
                        Some(seg) => {
                            batch_bytes += seg.payload.len();
                            batch.push(seg);
                        }
                        None => return,
                    }
                }
            }
        }

        let deadline = tokio::time::Instant::now() + terminal.batching.coalesce_max_wait;
        'collect: loop {
            if batch_bytes >= terminal.batching.coalesce_threshold_bytes || batch_bytes >= terminal.batching.coalesce_cap_bytes {
                break 'collect;
            }
            tokio::select! {
                _ = terminal.cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => break 'collect,
                next = pending_rx.recv() => {
                    match next {
                        Some(seg) => {
                            batch_bytes += seg.payload.len();
                            batch.push(seg);
                        }
                        None => break 'collect,
                    }
                }
            }
        }

        if let Err(err) = flush_batch(&terminal, std::mem::take(&mut batch)).await {
            warn!(terminal_id = terminal.id, error = %err, "failed to flush terminal send batch");
        }
        batch_bytes = 0;
    }
}

async fn flush_batch(terminal: &Arc<Terminal>, batch: Vec<PendingSegment>) -> mesh_core::Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let mut is_priority = false;
    let mut segments = Vec::with_capacity(batch.len());
    for seg in &batch {
        if matches!(seg.msg_type, MsgType::PriorityData) {
            is_priority = true;
        }
        segments.push(segment::encode_segment(seg.op_id, seg.msg_type, &seg.payload).map_err(MeshError::from)?);
    }

    let raw_len: usize = segments.iter().map(|s| s.len()).sum();
    let pad_to = if terminal.opts.padding > 0 {
        let padding = terminal.opts.padding as usize;
        ((raw_len + padding - 1) / padding) * padding
    } else {
        raw_len
    };
    let inner = shipment::build(&segments, pad_to);
    let envelope = terminal.crypto.lock().seal(&inner);

    let msg_type = if is_priority { MsgType::PriorityData } else { MsgType::Data };
    let unit = terminal.scheduler.new_unit();
    if is_priority {
        unit.make_high_priority();
    }
    let msg = Msg::new(terminal.id, msg_type, envelope, unit);
    terminal.flow.send(msg, terminal.timeouts.flush_timeout).await.map_err(Into::into)
}

async fn recv_loop(terminal: Arc<Terminal>, mut flow_recv_rx: mpsc::Receiver<Msg>) {
    loop {
        let msg = tokio::select! {
            _ = terminal.cancel.cancelled() => return,
            msg = flow_recv_rx.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };

        terminal.activity_counter.fetch_add(1, Ordering::Relaxed);
        let decrypted = terminal.crypto.lock().open(msg.payload());
        msg.finish();

        let decrypted = match decrypted {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(terminal_id = terminal.id, error = %err.id(), "failed to open terminal envelope");
                terminal.session.report_suspicious_activity(suspicion_factor::QUITE_UNUSUAL);
                terminal.abandon(MeshError::local(ErrorId::Integrity));
                continue;
            }
        };

        for parsed in ShipmentSegments::parse(&decrypted) {
            match parsed {
                Ok((op_id, msg_type, op_payload)) => {
                    terminal.dispatch_operation_message(op_id, msg_type, op_payload).await;
                }
                Err(err) => {
                    warn!(terminal_id = terminal.id, error = %err, "malformed nested segment");
                    terminal.session.report_suspicious_activity(suspicion_factor::UNUSUAL);
                    terminal.abandon(MeshError::from(err));
                    break;
                }
            }
        }
    }
}

async fn idle_timeout_loop(terminal: Arc<Terminal>) {
    let interval = terminal.timeouts.idle_timeout / 5;
    let mut last_seen = terminal.activity_counter.load(Ordering::Relaxed);
    let mut consecutive_misses = 0u32;

    loop {
        tokio::select! {
            _ = terminal.cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let current = terminal.activity_counter.load(Ordering::Relaxed);
        if current == last_seen {
            consecutive_misses += 1;
            if consecutive_misses >= 5 {
                warn!(terminal_id = terminal.id, "idle timeout; abandoning terminal");
                terminal.abandon(MeshError::local(ErrorId::NoActivity));
                return;
            }
        } else {
            consecutive_misses = 0;
            last_seen = current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::NullSession;
    use mesh_core::config::SchedulerConfig;
    use std::sync::Mutex as StdMutex;

    struct RecordingOp {
        received: Arc<StdMutex<Vec<Vec<u8>>>>,
    }

    #[async_trait::async_trait]
    impl Operation for RecordingOp {
        async fn deliver(&self, payload: Vec<u8>, _is_priority: bool) {
            self.received.lock().unwrap().push(payload);
        }

        async fn stop(&self, _err: MeshError) {}
    }

    struct EchoOp {
        ctx: OperationContext,
    }

    #[async_trait::async_trait]
    impl Operation for EchoOp {
        async fn deliver(&self, payload: Vec<u8>, _is_priority: bool) {
            let _ = self.ctx.send(MsgType::Data, payload, Duration::from_secs(1)).await;
        }

        async fn stop(&self, _err: MeshError) {}
    }

    fn bridge(mut rx: mpsc::Receiver<Shipped>, target: Arc<Terminal>, scheduler: Scheduler) {
        tokio::spawn(async move {
            while let Some(shipped) = rx.recv().await {
                let unit = scheduler.new_unit();
                let _ = target.deliver_raw(shipped.msg_type, &shipped.payload, unit).await;
            }
        });
    }

    fn spawn_pair(scheduler: &Scheduler, registry: Arc<Registry>) -> (Arc<Terminal>, Arc<Terminal>) {
        let (a_to_b_tx, a_to_b_rx) = mpsc::channel(64);
        let (b_to_a_tx, b_to_a_rx) = mpsc::channel(64);
        let opts = TerminalOpts::default();

        let a = Terminal::spawn(
            0,
            AllocatorRole::Dialer,
            opts,
            Permissions::default(),
            scheduler.clone(),
            registry.clone(),
            RoleTimeouts::client(),
            BatchingConfig::default(),
            Box::new(NullSession),
            a_to_b_tx,
        );
        let b = Terminal::spawn(
            4,
            AllocatorRole::Listener,
            opts,
            Permissions::default(),
            scheduler.clone(),
            registry,
            RoleTimeouts::client(),
            BatchingConfig::default(),
            Box::new(NullSession),
            b_to_a_tx,
        );

        bridge(a_to_b_rx, b.clone(), scheduler.clone());
        bridge(b_to_a_rx, a.clone(), scheduler.clone());
        (a, b)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn init_then_data_round_trips_through_an_echo_operation() {
        let scheduler = Scheduler::new(SchedulerConfig::client_default());
        let registry = Arc::new(Registry::new());
        registry.register("echo", Permissions::default(), |ctx, _init| FactoryOutcome::Created(Arc::new(EchoOp { ctx })));
        registry.freeze();

        let (a, b) = spawn_pair(&scheduler, registry);

        let received = Arc::new(StdMutex::new(Vec::new()));
        let op_id = a
            .start_operation("echo", Arc::new(RecordingOp { received: received.clone() }), b"hi".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();

        a.send_operation_msg(op_id, MsgType::Data, b"ping".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !received.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("echo should round trip before the test timeout");

        assert_eq!(received.lock().unwrap()[0], b"ping");

        scheduler.shutdown();
        a.cancel.cancel();
        b.cancel.cancel();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn abandon_rejects_new_operations() {
        let scheduler = Scheduler::new(SchedulerConfig::client_default());
        let registry = Arc::new(Registry::new());
        registry.freeze();
        let (tx, _rx) = mpsc::channel(8);

        let terminal = Terminal::spawn(
            0,
            AllocatorRole::Dialer,
            TerminalOpts::default(),
            Permissions::default(),
            scheduler.clone(),
            registry,
            RoleTimeouts::client(),
            BatchingConfig::default(),
            Box::new(NullSession),
            tx,
        );

        terminal.abandon(MeshError::local(ErrorId::Stopping));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = terminal
            .start_operation(
                "echo",
                Arc::new(RecordingOp { received: Arc::new(StdMutex::new(Vec::new())) }),
                vec![],
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(result, Err(e) if e.id() == ErrorId::AbandonedTerminal));

        scheduler.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_timeout_abandons_after_five_missed_ticks() {
        let scheduler = Scheduler::new(SchedulerConfig::client_default());
        let registry = Arc::new(Registry::new());
        registry.freeze();
        let (tx, _rx) = mpsc::channel(8);
        let timeouts = RoleTimeouts {
            abandon_drain_timeout: Duration::from_millis(50),
            flush_timeout: Duration::from_millis(50),
            idle_timeout: Duration::from_millis(50),
        };

        let terminal = Terminal::spawn(
            0,
            AllocatorRole::Dialer,
            TerminalOpts::default(),
            Permissions::default(),
            scheduler.clone(),
            registry,
            timeouts,
            BatchingConfig::default(),
            Box::new(NullSession),
            tx,
        );

        tokio::time::timeout(Duration::from_secs(2), terminal.cancellation().cancelled())
            .await
            .expect("idle terminal should self-abandon");

        scheduler.shutdown();
    }
}
