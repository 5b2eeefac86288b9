//! `counter` (spec.md §8.1): a test-only bidirectional counter used by the
//! plain-counter end-to-end scenario. Each side counts up from 0, sending
//! one Data message per tick, and stops once it both reaches its own target
//! and has seen the peer reach theirs.

use async_trait::async_trait;
use mesh_core::MeshError;
use mesh_terminal::{FactoryOutcome, Operation, OperationContext, Permissions, Registry, Terminal};
use mesh_wire::MsgType;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CounterOpts {
    client_count_to: u32,
    server_count_to: u32,
}

/// Holds its own [`OperationContext`] behind a `Mutex` rather than by value:
/// the initiating side doesn't know its assigned operation ID until after
/// `Terminal::start_operation` returns, so the context is filled in once
/// that's known instead of at construction time.
struct CounterOperation {
    ctx: Mutex<Option<OperationContext>>,
    target: u32,
    peer_target: u32,
    sent: AtomicU32,
    peer_reached: AtomicU32,
}

#[async_trait]
impl Operation for CounterOperation {
    async fn deliver(&self, payload: Vec<u8>, _is_priority: bool) {
        let Ok(bytes) = payload.as_slice().try_into() else {
            return;
        };
        let value = u32::from_le_bytes(bytes);
        self.peer_reached.fetch_max(value, Ordering::AcqRel);
        self.maybe_finish().await;
    }

    async fn stop(&self, _err: MeshError) {}
}

impl CounterOperation {
    fn new(target: u32, peer_target: u32) -> Arc<Self> {
        Arc::new(Self {
            ctx: Mutex::new(None),
            target,
            peer_target,
            sent: AtomicU32::new(0),
            peer_reached: AtomicU32::new(0),
        })
    }

    fn ctx(&self) -> Option<OperationContext> {
        self.ctx.lock().clone()
    }

    async fn tick(self: Arc<Self>) {
        loop {
            let Some(ctx) = self.ctx() else { return };
            let next = self.sent.fetch_add(1, Ordering::AcqRel) + 1;
            if next > self.target {
                break;
            }
            if ctx.send(MsgType::Data, next.to_le_bytes().to_vec(), SEND_TIMEOUT).await.is_err() {
                break;
            }
        }
        self.maybe_finish().await;
    }

    async fn maybe_finish(&self) {
        if self.is_done() {
            if let Some(ctx) = self.ctx() {
                ctx.stop(None);
            }
        }
    }

    fn is_done(&self) -> bool {
        let mine_done = self.sent.load(Ordering::Acquire) > self.target;
        let peer_done = self.peer_reached.load(Ordering::Acquire) >= self.peer_target;
        mine_done && peer_done
    }
}

/// A caller-side handle to an in-flight `counter` exchange, for tests that
/// need to observe completion without a dedicated notification channel.
#[derive(Clone)]
pub struct CounterHandle(Arc<CounterOperation>);

impl CounterHandle {
    pub fn finished(&self) -> bool {
        self.0.is_done()
    }
}

/// Registers `counter` for the responder side: the factory already gets a
/// fully-formed [`OperationContext`] (the Init message carries the
/// initiator's assigned operation ID).
pub fn register(registry: &Registry) {
    registry.register("counter", Permissions::default(), |ctx, init_payload| {
        let opts: CounterOpts = match ciborium::de::from_reader(init_payload.as_slice()) {
            Ok(opts) => opts,
            Err(err) => return FactoryOutcome::Failed(MeshError::new(mesh_core::ErrorId::InvalidOptions, err.to_string())),
        };
        let op = CounterOperation::new(opts.server_count_to, opts.client_count_to);
        *op.ctx.lock() = Some(ctx);
        tokio::spawn(op.clone().tick());
        FactoryOutcome::Created(op)
    });
}

/// CBOR-encode a `counter` Init payload, for callers that start the
/// exchange indirectly (e.g. relayed through `expand`) rather than via
/// [`start_client`] directly.
pub fn encode_request(client_count_to: u32, server_count_to: u32) -> mesh_core::Result<Vec<u8>> {
    let opts = CounterOpts { client_count_to, server_count_to };
    let mut payload = Vec::new();
    ciborium::ser::into_writer(&opts, &mut payload).map_err(|err| MeshError::new(mesh_core::ErrorId::Internal, err.to_string()))?;
    Ok(payload)
}

/// Start the client half of a `counter` exchange on an already-established
/// Terminal (typically its controller Terminal).
pub async fn start_client(terminal: &Arc<Terminal>, client_count_to: u32, server_count_to: u32) -> mesh_core::Result<CounterHandle> {
    let payload = encode_request(client_count_to, server_count_to)?;
    start_client_as(terminal, "counter", payload, client_count_to, server_count_to).await
}

/// Start the client half of a `counter` exchange under a different type tag
/// and Init payload — used when the exchange is started on a Terminal whose
/// factory dispatch is something other than `counter` itself, such as an
/// `expand` relay whose far side is the one that actually decodes
/// [`encode_request`]'s bytes as `counter` Init.
pub async fn start_client_as(terminal: &Arc<Terminal>, type_tag: &str, init_payload: Vec<u8>, client_count_to: u32, server_count_to: u32) -> mesh_core::Result<CounterHandle> {
    let op = CounterOperation::new(client_count_to, server_count_to);
    let assigned_id = terminal.start_operation(type_tag, op.clone(), init_payload, SEND_TIMEOUT).await?;
    *op.ctx.lock() = Some(OperationContext::new(assigned_id, terminal.clone()));
    tokio::spawn(op.clone().tick());
    Ok(CounterHandle(op))
}
