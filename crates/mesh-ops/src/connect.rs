//! `connect` (spec.md §4.5): the exit-node operation. Reads a CBOR
//! `ConnectRequest`, dials the destination, then proxies bytes between the
//! socket and this operation's embedded DFQ, with a two-tier rate limit and
//! per-connection metrics.

use async_trait::async_trait;
use mesh_core::{ErrorId, MeshError};
use mesh_terminal::{FactoryOutcome, Operation, OperationContext, Permissions, Registry};
use mesh_wire::MsgType;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Bytes a connection may send at full priority before dropping to normal
/// `Data` framing.
const FULL_PRIORITY_BYTES: u64 = 10_000_000;
/// Cumulative bytes after which the 128 Mbit/s cap kicks in.
const THROTTLE_AFTER_BYTES: u64 = 1_000_000_000;
/// 128 Mbit/s expressed in bytes/s.
const THROTTLE_BYTES_PER_SEC: u64 = 16_000_000;

const READ_CHUNK: usize = 16 * 1024;
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    domain: Option<String>,
    ip: Option<String>,
    protocol: String,
    port: u16,
    #[serde(default)]
    use_priority_data: bool,
    #[serde(default = "default_queue_size")]
    queue_size: u32,
}

fn default_queue_size() -> u32 {
    64
}

/// Running counters for one `connect` instance (spec.md: "emits metrics
/// (bytes in/out, TTFB, duration)").
#[derive(Default)]
struct ConnectMetrics {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    ttfb: Mutex<Option<Duration>>,
}

struct ConnectOperation {
    to_socket: mpsc::Sender<Vec<u8>>,
}

#[async_trait]
impl Operation for ConnectOperation {
    async fn deliver(&self, payload: Vec<u8>, _is_priority: bool) {
        if self.to_socket.send(payload).await.is_err() {
            debug!("connect: socket writer already gone, dropping delivered bytes");
        }
    }

    async fn stop(&self, _err: MeshError) {
        // Dropping our half of `to_socket` (which happens when this Arc is
        // dropped from the Terminal's active-ops map) ends the writer loop.
    }
}

/// Throttles the caller once `bytes_since_threshold` implies the configured
/// rate has been exceeded, anchored to the instant the threshold was first
/// crossed rather than to cumulative excess (which would never converge).
struct Throttle {
    armed_at: Option<Instant>,
    bytes_since_armed: u64,
}

impl Throttle {
    fn new() -> Self {
        Self {
            armed_at: None,
            bytes_since_armed: 0,
        }
    }

    async fn account(&mut self, total_sent: u64, just_sent: u64) {
        if total_sent < THROTTLE_AFTER_BYTES {
            return;
        }
        let armed_at = *self.armed_at.get_or_insert_with(Instant::now);
        self.bytes_since_armed += just_sent;
        let allowed_elapsed = Duration::from_secs_f64(self.bytes_since_armed as f64 / THROTTLE_BYTES_PER_SEC as f64);
        let actual_elapsed = armed_at.elapsed();
        if let Some(remaining) = allowed_elapsed.checked_sub(actual_elapsed) {
            tokio::time::sleep(remaining).await;
        }
    }
}

async fn dial(request: &ConnectRequest) -> mesh_core::Result<TcpStream> {
    if request.protocol != "tcp" {
        return Err(MeshError::new(
            ErrorId::InvalidOptions,
            format!("connect: unsupported protocol {:?}", request.protocol),
        ));
    }
    let host = request
        .ip
        .clone()
        .or_else(|| request.domain.clone())
        .ok_or_else(|| MeshError::local(ErrorId::InvalidOptions))?;
    TcpStream::connect((host.as_str(), request.port))
        .await
        .map_err(|err| MeshError::new(ErrorId::DestinationUnavailable, err.to_string()))
}

async fn run_connect(ctx: OperationContext, socket: TcpStream, use_priority_data: bool, to_socket_rx: mpsc::Receiver<Vec<u8>>) {
    let (mut read_half, mut write_half) = socket.into_split();
    let metrics = Arc::new(ConnectMetrics::default());
    let started_at = Instant::now();

    let writer_metrics = metrics.clone();
    let writer = tokio::spawn(async move {
        let mut rx = to_socket_rx;
        while let Some(chunk) = rx.recv().await {
            writer_metrics.bytes_in.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            if write_half.write_all(&chunk).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let reader_metrics = metrics.clone();
    let reader = tokio::spawn(async move {
        let mut throttle = Throttle::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let sent_before = reader_metrics.bytes_out.fetch_add(n as u64, Ordering::Relaxed);
            if sent_before == 0 {
                *reader_metrics.ttfb.lock().await = Some(started_at.elapsed());
            }
            let is_priority = use_priority_data && sent_before < FULL_PRIORITY_BYTES;
            let msg_type = if is_priority { MsgType::PriorityData } else { MsgType::Data };
            if ctx.send(msg_type, buf[..n].to_vec(), SEND_TIMEOUT).await.is_err() {
                break;
            }
            throttle.account(sent_before + n as u64, n as u64).await;
        }
        ctx.stop(None);
    });

    let _ = tokio::join!(writer, reader);
    debug!(
        bytes_in = metrics.bytes_in.load(Ordering::Relaxed),
        bytes_out = metrics.bytes_out.load(Ordering::Relaxed),
        duration_ms = started_at.elapsed().as_millis(),
        "connect operation finished"
    );
}

pub fn register(registry: &Registry) {
    registry.register("connect", Permissions::default(), |ctx, init_payload| {
        let request: ConnectRequest = match ciborium::de::from_reader(init_payload.as_slice()) {
            Ok(request) => request,
            Err(err) => return FactoryOutcome::Failed(MeshError::new(ErrorId::InvalidOptions, err.to_string())),
        };
        let use_priority_data = request.use_priority_data;
        let (to_socket_tx, to_socket_rx) = mpsc::channel(request.queue_size.max(1) as usize);
        let op = Arc::new(ConnectOperation { to_socket: to_socket_tx });

        let ctx_for_task = ctx;
        tokio::spawn(async move {
            let socket = match dial(&request).await {
                Ok(socket) => socket,
                Err(err) => {
                    warn!(error = %err.id(), "connect: dial failed");
                    ctx_for_task.stop(Some(err));
                    return;
                }
            };
            run_connect(ctx_for_task, socket, use_priority_data, to_socket_rx).await;
        });

        FactoryOutcome::Created(op)
    });
}
