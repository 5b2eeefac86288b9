//! End-to-end scenarios with literal values, run at the Terminal/Session
//! layer directly (no Crane or physical stream involved).

use async_trait::async_trait;
use mesh_core::config::{BatchingConfig, RoleTimeouts};
use mesh_core::{AllocatorRole, MeshError};
use mesh_flow::Shipped;
use mesh_scheduler::{Scheduler, Unit};
use mesh_terminal::crypto::{ChaChaSession, CryptoSession, NullSession};
use mesh_terminal::{FactoryOutcome, Operation, OperationContext, Permissions, Registry, Session, Terminal};
use mesh_wire::{FlowControlKind, MsgType, TerminalOpts};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn bridge(mut rx: mpsc::Receiver<Shipped>, target: Arc<Terminal>, scheduler: Scheduler) {
    tokio::spawn(async move {
        while let Some(shipped) = rx.recv().await {
            let unit: Unit = scheduler.new_unit();
            let _ = target.deliver_raw(shipped.msg_type, &shipped.payload, unit).await;
        }
    });
}

struct Pair {
    a: Arc<Terminal>,
    b: Arc<Terminal>,
}

fn spawn_pair(scheduler: &Scheduler, registry: Arc<Registry>, opts: TerminalOpts, timeouts: RoleTimeouts, encrypted: bool) -> Pair {
    let (a_to_b_tx, a_to_b_rx) = mpsc::channel(256);
    let (b_to_a_tx, b_to_a_rx) = mpsc::channel(256);

    let (crypto_a, crypto_b): (Box<dyn CryptoSession>, Box<dyn CryptoSession>) = if encrypted {
        let key = [7u8; 32];
        (Box::new(ChaChaSession::new(key)), Box::new(ChaChaSession::new(key)))
    } else {
        (Box::new(NullSession), Box::new(NullSession))
    };

    let a = Terminal::spawn(
        0,
        AllocatorRole::Dialer,
        opts,
        Permissions::default(),
        scheduler.clone(),
        registry.clone(),
        timeouts,
        BatchingConfig::default(),
        crypto_a,
        a_to_b_tx,
    );
    let b = Terminal::spawn(
        4,
        AllocatorRole::Listener,
        opts,
        Permissions::default(),
        scheduler.clone(),
        registry,
        timeouts,
        BatchingConfig::default(),
        crypto_b,
        b_to_a_tx,
    );

    bridge(a_to_b_rx, b.clone(), scheduler.clone());
    bridge(b_to_a_rx, a.clone(), scheduler.clone());
    Pair { a, b }
}

struct Recorder {
    received: Arc<StdMutex<Vec<Vec<u8>>>>,
}

#[async_trait]
impl Operation for Recorder {
    async fn deliver(&self, payload: Vec<u8>, _is_priority: bool) {
        self.received.lock().unwrap().push(payload);
    }
    async fn stop(&self, _err: MeshError) {}
}

fn register_recorder(registry: &Registry, received: Arc<StdMutex<Vec<Vec<u8>>>>) {
    registry.register("record", Permissions::default(), move |_ctx: OperationContext, _init: Vec<u8>| {
        FactoryOutcome::Created(Arc::new(Recorder { received: received.clone() }))
    });
}

/// Scenario 2: encrypted streaming under credit pressure. 10 000 copies of a
/// 44-byte message sent A -> B over a DFQ-flow-controlled, encrypted
/// Terminal pair whose queue size (200) is far smaller than the send count,
/// forcing the sender to repeatedly wait on credit.
#[tokio::test(flavor = "multi_thread")]
async fn encrypted_streaming_under_credit_pressure_arrives_in_order() {
    const MESSAGE: &[u8] = b"The quick brown fox jumps over the lazy dog.";
    const COUNT: usize = 10_000;

    let scheduler = Scheduler::new(mesh_core::config::SchedulerConfig::client_default());
    let registry = Arc::new(Registry::new());
    let received = Arc::new(StdMutex::new(Vec::with_capacity(COUNT)));
    register_recorder(&registry, received.clone());
    registry.freeze();

    let opts = TerminalOpts {
        version: mesh_wire::SUPPORTED_VERSION,
        encrypt: true,
        padding: 8,
        flow_control: FlowControlKind::Dfq,
        flow_control_size: 200,
        use_priority_data_messages: true,
    };
    let pair = spawn_pair(&scheduler, registry, opts, RoleTimeouts::client(), true);

    let op_id = pair
        .a
        .start_operation("record", Arc::new(Recorder { received: Arc::new(StdMutex::new(Vec::new())) }), Vec::new(), Duration::from_secs(5))
        .await
        .unwrap();

    for _ in 0..COUNT {
        pair.a
            .send_operation_msg(op_id, MsgType::Data, MESSAGE.to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
    }

    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if received.lock().unwrap().len() >= COUNT {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("did not receive all 10000 messages in time");

    let received = received.lock().unwrap();
    assert_eq!(received.len(), COUNT);
    assert!(received.iter().all(|msg| msg.as_slice() == MESSAGE));
}

/// Scenario 3: idle timeout. A Terminal pair with a 1s idle timeout, one
/// message sent, then 6s of silence. Both Terminals must end up abandoned
/// with `NoActivity`.
#[tokio::test(flavor = "multi_thread")]
async fn idle_terminal_is_abandoned_with_no_activity() {
    let scheduler = Scheduler::new(mesh_core::config::SchedulerConfig::client_default());
    let registry = Arc::new(Registry::new());
    let received = Arc::new(StdMutex::new(Vec::new()));
    register_recorder(&registry, received);
    registry.freeze();

    let timeouts = RoleTimeouts {
        idle_timeout: Duration::from_secs(1),
        ..RoleTimeouts::client()
    };
    let pair = spawn_pair(&scheduler, registry, TerminalOpts::default(), timeouts, false);

    let op_id = pair
        .a
        .start_operation("record", Arc::new(Recorder { received: Arc::new(StdMutex::new(Vec::new())) }), Vec::new(), Duration::from_secs(1))
        .await
        .unwrap();
    pair.a
        .send_operation_msg(op_id, MsgType::Data, b"hello".to_vec(), Duration::from_secs(1))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(pair.a.cancellation().is_cancelled());
    assert!(pair.b.cancellation().is_cancelled());
}

/// Scenario 4: Session rate limiting with the literal values from the
/// scenario table — 251 calls inside one second, then a suspicion bump that
/// keeps rejecting even once enough wall-clock time has passed that the raw
/// op-rate check alone would no longer trip.
#[tokio::test(flavor = "multi_thread")]
async fn session_rate_limit_literal_scenario() {
    let session = Session::new();

    for i in 0..250 {
        assert!(session.rate_limit().is_ok(), "call {i} should have been allowed");
    }
    assert!(session.rate_limit().is_err(), "call 251 should be rate-limited");

    let suspicious = Session::new();
    for _ in 0..26 {
        suspicious.report_suspicious_activity(mesh_terminal::session::suspicion_factor::COMMON);
    }
    assert!(suspicious.rate_limit().is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        suspicious.rate_limit().is_err(),
        "a Terminal that tripped the suspicion gate should stay rate-limited even once op-rate alone would pass"
    );
}
