//! The Duplex Flow Queue (spec.md §4.2): a symmetric credit system layered
//! on top of whatever hands framed bytes to the Crane. One `Dfq` instance
//! handles both directions of a single Terminal-to-Terminal (or
//! Operation-to-Operation) channel at once.

use crate::error::FlowError;
use mesh_core::config::FlowControlConfig;
use mesh_scheduler::Unit;
use mesh_wire::{Msg, MsgType};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::trace;

/// One outbound wire message produced by the flow worker: a (possibly
/// credit-only) payload bound for the Crane, tagged with the ID it travels
/// under and whether it should jump the Crane's outgoing queue.
#[derive(Debug)]
pub struct Shipped {
    pub id: u32,
    pub msg_type: MsgType,
    pub payload: Vec<u8>,
}

struct State {
    send_credit: u32,
    reported_space: u32,
    send_queue: VecDeque<Msg>,
    priority_remaining: u32,
    closed: bool,
}

struct Inner {
    config: FlowControlConfig,
    channel_id: u32,
    state: Mutex<State>,
    send_notify: Notify,
    space_notify: Notify,
    credit_notify: Notify,
    flush_notify: Notify,
    cancel: mesh_core::CancellationToken,
    recv_tx: mpsc::Sender<Msg>,
}

/// Handle to a running DFQ worker. Cheaply cloneable.
#[derive(Clone)]
pub struct Dfq {
    inner: std::sync::Arc<Inner>,
}

/// How often the worker wakes even with nothing queued, purely to check the
/// force-report threshold against a receive queue that's draining on its
/// own schedule.
const FORCE_REPORT_POLL: Duration = Duration::from_millis(50);

impl Dfq {
    /// Start a DFQ over `outbound` (the Crane-facing sink) with receive
    /// capacity `config.queue_size`. Returns the handle plus the receiver
    /// side the owning Terminal reads delivered `Msg`s from.
    pub fn spawn(
        channel_id: u32,
        config: FlowControlConfig,
        outbound: mpsc::Sender<Shipped>,
    ) -> (Self, mpsc::Receiver<Msg>) {
        let (recv_tx, recv_rx) = mpsc::channel(config.queue_size as usize);
        let inner = std::sync::Arc::new(Inner {
            config,
            channel_id,
            state: Mutex::new(State {
                send_credit: config.queue_size,
                reported_space: config.queue_size,
                send_queue: VecDeque::new(),
                priority_remaining: 0,
                closed: false,
            }),
            send_notify: Notify::new(),
            space_notify: Notify::new(),
            credit_notify: Notify::new(),
            flush_notify: Notify::new(),
            cancel: mesh_core::CancellationToken::new(),
            recv_tx,
        });
        let worker_inner = inner.clone();
        tokio::spawn(async move {
            worker_loop(worker_inner, outbound).await;
        });
        (Self { inner }, recv_rx)
    }

    /// Queue-size knob this instance was built with, `Q` in spec.md.
    pub fn capacity(&self) -> u32 {
        self.inner.config.queue_size
    }

    /// Submit `msg` to the send queue, blocking up to `timeout` if it's
    /// full.
    pub async fn send(&self, msg: Msg, timeout: Duration) -> Result<(), FlowError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return Err(FlowError::Closed);
                }
                if state.send_queue.len() < self.inner.config.queue_size as usize {
                    state.send_queue.push_back(msg);
                    drop(state);
                    self.inner.send_notify.notify_one();
                    return Ok(());
                }
            }
            tokio::select! {
                _ = self.inner.space_notify.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => return Err(FlowError::SendTimeout),
            }
        }
    }

    /// Apply an inbound segment for this channel: the leading varint is a
    /// credit grant (added to our `send_credit`), anything after it is a
    /// payload delivered to the receive side.
    pub async fn deliver(
        &self,
        id: u32,
        msg_type: MsgType,
        raw: &[u8],
        unit: Unit,
    ) -> Result<(), FlowError> {
        let (credit, consumed) =
            mesh_core::varint::decode(raw).map_err(|_| FlowError::Closed)?;
        {
            let mut state = self.inner.state.lock().await;
            state.send_credit = state.send_credit.saturating_add(credit as u32);
        }
        self.inner.credit_notify.notify_waiters();

        let payload = &raw[consumed..];
        if payload.is_empty() {
            unit.finish();
            return Ok(());
        }
        let mut state = self.inner.state.lock().await;
        state.reported_space = state.reported_space.saturating_sub(1);
        drop(state);
        let msg = Msg::new(id, msg_type, payload.to_vec(), unit);
        self.inner.recv_tx.send(msg).await.map_err(|_| FlowError::Closed)?;
        Ok(())
    }

    /// Wait until the send queue has fully drained.
    pub async fn flush(&self, timeout: Duration) -> Result<(), FlowError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let state = self.inner.state.lock().await;
                if state.send_queue.is_empty() {
                    return Ok(());
                }
            }
            tokio::select! {
                _ = self.inner.flush_notify.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => return Err(FlowError::FlushTimeout),
            }
        }
    }

    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }
}

async fn worker_loop(inner: std::sync::Arc<Inner>, outbound: mpsc::Sender<Shipped>) {
    let recv_tx = inner.recv_tx.clone();
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = inner.send_notify.notified() => {}
            _ = tokio::time::sleep(FORCE_REPORT_POLL) => {}
        }

        loop {
            let next = {
                let mut state = inner.state.lock().await;
                state.send_queue.pop_front()
            };
            let Some(msg) = next else { break };
            inner.space_notify.notify_one();

            loop {
                let got_credit = {
                    let mut state = inner.state.lock().await;
                    if state.send_credit > 0 {
                        state.send_credit -= 1;
                        true
                    } else {
                        false
                    }
                };
                if got_credit {
                    break;
                }
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = inner.credit_notify.notified() => {}
                }
            }

            let is_priority = {
                let mut state = inner.state.lock().await;
                if msg.is_priority() {
                    state.priority_remaining = state.send_queue.len() as u32;
                    true
                } else if state.priority_remaining > 0 {
                    state.priority_remaining -= 1;
                    true
                } else {
                    false
                }
            };

            let actual_free = recv_tx.capacity() as u32;
            let delta = {
                let mut state = inner.state.lock().await;
                let delta = actual_free.saturating_sub(state.reported_space);
                state.reported_space = actual_free;
                delta
            };

            let mut out = Vec::with_capacity(mesh_core::varint::MAX_ENCODED_LEN + msg.payload().len());
            mesh_core::varint::encode_into(delta as u64, &mut out);
            out.extend_from_slice(msg.payload());
            let msg_type = if is_priority { MsgType::PriorityData } else { msg.msg_type() };
            let shipped = Shipped {
                id: msg.id(),
                msg_type,
                payload: out,
            };
            msg.finish();
            if outbound.send(shipped).await.is_err() {
                return;
            }
        }

        inner.flush_notify.notify_waiters();

        let (reported, actual_free, threshold) = {
            let state = inner.state.lock().await;
            let threshold = (inner.config.queue_size as f64 * inner.config.report_threshold) as u32;
            (state.reported_space, recv_tx.capacity() as u32, threshold)
        };
        if reported < threshold {
            let delta = actual_free.saturating_sub(reported);
            {
                let mut state = inner.state.lock().await;
                state.reported_space = actual_free;
            }
            let mut out = Vec::new();
            mesh_core::varint::encode_into(delta as u64, &mut out);
            trace!(channel_id = inner.channel_id, delta, "DFQ forced space report");
            if outbound
                .send(Shipped {
                    id: inner.channel_id,
                    msg_type: MsgType::Data,
                    payload: out,
                })
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::config::SchedulerConfig;
    use mesh_scheduler::Scheduler;

    fn small_config() -> FlowControlConfig {
        FlowControlConfig {
            queue_size: 4,
            report_threshold: 0.75,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_then_deliver_round_trips_payload() {
        let scheduler = Scheduler::new(SchedulerConfig::client_default());
        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);
        let (dfq_a, _recv_a) = Dfq::spawn(8, small_config(), outbound_tx);

        let unit = scheduler.new_unit();
        let msg = Msg::new(8, MsgType::Data, b"hello".to_vec(), unit);
        dfq_a.send(msg, Duration::from_secs(1)).await.unwrap();

        let shipped = tokio::time::timeout(Duration::from_secs(1), outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shipped.id, 8);

        let unit_b = scheduler.new_unit();
        dfq_a
            .deliver(8, shipped.msg_type, &shipped.payload, unit_b)
            .await
            .unwrap();

        dfq_a.shutdown();
        scheduler.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_resolves_once_queue_drains() {
        let scheduler = Scheduler::new(SchedulerConfig::client_default());
        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);
        let (dfq, _recv) = Dfq::spawn(4, small_config(), outbound_tx);

        let unit = scheduler.new_unit();
        let msg = Msg::new(4, MsgType::Data, b"x".to_vec(), unit);
        dfq.send(msg, Duration::from_secs(1)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), dfq.flush(Duration::from_secs(1)))
            .await
            .unwrap()
            .unwrap();
        let _ = outbound_rx.recv().await;

        dfq.shutdown();
        scheduler.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn send_times_out_when_queue_is_full_and_worker_is_stopped() {
        let scheduler = Scheduler::new(SchedulerConfig::client_default());
        let (outbound_tx, _outbound_rx) = mpsc::channel(16);
        let config = FlowControlConfig {
            queue_size: 1,
            report_threshold: 0.75,
        };
        let (dfq, _recv) = Dfq::spawn(4, config, outbound_tx);
        dfq.shutdown();

        {
            let mut state = dfq.inner.state.lock().await;
            let filler_unit = scheduler.new_unit();
            state
                .send_queue
                .push_back(Msg::new(4, MsgType::Data, vec![0u8; 1], filler_unit));
        }

        let unit2 = scheduler.new_unit();
        let result = dfq
            .send(Msg::new(4, MsgType::Data, vec![0u8; 1], unit2), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(FlowError::SendTimeout)));

        scheduler.shutdown();
    }
}
