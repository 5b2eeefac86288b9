//! The "no flow control" variant (spec.md §4.2 closing paragraph): a plain
//! bounded channel between the two ends, with no credit varint prepended.
//! Symmetric with [`crate::Dfq`] in shape — it ships [`Shipped`] frames
//! outbound and hands delivered `Msg`s to its own receiver — so a Terminal
//! can hold either behind [`crate::FlowControl`] without caring which.

use crate::dfq::Shipped;
use crate::error::FlowError;
use mesh_scheduler::Unit;
use mesh_wire::{Msg, MsgType};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct Passthrough {
    outbound: mpsc::Sender<Shipped>,
    recv_tx: mpsc::Sender<Msg>,
}

impl Passthrough {
    pub fn new(queue_size: u32, outbound: mpsc::Sender<Shipped>) -> (Self, mpsc::Receiver<Msg>) {
        let (recv_tx, recv_rx) = mpsc::channel(queue_size.max(1) as usize);
        (Self { outbound, recv_tx }, recv_rx)
    }

    /// No credit byte and no internal queue of our own: backpressure comes
    /// straight from `outbound`'s capacity.
    pub async fn send(&self, msg: Msg, timeout: Duration) -> Result<(), FlowError> {
        let shipped = Shipped {
            id: msg.id(),
            msg_type: msg.msg_type(),
            payload: msg.payload().to_vec(),
        };
        msg.finish();
        tokio::time::timeout(timeout, self.outbound.send(shipped))
            .await
            .map_err(|_| FlowError::SendTimeout)?
            .map_err(|_| FlowError::Closed)
    }

    /// Mirrors [`crate::Dfq::deliver`]'s signature, but the whole `raw`
    /// slice is the payload — there's no leading credit varint to strip.
    pub async fn deliver(&self, id: u32, msg_type: MsgType, raw: &[u8], unit: Unit) -> Result<(), FlowError> {
        let msg = Msg::new(id, msg_type, raw.to_vec(), unit);
        self.recv_tx.send(msg).await.map_err(|_| FlowError::Closed)
    }

    pub async fn flush(&self, _timeout: Duration) -> Result<(), FlowError> {
        // Nothing buffered on our side beyond `outbound` itself, and
        // `send` doesn't return until that channel has accepted the frame.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::config::SchedulerConfig;
    use mesh_scheduler::Scheduler;

    #[tokio::test(flavor = "multi_thread")]
    async fn send_ships_without_a_credit_byte() {
        let scheduler = Scheduler::new(SchedulerConfig::client_default());
        let (outbound_tx, mut outbound_rx) = mpsc::channel(4);
        let (passthrough, _recv) = Passthrough::new(2, outbound_tx);
        let unit = scheduler.new_unit();
        let msg = Msg::new(4, MsgType::Data, b"raw".to_vec(), unit);
        passthrough.send(msg, Duration::from_secs(1)).await.unwrap();
        let shipped = outbound_rx.recv().await.unwrap();
        assert_eq!(shipped.payload, b"raw");
        scheduler.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deliver_round_trips_into_the_receive_side() {
        let scheduler = Scheduler::new(SchedulerConfig::client_default());
        let (outbound_tx, _outbound_rx) = mpsc::channel(4);
        let (passthrough, mut recv) = Passthrough::new(2, outbound_tx);
        let unit = scheduler.new_unit();
        passthrough.deliver(4, MsgType::Data, b"inbound", unit).await.unwrap();
        let msg = recv.recv().await.unwrap();
        assert_eq!(msg.payload(), b"inbound");
        msg.finish();
        scheduler.shutdown();
    }
}
