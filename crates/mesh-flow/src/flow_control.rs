//! A Terminal picks one of two flow-control strategies at handshake time
//! (`TerminalOpts::flow_control`, spec.md §6); this type lets the rest of
//! the Terminal code stay agnostic to which one it got.

use crate::dfq::{Dfq, Shipped};
use crate::error::FlowError;
use crate::passthrough::Passthrough;
use mesh_core::config::FlowControlConfig;
use mesh_scheduler::Unit;
use mesh_wire::{Msg, MsgType};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
pub enum FlowControl {
    Dfq(Dfq),
    None(Passthrough),
}

impl FlowControl {
    /// Build the DFQ variant, wired to ship framed bytes through `outbound`.
    pub fn dfq(channel_id: u32, config: FlowControlConfig, outbound: mpsc::Sender<Shipped>) -> (Self, mpsc::Receiver<Msg>) {
        let (dfq, rx) = Dfq::spawn(channel_id, config, outbound);
        (Self::Dfq(dfq), rx)
    }

    /// Build the passthrough variant: no credit byte, but still ships
    /// `Shipped` frames through `outbound` like the DFQ variant does.
    pub fn none(queue_size: u32, outbound: mpsc::Sender<Shipped>) -> (Self, mpsc::Receiver<Msg>) {
        let (passthrough, rx) = Passthrough::new(queue_size, outbound);
        (Self::None(passthrough), rx)
    }

    pub async fn send(&self, msg: Msg, timeout: Duration) -> Result<(), FlowError> {
        match self {
            FlowControl::Dfq(dfq) => dfq.send(msg, timeout).await,
            FlowControl::None(p) => p.send(msg, timeout).await,
        }
    }

    pub async fn deliver(&self, id: u32, msg_type: MsgType, raw: &[u8], unit: Unit) -> Result<(), FlowError> {
        match self {
            FlowControl::Dfq(dfq) => dfq.deliver(id, msg_type, raw, unit).await,
            FlowControl::None(p) => p.deliver(id, msg_type, raw, unit).await,
        }
    }

    pub async fn flush(&self, timeout: Duration) -> Result<(), FlowError> {
        match self {
            FlowControl::Dfq(dfq) => dfq.flush(timeout).await,
            FlowControl::None(p) => p.flush(timeout).await,
        }
    }

    pub fn shutdown(&self) {
        match self {
            FlowControl::Dfq(dfq) => dfq.shutdown(),
            FlowControl::None(_) => {}
        }
    }
}
