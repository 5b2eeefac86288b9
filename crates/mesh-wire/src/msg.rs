//! The Message Unit (spec.md §3 "Message"): one logical Data/PriorityData
//! payload as it moves through Terminal send/recv loops, carrying the
//! [`mesh_scheduler::Unit`] that gates its forward progress.
//!
//! A `Msg` is finished exactly once: either the send loop ships it and calls
//! [`Msg::finish`], or the recv loop delivers it to the Operation and the
//! Operation (or the Terminal, on abandon) finishes it. Dropping a `Msg`
//! without finishing it leaks scheduler pace the same way leaking the
//! underlying `Unit` does — see [`mesh_scheduler::Unit`]'s own drop warning.

use crate::msg_type::MsgType;
use mesh_scheduler::Unit;

/// A growable byte buffer with a read cursor, used while a `Msg` is being
/// assembled (appends at the Operation layer) or drained (segment encoding
/// reads from the front without copying the remainder).
#[derive(Debug, Default)]
pub struct MsgBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl MsgBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, read_pos: 0 }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Insert `bytes` at the front, ahead of the current read cursor. Used
    /// to stitch a header onto a payload assembled in reverse order.
    pub fn prepend(&mut self, bytes: &[u8]) {
        self.data.splice(self.read_pos..self.read_pos, bytes.iter().copied());
    }

    /// The unread remainder.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance the read cursor, compacting the buffer once it's fully
    /// drained so repeated small advances don't leak memory.
    pub fn advance(&mut self, n: usize) {
        self.read_pos = (self.read_pos + n).min(self.data.len());
        if self.read_pos == self.data.len() {
            self.data.clear();
            self.read_pos = 0;
        }
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        if self.read_pos > 0 {
            self.data.drain(..self.read_pos);
        }
        self.data
    }
}

/// One logical message: the payload plus enough addressing to route it
/// (which ID it belongs to, Data vs PriorityData) and the scheduler unit
/// that paces it through the pipeline.
pub struct Msg {
    id: u32,
    msg_type: MsgType,
    buffer: MsgBuffer,
    unit: Unit,
}

impl Msg {
    pub fn new(id: u32, msg_type: MsgType, payload: Vec<u8>, unit: Unit) -> Self {
        Self {
            id,
            msg_type,
            buffer: MsgBuffer::from_vec(payload),
            unit,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn msg_type(&self) -> MsgType {
        self.msg_type
    }

    pub fn payload(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn buffer_mut(&mut self) -> &mut MsgBuffer {
        &mut self.buffer
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// Flag this message's unit as high-priority, so it bypasses the
    /// scheduler's pace gate (spec.md §4.1: used for `PriorityData`).
    pub fn make_high_priority(&self) {
        self.unit.make_high_priority();
    }

    pub fn is_priority(&self) -> bool {
        matches!(self.msg_type, MsgType::PriorityData) || self.unit.is_high_priority()
    }

    /// Release the scheduler slot this message occupied. Idempotent.
    pub fn finish(&self) {
        self.unit.finish();
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.buffer.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::config::SchedulerConfig;
    use mesh_scheduler::Scheduler;

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::client_default())
    }

    #[test]
    fn buffer_prepend_and_advance() {
        let mut buf = MsgBuffer::new();
        buf.append(b"world");
        buf.prepend(b"hello ");
        assert_eq!(buf.as_slice(), b"hello world");
        buf.advance(6);
        assert_eq!(buf.as_slice(), b"world");
    }

    #[tokio::test]
    async fn msg_finish_releases_the_unit() {
        let scheduler = scheduler();
        let unit = scheduler.new_unit();
        let msg = Msg::new(8, MsgType::Data, b"payload".to_vec(), unit);
        assert!(!msg.unit().is_finished());
        msg.finish();
        assert!(msg.unit().is_finished());
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn priority_data_type_counts_as_priority_even_unflagged() {
        let scheduler = scheduler();
        let unit = scheduler.new_unit();
        let msg = Msg::new(4, MsgType::PriorityData, Vec::new(), unit);
        assert!(msg.is_priority());
        msg.finish();
        scheduler.shutdown();
    }
}
