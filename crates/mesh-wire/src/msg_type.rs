//! The four message types that share the 2-bit type tag packed into every
//! segment's combined ID/type varint (spec.md §6).

/// Wire encoding of the message type, per spec.md §6: "type ∈
/// {0=PriorityData, 1=Init, 2=Data, 3=Stop}".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MsgType {
    PriorityData = 0,
    Init = 1,
    Data = 2,
    Stop = 3,
}

impl MsgType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code & 0b11 {
            0 => Some(MsgType::PriorityData),
            1 => Some(MsgType::Init),
            2 => Some(MsgType::Data),
            3 => Some(MsgType::Stop),
            _ => None,
        }
    }

    pub fn is_data_like(self) -> bool {
        matches!(self, MsgType::Data | MsgType::PriorityData)
    }
}
