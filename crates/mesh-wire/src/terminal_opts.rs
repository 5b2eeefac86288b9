//! `TerminalOpts`, carried inside every `Init` segment (spec.md §3, §6).
//!
//! spec.md calls the encoding "DSD" without defining its byte layout; we
//! implement it as a dense, self-describing varint/flags encoding (see
//! `DESIGN.md` for the Open-Question-style call). Field order is fixed:
//! version, flags byte, padding, flow-control code, flow-control size.

use crate::error::WireError;

/// The only protocol version this build understands (spec.md §6: "Supported
/// versions: 1").
pub const SUPPORTED_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlKind {
    /// No credit accounting; a bounded channel stands in directly.
    None,
    /// The Duplex Flow Queue (spec.md §4.2).
    Dfq,
}

impl FlowControlKind {
    fn code(self) -> u8 {
        match self {
            FlowControlKind::None => 0,
            FlowControlKind::Dfq => 1,
        }
    }

    fn from_code(code: u8) -> Result<Self, WireError> {
        match code {
            0 => Ok(FlowControlKind::None),
            1 => Ok(FlowControlKind::Dfq),
            other => Err(WireError::UnknownFlowControlCode(other)),
        }
    }
}

const FLAG_ENCRYPT: u8 = 0b0000_0001;
const FLAG_PRIORITY_DATA: u8 = 0b0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalOpts {
    pub version: u8,
    pub encrypt: bool,
    pub padding: u16,
    pub flow_control: FlowControlKind,
    pub flow_control_size: u32,
    pub use_priority_data_messages: bool,
}

impl Default for TerminalOpts {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            encrypt: false,
            padding: 8,
            flow_control: FlowControlKind::Dfq,
            flow_control_size: 64,
            use_priority_data_messages: true,
        }
    }
}

impl TerminalOpts {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        mesh_core::varint::encode_into(self.version as u64, &mut out);
        let mut flags = 0u8;
        if self.encrypt {
            flags |= FLAG_ENCRYPT;
        }
        if self.use_priority_data_messages {
            flags |= FLAG_PRIORITY_DATA;
        }
        out.push(flags);
        mesh_core::varint::encode_into(self.padding as u64, &mut out);
        out.push(self.flow_control.code());
        mesh_core::varint::encode_into(self.flow_control_size as u64, &mut out);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let (version, mut offset) =
            mesh_core::varint::decode(buf).map_err(|_| WireError::Truncated)?;
        let version: u8 = version.try_into().map_err(|_| WireError::UnsupportedVersion(255))?;
        if version != SUPPORTED_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let flags = *buf.get(offset).ok_or(WireError::Truncated)?;
        offset += 1;
        let (padding, consumed) =
            mesh_core::varint::decode(&buf[offset..]).map_err(|_| WireError::Truncated)?;
        offset += consumed;
        let flow_control_code = *buf.get(offset).ok_or(WireError::Truncated)?;
        offset += 1;
        let (flow_control_size, consumed) =
            mesh_core::varint::decode(&buf[offset..]).map_err(|_| WireError::Truncated)?;

        Ok(Self {
            version,
            encrypt: flags & FLAG_ENCRYPT != 0,
            padding: padding.try_into().unwrap_or(u16::MAX),
            flow_control: FlowControlKind::from_code(flow_control_code)?,
            flow_control_size: flow_control_size.try_into().unwrap_or(u32::MAX),
            use_priority_data_messages: flags & FLAG_PRIORITY_DATA != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let opts = TerminalOpts {
            version: 1,
            encrypt: true,
            padding: 16,
            flow_control: FlowControlKind::Dfq,
            flow_control_size: 200,
            use_priority_data_messages: false,
        };
        let encoded = opts.encode();
        let decoded = TerminalOpts::decode(&encoded).unwrap();
        assert_eq!(decoded, opts);
    }

    #[test]
    fn unknown_flow_control_code_is_refused() {
        let mut opts = TerminalOpts::default().encode();
        // flow-control code byte position: version(1) + flags(1) + padding varint(1 for 8)
        let code_offset = 3;
        opts[code_offset] = 0x7f;
        assert!(matches!(
            TerminalOpts::decode(&opts),
            Err(WireError::UnknownFlowControlCode(0x7f))
        ));
    }

    #[test]
    fn unsupported_version_is_refused() {
        let mut opts = TerminalOpts::default().encode();
        opts[0] = 2;
        assert!(matches!(
            TerminalOpts::decode(&opts),
            Err(WireError::UnsupportedVersion(2))
        ));
    }
}
