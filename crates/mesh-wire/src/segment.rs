//! Segment framing (spec.md §6): one length-prefixed unit inside a
//! shipment, carrying one Init/Data/PriorityData/Stop for one ID.
//!
//! ```text
//! segment      := <varint length> <that many bytes>
//! segment body := <varint32 combined-id-and-type> <type-specific payload>
//! combined     := (id & !3) | type
//! ```
//! A length of 0 is the padding marker: everything after it in the
//! shipment is random filler, not a segment.

use crate::error::WireError;
use crate::msg_type::MsgType;

pub const MAX_SEGMENT_LEN: usize = 16384;

/// Pack `id`/`msg_type` into the combined varint32 header used at both the
/// Crane layer (Terminal IDs) and the Terminal layer (Operation IDs).
pub fn combine_id_and_type(id: u32, msg_type: MsgType) -> u32 {
    (id & !0b11) | msg_type.code() as u32
}

pub fn split_id_and_type(combined: u32) -> (u32, MsgType) {
    let msg_type = MsgType::from_code((combined & 0b11) as u8).expect("mask keeps it in 0..=3");
    (combined & !0b11, msg_type)
}

/// Encode one segment (length prefix + combined header + payload), ready to
/// be appended into a shipment.
pub fn encode_segment(id: u32, msg_type: MsgType, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let combined = combine_id_and_type(id, msg_type);
    let mut body = Vec::new();
    mesh_core::varint::encode_into(combined as u64, &mut body);
    body.extend_from_slice(payload);
    if body.len() > MAX_SEGMENT_LEN {
        return Err(WireError::OversizeSegment(body.len()));
    }
    let mut out = Vec::with_capacity(body.len() + mesh_core::varint::MAX_ENCODED_LEN);
    mesh_core::varint::encode_into(body.len() as u64, &mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Append the zero-length padding marker followed by `pad_len` random
/// bytes.
pub fn append_padding(out: &mut Vec<u8>, pad_len: usize) {
    mesh_core::varint::encode_into(0, out);
    let start = out.len();
    out.resize(start + pad_len, 0);
    rand::Rng::fill(&mut rand::thread_rng(), &mut out[start..]);
}

/// One decoded segment, or the padding marker.
pub enum DecodedSegment<'a> {
    Segment {
        id: u32,
        msg_type: MsgType,
        payload: &'a [u8],
    },
    /// The zero-length marker was hit; `rest` is everything after it,
    /// which should be fed to the padding/entropy sink and not parsed
    /// further.
    Padding { rest: &'a [u8] },
}

/// Decode one segment from the front of `buf`, returning it and the number
/// of bytes consumed. For the padding marker, the "consumed" length covers
/// only the zero-length varint itself; the caller is expected to stop
/// iterating afterwards.
pub fn decode_segment(buf: &[u8]) -> Result<(DecodedSegment<'_>, usize), WireError> {
    let (len, len_bytes) = mesh_core::varint::decode(buf).map_err(|_| WireError::Truncated)?;
    if len == 0 {
        return Ok((
            DecodedSegment::Padding {
                rest: &buf[len_bytes..],
            },
            len_bytes,
        ));
    }
    let len = len as usize;
    if len > MAX_SEGMENT_LEN {
        return Err(WireError::OversizeSegment(len));
    }
    let body_start = len_bytes;
    let body_end = body_start
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or(WireError::Truncated)?;
    let body = &buf[body_start..body_end];
    let (combined, combined_bytes) =
        mesh_core::varint::decode(body).map_err(|_| WireError::Truncated)?;
    let combined: u32 = combined.try_into().map_err(|_| WireError::IdOverflow)?;
    let (id, msg_type) = split_id_and_type(combined);
    let payload = &body[combined_bytes..];
    Ok((
        DecodedSegment::Segment {
            id,
            msg_type,
            payload,
        },
        body_end,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_header_round_trips() {
        for id in [0u32, 4, 8, 4096] {
            for t in [
                MsgType::PriorityData,
                MsgType::Init,
                MsgType::Data,
                MsgType::Stop,
            ] {
                let combined = combine_id_and_type(id, t);
                let (decoded_id, decoded_type) = split_id_and_type(combined);
                assert_eq!(decoded_id, id);
                assert_eq!(decoded_type, t);
            }
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let encoded = encode_segment(12, MsgType::Data, b"hello").unwrap();
        let (decoded, consumed) = decode_segment(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        match decoded {
            DecodedSegment::Segment {
                id,
                msg_type,
                payload,
            } => {
                assert_eq!(id, 12);
                assert_eq!(msg_type, MsgType::Data);
                assert_eq!(payload, b"hello");
            }
            DecodedSegment::Padding { .. } => panic!("expected a real segment"),
        }
    }

    #[test]
    fn zero_length_is_padding_marker() {
        let mut buf = vec![0u8];
        buf.extend_from_slice(&[1, 2, 3]);
        let (decoded, consumed) = decode_segment(&buf).unwrap();
        assert_eq!(consumed, 1);
        match decoded {
            DecodedSegment::Padding { rest } => assert_eq!(rest, &[1, 2, 3]),
            DecodedSegment::Segment { .. } => panic!("expected padding"),
        }
    }

    #[test]
    fn oversize_segment_is_rejected() {
        let payload = vec![0u8; MAX_SEGMENT_LEN + 1];
        let err = encode_segment(0, MsgType::Data, &payload).unwrap_err();
        assert!(matches!(err, WireError::OversizeSegment(_)));
    }
}
