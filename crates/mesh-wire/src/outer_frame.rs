//! The outer frame (spec.md §6): `<varint length> <payload>`, the only
//! structure that ever touches the physical stream directly. Payload is
//! either a plaintext init frame or outer-encrypted shipment ciphertext.

use crate::error::WireError;

pub const MAX_OUTER_FRAME: usize = 16384;

/// Prefix `payload` with its varint length. Errors if the payload already
/// exceeds the wire ceiling.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_OUTER_FRAME {
        return Err(WireError::OversizeFrame(payload.len()));
    }
    let mut out = Vec::with_capacity(payload.len() + mesh_core::varint::MAX_ENCODED_LEN);
    mesh_core::varint::encode_into(payload.len() as u64, &mut out);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode the length prefix only; does not require the body bytes to be
/// present yet, since a streaming reader asks "how many more bytes do I
/// need" before it has them all (spec.md §8: "any inbound outer frame
/// claiming length > 16384 causes Crane shutdown with MalformedData before
/// any body bytes are read").
pub fn decode_header(buf: &[u8]) -> Result<Option<(usize, usize)>, WireError> {
    match mesh_core::varint::decode(buf) {
        Ok((len, consumed)) => {
            let len = len as usize;
            if len > MAX_OUTER_FRAME {
                return Err(WireError::OversizeFrame(len));
            }
            Ok(Some((len, consumed)))
        }
        Err(mesh_core::varint::VarintError::Truncated) => Ok(None),
        Err(mesh_core::varint::VarintError::Overflow) => Err(WireError::OversizeFrame(usize::MAX)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let payload = b"hello mesh";
        let frame = encode(payload).unwrap();
        let (len, consumed) = decode_header(&frame).unwrap().unwrap();
        assert_eq!(len, payload.len());
        assert_eq!(&frame[consumed..consumed + len], payload);
    }

    #[test]
    fn oversize_payload_is_rejected_before_any_io() {
        let payload = vec![0u8; MAX_OUTER_FRAME + 1];
        assert!(matches!(
            encode(&payload),
            Err(WireError::OversizeFrame(_))
        ));
    }

    #[test]
    fn oversize_declared_length_is_rejected_from_header_alone() {
        let mut buf = Vec::new();
        mesh_core::varint::encode_into((MAX_OUTER_FRAME + 1) as u64, &mut buf);
        assert!(matches!(decode_header(&buf), Err(WireError::OversizeFrame(_))));
    }
}
