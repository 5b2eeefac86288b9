//! LEB128-style unsigned varint codec, the length prefix used everywhere on
//! the wire: outer frames, shipment segments, error IDs, credit grants.

use thiserror::Error;

/// Bytes needed to hold the largest value this codec ever round-trips
/// (`u64`). Used to size read-ahead buffers; not a wire limit.
pub const MAX_ENCODED_LEN: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VarintError {
    #[error("varint exceeds 64 bits")]
    Overflow,
    #[error("buffer ended before varint was terminated")]
    Truncated,
}

/// Encode `value` as an unsigned LEB128 varint.
pub fn encode(mut value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(MAX_ENCODED_LEN);
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
    out
}

/// Append the varint encoding of `value` to `out` without an intermediate
/// allocation.
pub fn encode_into(value: u64, out: &mut Vec<u8>) {
    let mut value = value;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a varint from the front of `buf`, returning the value and the
/// number of bytes consumed.
pub fn decode(buf: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut value: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= MAX_ENCODED_LEN {
            return Err(VarintError::Overflow);
        }
        let payload = (byte & 0x7f) as u64;
        let shift = i * 7;
        if shift >= 64 || (shift == 63 && payload > 1) {
            return Err(VarintError::Overflow);
        }
        value |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(VarintError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_is_one_byte() {
        assert_eq!(encode(0), vec![0]);
    }

    #[test]
    fn truncated_input_errors() {
        assert_eq!(decode(&[0x80, 0x80]), Err(VarintError::Truncated));
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut buf = encode(300);
        buf.extend_from_slice(&[0xff, 0xff]);
        let (value, consumed) = decode(&buf).unwrap();
        assert_eq!(value, 300);
        assert_eq!(consumed, 2);
    }

    proptest! {
        #[test]
        fn round_trips_any_u64(value: u64) {
            let encoded = encode(value);
            let (decoded, consumed) = decode(&encoded).unwrap();
            prop_assert_eq!(decoded, value);
            prop_assert_eq!(consumed, encoded.len());
        }
    }
}
