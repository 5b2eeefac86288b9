//! A shipment (spec.md §6, GLOSSARY): one outer frame's payload after outer
//! decryption, a concatenation of segments optionally followed by padding.

use crate::error::WireError;
use crate::segment::{self, DecodedSegment};

/// Concatenate pre-encoded segments, then pad to `pad_to` bytes (a multiple
/// of the Terminal's configured padding size) with a zero-length marker
/// followed by random filler. No-op if the shipment is already that long.
pub fn build(segments: &[Vec<u8>], pad_to: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(pad_to);
    for segment in segments {
        out.extend_from_slice(segment);
    }
    if out.len() < pad_to {
        segment::append_padding(&mut out, pad_to - out.len());
    }
    out
}

/// Iterate every real segment in a shipment, stopping at the padding
/// marker (if any) or end of buffer. Returns the segments in order; padding
/// bytes (if present) are returned separately so the caller can feed them
/// to an entropy sink per spec.md §4.3 ("Recv loop").
pub struct ShipmentSegments<'a> {
    remaining: &'a [u8],
    padding: Option<&'a [u8]>,
}

impl<'a> ShipmentSegments<'a> {
    pub fn parse(buf: &'a [u8]) -> Self {
        Self {
            remaining: buf,
            padding: None,
        }
    }

    pub fn padding(&self) -> Option<&'a [u8]> {
        self.padding
    }
}

impl<'a> Iterator for ShipmentSegments<'a> {
    type Item = Result<(u32, crate::msg_type::MsgType, &'a [u8]), WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() || self.padding.is_some() {
            return None;
        }
        match segment::decode_segment(self.remaining) {
            Ok((DecodedSegment::Padding { rest }, _consumed)) => {
                self.padding = Some(rest);
                self.remaining = &[];
                None
            }
            Ok((DecodedSegment::Segment { id, msg_type, payload }, consumed)) => {
                self.remaining = &self.remaining[consumed..];
                Some(Ok((id, msg_type, payload)))
            }
            Err(err) => {
                self.remaining = &[];
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg_type::MsgType;

    #[test]
    fn build_and_parse_round_trips_multiple_segments() {
        let a = segment::encode_segment(8, MsgType::Data, b"one").unwrap();
        let b = segment::encode_segment(12, MsgType::Stop, b"two").unwrap();
        let shipment = build(&[a, b], 0);
        let parsed: Vec<_> = ShipmentSegments::parse(&shipment)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], (8, MsgType::Data, b"one" as &[u8]));
        assert_eq!(parsed[1], (12, MsgType::Stop, b"two" as &[u8]));
    }

    #[test]
    fn padding_is_reported_and_stops_iteration() {
        let a = segment::encode_segment(4, MsgType::Init, b"x").unwrap();
        let min_len = a.len() + 64;
        let shipment = build(&[a], min_len);
        let mut segments = ShipmentSegments::parse(&shipment);
        let first = segments.next().unwrap().unwrap();
        assert_eq!(first.0, 4);
        assert!(segments.next().is_none());
        assert!(segments.padding().is_some());
    }
}
