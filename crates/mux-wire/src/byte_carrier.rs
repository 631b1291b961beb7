//! RS-485-style byte-stream frame carrier.
//!
//! Wire layout: `0x54 0xAB | source_id | dest_id | varuint(payload_len) |
//! payload | crc16-ccitt(LE over all prior bytes)`. The `request_reply` bit
//! is carried in the high bit of `source_id`.

use crate::crc::crc16_ccitt_false;
use crate::frame::{Frame, FrameError, BROADCAST_ID};
use crate::varint::{read_varuint, write_varuint};

pub const SENTINEL: [u8; 2] = [0x54, 0xab];
const CRC_SIZE: usize = 2;
/// sentinel + source + dest, before the size varuint.
const FIXED_HEADER_SIZE: usize = 4;

pub const DEFAULT_MAX_PAYLOAD: usize = 256;

/// Outer-frame overhead the subframe engine must reserve: sentinel(2) +
/// source(1) + dest(1) + varuint(size, up to 5 bytes) + crc(2).
pub const MAX_FRAME_OVERHEAD: usize = 2 + 1 + 1 + 5 + CRC_SIZE;

/// Encode one frame onto the byte-stream wire, appending to `out`.
pub fn encode(frame: &Frame, max_payload: usize, out: &mut Vec<u8>) -> Result<(), FrameError> {
    frame.validate()?;
    if frame.payload.len() > max_payload {
        return Err(FrameError::PayloadTooLarge(frame.payload.len(), max_payload));
    }

    let start = out.len();
    out.extend_from_slice(&SENTINEL);
    let source_byte = frame.source_id | if frame.request_reply { 0x80 } else { 0 };
    out.push(source_byte);
    out.push(frame.dest_id);
    write_varuint(out, frame.payload.len() as u64);
    out.extend_from_slice(&frame.payload);
    let crc = crc16_ccitt_false(&out[start..]);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(())
}

/// Encode several frames back to back into a single buffer (one syscall
/// worth of bytes for the caller to write).
pub fn encode_multiple(frames: &[Frame], max_payload: usize, out: &mut Vec<u8>) -> Result<(), FrameError> {
    for frame in frames {
        encode(frame, max_payload, out)?;
    }
    Ok(())
}

/// Why the decoder discarded bytes and is resynchronizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    ChecksumMismatch,
    OversizePayload,
    MalformedVaruint,
}

/// Outcome of one decode attempt.
pub enum DecodeStep {
    /// A complete, checksum-valid frame was decoded.
    Frame(Frame),
    /// Bytes were discarded; the stream may still contain more valid
    /// frames, call `poll` again.
    Resync(ResyncReason),
    /// Not enough bytes buffered yet for a full frame.
    NeedMore,
}

/// Incremental byte-stream decoder.
///
/// Accumulates bytes with `feed`, then `poll` repeatedly: locate the
/// sentinel, parse the header, verify the CRC, and either emit a frame or
/// advance past a false start / corrupt frame.
pub struct ByteStreamDecoder {
    buf: Vec<u8>,
    max_payload: usize,
}

impl ByteStreamDecoder {
    pub fn new(max_payload: usize) -> Self {
        ByteStreamDecoder {
            buf: Vec::new(),
            max_payload,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pull as many frames as are currently buffered.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            match self.poll() {
                DecodeStep::Frame(f) => frames.push(f),
                DecodeStep::Resync(_) => continue,
                DecodeStep::NeedMore => break,
            }
        }
        frames
    }

    /// Attempt a single decode step. See `DecodeStep`.
    pub fn poll(&mut self) -> DecodeStep {
        let Some(first) = self.buf.iter().position(|&b| b == SENTINEL[0]) else {
            self.buf.clear();
            return DecodeStep::NeedMore;
        };
        if first > 0 {
            self.buf.drain(0..first);
        }

        if self.buf.len() < 2 {
            return DecodeStep::NeedMore;
        }
        if self.buf[1] != SENTINEL[1] {
            self.buf.drain(0..1);
            return DecodeStep::Resync(ResyncReason::MalformedVaruint);
        }

        if self.buf.len() < FIXED_HEADER_SIZE + 1 {
            return DecodeStep::NeedMore;
        }

        let source_byte = self.buf[2];
        let dest_id = self.buf[3];

        let Some((payload_len, varuint_size)) = read_varuint(&self.buf[FIXED_HEADER_SIZE..]) else {
            if self.buf.len() - FIXED_HEADER_SIZE > crate::varint::MAX_VARUINT_SIZE {
                self.buf.drain(0..2);
                return DecodeStep::Resync(ResyncReason::MalformedVaruint);
            }
            return DecodeStep::NeedMore;
        };

        let payload_len = payload_len as usize;
        if payload_len > self.max_payload {
            self.buf.drain(0..2);
            return DecodeStep::Resync(ResyncReason::OversizePayload);
        }

        let payload_start = FIXED_HEADER_SIZE + varuint_size;
        let frame_end = payload_start + payload_len + CRC_SIZE;
        if self.buf.len() < frame_end {
            return DecodeStep::NeedMore;
        }

        let crc_bytes = &self.buf[payload_start + payload_len..frame_end];
        let actual_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
        let expected_crc = crc16_ccitt_false(&self.buf[..payload_start + payload_len]);

        if actual_crc != expected_crc {
            self.buf.drain(0..2);
            return DecodeStep::Resync(ResyncReason::ChecksumMismatch);
        }

        let source_id = source_byte & 0x7f;
        let request_reply = source_byte & 0x80 != 0;
        let payload = self.buf[payload_start..payload_start + payload_len].to_vec();
        self.buf.drain(0..frame_end);

        if dest_id > BROADCAST_ID {
            return DecodeStep::Resync(ResyncReason::MalformedVaruint);
        }

        DecodeStep::Frame(Frame {
            source_id,
            dest_id,
            request_reply,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(source: u8, dest: u8, rr: bool, payload: &[u8]) -> Frame {
        Frame::new(source, dest, rr, payload.to_vec()).unwrap()
    }

    #[test]
    fn write_single_no_reply_matches_literal_wire_bytes() {
        // Scenario 1 from spec.md §8: id=2, WriteSingle(reg=1, int8=10), no reply.
        let payload = vec![0x10, 0x01, 0x0a];
        let frame = f(0, 2, false, &payload);
        let mut out = Vec::new();
        encode(&frame, DEFAULT_MAX_PAYLOAD, &mut out).unwrap();
        assert_eq!(&out[..6], &[0x54, 0xab, 0x00, 0x02, 0x03, 0x10]);
        assert_eq!(out.len(), 6 + 2 + 2);
    }

    #[test]
    fn decode_is_inverse_of_encode() {
        let frame = f(5, 6, true, b"hello");
        let mut out = Vec::new();
        encode(&frame, DEFAULT_MAX_PAYLOAD, &mut out).unwrap();
        let mut dec = ByteStreamDecoder::new(DEFAULT_MAX_PAYLOAD);
        dec.feed(&out);
        let frames = dec.drain_frames();
        assert_eq!(frames, vec![frame]);
    }

    #[test]
    fn resyncs_past_garbage_prefix() {
        let frame = f(1, 2, false, b"x");
        let mut out = vec![0xde, 0xad, 0xbe, 0xef];
        encode(&frame, DEFAULT_MAX_PAYLOAD, &mut out).unwrap();
        let mut dec = ByteStreamDecoder::new(DEFAULT_MAX_PAYLOAD);
        dec.feed(&out);
        assert_eq!(dec.drain_frames(), vec![frame]);
    }

    #[test]
    fn checksum_mismatch_is_skipped_and_resynced() {
        let frame = f(1, 2, false, b"x");
        let mut out = Vec::new();
        encode(&frame, DEFAULT_MAX_PAYLOAD, &mut out).unwrap();
        let last = out.len() - 1;
        out[last] ^= 0xff;
        let mut dec = ByteStreamDecoder::new(DEFAULT_MAX_PAYLOAD);
        dec.feed(&out);
        assert_eq!(dec.drain_frames(), vec![]);
    }

    #[test]
    fn trailing_garbage_after_valid_frame_is_ignored() {
        let frame = f(1, 2, false, b"x");
        let mut out = Vec::new();
        encode(&frame, DEFAULT_MAX_PAYLOAD, &mut out).unwrap();
        out.extend_from_slice(&[0x54, 0xab, 0x01]);
        let mut dec = ByteStreamDecoder::new(DEFAULT_MAX_PAYLOAD);
        dec.feed(&out);
        assert_eq!(dec.drain_frames(), vec![frame]);
    }

    #[test]
    fn incremental_feed_across_multiple_chunks() {
        let frame = f(3, 4, true, b"chunked");
        let mut out = Vec::new();
        encode(&frame, DEFAULT_MAX_PAYLOAD, &mut out).unwrap();

        let mut dec = ByteStreamDecoder::new(DEFAULT_MAX_PAYLOAD);
        for chunk in out.chunks(3) {
            dec.feed(chunk);
        }
        assert_eq!(dec.drain_frames(), vec![frame]);
    }

    #[test]
    fn oversize_payload_is_rejected_at_encode() {
        let big = vec![0u8; DEFAULT_MAX_PAYLOAD + 1];
        let frame = f(1, 2, false, &big);
        let mut out = Vec::new();
        assert!(matches!(
            encode(&frame, DEFAULT_MAX_PAYLOAD, &mut out),
            Err(FrameError::PayloadTooLarge(_, _))
        ));
    }
}
