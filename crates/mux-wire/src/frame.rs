//! `Frame`: the unit of wire transfer between master and one slave.

use thiserror::Error;

/// Reserved `dest_id` meaning "every slave on the bus".
pub const BROADCAST_ID: u8 = 0x7f;

/// Highest legal `source_id`/`dest_id` value (7 bits; the high bit of the
/// on-wire `source_id` byte carries `request_reply`).
pub const MAX_ID: u8 = 0x7f;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("id {0} exceeds the 7-bit address space")]
    IdOutOfRange(u8),
    #[error("request_reply frames cannot address the broadcast id")]
    BroadcastRequestReply,
    #[error("payload of {0} bytes exceeds the carrier's max payload of {1}")]
    PayloadTooLarge(usize, usize),
}

/// One framed unit on the wire, addressed between a master and a slave.
///
/// Invariant: `request_reply => dest_id != BROADCAST_ID` (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source_id: u8,
    pub dest_id: u8,
    pub request_reply: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(
        source_id: u8,
        dest_id: u8,
        request_reply: bool,
        payload: Vec<u8>,
    ) -> Result<Self, FrameError> {
        let frame = Frame {
            source_id,
            dest_id,
            request_reply,
            payload,
        };
        frame.validate()?;
        Ok(frame)
    }

    pub fn validate(&self) -> Result<(), FrameError> {
        if self.source_id > MAX_ID {
            return Err(FrameError::IdOutOfRange(self.source_id));
        }
        if self.dest_id > BROADCAST_ID {
            return Err(FrameError::IdOutOfRange(self.dest_id));
        }
        if self.request_reply && self.dest_id == BROADCAST_ID {
            return Err(FrameError::BroadcastRequestReply);
        }
        Ok(())
    }

    /// The frame a responder should emit to reply to this one, wrapping
    /// `payload`. Swaps source/dest and clears `request_reply`.
    pub fn reply_with(&self, payload: Vec<u8>) -> Frame {
        Frame {
            source_id: self.dest_id,
            dest_id: self.source_id & !0x80,
            request_reply: false,
            payload,
        }
    }
}
