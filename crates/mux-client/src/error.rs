use thiserror::Error;

use mux_wire::{CarrierError, FrameError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("operation cancelled before it started")]
    Cancelled,
    #[error("timed out waiting for a reply")]
    TimedOut,
    #[error("server returned a malformed reply")]
    MalformedReply,
    #[error(transparent)]
    Carrier(#[from] CarrierError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}
