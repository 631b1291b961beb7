//! Async carrier wrappers over the two wire formats.
//!
//! Per the design notes (§9), the carrier is modeled as a small, closed,
//! tagged-variant capability set rather than a virtual hierarchy: a byte
//! stream carrier and a CAN-FD carrier, each generic over the concrete
//! I/O object the embedder supplies (a serial port, a socketcan socket, an
//! in-memory duplex for tests, ...).

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::byte_carrier::{encode, encode_multiple, ByteStreamDecoder, DecodeStep, DEFAULT_MAX_PAYLOAD};
use crate::canfd_carrier::{self, CanFdDatagram};
use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum CarrierError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out waiting for a frame")]
    TimedOut,
}

/// Minimal transport for CAN-FD datagrams. Real socketcan bindings are an
/// external collaborator (§1); this trait is the seam a caller plugs one
/// into.
pub trait CanFdIo: Send {
    fn send(&mut self, dg: &CanFdDatagram) -> impl Future<Output = io::Result<()>> + Send;
    fn recv(&mut self) -> impl Future<Output = io::Result<CanFdDatagram>> + Send;
}

/// RS-485-style byte-stream carrier over any `AsyncRead + AsyncWrite`.
pub struct ByteStreamCarrier<S> {
    io: S,
    decoder: ByteStreamDecoder,
    max_payload: usize,
    read_buf: Vec<u8>,
    resync_count: u64,
}

impl<S> ByteStreamCarrier<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S) -> Self {
        Self::with_max_payload(io, DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(io: S, max_payload: usize) -> Self {
        ByteStreamCarrier {
            io,
            decoder: ByteStreamDecoder::new(max_payload),
            max_payload,
            read_buf: vec![0u8; max_payload + crate::byte_carrier::MAX_FRAME_OVERHEAD],
            resync_count: 0,
        }
    }

    /// Cumulative count of sentinel/CRC resyncs since construction (§4.A).
    pub fn resync_count(&self) -> u64 {
        self.resync_count
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub async fn write(&mut self, frame: &Frame) -> Result<(), CarrierError> {
        let mut buf = Vec::new();
        encode(frame, self.max_payload, &mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.io.write_all(&buf).await?;
        Ok(())
    }

    pub async fn write_multiple(&mut self, frames: &[Frame]) -> Result<(), CarrierError> {
        let mut buf = Vec::new();
        encode_multiple(frames, self.max_payload, &mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.io.write_all(&buf).await?;
        Ok(())
    }

    /// Read the next valid frame, skipping malformed data and resyncing as
    /// described in §4.A. Returns `CarrierError::TimedOut` if no valid
    /// frame arrives within `deadline`.
    pub async fn read(&mut self, deadline: Duration) -> Result<Frame, CarrierError> {
        loop {
            match self.decoder.poll() {
                DecodeStep::Frame(frame) => return Ok(frame),
                DecodeStep::Resync(reason) => {
                    self.resync_count += 1;
                    trace!(?reason, "byte carrier resynchronizing");
                    continue;
                }
                DecodeStep::NeedMore => {}
            }

            let n = match timeout(deadline, self.io.read(&mut self.read_buf)).await {
                Ok(Ok(0)) => return Err(CarrierError::Io(io::Error::from(io::ErrorKind::UnexpectedEof))),
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(CarrierError::Io(e)),
                Err(_) => return Err(CarrierError::TimedOut),
            };
            self.decoder.feed(&self.read_buf[..n]);
        }
    }
}

/// CAN-FD carrier: one `Frame` per datagram.
pub struct CanFdCarrier<T> {
    io: T,
}

impl<T: CanFdIo> CanFdCarrier<T> {
    pub fn new(io: T) -> Self {
        CanFdCarrier { io }
    }

    pub async fn write(&mut self, frame: &Frame) -> Result<(), CarrierError> {
        let dg = canfd_carrier::encode(frame)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.io.send(&dg).await?;
        Ok(())
    }

    /// Sends frames in order, stopping at the first error (§4.A).
    pub async fn write_multiple(&mut self, frames: &[Frame]) -> Result<(), CarrierError> {
        for frame in frames {
            self.write(frame).await?;
        }
        Ok(())
    }

    pub async fn read(&mut self, deadline: Duration) -> Result<Frame, CarrierError> {
        match timeout(deadline, self.io.recv()).await {
            Ok(Ok(dg)) => {
                debug!(id = dg.id, extended = dg.extended, "canfd datagram received");
                Ok(canfd_carrier::decode(&dg))
            }
            Ok(Err(e)) => {
                warn!(error = %e, "canfd recv failed");
                Err(CarrierError::Io(e))
            }
            Err(_) => Err(CarrierError::TimedOut),
        }
    }
}

/// Tagged union over the two carriers, per the design notes' preference
/// for a closed variant set over a virtual hierarchy.
pub enum Carrier<S, T> {
    ByteStream(ByteStreamCarrier<S>),
    CanFd(CanFdCarrier<T>),
}

impl<S, T> Carrier<S, T>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    T: CanFdIo,
{
    pub async fn write(&mut self, frame: &Frame) -> Result<(), CarrierError> {
        match self {
            Carrier::ByteStream(c) => c.write(frame).await,
            Carrier::CanFd(c) => c.write(frame).await,
        }
    }

    pub async fn write_multiple(&mut self, frames: &[Frame]) -> Result<(), CarrierError> {
        match self {
            Carrier::ByteStream(c) => c.write_multiple(frames).await,
            Carrier::CanFd(c) => c.write_multiple(frames).await,
        }
    }

    pub async fn read(&mut self, deadline: Duration) -> Result<Frame, CarrierError> {
        match self {
            Carrier::ByteStream(c) => c.read(deadline).await,
            Carrier::CanFd(c) => c.read(deadline).await,
        }
    }

    /// Cumulative resync count for the byte-stream carrier; always zero
    /// for CAN-FD, which has no sentinel/CRC resync concept.
    pub fn resync_count(&self) -> u64 {
        match self {
            Carrier::ByteStream(c) => c.resync_count(),
            Carrier::CanFd(_) => 0,
        }
    }

    /// The largest payload a single frame on this carrier can carry.
    pub fn max_payload(&self) -> usize {
        match self {
            Carrier::ByteStream(c) => c.max_payload(),
            Carrier::CanFd(_) => crate::canfd_carrier::MAX_PAYLOAD,
        }
    }
}
