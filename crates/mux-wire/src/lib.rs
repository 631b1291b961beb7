//! Frame codec: varuint/varint primitives, CRC, `Frame`, and the two wire
//! carriers (byte-stream and CAN-FD). Grounded on `mjlib::multiplex::Frame`
//! / `Rs485FrameStream` / `SocketcanFrameStream`.

pub mod byte_carrier;
pub mod canfd_carrier;
pub mod crc;
pub mod frame;
pub mod transport;
pub mod varint;

pub use byte_carrier::{ByteStreamDecoder, DecodeStep, ResyncReason, DEFAULT_MAX_PAYLOAD, MAX_FRAME_OVERHEAD};
pub use canfd_carrier::CanFdDatagram;
pub use frame::{Frame, FrameError, BROADCAST_ID, MAX_ID};
pub use transport::{ByteStreamCarrier, CanFdCarrier, CanFdIo, Carrier, CarrierError};
