//! `mplex` — a multiplex protocol engine: a byte-stream/CAN-FD frame
//! codec, register-RPC and tunnel subframe dispatch, server and client
//! cores, and a self-describing telemetry log.
//!
//! Each concern lives in its own crate (`mux-wire`, `mux-subframe`,
//! `mux-server`, `mux-client`, `telemetry-log`); this crate re-exports
//! them under one name so a caller depends on a single package.

pub use mux_client as client;
pub use mux_server as server;
pub use mux_subframe as subframe;
pub use mux_wire as wire;
pub use telemetry_log as telemetry;

/// The types most callers need, re-exported flat.
pub mod prelude {
    pub use mux_client::{Client, ClientConfig, ClientError, ClientTunnel, TunnelOptions};
    pub use mux_server::{Server, ServerConfig, ServerError, Stats as ServerStats, TunnelStream};
    pub use mux_subframe::{ClientEvent, ErrorCode, RegisterBackend, RegisterReply, RegisterRequest, TunnelBackend, Value};
    pub use mux_wire::{ByteStreamCarrier, CanFdCarrier, CanFdIo, Carrier, CarrierError, Frame, FrameError, BROADCAST_ID};
    pub use telemetry_log::{FlagOverride, Identifier, Item, ItemFilter, LogError, LogReader, LogWriter, ReaderOptions, Record, WriterOptions};
}
