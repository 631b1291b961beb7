//! Subframe engine (§3, §4.B): the register RPC and tunnel-multiplexing
//! layer carried inside a `mux_wire::Frame` payload.

pub mod engine;
pub mod reply;
pub mod request;
pub mod tag;
pub mod value;

pub use engine::{
    process_payload, EngineStats, ErrorCode, ReadResult, RegisterBackend, TunnelBackend,
    TunnelDeliverResult, ERROR_NO_BACKEND,
};
pub use reply::{parse_response, ClientEvent, RegisterReply};
pub use request::{encode_client_poll_server, encode_client_to_server, RegisterRequest};
pub use value::Value;
