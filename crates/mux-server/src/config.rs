use std::time::Duration;

use mux_wire::{DEFAULT_MAX_PAYLOAD, MAX_FRAME_OVERHEAD};

/// Server construction options (§4.C).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// This server's address, `0..=126` (127 is reserved for broadcast).
    pub id: u8,
    /// Number of tunnel endpoints available to `make_tunnel`.
    pub tunnel_pool_size: usize,
    /// How long `start()`'s receive loop waits for a frame before
    /// looping again to re-check for shutdown; not part of the wire
    /// protocol, purely a liveness knob.
    pub recv_idle_timeout: Duration,
    /// Budget for an assembled response payload, already reduced by the
    /// outer frame's sentinel/addressing/size/CRC overhead (§4.B).
    pub response_capacity: usize,
}

impl ServerConfig {
    pub fn new(id: u8) -> Self {
        ServerConfig {
            id,
            tunnel_pool_size: 4,
            recv_idle_timeout: Duration::from_millis(500),
            response_capacity: DEFAULT_MAX_PAYLOAD - MAX_FRAME_OVERHEAD,
        }
    }
}
