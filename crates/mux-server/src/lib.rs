//! Server core (§4.C) and tunnel endpoints (§4.E): the host side of the
//! multiplex protocol, sitting on top of `mux-wire` and `mux-subframe`.

pub mod config;
pub mod error;
pub mod server;
pub mod stats;
pub mod tunnel;

pub use config::ServerConfig;
pub use error::ServerError;
pub use server::{RawWriter, Server};
pub use stats::Stats;
pub use tunnel::{MakeTunnelError, TunnelError, TunnelStream};
