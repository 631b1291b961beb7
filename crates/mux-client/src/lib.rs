//! Client core (§4.D) and client-side tunnel handles (§4.E): the
//! master side of the multiplex protocol.

pub mod client;
pub mod config;
pub mod error;
pub mod queue;
pub mod tunnel;

pub use client::{Client, ReplyItem};
pub use config::{ClientConfig, TunnelOptions};
pub use error::ClientError;
pub use queue::{Nonce, RequestQueue};
pub use tunnel::ClientTunnel;
