use thiserror::Error;

use mux_wire::CarrierError;

use crate::tunnel::MakeTunnelError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server id {0} exceeds the 7-bit address space")]
    IdOutOfRange(u8),
    #[error(transparent)]
    MakeTunnel(#[from] MakeTunnelError),
    #[error(transparent)]
    Carrier(#[from] CarrierError),
}
