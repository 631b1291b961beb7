use std::time::Duration;

/// Client construction options (§4.D).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// This client's address, used as `source_id` on every request and
    /// matched against `dest_id` when correlating replies.
    pub source_id: u8,
    /// Default per-request reply deadline (§4.D: 15 ms).
    pub default_timeout: Duration,
}

impl ClientConfig {
    pub fn new(source_id: u8) -> Self {
        ClientConfig { source_id, default_timeout: Duration::from_millis(15) }
    }
}

/// Per-tunnel options (§4.D).
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// How long to wait between unsuccessful polls (§4.D: 10 ms default).
    pub poll_period: Duration,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        TunnelOptions { poll_period: Duration::from_millis(10) }
    }
}
