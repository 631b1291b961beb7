//! Rolling server statistics (§3 "Server").

use mux_subframe::EngineStats;

/// Counters accumulated over the lifetime of a `Server`. Cheap to clone;
/// read with `Server::stats()` for diagnostics/export, never reset except
/// by recreating the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub checksum_errors: u64,
    pub wrong_id_frames: u64,
    pub malformed_subframe: u64,
    pub unknown_subframe: u64,
    pub receive_overrun: u64,
    pub write_errors: u64,
}

impl Stats {
    pub(crate) fn absorb_engine(&mut self, delta: EngineStats) {
        self.malformed_subframe += delta.malformed_subframe;
        self.unknown_subframe += delta.unknown_subframe;
        self.receive_overrun += delta.receive_overrun;
    }
}
