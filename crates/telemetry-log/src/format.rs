//! Wire constants for the telemetry log file format (§4.F).
//!
//! Grounded on `mjlib::telemetry::Format`
//! (`original_source/mjlib/telemetry/format.h`).

/// 8-byte file header magic, followed by a single varuint flag word (0).
pub const HEADER_MAGIC: &[u8; 8] = b"TLOG0003";

/// Trailing 8-byte signature a reader scans backward for to locate the
/// index block without a forward pass.
pub const INDEX_SIGNATURE: &[u8; 8] = b"TLOGIDEX";

/// Fixed 8-byte constant that opens every seek marker block.
pub const SEEK_MARKER_CONSTANT: u64 = 0xfdca_b9a8_9786_7564;

/// Stable per-record identifier.
pub type Identifier = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Schema,
    Data,
    Index,
    CompressionDictionary,
    SeekMarker,
}

impl BlockType {
    pub fn tag(self) -> u64 {
        match self {
            BlockType::Schema => 1,
            BlockType::Data => 2,
            BlockType::Index => 3,
            BlockType::CompressionDictionary => 4,
            BlockType::SeekMarker => 5,
        }
    }

    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            1 => Some(BlockType::Schema),
            2 => Some(BlockType::Data),
            3 => Some(BlockType::Index),
            4 => Some(BlockType::CompressionDictionary),
            5 => Some(BlockType::SeekMarker),
            _ => None,
        }
    }
}

/// Data block flag bits, in the order their optional fields appear
/// after the identifier+flags header (§4.F).
pub mod data_flags {
    pub const PREVIOUS_OFFSET: u64 = 1 << 0;
    pub const TIMESTAMP: u64 = 1 << 1;
    pub const CHECKSUM: u64 = 1 << 2;
    pub const SNAPPY: u64 = 1 << 4;
}
