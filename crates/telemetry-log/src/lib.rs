//! Telemetry log writer and reader (§4.F/§4.G): an append-only,
//! self-describing binary log with random-access replay.

pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

pub use error::LogError;
pub use format::Identifier;
pub use reader::{Item, ItemFilter, LogReader, ReaderOptions, Record};
pub use writer::{FlagOverride, LogWriter, WriterOptions};
