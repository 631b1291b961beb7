//! Append-only telemetry log writer (§4.F).
//!
//! Grounded on `mjlib::telemetry::FileWriter`
//! (`original_source/mjlib/telemetry/file_writer.cc`): block assembly,
//! previous-offset bookkeeping, periodic seek markers, and the trailing
//! index. The background-thread/reclaimed-buffer handoff is the
//! idiomatic-Rust rendering of `ThreadWriter` using `std::sync::mpsc`
//! instead of a hand-rolled queue, matching the way `rusty-timer`
//! isolates blocking I/O on its own thread behind a channel.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use mux_wire::crc::crc32_ieee;
use mux_wire::varint::write_varuint;

use crate::error::LogError;
use crate::format::{data_flags, BlockType, Identifier, HEADER_MAGIC, INDEX_SIGNATURE, SEEK_MARKER_CONSTANT};

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// When `true`, `write_data` blocks the caller until queue space frees
    /// up. When `false`, a full queue drops the block and the loss is
    /// reported back through `dropped_blocks()`.
    pub blocking: bool,
    pub write_index_on_close: bool,
    pub previous_offsets: bool,
    pub checksum: bool,
    pub compression: bool,
    pub seek_block_period: Duration,
    pub queue_capacity: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            blocking: true,
            write_index_on_close: true,
            previous_offsets: true,
            checksum: true,
            compression: false,
            seek_block_period: Duration::from_secs(10),
            queue_capacity: 256,
        }
    }
}

/// Per-write override of the writer-global checksum/compression defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlagOverride {
    pub checksum: Option<bool>,
    pub compression: Option<bool>,
}

struct SchemaEntry {
    name: String,
    schema_position: u64,
    last_position: Option<u64>,
    schema_bytes: Option<Vec<u8>>,
}

struct Shared {
    names: Mutex<HashMap<String, Identifier>>,
    schemas: Mutex<HashMap<Identifier, SchemaEntry>>,
    next_id: AtomicU64,
    position: AtomicU64,
    last_timestamp_us: AtomicI64,
    dropped_blocks: AtomicU64,
}

enum Msg {
    Data(Vec<u8>),
    Flush(mpsc::SyncSender<()>),
}

/// A telemetry log under construction.
///
/// `W` is the sink handed to the background writer thread; `open` wraps
/// a `std::fs::File`, `new` accepts any `Write + Send + 'static` so tests
/// can target an in-memory buffer.
pub struct LogWriter {
    shared: Arc<Shared>,
    tx: SyncSender<Msg>,
    pool: Arc<Mutex<Vec<Vec<u8>>>>,
    options: WriterOptions,
    last_seek_emit: Mutex<Instant>,
    join: Option<JoinHandle<()>>,
}

impl LogWriter {
    pub fn open(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self, LogError> {
        let file = File::create(path)?;
        Ok(Self::new(file, options))
    }

    pub fn new<W: Write + Send + 'static>(sink: W, options: WriterOptions) -> Self {
        let (tx, rx) = mpsc::sync_channel(options.queue_capacity.max(1));
        let pool = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::new(Shared {
            names: Mutex::new(HashMap::new()),
            schemas: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            position: AtomicU64::new(0),
            last_timestamp_us: AtomicI64::new(-1),
            dropped_blocks: AtomicU64::new(0),
        });

        let join = std::thread::Builder::new()
            .name("telemetry-log-writer".into())
            .spawn({
                let pool = pool.clone();
                move || run_writer_thread(sink, rx, pool)
            })
            .expect("spawning the telemetry writer thread");

        let writer = LogWriter {
            shared,
            tx,
            pool,
            options,
            last_seek_emit: Mutex::new(Instant::now()),
            join: Some(join),
        };
        writer.write_header();
        writer
    }

    /// Re-point the log at a new sink, re-emitting the file header and
    /// every schema already registered (§4.F `open`).
    pub fn reopen<W: Write + Send + 'static>(&mut self, sink: W) -> Result<(), LogError> {
        self.flush()?;
        self.shutdown();

        let (tx, rx) = mpsc::sync_channel(self.options.queue_capacity.max(1));
        let pool = self.pool.clone();
        self.join = Some(
            std::thread::Builder::new()
                .name("telemetry-log-writer".into())
                .spawn(move || run_writer_thread(sink, rx, pool))
                .expect("spawning the telemetry writer thread"),
        );
        self.tx = tx;
        self.shared.position.store(0, Ordering::Release);
        self.write_header();
        let schemas: Vec<(Identifier, String, Vec<u8>)> = {
            let table = self.shared.schemas.lock().unwrap();
            table
                .iter()
                .filter_map(|(id, entry)| entry.schema_bytes.clone().map(|bytes| (*id, entry.name.clone(), bytes)))
                .collect()
        };
        for (id, name, bytes) in schemas {
            self.emit_schema_block(id, &name, &bytes)?;
        }
        Ok(())
    }

    pub fn allocate_id(&self, name: &str) -> Identifier {
        let mut names = self.shared.names.lock().unwrap();
        if let Some(existing) = names.get(name) {
            return *existing;
        }
        let mut schemas = self.shared.schemas.lock().unwrap();
        let id = loop {
            let candidate = self.shared.next_id.fetch_add(1, Ordering::AcqRel);
            if !schemas.contains_key(&candidate) {
                break candidate;
            }
        };
        names.insert(name.to_string(), id);
        schemas.insert(
            id,
            SchemaEntry { name: name.to_string(), schema_position: 0, last_position: None, schema_bytes: None },
        );
        id
    }

    pub fn reserve_id(&self, name: &str, id: Identifier) -> Result<bool, LogError> {
        let mut names = self.shared.names.lock().unwrap();
        if let Some(existing) = names.get(name) {
            if *existing == id {
                return Ok(true);
            }
            return Err(LogError::DuplicateName { name: name.to_string() });
        }
        let mut schemas = self.shared.schemas.lock().unwrap();
        if schemas.contains_key(&id) {
            return Ok(false);
        }
        names.insert(name.to_string(), id);
        schemas.insert(
            id,
            SchemaEntry { name: name.to_string(), schema_position: 0, last_position: None, schema_bytes: None },
        );
        Ok(true)
    }

    pub fn write_schema(&self, id: Identifier, raw_schema: &[u8]) -> Result<(), LogError> {
        let name = {
            let schemas = self.shared.schemas.lock().unwrap();
            schemas.get(&id).map(|e| e.name.clone())
        };
        let name = name.ok_or(LogError::UnknownIdentifier(id))?;
        self.emit_schema_block(id, &name, raw_schema)
    }

    pub fn write_data(
        &self,
        timestamp: Option<SystemTime>,
        id: Identifier,
        payload: &[u8],
        flags_override: FlagOverride,
    ) -> Result<(), LogError> {
        if !self.shared.schemas.lock().unwrap().contains_key(&id) {
            return Err(LogError::UnknownIdentifier(id));
        }

        let checksum = flags_override.checksum.unwrap_or(self.options.checksum);
        let compression = flags_override.compression.unwrap_or(self.options.compression);
        let timestamp_us = timestamp.map(to_micros).unwrap_or_else(now_micros);

        let previous = self.shared.last_timestamp_us.swap(timestamp_us, Ordering::AcqRel);
        if previous >= 0 && timestamp_us < previous {
            tracing::warn!(previous, timestamp_us, "telemetry timestamp went backwards");
        }

        let position = self.shared.position.load(Ordering::Acquire);
        let previous_offset = {
            let schemas = self.shared.schemas.lock().unwrap();
            schemas.get(&id).and_then(|e| e.last_position).map(|lp| position - lp).unwrap_or(0)
        };

        let payload_bytes = if compression {
            snap::raw::Encoder::new().compress_vec(payload).map_err(LogError::Decompress)?
        } else {
            payload.to_vec()
        };

        let mut flags = data_flags::TIMESTAMP;
        if self.options.previous_offsets {
            flags |= data_flags::PREVIOUS_OFFSET;
        }
        if checksum {
            flags |= data_flags::CHECKSUM;
        }
        if compression {
            flags |= data_flags::SNAPPY;
        }

        let mut body = Vec::with_capacity(payload_bytes.len() + 32);
        write_varuint(&mut body, id);
        write_varuint(&mut body, flags);
        if flags & data_flags::PREVIOUS_OFFSET != 0 {
            write_varuint(&mut body, previous_offset);
        }
        if flags & data_flags::TIMESTAMP != 0 {
            body.extend_from_slice(&timestamp_us.to_le_bytes());
        }
        let crc_offset = if flags & data_flags::CHECKSUM != 0 {
            let offset = body.len();
            body.extend_from_slice(&[0u8; 4]);
            Some(offset)
        } else {
            None
        };
        body.extend_from_slice(&payload_bytes);

        let mut block = assemble_block(BlockType::Data, &body);
        if let Some(offset_in_body) = crc_offset {
            patch_crc(&mut block, body.len(), offset_in_body);
        }

        let block_len = block.len() as u64;
        self.enqueue(block)?;
        self.shared.position.fetch_add(block_len, Ordering::AcqRel);
        {
            let mut schemas = self.shared.schemas.lock().unwrap();
            if let Some(entry) = schemas.get_mut(&id) {
                entry.last_position = Some(position);
            }
        }

        self.maybe_emit_seek_marker()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), LogError> {
        let (ack_tx, ack_rx) = mpsc::sync_channel(0);
        self.tx.send(Msg::Flush(ack_tx)).map_err(|_| LogError::WriterStopped("channel closed".into()))?;
        ack_rx.recv().map_err(|_| LogError::WriterStopped("writer thread exited before flushing".into()))
    }

    pub fn close(mut self) -> Result<(), LogError> {
        if self.options.write_index_on_close {
            self.write_index()?;
        }
        self.flush()?;
        self.shutdown();
        Ok(())
    }

    /// Number of data/schema blocks silently dropped because the queue
    /// was full in non-blocking mode.
    pub fn dropped_blocks(&self) -> u64 {
        self.shared.dropped_blocks.load(Ordering::Relaxed)
    }

    fn shutdown(&mut self) {
        let (dead_tx, _dead_rx) = mpsc::sync_channel(1);
        self.tx = dead_tx;
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }

    fn write_header(&self) {
        let mut header = Vec::with_capacity(HEADER_MAGIC.len() + 1);
        header.extend_from_slice(HEADER_MAGIC);
        write_varuint(&mut header, 0);
        let len = header.len() as u64;
        let _ = self.enqueue(header);
        self.shared.position.fetch_add(len, Ordering::AcqRel);
    }

    fn emit_schema_block(&self, id: Identifier, name: &str, raw_schema: &[u8]) -> Result<(), LogError> {
        let mut body = Vec::with_capacity(raw_schema.len() + name.len() + 16);
        write_varuint(&mut body, id);
        write_varuint(&mut body, 0);
        write_varuint(&mut body, name.len() as u64);
        body.extend_from_slice(name.as_bytes());
        body.extend_from_slice(raw_schema);

        let block = assemble_block(BlockType::Schema, &body);
        let block_len = block.len() as u64;
        let position = self.shared.position.load(Ordering::Acquire);
        self.enqueue(block)?;
        self.shared.position.fetch_add(block_len, Ordering::AcqRel);

        let mut schemas = self.shared.schemas.lock().unwrap();
        let entry = schemas.entry(id).or_insert_with(|| SchemaEntry {
            name: name.to_string(),
            schema_position: position,
            last_position: None,
            schema_bytes: None,
        });
        entry.schema_position = position;
        entry.schema_bytes = Some(raw_schema.to_vec());
        Ok(())
    }

    fn maybe_emit_seek_marker(&self) -> Result<(), LogError> {
        let mut last = self.last_seek_emit.lock().unwrap();
        if last.elapsed() < self.options.seek_block_period {
            return Ok(());
        }
        *last = Instant::now();
        drop(last);

        let position = self.shared.position.load(Ordering::Acquire);
        let live: Vec<(Identifier, u64)> = {
            let schemas = self.shared.schemas.lock().unwrap();
            schemas.iter().filter_map(|(id, e)| e.last_position.map(|lp| (*id, lp))).collect()
        };

        let mut body = Vec::new();
        body.extend_from_slice(&SEEK_MARKER_CONSTANT.to_le_bytes());
        let crc_offset = body.len();
        body.extend_from_slice(&[0u8; 4]);
        let header_size_offset = body.len();
        body.push(0u8);
        write_varuint(&mut body, 0);
        body.extend_from_slice(&now_micros().to_le_bytes());
        write_varuint(&mut body, live.len() as u64);
        for (id, last_position) in live {
            write_varuint(&mut body, id);
            write_varuint(&mut body, position - last_position);
        }

        let mut block = assemble_block(BlockType::SeekMarker, &body);
        let header_len = block.len() - body.len();
        block[header_len + header_size_offset] = header_len as u8;
        patch_crc(&mut block, body.len(), crc_offset);

        let block_len = block.len() as u64;
        self.enqueue(block)?;
        self.shared.position.fetch_add(block_len, Ordering::AcqRel);
        Ok(())
    }

    fn write_index(&self) -> Result<(), LogError> {
        let entries: Vec<(Identifier, u64, u64)> = {
            let schemas = self.shared.schemas.lock().unwrap();
            schemas
                .iter()
                .map(|(id, e)| (*id, e.schema_position, e.last_position.unwrap_or(0)))
                .collect()
        };

        let mut body = Vec::new();
        write_varuint(&mut body, 0);
        write_varuint(&mut body, entries.len() as u64);
        for (id, schema_position, last_position) in entries {
            write_varuint(&mut body, id);
            body.extend_from_slice(&schema_position.to_le_bytes());
            body.extend_from_slice(&last_position.to_le_bytes());
        }

        let mut block = assemble_block(BlockType::Index, &body);
        let trailing_size = (block.len() + 4 + INDEX_SIGNATURE.len()) as u32;
        block.extend_from_slice(&trailing_size.to_le_bytes());
        block.extend_from_slice(INDEX_SIGNATURE);

        let block_len = block.len() as u64;
        self.enqueue(block)?;
        self.shared.position.fetch_add(block_len, Ordering::AcqRel);
        Ok(())
    }

    fn enqueue(&self, block: Vec<u8>) -> Result<(), LogError> {
        if self.options.blocking {
            self.tx.send(Msg::Data(block)).map_err(|_| LogError::WriterStopped("channel closed".into()))
        } else {
            match self.tx.try_send(Msg::Data(block)) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.shared.dropped_blocks.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("telemetry log queue full, dropping block");
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(LogError::WriterStopped("channel closed".into())),
            }
        }
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_writer_thread<W: Write>(mut sink: W, rx: Receiver<Msg>, pool: Arc<Mutex<Vec<Vec<u8>>>>) {
    const MAX_POOLED_BUFFERS: usize = 64;
    let mut poisoned = false;
    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::Data(mut buf) => {
                if !poisoned {
                    if let Err(error) = sink.write_all(&buf) {
                        tracing::error!(%error, "telemetry log writer thread failed");
                        poisoned = true;
                    }
                }
                buf.clear();
                let mut pool = pool.lock().unwrap();
                if pool.len() < MAX_POOLED_BUFFERS {
                    pool.push(buf);
                }
            }
            Msg::Flush(ack) => {
                if !poisoned {
                    let _ = sink.flush();
                }
                let _ = ack.send(());
            }
        }
    }
    let _ = sink.flush();
}

fn assemble_block(block_type: BlockType, body: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(body.len() + 2 * mux_wire::varint::MAX_VARUINT_SIZE);
    write_varuint(&mut block, block_type.tag());
    write_varuint(&mut block, body.len() as u64);
    block.extend_from_slice(body);
    block
}

fn patch_crc(block: &mut [u8], body_len: usize, offset_in_body: usize) {
    let header_len = block.len() - body_len;
    let crc_offset = header_len + offset_in_body;
    let crc = crc32_ieee(block);
    block[crc_offset..crc_offset + 4].copy_from_slice(&crc.to_le_bytes());
}

fn to_micros(timestamp: SystemTime) -> i64 {
    timestamp.duration_since(UNIX_EPOCH).map(|d| d.as_micros() as i64).unwrap_or(0)
}

fn now_micros() -> i64 {
    to_micros(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc as StdArc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct SharedBuf(StdArc<StdMutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn header_is_written_immediately_on_open() {
        let sink = SharedBuf::default();
        let writer = LogWriter::new(sink.clone(), WriterOptions::default());
        writer.flush().unwrap();
        let bytes = sink.0.lock().unwrap().clone();
        assert_eq!(&bytes[..8], HEADER_MAGIC);
        assert_eq!(bytes[8], 0);
    }

    #[test]
    fn schema_then_data_round_trips_through_the_block_framing() {
        let sink = SharedBuf::default();
        let writer = LogWriter::new(sink.clone(), WriterOptions { compression: false, ..WriterOptions::default() });
        let id = writer.allocate_id("accel");
        writer.write_schema(id, b"struct{x:f32}").unwrap();
        writer.write_data(None, id, b"\x01\x02\x03\x04", FlagOverride::default()).unwrap();
        writer.flush().unwrap();

        let bytes = sink.0.lock().unwrap().clone();
        let mut cursor = &bytes[9..];
        let (block_type, n) = mux_wire::varint::read_varuint(cursor).unwrap();
        cursor = &cursor[n..];
        assert_eq!(block_type, BlockType::Schema.tag());
        let (size, n) = mux_wire::varint::read_varuint(cursor).unwrap();
        cursor = &cursor[n..];
        cursor = &cursor[size as usize..];

        let (block_type, n) = mux_wire::varint::read_varuint(cursor).unwrap();
        cursor = &cursor[n..];
        assert_eq!(block_type, BlockType::Data.tag());
        let _ = Cursor::new(cursor);
    }

    #[test]
    fn reserve_id_is_idempotent_for_the_same_pair_but_rejects_reuse() {
        let sink = SharedBuf::default();
        let writer = LogWriter::new(sink, WriterOptions::default());
        assert_eq!(writer.reserve_id("gyro", 5).unwrap(), true);
        assert_eq!(writer.reserve_id("gyro", 5).unwrap(), true);
        assert_eq!(writer.reserve_id("other", 5).unwrap(), false);
        assert!(writer.reserve_id("gyro", 6).is_err());
    }

    #[test]
    fn close_appends_a_trailing_index_with_the_signature() {
        let sink = SharedBuf::default();
        let writer = LogWriter::new(sink.clone(), WriterOptions::default());
        let id = writer.allocate_id("temp");
        writer.write_schema(id, b"f32").unwrap();
        writer.write_data(None, id, b"\x00\x00\x80\x3f", FlagOverride::default()).unwrap();
        writer.close().unwrap();

        let bytes = sink.0.lock().unwrap().clone();
        assert_eq!(&bytes[bytes.len() - 8..], INDEX_SIGNATURE);
    }
}
