//! Random-access and streaming reader for logs written by [`crate::writer`]
//! (§4.G).
//!
//! Grounded on `mjlib::telemetry::FileReader`
//! (`original_source/mjlib/telemetry/file_reader.cc`): `MaybeProcessIndex`
//! (trailing-index fast path), `FindSeekMarker`/`EvaluateSeekMarker`
//! (signature scan + CRC-verified acceptance), and `Seek` (bisection over
//! seek markers, falling back to a linear scan of the final bracket).

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use mux_wire::crc::crc32_ieee;
use mux_wire::varint::{read_varuint, MAX_VARUINT_SIZE};

use crate::error::LogError;
use crate::format::{data_flags, BlockType, Identifier, HEADER_MAGIC, INDEX_SIGNATURE, SEEK_MARKER_CONSTANT};

#[derive(Debug, Clone)]
pub struct Record {
    pub id: Identifier,
    pub name: String,
    pub schema: Vec<u8>,
    pub schema_position: u64,
}

#[derive(Debug, Clone)]
pub struct Item {
    pub index: u64,
    pub offset: u64,
    pub timestamp_us: i64,
    pub id: Identifier,
    pub flags: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub name: Option<String>,
    pub start_offset: Option<u64>,
    pub end_offset: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReaderOptions {
    pub verify_checksums: bool,
}

struct SeekMarkerInfo {
    block_start: u64,
    block_end: u64,
    timestamp_us: i64,
    last_positions: HashMap<Identifier, u64>,
}

pub struct LogReader {
    file: File,
    len: u64,
    start: u64,
    data_end: u64,
    records: Mutex<HashMap<Identifier, Record>>,
    has_index: bool,
    full_scan_done: AtomicBool,
    options: ReaderOptions,
}

impl LogReader {
    pub fn open(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self, LogError> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != HEADER_MAGIC {
            return Err(LogError::BadHeader);
        }
        let mut flag_byte = [0u8; MAX_VARUINT_SIZE];
        let mut consumed = 0usize;
        loop {
            file.read_exact(&mut flag_byte[consumed..consumed + 1])?;
            let done = flag_byte[consumed] & 0x80 == 0;
            consumed += 1;
            if done || consumed >= MAX_VARUINT_SIZE {
                break;
            }
        }
        let start = 8 + consumed as u64;

        let mut reader = LogReader {
            file,
            len,
            start,
            data_end: len,
            records: Mutex::new(HashMap::new()),
            has_index: false,
            full_scan_done: AtomicBool::new(false),
            options,
        };
        reader.try_load_trailing_index()?;
        Ok(reader)
    }

    pub fn records(&self) -> Result<Vec<Record>, LogError> {
        self.ensure_scanned()?;
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }

    pub fn record(&self, name: &str) -> Result<Option<Record>, LogError> {
        if let Some(found) = self.records.lock().unwrap().values().find(|r| r.name == name).cloned() {
            return Ok(Some(found));
        }
        self.ensure_scanned()?;
        Ok(self.records.lock().unwrap().values().find(|r| r.name == name).cloned())
    }

    pub fn items(&self, filter: ItemFilter) -> Result<ItemsIter<'_>, LogError> {
        let start = filter.start_offset.unwrap_or(self.start);
        let end = filter.end_offset.unwrap_or(self.data_end);
        let file = self.file.try_clone()?;
        Ok(ItemsIter { reader: self, file, offset: start, end, filter, index: 0, done: false })
    }

    pub fn final_item(&self) -> Result<Option<Item>, LogError> {
        let mut last = None;
        for item in self.items(ItemFilter::default())? {
            last = Some(item?);
        }
        Ok(last)
    }

    /// Bisect seek markers to find, per record, the offset of the last
    /// data block whose timestamp is `<= target_us` (§4.G).
    pub fn seek(&self, target_us: i64) -> Result<HashMap<Identifier, u64>, LogError> {
        self.ensure_scanned()?;

        const MIN_SPACING: u64 = 1 << 16;
        let mut low = self.start;
        let mut high = self.data_end;
        let mut baseline: HashMap<Identifier, u64> = HashMap::new();
        let mut resume_from = self.start;

        while high.saturating_sub(low) > MIN_SPACING {
            let mid = low + (high - low) / 2;
            match self.find_seek_marker(mid, high)? {
                Some(marker) if marker.timestamp_us <= target_us => {
                    baseline = marker.last_positions;
                    resume_from = marker.block_end;
                    low = marker.block_end;
                }
                Some(marker) => high = marker.block_start,
                None => break,
            }
        }

        let mut last_seen = baseline;
        for item in self.items(ItemFilter { name: None, start_offset: Some(resume_from), end_offset: Some(self.data_end) })? {
            let item = item?;
            if item.timestamp_us > target_us {
                break;
            }
            last_seen.insert(item.id, item.offset);
        }
        Ok(last_seen)
    }

    fn ensure_scanned(&self) -> Result<(), LogError> {
        if self.has_index || self.full_scan_done.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut file = self.file.try_clone()?;
        let mut offset = self.start;
        while offset < self.data_end {
            let Some((block_type, body, block_len, _header_len)) = read_block_at(&mut file, offset)? else { break };
            if block_type == BlockType::Schema {
                if let Some(record) = parse_schema_body(&body, offset) {
                    self.records.lock().unwrap().insert(record.id, record);
                }
            }
            offset += block_len;
        }
        Ok(())
    }

    fn try_load_trailing_index(&mut self) -> Result<(), LogError> {
        if self.len < self.start + 8 {
            return Ok(());
        }
        let mut signature = [0u8; 8];
        self.file.seek(SeekFrom::Start(self.len - 8))?;
        self.file.read_exact(&mut signature)?;
        if &signature != INDEX_SIGNATURE {
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(self.len - 12))?;
        let mut trailer_size_bytes = [0u8; 4];
        self.file.read_exact(&mut trailer_size_bytes)?;
        let trailer_size = u32::from_le_bytes(trailer_size_bytes) as u64;
        if trailer_size == 0 || trailer_size > self.len - self.start {
            return Ok(());
        }

        let index_block_start = self.len - trailer_size;
        let Some((block_type, body, block_len, _header_len)) = read_block_at(&mut self.file, index_block_start)? else {
            return Ok(());
        };
        if block_type != BlockType::Index {
            return Ok(());
        }

        let mut cursor = body.as_slice();
        let Some((_flags, n)) = read_varuint(cursor) else { return Ok(()) };
        cursor = &cursor[n..];
        let Some((count, n)) = read_varuint(cursor) else { return Ok(()) };
        cursor = &cursor[n..];

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let Some((id, n)) = read_varuint(cursor) else { return Ok(()) };
            cursor = &cursor[n..];
            if cursor.len() < 16 {
                return Ok(());
            }
            let schema_position = u64::from_le_bytes(cursor[0..8].try_into().unwrap());
            let last_position = u64::from_le_bytes(cursor[8..16].try_into().unwrap());
            cursor = &cursor[16..];
            entries.push((id, schema_position, last_position));
        }

        let mut records = HashMap::new();
        for (id, schema_position, _last_position) in entries {
            if let Some((BlockType::Schema, schema_body, _, _)) = read_block_at(&mut self.file, schema_position)? {
                if let Some(record) = parse_schema_body(&schema_body, schema_position) {
                    records.insert(id, record);
                }
            }
        }

        self.records = Mutex::new(records);
        self.has_index = true;
        self.full_scan_done.store(true, Ordering::Release);
        self.data_end = index_block_start;
        let _ = block_len;
        Ok(())
    }

    /// Scan `[search_start, search_end)` for the seek-marker signature,
    /// verifying each candidate with a CRC recomputation and tolerating
    /// false positives the way `EvaluateSeekMarker` does.
    fn find_seek_marker(&self, search_start: u64, search_end: u64) -> Result<Option<SeekMarkerInfo>, LogError> {
        if search_end <= search_start {
            return Ok(None);
        }
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(search_start))?;
        let mut buf = vec![0u8; (search_end - search_start) as usize];
        let read = read_best_effort(&mut file, &mut buf)?;
        buf.truncate(read);

        let pattern = SEEK_MARKER_CONSTANT.to_le_bytes();
        let mut scan_from = 0usize;
        while scan_from + 8 <= buf.len() {
            let Some(rel) = find_subslice(&buf[scan_from..], &pattern) else { break };
            let sig_offset = search_start + (scan_from + rel) as u64;
            match self.evaluate_seek_marker(sig_offset) {
                Ok(Some(info)) => return Ok(Some(info)),
                Ok(None) => {}
                Err(e) => return Err(e),
            }
            scan_from += rel + 1;
        }
        Ok(None)
    }

    fn evaluate_seek_marker(&self, sig_offset: u64) -> Result<Option<SeekMarkerInfo>, LogError> {
        if sig_offset < self.start + 13 {
            return Ok(None);
        }
        let mut file = self.file.try_clone()?;

        let mut header_size_byte = [0u8; 1];
        file.seek(SeekFrom::Start(sig_offset + 12))?;
        if file.read_exact(&mut header_size_byte).is_err() {
            return Ok(None);
        }
        let header_len = header_size_byte[0] as u64;
        if header_len == 0 || header_len > 10 || header_len > sig_offset {
            return Ok(None);
        }

        let block_start = sig_offset - header_len;
        let Some((block_type, body, block_len, actual_header_len)) = read_block_at(&mut file, block_start)? else {
            return Ok(None);
        };
        if block_type != BlockType::SeekMarker || body.len() < 13 {
            return Ok(None);
        }
        if actual_header_len != header_len {
            return Ok(None);
        }
        if body[0..8] != SEEK_MARKER_CONSTANT.to_le_bytes() {
            return Ok(None);
        }

        let stored_crc = u32::from_le_bytes(body[8..12].try_into().unwrap());
        let mut block_bytes = read_raw_block(&mut file, block_start, block_len)?;
        let crc_offset = (actual_header_len + 8) as usize;
        block_bytes[crc_offset..crc_offset + 4].fill(0);
        if crc32_ieee(&block_bytes) != stored_crc {
            return Ok(None);
        }

        let mut cursor = &body[13..];
        let Some((_flags, n)) = read_varuint(cursor) else { return Ok(None) };
        cursor = &cursor[n..];
        if cursor.len() < 8 {
            return Ok(None);
        }
        let timestamp_us = i64::from_le_bytes(cursor[0..8].try_into().unwrap());
        cursor = &cursor[8..];
        let Some((count, n)) = read_varuint(cursor) else { return Ok(None) };
        cursor = &cursor[n..];

        let mut last_positions = HashMap::new();
        for _ in 0..count {
            let Some((id, n)) = read_varuint(cursor) else { return Ok(None) };
            cursor = &cursor[n..];
            let Some((previous_offset, n)) = read_varuint(cursor) else { return Ok(None) };
            cursor = &cursor[n..];
            last_positions.insert(id, block_start.saturating_sub(previous_offset));
        }
        if !cursor.is_empty() {
            return Ok(None);
        }

        Ok(Some(SeekMarkerInfo { block_start, block_end: block_start + block_len, timestamp_us, last_positions }))
    }
}

pub struct ItemsIter<'a> {
    reader: &'a LogReader,
    file: File,
    offset: u64,
    end: u64,
    filter: ItemFilter,
    index: u64,
    done: bool,
}

impl<'a> Iterator for ItemsIter<'a> {
    type Item = Result<Item, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.offset >= self.end {
                self.done = true;
                return None;
            }
            let block = match read_block_at(&mut self.file, self.offset) {
                Ok(Some(b)) => b,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let (block_type, body, block_len, header_len) = block;
            let block_offset = self.offset;
            self.offset += block_len;

            match block_type {
                BlockType::Schema => {
                    if let Some(record) = parse_schema_body(&body, block_offset) {
                        self.reader.records.lock().unwrap().insert(record.id, record);
                    }
                }
                BlockType::Data => match parse_data_body(&body) {
                    Ok(Some(parsed)) => {
                        if self.reader.options.verify_checksums {
                            if let Some((offset_in_body, stored)) = parsed.checksum {
                                let mut raw = match read_raw_block(&mut self.file, block_offset, block_len) {
                                    Ok(r) => r,
                                    Err(e) => {
                                        self.done = true;
                                        return Some(Err(e));
                                    }
                                };
                                let crc_offset = (header_len as usize) + offset_in_body;
                                raw[crc_offset..crc_offset + 4].fill(0);
                                if crc32_ieee(&raw) != stored {
                                    self.done = true;
                                    return Some(Err(LogError::ChecksumMismatch { offset: block_offset }));
                                }
                            }
                        }
                        let matches = match &self.filter.name {
                            Some(name) => self
                                .reader
                                .records
                                .lock()
                                .unwrap()
                                .get(&parsed.id)
                                .map(|r| &r.name == name)
                                .unwrap_or(false),
                            None => true,
                        };
                        if matches {
                            let item = Item {
                                index: self.index,
                                offset: block_offset,
                                timestamp_us: parsed.timestamp_us,
                                id: parsed.id,
                                flags: parsed.flags,
                                data: parsed.payload,
                            };
                            self.index += 1;
                            return Some(Ok(item));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                },
                BlockType::SeekMarker | BlockType::Index | BlockType::CompressionDictionary => {}
            }
        }
    }
}

fn parse_schema_body(body: &[u8], position: u64) -> Option<Record> {
    let (id, n) = read_varuint(body)?;
    let mut cursor = &body[n..];
    let (_flags, n) = read_varuint(cursor)?;
    cursor = &cursor[n..];
    let (name_len, n) = read_varuint(cursor)?;
    cursor = &cursor[n..];
    let name_len = name_len as usize;
    if cursor.len() < name_len {
        return None;
    }
    let name = String::from_utf8_lossy(&cursor[..name_len]).into_owned();
    let schema = cursor[name_len..].to_vec();
    Some(Record { id, name, schema, schema_position: position })
}

struct ParsedData {
    id: Identifier,
    timestamp_us: i64,
    flags: u64,
    payload: Vec<u8>,
    /// Offset of the 4-byte CRC field within the block's body, and the
    /// value stored there, present only when the checksum flag is set.
    checksum: Option<(usize, u32)>,
}

fn parse_data_body(body: &[u8]) -> Result<Option<ParsedData>, LogError> {
    let Some((id, n)) = read_varuint(body) else { return Ok(None) };
    let mut cursor = &body[n..];
    let Some((flags, n)) = read_varuint(cursor) else { return Ok(None) };
    cursor = &cursor[n..];

    if flags & data_flags::PREVIOUS_OFFSET != 0 {
        let Some((_previous_offset, n)) = read_varuint(cursor) else { return Ok(None) };
        cursor = &cursor[n..];
    }
    let mut timestamp_us = 0i64;
    if flags & data_flags::TIMESTAMP != 0 {
        if cursor.len() < 8 {
            return Ok(None);
        }
        timestamp_us = i64::from_le_bytes(cursor[0..8].try_into().unwrap());
        cursor = &cursor[8..];
    }
    let checksum = if flags & data_flags::CHECKSUM != 0 {
        if cursor.len() < 4 {
            return Ok(None);
        }
        let offset = body.len() - cursor.len();
        let stored = u32::from_le_bytes(cursor[0..4].try_into().unwrap());
        cursor = &cursor[4..];
        Some((offset, stored))
    } else {
        None
    };

    let payload = if flags & data_flags::SNAPPY != 0 {
        snap::raw::Decoder::new().decompress_vec(cursor)?
    } else {
        cursor.to_vec()
    };
    Ok(Some(ParsedData { id, timestamp_us, flags, payload, checksum }))
}

/// Returns `(block_type, body, block_len, header_len)`, where `header_len`
/// is the byte length of the `varuint(type) | varuint(size)` prefix.
fn read_block_at(file: &mut File, offset: u64) -> Result<Option<(BlockType, Vec<u8>, u64, u64)>, LogError> {
    file.seek(SeekFrom::Start(offset))?;
    let Some(type_tag) = read_varuint_stream(file)? else { return Ok(None) };
    let block_type = BlockType::from_tag(type_tag).ok_or(LogError::UnknownBlockType(type_tag))?;
    let Some(size) = read_varuint_stream(file)? else { return Ok(None) };
    let header_len = file.stream_position()? - offset;
    let mut body = vec![0u8; size as usize];
    file.read_exact(&mut body)?;
    Ok(Some((block_type, body, header_len + size, header_len)))
}

fn read_raw_block(file: &mut File, offset: u64, len: u64) -> Result<Vec<u8>, LogError> {
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = vec![0u8; len as usize];
    file.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_varuint_stream(file: &mut File) -> Result<Option<u64>, LogError> {
    let mut result = 0u64;
    let mut shift = 0u32;
    for i in 0..MAX_VARUINT_SIZE {
        let mut byte = [0u8; 1];
        match file.read(&mut byte)? {
            0 if i == 0 => return Ok(None),
            0 => return Err(LogError::MalformedIndex),
            _ => {}
        }
        result |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(result));
        }
        shift += 7;
    }
    Err(LogError::MalformedIndex)
}

fn read_best_effort(file: &mut File, buf: &mut [u8]) -> Result<usize, LogError> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{FlagOverride, LogWriter, WriterOptions};
    use tempfile::NamedTempFile;

    #[test]
    fn reads_back_schema_and_data_written_earlier() {
        let tmp = NamedTempFile::new().unwrap();
        let writer = LogWriter::open(tmp.path(), WriterOptions::default()).unwrap();
        let id = writer.allocate_id("voltage");
        writer.write_schema(id, b"f32").unwrap();
        writer.write_data(None, id, b"\x00\x00\x80\x3f", FlagOverride::default()).unwrap();
        writer.close().unwrap();

        let reader = LogReader::open(tmp.path(), ReaderOptions { verify_checksums: true }).unwrap();
        let records = reader.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "voltage");

        let items: Vec<Item> = reader.items(ItemFilter::default()).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data, b"\x00\x00\x80\x3f");
    }

    #[test]
    fn trailing_index_is_detected_and_used() {
        let tmp = NamedTempFile::new().unwrap();
        let writer = LogWriter::open(tmp.path(), WriterOptions::default()).unwrap();
        let id = writer.allocate_id("temp");
        writer.write_schema(id, b"f32").unwrap();
        writer.write_data(None, id, b"\x01\x02\x03\x04", FlagOverride::default()).unwrap();
        writer.close().unwrap();

        let reader = LogReader::open(tmp.path(), ReaderOptions::default()).unwrap();
        assert!(reader.has_index);
    }

    #[test]
    fn filters_items_by_record_name() {
        let tmp = NamedTempFile::new().unwrap();
        let writer = LogWriter::open(tmp.path(), WriterOptions::default()).unwrap();
        let a = writer.allocate_id("a");
        let b = writer.allocate_id("b");
        writer.write_schema(a, b"f32").unwrap();
        writer.write_schema(b, b"f32").unwrap();
        writer.write_data(None, a, b"\x01\x00\x00\x00", FlagOverride::default()).unwrap();
        writer.write_data(None, b, b"\x02\x00\x00\x00", FlagOverride::default()).unwrap();
        writer.close().unwrap();

        let reader = LogReader::open(tmp.path(), ReaderOptions::default()).unwrap();
        let items: Vec<Item> = reader
            .items(ItemFilter { name: Some("b".to_string()), ..ItemFilter::default() })
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data, b"\x02\x00\x00\x00");
    }
}
