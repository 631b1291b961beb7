//! §8 scenarios 5-6: a schema plus two data blocks round-trip through a
//! close/reopen cycle in write order, and `seek` bisects a long log to
//! within the spec's timestamp tolerance.

use std::time::{Duration, SystemTime};

use mplex::telemetry::{FlagOverride, ItemFilter, LogReader, LogWriter, ReaderOptions, WriterOptions};
use tempfile::NamedTempFile;

#[test]
fn log_round_trip_yields_items_in_write_order() {
    let tmp = NamedTempFile::new().unwrap();
    let writer = LogWriter::open(tmp.path(), WriterOptions::default()).unwrap();
    let id = writer.allocate_id("strings");
    writer.write_schema(id, b"\x0a").unwrap();
    writer.write_data(None, id, b"estdata", FlagOverride::default()).unwrap();
    writer.write_data(None, id, b"estdat2", FlagOverride::default()).unwrap();
    writer.close().unwrap();

    let reader = LogReader::open(tmp.path(), ReaderOptions { verify_checksums: true }).unwrap();
    let items: Vec<_> = reader.items(ItemFilter::default()).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].data, b"estdata");
    assert_eq!(items[1].data, b"estdat2");
    assert!(items[0].timestamp_us <= items[1].timestamp_us);
}

#[test]
fn seek_bisects_a_long_log_within_tolerance() {
    let tmp = NamedTempFile::new().unwrap();
    let options = WriterOptions { seek_block_period: Duration::from_secs(1), ..WriterOptions::default() };
    let writer = LogWriter::open(tmp.path(), options).unwrap();
    let id = writer.allocate_id("tick");

    let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_583_798_400); // 2020-03-10 00:00:00 UTC
    const COUNT: u64 = 10_000;
    for i in 0..COUNT {
        let timestamp = start + Duration::from_secs(i);
        writer.write_data(Some(timestamp), id, &i.to_le_bytes(), FlagOverride::default()).unwrap();
    }
    writer.close().unwrap();

    let reader = LogReader::open(tmp.path(), ReaderOptions::default()).unwrap();
    let start_us = start.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_micros() as i64;

    let at_start = reader.seek(start_us).unwrap();
    let offset = *at_start.get(&id).expect("record has an item at the start timestamp");
    let item = reader
        .items(ItemFilter { start_offset: Some(offset), ..ItemFilter::default() })
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(item.timestamp_us, start_us);

    let before_start = reader.seek(start_us - 1_000).unwrap();
    assert!(before_start.is_empty() || !before_start.contains_key(&id));

    let target_us = start_us + 2_500 * 1_000_000;
    let mid = reader.seek(target_us).unwrap();
    let mid_offset = *mid.get(&id).expect("record has an item near the midpoint");
    let mid_item = reader
        .items(ItemFilter { start_offset: Some(mid_offset), ..ItemFilter::default() })
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    let drift_us = (mid_item.timestamp_us - target_us).abs();
    assert!(drift_us <= 200 * 1_000_000, "seek landed {drift_us} us from the target");
}
