//! The transpose run: one row-aligned column per record key.

use crate::codec::Cursor;
use crate::column::ColumnRegistry;
use crate::config::TransposeConfig;
use crate::error::{Result, first_error};
use crate::io::sink::SinkFactory;
use crate::metrics::{Mode, Progress, RunMetrics};
use std::io::BufRead;
use tracing::{debug, info, warn};

/// Transpose every record of `input` into columns opened through `sinks`.
///
/// Each field's value is copied verbatim into the column named after its
/// key; rows where a key is missing hold `nil`. All columns are closed before
/// returning, also when the run fails, and a successful run guarantees every
/// column has exactly one slot per record.
///
/// # Errors
/// Decode errors for malformed input, I/O errors from the input or a sink,
/// integrity errors for a key repeated inside one record.
pub fn transpose<R, F>(input: R, sinks: F, config: &TransposeConfig) -> Result<RunMetrics>
where
    R: BufRead,
    F: SinkFactory,
{
    let progress = Progress::new(config.progress_every);
    let mut cursor = Cursor::new(input);
    let mut columns = ColumnRegistry::new(sinks);

    let run = pump(&mut cursor, &mut columns, &progress);
    let closed = if run.is_ok() {
        columns.close()
    } else {
        debug!(rows = columns.rows(), offset = cursor.offset(), "abandoning columns");
        columns.abandon()
    };
    if let Err(e) = first_error(run, closed) {
        warn!(records = columns.rows(), columns = columns.len(), "transpose stopped");
        return Err(e);
    }

    let stats = columns.stats();
    let mut metrics = RunMetrics::new(Mode::Transpose);
    metrics.records_read = columns.rows();
    metrics.records_written = columns.rows();
    metrics.channels = stats.columns;
    metrics.bytes_written = stats.bytes;
    metrics.absent_markers = stats.absent;
    info!(
        records = metrics.records_read,
        columns = metrics.channels,
        "transpose complete"
    );
    Ok(metrics.finish(progress.started()))
}

fn pump<R: BufRead, F: SinkFactory>(
    cursor: &mut Cursor<R>,
    columns: &mut ColumnRegistry<F>,
    progress: &Progress,
) -> Result<()> {
    let mut key = Vec::new();
    let mut value = Vec::new();
    while let Some(fields) = cursor.read_map_header()? {
        let row = columns.rows();
        for _ in 0..fields {
            cursor.read_key(&mut key)?;
            let column = columns.get_or_create(&key)?;
            cursor.next_type()?;
            value.clear();
            cursor.read_raw_value(&mut value)?;
            column.write(row, &value)?;
        }
        columns.advance_row();
        progress.tick(columns.rows());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ABSENT;
    use crate::error::Error;
    use crate::testing::{MemorySinks, capture_logs, record, split_values, value};
    use serde_json::json;

    fn run_input(input: &[u8]) -> Result<RunMetrics> {
        transpose(input, MemorySinks::new(), &TransposeConfig::default())
    }

    fn run(records: &[Vec<u8>]) -> (MemorySinks, Result<RunMetrics>) {
        let sinks = MemorySinks::new();
        let input = records.concat();
        let result = transpose(&input[..], sinks.clone(), &TransposeConfig::default());
        (sinks, result)
    }

    #[test]
    fn missing_keys_become_nil() {
        let (sinks, result) = run(&[
            record(&[("a", json!(1)), ("b", json!(2))]),
            record(&[("a", json!(3))]),
            record(&[("b", json!(4)), ("a", json!(5))]),
        ]);
        let metrics = result.unwrap();
        assert_eq!(metrics.records_read, 3);
        assert_eq!(metrics.channels, 2);
        assert_eq!(metrics.absent_markers, 1);

        assert_eq!(sinks.contents("a").unwrap(), [0x01, 0x03, 0x05]);
        assert_eq!(sinks.contents("b").unwrap(), [0x02, ABSENT, 0x04]);
        assert_eq!(sinks.names(), ["a", "b"]);
    }

    #[test]
    fn composite_values_are_copied_verbatim() {
        let nested = json!({"x": [1, "two", null], "y": {"z": 2.5}});
        let (sinks, result) = run(&[record(&[("blob", nested.clone())])]);
        result.unwrap();
        assert_eq!(sinks.contents("blob").unwrap(), value(&nested));
    }

    #[test]
    fn empty_input_opens_nothing() {
        let (sinks, result) = run(&[]);
        let metrics = result.unwrap();
        assert_eq!(metrics.records_read, 0);
        assert!(sinks.names().is_empty());
    }

    #[test]
    fn empty_records_still_count_as_rows() {
        let (sinks, result) = run(&[
            record(&[]),
            record(&[("k", json!("v"))]),
            record(&[]),
        ]);
        assert_eq!(result.unwrap().records_read, 3);
        let slots = split_values(&sinks.contents("k").unwrap()).unwrap();
        assert_eq!(slots, [vec![ABSENT], value(&json!("v")), vec![ABSENT]]);
    }

    #[test]
    fn truncated_record_fails_but_flushes_outputs() {
        let mut input = record(&[("a", json!(1))]);
        let partial = record(&[("a", json!(2)), ("b", json!("long value"))]);
        input.extend_from_slice(&partial[..partial.len() - 3]);

        let sinks = MemorySinks::new();
        let err = transpose(&input[..], sinks.clone(), &TransposeConfig::default()).unwrap_err();
        assert!(err.is_decode(), "{err}");
        assert_eq!(sinks.flushed("a"), Some(true));
        assert_eq!(sinks.flushed("b"), Some(true));
    }

    #[test]
    fn failed_run_logs_records_read() {
        let mut input = [record(&[("a", json!(1))]), record(&[("a", json!(2))])].concat();
        input.push(0x81);
        let (result, logs) = capture_logs(|| run_input(&input));
        assert!(result.is_err());
        assert!(logs.contains("transpose stopped"), "{logs}");
        assert!(logs.contains("records=2"), "{logs}");
    }

    #[test]
    fn repeated_key_is_an_integrity_error() {
        let (_, result) = run(&[record(&[("a", json!(1)), ("a", json!(2))])]);
        assert!(result.unwrap_err().is_integrity());
    }

    #[test]
    fn non_map_record_is_a_decode_error() {
        let sinks = MemorySinks::new();
        let input = value(&json!([1, 2]));
        let err = transpose(&input[..], sinks, &TransposeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Decode { offset: 0, .. }));
    }

    #[test]
    fn close_failure_fails_the_run() {
        let sinks = MemorySinks::new().failing_on("a");
        let input = record(&[("a", json!(1))]);
        let err = transpose(&input[..], sinks, &TransposeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Io { ref target, .. } if target == "a"));
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn unfinished_gzip_trailer_fails_the_run() {
        use crate::io::compression::auto_detect_writer;
        use crate::io::sink::Sink;
        use crate::testing::FullDevice;
        use std::io;

        // Each column gets room for its gzip header and nothing more.
        struct HeaderOnly;
        impl SinkFactory for HeaderOnly {
            fn open(&mut self, name: &str) -> io::Result<Box<dyn Sink>> {
                auto_detect_writer(FullDevice::with_capacity(10), format!("{name}.gz"))
                    .map_err(|e| io::Error::other(format!("{e:#}")))
            }
        }

        let input = record(&[("a", json!(1))]);
        let err = transpose(&input[..], HeaderOnly, &TransposeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Io { ref target, .. } if target == "a"));
    }
}
