//! The shard run: whole records routed by the value of one field.

use crate::codec::{Cursor, TeeReader};
use crate::config::ShardConfig;
use crate::error::{Result, first_error};
use crate::io::sink::SinkFactory;
use crate::metrics::{Mode, Progress, RunMetrics};
use crate::shard::{ShardRegistry, partition_id};
use std::io::BufRead;
use tracing::{info, trace, warn};

/// Route every record of `input` to the shard named after its
/// `config.key` value, copying the record's bytes unchanged.
///
/// Records without the key are dropped and only counted. If the key occurs
/// more than once in a record, its last occurrence decides. All shards are
/// closed before returning, also when the run fails.
///
/// # Errors
/// Decode errors for malformed input or a shard key whose value is not a
/// string, I/O errors from the input or a sink.
pub fn shard<R, F>(input: R, sinks: F, config: &ShardConfig) -> Result<RunMetrics>
where
    R: BufRead,
    F: SinkFactory,
{
    let progress = Progress::new(config.progress_every);
    let mut cursor = Cursor::new(TeeReader::new(input));
    let mut shards = ShardRegistry::new(sinks);
    let mut metrics = RunMetrics::new(Mode::Shard);

    let run = pump(&mut cursor, &mut shards, config, &progress, &mut metrics);
    let closed = shards.close();
    if let Err(e) = first_error(run, closed) {
        warn!(
            records = metrics.records_read,
            shards = shards.len(),
            "shard stopped"
        );
        return Err(e);
    }

    let stats = shards.stats();
    metrics.channels = stats.shards;
    metrics.records_written = stats.records;
    metrics.bytes_written = stats.bytes;
    info!(
        records = metrics.records_read,
        shards = metrics.channels,
        dropped = metrics.records_dropped,
        "shard complete"
    );
    Ok(metrics.finish(progress.started()))
}

fn pump<R: BufRead, F: SinkFactory>(
    cursor: &mut Cursor<TeeReader<R>>,
    shards: &mut ShardRegistry<F>,
    config: &ShardConfig,
    progress: &Progress,
    metrics: &mut RunMetrics,
) -> Result<()> {
    let wanted = config.key.as_bytes();
    let mut key = Vec::new();
    let mut id_value = Vec::new();
    loop {
        cursor.get_mut().clear();
        let Some(fields) = cursor.read_map_header()? else {
            break;
        };
        let mut target = None;
        for _ in 0..fields {
            cursor.read_key(&mut key)?;
            if key == wanted {
                cursor.read_str_bytes(&mut id_value)?;
                let id = partition_id(&id_value, config.prefix);
                target = Some(shards.resolve(&id)?);
            } else {
                cursor.skip()?;
            }
        }

        let raw = cursor.get_ref().captured();
        match target.and_then(|idx| shards.get_index_mut(idx)) {
            Some(shard) => shard.write(raw)?,
            None => {
                trace!(offset = cursor.offset(), "record without shard key dropped");
                metrics.records_dropped += 1;
            }
        }
        metrics.records_read += 1;
        progress.tick(metrics.records_read);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::shard::Prefix;
    use crate::testing::{MemorySinks, capture_logs, record, sample_events, split_values};
    use serde_json::json;

    fn config(key: &str, prefix: Prefix) -> ShardConfig {
        ShardConfig {
            key: key.to_string(),
            prefix,
            ..ShardConfig::default()
        }
    }

    #[test]
    fn records_land_in_prefix_shards() {
        let events = sample_events();
        let sinks = MemorySinks::new();
        let metrics = shard(&events.concat()[..], sinks.clone(), &ShardConfig::default()).unwrap();

        assert_eq!(metrics.records_read, 4);
        assert_eq!(metrics.records_written, 3);
        assert_eq!(metrics.records_dropped, 1);
        assert_eq!(metrics.channels, 2);
        assert_eq!(sinks.names(), ["abcd", "efgh"]);
        assert_eq!(sinks.contents("abcd").unwrap(), events[..2].concat());
        assert_eq!(sinks.contents("efgh").unwrap(), events[2]);
    }

    #[test]
    fn whole_value_with_separator() {
        let input = record(&[("user", json!("a/b"))]);
        let sinks = MemorySinks::new();
        shard(&input[..], sinks.clone(), &config("user", Prefix::All)).unwrap();
        assert_eq!(sinks.contents("a_b").unwrap(), input);
    }

    #[test]
    fn separator_and_underscore_collide() {
        let records = [
            record(&[("k", json!("x/y"))]),
            record(&[("k", json!("x_y"))]),
        ];
        let sinks = MemorySinks::new();
        let metrics = shard(&records.concat()[..], sinks.clone(), &config("k", Prefix::All)).unwrap();
        assert_eq!(metrics.channels, 1);
        assert_eq!(split_values(&sinks.contents("x_y").unwrap()).unwrap(), records);
    }

    #[test]
    fn short_values_keep_their_full_length() {
        let input = record(&[("k", json!("ab"))]);
        let sinks = MemorySinks::new();
        shard(&input[..], sinks.clone(), &config("k", Prefix::Bytes(10))).unwrap();
        assert_eq!(sinks.names(), ["ab"]);
    }

    #[test]
    fn last_occurrence_of_the_key_wins() {
        let input = record(&[("k", json!("first")), ("k", json!("second"))]);
        let sinks = MemorySinks::new();
        let metrics = shard(&input[..], sinks.clone(), &config("k", Prefix::All)).unwrap();
        assert_eq!(metrics.records_written, 1);
        assert_eq!(sinks.contents("second").unwrap(), input);
        assert_eq!(sinks.contents("first").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn non_string_key_value_is_a_decode_error() {
        let input = record(&[("k", json!(42))]);
        let err = shard(&input[..], MemorySinks::new(), &config("k", Prefix::All)).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn truncated_input_flushes_open_shards() {
        let events = sample_events();
        let mut input = events[..2].concat();
        input.extend_from_slice(&events[2][..5]);
        let sinks = MemorySinks::new();
        let err = shard(&input[..], sinks.clone(), &ShardConfig::default()).unwrap_err();
        assert!(err.is_decode());
        assert_eq!(sinks.flushed("abcd"), Some(true));
        assert_eq!(sinks.contents("abcd").unwrap(), events[..2].concat());
    }

    #[test]
    fn failed_run_logs_records_read() {
        let events = sample_events();
        let mut input = events[..3].concat();
        input.extend_from_slice(&events[3][..2]);
        let (result, logs) =
            capture_logs(|| shard(&input[..], MemorySinks::new(), &ShardConfig::default()));
        assert!(result.unwrap_err().is_decode());
        assert!(logs.contains("shard stopped"), "{logs}");
        assert!(logs.contains("records=3"), "{logs}");
        assert!(logs.contains("shards=2"), "{logs}");
    }
}
