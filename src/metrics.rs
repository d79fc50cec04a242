//! Run metrics and progress reporting.
//!
//! Every run returns a [`RunMetrics`] describing what it read and wrote. The
//! binary logs it and, with `--metrics <path>`, saves it as JSON:
//!
//! ```json
//! {
//!   "mode": "shard",
//!   "records_read": 4,
//!   "records_written": 3,
//!   "records_dropped": 1,
//!   "channels": 2,
//!   "bytes_written": 97,
//!   "absent_markers": 0,
//!   "elapsed_ms": 1
//! }
//! ```

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

/// Which run produced the metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Transpose,
    Shard,
}

/// Totals of one completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunMetrics {
    pub mode: Mode,
    /// Complete records consumed from the input.
    pub records_read: u64,
    /// Transpose: rows in every column. Shard: records routed to a shard.
    pub records_written: u64,
    /// Shard records without the shard key.
    pub records_dropped: u64,
    /// Columns or shards opened.
    pub channels: usize,
    pub bytes_written: u64,
    /// `nil` slots written for missing keys (transpose only).
    pub absent_markers: u64,
    pub elapsed_ms: u64,
}

impl RunMetrics {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            mode,
            records_read: 0,
            records_written: 0,
            records_dropped: 0,
            channels: 0,
            bytes_written: 0,
            absent_markers: 0,
            elapsed_ms: 0,
        }
    }

    pub(crate) fn finish(mut self, started: Instant) -> Self {
        self.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Metrics as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Log a one-line summary.
    pub fn print(&self) {
        info!(
            mode = ?self.mode,
            records_read = self.records_read,
            records_written = self.records_written,
            records_dropped = self.records_dropped,
            channels = self.channels,
            bytes_written = self.bytes_written,
            elapsed_secs = self.elapsed().as_secs_f64(),
            "run finished"
        );
    }

    /// Save the metrics as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let mut w = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut w, self)
            .with_context(|| format!("serialize metrics to {}", path.display()))?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}

/// Periodic "still going" log lines.
pub(crate) struct Progress {
    every: u64,
    started: Instant,
}

impl Progress {
    pub(crate) fn new(every: u64) -> Self {
        Self {
            every,
            started: Instant::now(),
        }
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    /// Called after each record with the number of records done.
    pub(crate) fn tick(&self, records: u64) {
        if self.every > 0 && records.is_multiple_of(self.every) {
            let secs = self.started.elapsed().as_secs_f64();
            #[allow(clippy::cast_precision_loss)]
            let rate = if secs > 0.0 { records as f64 / secs } else { 0.0 };
            info!(records, records_per_sec = rate.round(), "progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_uses_lowercase_mode() {
        let mut m = RunMetrics::new(Mode::Shard);
        m.records_read = 4;
        m.records_dropped = 1;
        let v = m.to_json();
        assert_eq!(v["mode"], json!("shard"));
        assert_eq!(v["records_read"], json!(4));
        assert_eq!(v["records_dropped"], json!(1));
    }

    #[test]
    fn save_to_file_writes_json() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("metrics.json");
        let mut m = RunMetrics::new(Mode::Transpose);
        m.channels = 3;
        m.save_to_file(&path)?;

        let loaded: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(loaded["channels"], json!(3));
        assert_eq!(loaded["mode"], json!("transpose"));
        Ok(())
    }
}
