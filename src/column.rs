//! Row-aligned column channels for the transpose run.
//!
//! A [`ColumnRegistry`] owns one [`Column`] per distinct record key and the
//! row counter they all share. Columns are opened lazily, the first time a
//! key shows up, and pad themselves with `nil` for every row they missed:
//!
//! ```text
//! records            column a     column b
//! {"a":1,"b":2}      1            2
//! {"a":3}            3            nil   <- written when b catches up
//! {"b":4,"a":5}      5            4
//! ```
//!
//! Padding happens when a column is written to again (catch-up) and once more
//! when the registry is closed, so every column ends with exactly one slot per
//! record. Close then verifies that count.

use crate::codec::ABSENT;
use crate::error::{Error, Result};
use crate::io::sink::{Sink, SinkFactory, escape_name};
use indexmap::IndexMap;
use std::io::Write;
use tracing::{debug, warn};

const ABSENT_RUN: [u8; 256] = [ABSENT; 256];

/// One output column.
pub struct Column {
    name: String,
    sink: Option<Box<dyn Sink>>,
    /// Slots emitted so far, absent markers included.
    position: u64,
    /// Write calls that reached the sink, counted slot by slot.
    writes: u64,
    absent: u64,
    bytes: u64,
}

impl Column {
    fn new(name: String, sink: Box<dyn Sink>) -> Self {
        Self {
            name,
            sink: Some(sink),
            position: 0,
            writes: 0,
            absent: 0,
            bytes: 0,
        }
    }

    /// Sink name of this column.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slots emitted so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Absent markers emitted so far.
    #[must_use]
    pub fn absent(&self) -> u64 {
        self.absent
    }

    /// Encoded bytes emitted so far, absent markers included.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Store the encoded `value` as the slot of row `row`.
    ///
    /// Rows this column skipped since its last write are filled with the
    /// absent marker first. A second value for the same row (a key repeated
    /// inside one record) is an integrity error.
    ///
    /// # Errors
    /// Integrity error on a repeated row, I/O error if the sink fails.
    pub fn write(&mut self, row: u64, value: &[u8]) -> Result<()> {
        if self.position > row {
            return Err(Error::Integrity {
                column: self.name.clone(),
                slots: self.position + 1,
                rows: row + 1,
            });
        }
        self.catch_up(row)?;
        self.emit(value)?;
        self.position += 1;
        self.writes += 1;
        Ok(())
    }

    fn catch_up(&mut self, rows: u64) -> Result<()> {
        while self.position < rows {
            let missing = usize::try_from(rows - self.position)
                .unwrap_or(usize::MAX)
                .min(ABSENT_RUN.len());
            self.emit(&ABSENT_RUN[..missing])?;
            self.position += missing as u64;
            self.writes += missing as u64;
            self.absent += missing as u64;
        }
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        let sink = self.sink.as_mut().ok_or_else(|| {
            Error::io(
                self.name.clone(),
                std::io::Error::other("column is already closed"),
            )
        })?;
        sink.write_all(bytes)
            .map_err(|e| Error::io(self.name.clone(), e))?;
        self.bytes += bytes.len() as u64;
        Ok(())
    }

    /// Pad up to `rows`, verify the slot count, finish and release the sink.
    ///
    /// The sink is finished even when padding or verification fails. Closing
    /// twice is a no-op.
    fn close(&mut self, rows: u64) -> Result<()> {
        if self.sink.is_none() {
            return Ok(());
        }
        let checked = self.catch_up(rows).and_then(|()| self.verify(rows));
        let released = self.release();
        checked.and(released)
    }

    /// Finish and release the sink as it is, without padding.
    fn release(&mut self) -> Result<()> {
        match self.sink.take() {
            Some(sink) => sink.finish().map_err(|e| Error::io(self.name.clone(), e)),
            None => Ok(()),
        }
    }

    fn verify(&self, rows: u64) -> Result<()> {
        if self.writes != rows {
            return Err(Error::Integrity {
                column: self.name.clone(),
                slots: self.writes,
                rows,
            });
        }
        Ok(())
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.flush();
        }
    }
}

/// Totals over all columns of a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnStats {
    pub columns: usize,
    pub absent: u64,
    pub bytes: u64,
}

/// All columns of one transpose run, keyed by raw key bytes.
pub struct ColumnRegistry<F> {
    sinks: F,
    columns: IndexMap<Vec<u8>, Column>,
    rows: u64,
}

impl<F: SinkFactory> ColumnRegistry<F> {
    pub fn new(sinks: F) -> Self {
        Self {
            sinks,
            columns: IndexMap::new(),
            rows: 0,
        }
    }

    /// Index of the record currently being dispatched, which equals the
    /// number of completed records.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Columns in the order their keys were first seen.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    /// The column for `key`, opened on first sight.
    ///
    /// Lookups borrow `key`; it is copied only when a new column is registered.
    ///
    /// # Errors
    /// I/O error if the sink for a new column cannot be opened.
    pub fn get_or_create(&mut self, key: &[u8]) -> Result<&mut Column> {
        let idx = match self.columns.get_index_of(key) {
            Some(idx) => idx,
            None => {
                let name = escape_name(key);
                let sink = self
                    .sinks
                    .open(&name)
                    .map_err(|e| Error::io(self.sinks.locate(&name), e))?;
                debug!(column = %name, row = self.rows, "opened column");
                self.columns
                    .insert_full(key.to_vec(), Column::new(name, sink))
                    .0
            }
        };
        Ok(&mut self.columns[idx])
    }

    /// Write `value` into the column for `key` at the current row.
    ///
    /// # Errors
    /// See [`ColumnRegistry::get_or_create`] and [`Column::write`].
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let row = self.rows;
        self.get_or_create(key)?.write(row, value)
    }

    /// Mark the current record as complete.
    pub fn advance_row(&mut self) {
        self.rows += 1;
    }

    #[must_use]
    pub fn stats(&self) -> ColumnStats {
        self.columns.values().fold(
            ColumnStats {
                columns: self.columns.len(),
                ..ColumnStats::default()
            },
            |acc, c| ColumnStats {
                absent: acc.absent + c.absent,
                bytes: acc.bytes + c.bytes,
                ..acc
            },
        )
    }

    /// Close every column in registration order.
    ///
    /// A failing column does not stop the others from being closed; the first
    /// error is returned.
    ///
    /// # Errors
    /// The first integrity or I/O error hit while closing.
    pub fn close(&mut self) -> Result<()> {
        let rows = self.rows;
        let mut first = None;
        for column in self.columns.values_mut() {
            match column.close(rows) {
                Ok(()) => debug!(column = %column.name, slots = rows, "closed column"),
                Err(e) if first.is_none() => first = Some(e),
                Err(e) => warn!(column = %column.name, error = %e, "column failed to close"),
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Finish and release every column without padding or verification.
    ///
    /// Used when a run fails partway through a record, where columns are
    /// legitimately out of step with the row counter.
    ///
    /// # Errors
    /// The first I/O error hit while finishing.
    pub fn abandon(&mut self) -> Result<()> {
        let mut first = None;
        for column in self.columns.values_mut() {
            match column.release() {
                Ok(()) => {}
                Err(e) if first.is_none() => first = Some(e),
                Err(e) => warn!(column = %column.name, error = %e, "column failed to finish"),
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySinks;

    #[test]
    fn catch_up_fills_skipped_rows() {
        let sinks = MemorySinks::new();
        let mut registry = ColumnRegistry::new(sinks.clone());
        registry.write(b"a", &[0x01]).unwrap();
        registry.advance_row();
        registry.advance_row();
        registry.write(b"a", &[0x02]).unwrap();
        registry.advance_row();
        registry.close().unwrap();
        assert_eq!(sinks.contents("a").unwrap(), [0x01, ABSENT, 0x02]);
    }

    #[test]
    fn late_column_is_padded_at_both_ends() {
        let sinks = MemorySinks::new();
        let mut registry = ColumnRegistry::new(sinks.clone());
        for _ in 0..300 {
            registry.advance_row();
        }
        registry.write(b"late", &[0x07]).unwrap();
        for _ in 0..2 {
            registry.advance_row();
        }
        registry.close().unwrap();

        let column = sinks.contents("late").unwrap();
        assert_eq!(column.len(), 302);
        assert_eq!(column[300], 0x07);
        assert!(column[..300].iter().all(|&b| b == ABSENT));
        assert_eq!(column[301], ABSENT);
    }

    #[test]
    fn lookups_reuse_the_column() {
        let mut registry = ColumnRegistry::new(MemorySinks::new());
        registry.get_or_create(b"k").unwrap();
        registry.get_or_create(b"k").unwrap();
        registry.get_or_create(b"j").unwrap();
        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.columns().map(Column::name).collect();
        assert_eq!(names, ["k", "j"]);
    }

    #[test]
    fn repeated_key_in_one_record_is_an_integrity_error() {
        let mut registry = ColumnRegistry::new(MemorySinks::new());
        registry.write(b"a", &[0x01]).unwrap();
        let err = registry.write(b"a", &[0x02]).unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn close_reports_first_error_and_closes_the_rest() {
        let sinks = MemorySinks::new().failing_on("bad");
        let mut registry = ColumnRegistry::new(sinks.clone());
        registry.write(b"good", &[0x01]).unwrap();
        // The failing sink buffers until flush.
        registry.write(b"bad", &[0x01]).unwrap();
        registry.write(b"also_good", &[0x01]).unwrap();
        registry.advance_row();

        let err = registry.close().unwrap_err();
        assert!(matches!(err, Error::Io { ref target, .. } if target == "bad"));
        assert_eq!(sinks.flushed("good"), Some(true));
        assert_eq!(sinks.flushed("also_good"), Some(true));
    }

    #[test]
    fn abandon_flushes_without_padding() {
        let sinks = MemorySinks::new();
        let mut registry = ColumnRegistry::new(sinks.clone());
        registry.write(b"a", &[0x01]).unwrap();
        registry.advance_row();
        registry.write(b"b", &[0x02]).unwrap();
        registry.abandon().unwrap();

        assert_eq!(sinks.contents("b").unwrap(), [ABSENT, 0x02]);
        assert_eq!(sinks.contents("a").unwrap(), [0x01]);
        assert_eq!(sinks.flushed("a"), Some(true));
        // Already released.
        registry.close().unwrap();
    }

    #[test]
    fn stats_sum_columns() {
        let mut registry = ColumnRegistry::new(MemorySinks::new());
        registry.write(b"a", &[0x01]).unwrap();
        registry.advance_row();
        registry.write(b"b", &[0xa1, b'x']).unwrap();
        registry.advance_row();
        registry.close().unwrap();
        assert_eq!(
            registry.stats(),
            ColumnStats {
                columns: 2,
                absent: 2,
                bytes: 5,
            }
        );
    }
}
