//! Raw record shards for the shard run.
//!
//! Records are routed by a partition id taken from the value of one field:
//! the first `N` bytes of the value (or all of it), with every `/` replaced
//! by `_`. Each [`Shard`] receives complete records exactly as they were
//! encoded in the input.

use crate::error::{Error, Result};
use crate::io::sink::{Sink, SinkFactory, escape_name};
use indexmap::IndexMap;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use tracing::{debug, warn};

/// How much of the shard key's value makes up the partition id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Prefix {
    /// The whole value.
    All,
    /// At most this many leading bytes.
    Bytes(usize),
}

impl Prefix {
    /// Interpret the `nbyte` setting: `-1` keeps the whole value, other
    /// negative numbers are rejected.
    ///
    /// # Errors
    /// Returns a message for values below `-1`.
    pub fn from_nbyte(nbyte: i64) -> std::result::Result<Self, String> {
        match nbyte {
            -1 => Ok(Self::All),
            n if n < 0 => Err(format!("nbyte must be -1 or a non-negative count, got {n}")),
            n => usize::try_from(n)
                .map(Self::Bytes)
                .map_err(|_| format!("nbyte {n} is too large")),
        }
    }
}

impl Default for Prefix {
    fn default() -> Self {
        Self::Bytes(4)
    }
}

impl FromStr for Prefix {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let n: i64 = s
            .trim()
            .parse()
            .map_err(|e| format!("invalid nbyte {s:?}: {e}"))?;
        Self::from_nbyte(n)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "-1"),
            Self::Bytes(n) => write!(f, "{n}"),
        }
    }
}

/// Partition id for a shard key value.
///
/// Truncation past the end of the value keeps the whole value. The value is
/// only copied when it contains a `/`.
#[must_use]
pub fn partition_id(value: &[u8], prefix: Prefix) -> Cow<'_, [u8]> {
    let id = match prefix {
        Prefix::All => value,
        Prefix::Bytes(n) => &value[..n.min(value.len())],
    };
    if id.contains(&b'/') {
        Cow::Owned(
            id.iter()
                .map(|&b| if b == b'/' { b'_' } else { b })
                .collect(),
        )
    } else {
        Cow::Borrowed(id)
    }
}

/// One output shard.
pub struct Shard {
    name: String,
    sink: Option<Box<dyn Sink>>,
    records: u64,
    bytes: u64,
}

impl Shard {
    fn new(name: String, sink: Box<dyn Sink>) -> Self {
        Self {
            name,
            sink: Some(sink),
            records: 0,
            bytes: 0,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records written so far.
    #[must_use]
    pub fn records(&self) -> u64 {
        self.records
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Append one record's raw encoding.
    ///
    /// # Errors
    /// I/O error if the sink fails or the shard is closed.
    pub fn write(&mut self, raw: &[u8]) -> Result<()> {
        let sink = self.sink.as_mut().ok_or_else(|| {
            Error::io(
                self.name.clone(),
                std::io::Error::other("shard is already closed"),
            )
        })?;
        sink.write_all(raw)
            .map_err(|e| Error::io(self.name.clone(), e))?;
        self.records += 1;
        self.bytes += raw.len() as u64;
        Ok(())
    }

    /// Finish and release the sink. Closing twice is a no-op.
    fn close(&mut self) -> Result<()> {
        let Some(sink) = self.sink.take() else {
            return Ok(());
        };
        sink.finish().map_err(|e| Error::io(self.name.clone(), e))
    }
}

impl Drop for Shard {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.flush();
        }
    }
}

/// Totals over all shards of a registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardStats {
    pub shards: usize,
    pub records: u64,
    pub bytes: u64,
}

/// All shards of one shard run, keyed by partition id.
pub struct ShardRegistry<F> {
    sinks: F,
    shards: IndexMap<Vec<u8>, Shard>,
}

impl<F: SinkFactory> ShardRegistry<F> {
    pub fn new(sinks: F) -> Self {
        Self {
            sinks,
            shards: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Shards in the order their ids were first seen.
    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.shards.values()
    }

    /// Position of the shard for `id`, opening it on first sight.
    ///
    /// `id` must already be a partition id (see [`partition_id`]).
    ///
    /// # Errors
    /// I/O error if the sink for a new shard cannot be opened.
    pub fn resolve(&mut self, id: &[u8]) -> Result<usize> {
        if let Some(idx) = self.shards.get_index_of(id) {
            return Ok(idx);
        }
        let name = escape_name(id);
        let sink = self
            .sinks
            .open(&name)
            .map_err(|e| Error::io(self.sinks.locate(&name), e))?;
        debug!(shard = %name, "opened shard");
        Ok(self.shards.insert_full(id.to_vec(), Shard::new(name, sink)).0)
    }

    /// The shard for `id`, opened on first sight.
    ///
    /// # Errors
    /// See [`ShardRegistry::resolve`].
    pub fn get_or_create(&mut self, id: &[u8]) -> Result<&mut Shard> {
        let idx = self.resolve(id)?;
        Ok(&mut self.shards[idx])
    }

    /// The shard at a position returned by [`ShardRegistry::resolve`].
    pub fn get_index_mut(&mut self, idx: usize) -> Option<&mut Shard> {
        self.shards.get_index_mut(idx).map(|(_, shard)| shard)
    }

    #[must_use]
    pub fn stats(&self) -> ShardStats {
        self.shards.values().fold(
            ShardStats {
                shards: self.shards.len(),
                ..ShardStats::default()
            },
            |acc, s| ShardStats {
                records: acc.records + s.records,
                bytes: acc.bytes + s.bytes,
                ..acc
            },
        )
    }

    /// Close every shard in registration order, returning the first error.
    ///
    /// # Errors
    /// The first I/O error hit while closing.
    pub fn close(&mut self) -> Result<()> {
        let mut first = None;
        for shard in self.shards.values_mut() {
            match shard.close() {
                Ok(()) => debug!(shard = %shard.name, records = shard.records, "closed shard"),
                Err(e) if first.is_none() => first = Some(e),
                Err(e) => warn!(shard = %shard.name, error = %e, "shard failed to close"),
            }
        }
        first.map_or(Ok(()), Err)
    }
}
