//! # msgsplit
//!
//! Streaming reshaping of MessagePack record streams. The input is a sequence
//! of back-to-back maps (records); records are never materialized, only one
//! field is decoded at a time.
//!
//! ## Modes
//!
//! - **Transpose** ([`transpose()`]) - one column per distinct key. Column `k`
//!   holds the value of `k` from every record, in record order, and `nil` for
//!   records without `k`, so all columns have the same length.
//! - **Shard** ([`shard()`]) - records are copied byte for byte into the shard
//!   named after (a prefix of) one field's string value. Records without the
//!   field are dropped.
//!
//! ```
//! use msgsplit::testing::{MemorySinks, record};
//! use msgsplit::{ShardConfig, shard};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let input = [
//!     record(&[("distinct_id", json!("abcd1234"))]),
//!     record(&[("distinct_id", json!("efgh0000"))]),
//!     record(&[("other", json!(1))]),
//! ]
//! .concat();
//! let sinks = MemorySinks::new();
//! let metrics = shard(&input[..], sinks.clone(), &ShardConfig::default())?;
//! assert_eq!(sinks.names(), ["abcd", "efgh"]);
//! assert_eq!(metrics.records_dropped, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Outputs
//!
//! Channels (columns or shards) are opened lazily through a
//! [`SinkFactory`] and closed with [`Sink::finish`], which also completes
//! compressed streams. The binary uses [`DirSinks`], which writes
//! `<dir>/<name>.col.msg` or `<dir>/<name>.shard.msg`, optionally compressed.
//! Every channel is flushed and closed when a run ends, whether it succeeded
//! or not.
//!
//! ## Errors
//!
//! A run fails with the first [`Error`]: malformed input, an I/O failure or
//! a column whose slot count does not match the record count.
//!
//! ## Feature flags
//!
//! - `compression-gzip` (default) - gzip input/output via flate2
//! - `compression-zstd` (default) - zstd input/output

pub mod codec;
pub mod column;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod shard;
pub mod sharding;
pub mod testing;
pub mod transpose;

pub use config::{ShardConfig, TransposeConfig};
pub use error::{DecodeErrorKind, Error, Result};
pub use io::{DirSinks, Sink, SinkFactory};
pub use metrics::RunMetrics;
pub use shard::Prefix;
pub use sharding::shard;
pub use transpose::transpose;
