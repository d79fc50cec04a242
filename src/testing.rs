//! Testing utilities for msgsplit runs.
//!
//! - **Fixtures**: encode records from JSON-like literals, split outputs back
//!   into values ([`record`], [`value`], [`split_values`], [`sample_events`])
//! - **Mock I/O**: an in-memory [`SinkFactory`](crate::io::SinkFactory),
//!   [`MemorySinks`], with optional flush failures, and [`FullDevice`], a
//!   writer that runs out of space
//! - **Logs**: [`capture_logs`] collects what a run logs
//!
//! ```
//! use msgsplit::testing::*;
//! use msgsplit::transpose::transpose;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let input = [record(&[("a", json!(1))]), record(&[("b", json!(2))])].concat();
//! let sinks = MemorySinks::new();
//! let summary = transpose(&input[..], sinks.clone(), &Default::default())?;
//! assert_eq!(summary.records_read, 2);
//! assert_eq!(split_values(&sinks.contents("a").unwrap())?.len(), 2);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod logs;
pub mod mock_io;

pub use fixtures::*;
pub use logs::*;
pub use mock_io::*;
