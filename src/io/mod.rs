//! Input and output plumbing around the pipelines.
//!
//! - [`input`] - stdin or globbed files as one record stream
//! - [`sink`] - per-channel output writers and file naming
//! - [`compression`] - gzip/zstd detection and wrapping for both directions

pub mod compression;
pub mod input;
pub mod sink;

pub use compression::Compression;
pub use input::open_input;
pub use sink::{DirSinks, Sink, SinkFactory, escape_name};
