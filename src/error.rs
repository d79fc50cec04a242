//! Error types shared by the transpose and shard runs.
//!
//! Every failure of a run ends up as one [`Error`]. The three variants map to
//! the three fatal conditions a run can hit:
//!
//! - [`Error::Decode`] - the input is not a well-formed stream of MessagePack maps
//! - [`Error::Io`] - the input or one of the output sinks failed
//! - [`Error::Integrity`] - a column's slot count disagrees with the row count
//!
//! Dropped records in shard mode are not errors and never show up here.

use std::fmt;
use std::io;
use thiserror::Error;
use tracing::warn;

/// Result alias used across the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A fatal run error.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or truncated input.
    #[error("decode error at input offset {offset}: {kind}")]
    Decode {
        /// Number of input bytes consumed before the failure.
        offset: u64,
        kind: DecodeErrorKind,
    },

    /// Failure reading the input or creating/writing/flushing an output sink.
    #[error("I/O error on {target}")]
    Io {
        /// The input or channel the failure belongs to.
        target: String,
        #[source]
        source: io::Error,
    },

    /// A column holds a different number of slots than the run has rows.
    #[error("integrity violation in column {column:?}: {slots} slots for {rows} rows")]
    Integrity {
        column: String,
        slots: u64,
        rows: u64,
    },
}

impl Error {
    pub(crate) fn io(target: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            target: target.into(),
            source,
        }
    }

    /// `true` for [`Error::Integrity`], which signals broken slot bookkeeping
    /// rather than a problem with the input or the filesystem.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// `true` for [`Error::Decode`].
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

/// Merge the outcome of a run with the outcome of closing its channels.
///
/// The run's own error wins; a close error is only returned when the run
/// succeeded, otherwise it is logged.
pub(crate) fn first_error(run: Result<()>, close: Result<()>) -> Result<()> {
    match (run, close) {
        (Err(e), Err(masked)) => {
            warn!(error = %masked, "closing outputs failed after an earlier error");
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// What exactly was wrong with the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// The stream ended inside a record.
    Truncated,
    /// The reserved marker byte `0xc1` was found.
    ReservedMarker,
    /// A value of one type was found where another was required.
    UnexpectedType {
        expected: &'static str,
        marker: u8,
    },
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "input ends in the middle of a record"),
            Self::ReservedMarker => write!(f, "reserved marker 0xc1"),
            Self::UnexpectedType { expected, marker } => {
                write!(f, "expected {expected}, found marker {marker:#04x}")
            }
        }
    }
}
