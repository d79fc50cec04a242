//! MessagePack stream primitives.
//!
//! - [`cursor`] - sequential decoding of maps, keys and raw values
//! - [`tee`] - raw capture of the bytes a decoder consumes

pub mod cursor;
pub mod tee;

pub use cursor::{Cursor, ValueType};
pub use tee::TeeReader;

/// Encoding of `nil`, written into a column slot for a row that lacks the key.
pub const ABSENT: u8 = 0xc0;
