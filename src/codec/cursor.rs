//! Sequential MessagePack cursor.
//!
//! [`Cursor`] walks a stream of back-to-back encoded maps without building any
//! in-memory representation of the records. It exposes the handful of
//! primitives the transpose and shard runs need:
//!
//! - [`Cursor::read_map_header`] - start of a record, `None` at a clean end of input
//! - [`Cursor::read_key`] - a map key (str or bin) into a reusable buffer
//! - [`Cursor::next_type`] - the type of the next value, without consuming it
//! - [`Cursor::skip`] - consume the next value
//! - [`Cursor::read_raw_value`] - consume the next value, appending its exact encoding
//! - [`Cursor::read_str_bytes`] - consume a str/bin value, keeping its payload
//!
//! Values are walked iteratively, so deeply nested arrays and maps do not grow
//! the call stack. Markers are interpreted through [`rmp::Marker`]; map and
//! string lengths are decoded by [`rmp::decode`].

use crate::error::{DecodeErrorKind, Error, Result};
use rmp::Marker;
use rmp::decode::{self, ValueReadError};
use std::io::{self, BufRead, Read};

/// Broad type of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    Bin,
    Array,
    Map,
    Ext,
}

impl ValueType {
    fn of(marker: Marker) -> Option<Self> {
        Some(match marker {
            Marker::Null => Self::Nil,
            Marker::True | Marker::False => Self::Bool,
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::U64
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64 => Self::Int,
            Marker::F32 | Marker::F64 => Self::Float,
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => Self::Str,
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => Self::Bin,
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => Self::Array,
            Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => Self::Map,
            Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32 => Self::Ext,
            _ => return None,
        })
    }
}

/// What follows a marker once its length prefix has been read.
enum Body {
    /// Opaque payload bytes.
    Bytes(u64),
    /// Nested values (array elements, or keys and values of a map).
    Items(u64),
}

/// Sequential reader over a MessagePack byte stream.
pub struct Cursor<R> {
    reader: R,
    offset: u64,
}

/// `Read` view of a cursor's input that advances its offset.
struct Counted<'a, R> {
    reader: &'a mut R,
    offset: &'a mut u64,
}

impl<R: BufRead> Read for Counted<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read(buf)?;
        *self.offset += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> Cursor<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Number of bytes consumed so far.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// `true` once the input is exhausted.
    ///
    /// # Errors
    /// I/O errors from the reader.
    pub fn is_at_end(&mut self) -> Result<bool> {
        Ok(self.peek()?.is_none())
    }

    /// Read the header of the next record and return its field count.
    ///
    /// Returns `Ok(None)` when the input ends exactly where a header would
    /// start. Anything other than a map marker is a decode error.
    ///
    /// # Errors
    /// Decode errors for non-map or truncated headers, I/O errors from the reader.
    pub fn read_map_header(&mut self) -> Result<Option<u32>> {
        let Some(byte) = self.peek()? else {
            return Ok(None);
        };
        if !matches!(
            Marker::from_u8(byte),
            Marker::FixMap(_) | Marker::Map16 | Marker::Map32
        ) {
            return Err(self.unexpected("map", byte));
        }
        self.read_len("map", |rd| decode::read_map_len(rd)).map(Some)
    }

    /// Read a map key into `buf`, replacing its previous contents.
    ///
    /// Keys may be encoded as str or bin; the payload is copied as-is.
    ///
    /// # Errors
    /// Decode errors for other key types or truncated keys.
    pub fn read_key(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        self.read_bytes_payload("str or bin key", buf)
    }

    /// Read a str (or bin) value into `buf`, replacing its previous contents.
    ///
    /// # Errors
    /// Decode errors for other value types or truncated values.
    pub fn read_str_bytes(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        buf.clear();
        self.read_bytes_payload("str or bin value", buf)
    }

    /// Type of the next value. Nothing is consumed.
    ///
    /// # Errors
    /// Decode errors at end of input or on the reserved marker.
    pub fn next_type(&mut self) -> Result<ValueType> {
        let Some(byte) = self.peek()? else {
            return Err(self.decode(DecodeErrorKind::Truncated));
        };
        ValueType::of(Marker::from_u8(byte))
            .ok_or_else(|| self.decode(DecodeErrorKind::ReservedMarker))
    }

    /// Consume the next value without keeping any of it.
    ///
    /// # Errors
    /// Decode errors for malformed or truncated values.
    pub fn skip(&mut self) -> Result<()> {
        self.walk_value(None)
    }

    /// Consume the next value, appending its complete encoding to `buf`.
    ///
    /// # Errors
    /// Decode errors for malformed or truncated values.
    pub fn read_raw_value(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        self.walk_value(Some(buf))
    }

    fn read_bytes_payload(&mut self, expected: &'static str, buf: &mut Vec<u8>) -> Result<()> {
        let Some(byte) = self.peek()? else {
            return Err(self.decode(DecodeErrorKind::Truncated));
        };
        let len = match Marker::from_u8(byte) {
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                self.read_len(expected, |rd| decode::read_str_len(rd))?
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
                self.read_len(expected, |rd| decode::read_bin_len(rd))?
            }
            _ => return Err(self.unexpected(expected, byte)),
        };
        self.take(u64::from(len), Some(buf))
    }

    /// Run one of `rmp`'s length decoders against the input, keeping the
    /// offset in step.
    fn read_len(
        &mut self,
        expected: &'static str,
        read: impl FnOnce(&mut Counted<'_, R>) -> std::result::Result<u32, ValueReadError>,
    ) -> Result<u32> {
        let result = read(&mut Counted {
            reader: &mut self.reader,
            offset: &mut self.offset,
        });
        result.map_err(|e| match e {
            ValueReadError::InvalidMarkerRead(e) | ValueReadError::InvalidDataRead(e) => {
                self.read_error(e)
            }
            ValueReadError::TypeMismatch(marker) => self.unexpected(expected, marker.to_u8()),
        })
    }

    fn read_error(&self, e: io::Error) -> Error {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            self.decode(DecodeErrorKind::Truncated)
        } else {
            Error::io("input", e)
        }
    }

    fn walk_value(&mut self, mut capture: Option<&mut Vec<u8>>) -> Result<()> {
        let mut pending: u64 = 1;
        while pending > 0 {
            pending -= 1;
            let marker = self.read_marker(capture.as_deref_mut())?;
            match self.body(marker, capture.as_deref_mut())? {
                Body::Bytes(n) => self.take(n, capture.as_deref_mut())?,
                Body::Items(n) => pending = pending.saturating_add(n),
            }
        }
        Ok(())
    }

    fn read_marker(&mut self, capture: Option<&mut Vec<u8>>) -> Result<Marker> {
        let Some(byte) = self.peek()? else {
            return Err(self.decode(DecodeErrorKind::Truncated));
        };
        if let Marker::Reserved = Marker::from_u8(byte) {
            return Err(self.decode(DecodeErrorKind::ReservedMarker));
        }
        self.advance(1);
        if let Some(out) = capture {
            out.push(byte);
        }
        Ok(Marker::from_u8(byte))
    }

    fn body(&mut self, marker: Marker, capture: Option<&mut Vec<u8>>) -> Result<Body> {
        let body = match marker {
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
                Body::Bytes(0)
            }
            Marker::U8 | Marker::I8 => Body::Bytes(1),
            Marker::U16 | Marker::I16 => Body::Bytes(2),
            Marker::U32 | Marker::I32 | Marker::F32 => Body::Bytes(4),
            Marker::U64 | Marker::I64 | Marker::F64 => Body::Bytes(8),
            Marker::FixStr(n) => Body::Bytes(u64::from(n)),
            Marker::Str8 | Marker::Bin8 => {
                Body::Bytes(u64::from(u8::from_be_bytes(self.read_array(capture)?)))
            }
            Marker::Str16 | Marker::Bin16 => {
                Body::Bytes(u64::from(u16::from_be_bytes(self.read_array(capture)?)))
            }
            Marker::Str32 | Marker::Bin32 => {
                Body::Bytes(u64::from(u32::from_be_bytes(self.read_array(capture)?)))
            }
            Marker::FixArray(n) => Body::Items(u64::from(n)),
            Marker::Array16 => {
                Body::Items(u64::from(u16::from_be_bytes(self.read_array(capture)?)))
            }
            Marker::Array32 => {
                Body::Items(u64::from(u32::from_be_bytes(self.read_array(capture)?)))
            }
            Marker::FixMap(n) => Body::Items(2 * u64::from(n)),
            Marker::Map16 => {
                Body::Items(2 * u64::from(u16::from_be_bytes(self.read_array(capture)?)))
            }
            Marker::Map32 => {
                Body::Items(2 * u64::from(u32::from_be_bytes(self.read_array(capture)?)))
            }
            // Extension payloads carry one extra type byte.
            Marker::FixExt1 => Body::Bytes(2),
            Marker::FixExt2 => Body::Bytes(3),
            Marker::FixExt4 => Body::Bytes(5),
            Marker::FixExt8 => Body::Bytes(9),
            Marker::FixExt16 => Body::Bytes(17),
            Marker::Ext8 => {
                Body::Bytes(1 + u64::from(u8::from_be_bytes(self.read_array(capture)?)))
            }
            Marker::Ext16 => {
                Body::Bytes(1 + u64::from(u16::from_be_bytes(self.read_array(capture)?)))
            }
            Marker::Ext32 => {
                Body::Bytes(1 + u64::from(u32::from_be_bytes(self.read_array(capture)?)))
            }
            _ => return Err(self.decode(DecodeErrorKind::ReservedMarker)),
        };
        Ok(body)
    }

    fn read_array<const N: usize>(&mut self, capture: Option<&mut Vec<u8>>) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        let mut filled = 0;
        while filled < N {
            let offset = self.offset;
            let available = fill(&mut self.reader)?;
            if available.is_empty() {
                return Err(truncated(offset));
            }
            let len = available.len().min(N - filled);
            out[filled..filled + len].copy_from_slice(&available[..len]);
            self.advance(len);
            filled += len;
        }
        if let Some(buf) = capture {
            buf.extend_from_slice(&out);
        }
        Ok(out)
    }

    fn take(&mut self, mut remaining: u64, mut capture: Option<&mut Vec<u8>>) -> Result<()> {
        while remaining > 0 {
            let offset = self.offset;
            let available = fill(&mut self.reader)?;
            if available.is_empty() {
                return Err(truncated(offset));
            }
            let len = available
                .len()
                .min(usize::try_from(remaining).unwrap_or(usize::MAX));
            if let Some(buf) = capture.as_deref_mut() {
                buf.extend_from_slice(&available[..len]);
            }
            self.advance(len);
            remaining -= len as u64;
        }
        Ok(())
    }

    fn peek(&mut self) -> Result<Option<u8>> {
        Ok(fill(&mut self.reader)?.first().copied())
    }

    fn advance(&mut self, len: usize) {
        self.reader.consume(len);
        self.offset += len as u64;
    }

    fn decode(&self, kind: DecodeErrorKind) -> Error {
        Error::Decode {
            offset: self.offset,
            kind,
        }
    }

    fn unexpected(&self, expected: &'static str, marker: u8) -> Error {
        self.decode(DecodeErrorKind::UnexpectedType { expected, marker })
    }
}

fn fill<R: BufRead>(reader: &mut R) -> Result<&[u8]> {
    loop {
        match reader.fill_buf() {
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::io("input", e)),
        }
    }
    reader.fill_buf().map_err(|e| Error::io("input", e))
}

fn truncated(offset: u64) -> Error {
    Error::Decode {
        offset,
        kind: DecodeErrorKind::Truncated,
    }
}
