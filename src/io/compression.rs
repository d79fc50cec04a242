//! Transparent compression for input streams and output sinks.
//!
//! Codecs are chosen by file extension first; readers fall back to magic-byte
//! detection, which is what makes compressed data on stdin work. Valid record
//! streams always start with a map marker (`0x80..=0x8f`, `0xde`, `0xdf`), so
//! neither the gzip (`1f 8b`) nor the zstd (`28 b5 2f fd`) signature can be
//! mistaken for uncompressed input.
//!
//! ## Built-in Codecs
//!
//! - **Gzip** (`.gz`) - via `flate2` (feature: `compression-gzip`)
//! - **Zstd** (`.zst`) - via `zstd` (feature: `compression-zstd`)
//!
//! ```no_run
//! use msgsplit::io::compression::{auto_detect_reader, auto_detect_writer};
//! use std::fs::File;
//! # fn main() -> anyhow::Result<()> {
//! let reader = auto_detect_reader(File::open("records.msg.gz")?, "records.msg.gz")?;
//! let writer = auto_detect_writer(File::create("a.col.msg.zst")?, "a.col.msg.zst")?;
//! # Ok(())
//! # }
//! ```

use crate::io::sink::Sink;
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Output compression selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    /// Extension appended to output file names, including the leading dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Zstd => ".zst",
        }
    }

    /// Fail early when the matching codec was compiled out.
    ///
    /// # Errors
    /// Returns an error if the codec's feature is disabled.
    pub fn ensure_available(self) -> Result<()> {
        if self == Self::None {
            return Ok(());
        }
        let sample = format!("x{}", self.extension());
        if detect_from_extension(&sample).is_none() {
            bail!("{self:?} compression is not enabled in this build");
        }
        Ok(())
    }
}

/// A compression algorithm usable for both directions.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g., "gzip", "zstd").
    fn name(&self) -> &str;

    /// File extensions associated with this codec, lowercase with the leading dot.
    fn extensions(&self) -> &[&str];

    /// Signature at the start of a compressed stream.
    fn magic_bytes(&self) -> &[u8];

    /// Wrap a reader with decompression.
    fn wrap_reader(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>>;

    /// Wrap a writer with compression. Finishing the sink writes the trailer.
    fn wrap_writer(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn Sink>>;
}

static CODECS: &[&dyn CompressionCodec] = &[
    #[cfg(feature = "compression-gzip")]
    &GzipCodec,
    #[cfg(feature = "compression-zstd")]
    &ZstdCodec,
];

fn detect_from_extension(path: impl AsRef<Path>) -> Option<&'static dyn CompressionCodec> {
    let path_str = path.as_ref().to_string_lossy().to_lowercase();
    CODECS
        .iter()
        .copied()
        .find(|codec| codec.extensions().iter().any(|ext| path_str.ends_with(ext)))
}

/// Match registered signatures against the buffered head of the stream.
/// The reader is not advanced.
fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<&'static dyn CompressionCodec> {
    let buf = reader.fill_buf().ok()?;
    if buf.is_empty() {
        return None;
    }
    CODECS
        .iter()
        .copied()
        .find(|codec| buf.starts_with(codec.magic_bytes()))
}

/// Wrap `reader` with decompression when the path hint or the first bytes
/// identify a known codec; otherwise return it buffered as-is.
///
/// # Errors
/// Returns an error if the codec fails to initialize.
pub fn auto_detect_reader<R: Read + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn Read>> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec
            .wrap_reader(Box::new(reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    let mut buf_reader = BufReader::new(reader);
    if let Some(codec) = detect_from_magic(&mut buf_reader) {
        return codec
            .wrap_reader(Box::new(buf_reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()));
    }

    Ok(Box::new(buf_reader))
}

/// Wrap `writer` with compression chosen by the extension of `path_hint`;
/// without a match the writer is only buffered. Call [`Sink::finish`] to
/// complete the stream.
///
/// # Errors
/// Returns an error if the codec fails to initialize.
pub fn auto_detect_writer<W: Write + 'static>(
    writer: W,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn Sink>> {
    if let Some(codec) = detect_from_extension(&path_hint) {
        return codec
            .wrap_writer(Box::new(writer))
            .with_context(|| format!("wrap writer with {} codec", codec.name()));
    }
    Ok(Box::new(BufWriter::new(writer)))
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> &[u8] {
        &[0x1f, 0x8b]
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        use flate2::read::MultiGzDecoder;
        Ok(Box::new(MultiGzDecoder::new(reader)))
    }

    fn wrap_writer(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn Sink>> {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    }
}

#[cfg(feature = "compression-gzip")]
impl<W: Write> Sink for flate2::write::GzEncoder<W> {
    fn finish(self: Box<Self>) -> std::io::Result<()> {
        let mut inner = flate2::write::GzEncoder::finish(*self)?;
        inner.flush()
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> &[u8] {
        &[0x28, 0xb5, 0x2f, 0xfd]
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> std::io::Result<Box<dyn Read>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read>)
    }

    fn wrap_writer(&self, writer: Box<dyn Write>) -> std::io::Result<Box<dyn Sink>> {
        zstd::stream::write::Encoder::new(writer, 3).map(|e| Box::new(e) as Box<dyn Sink>)
    }
}

#[cfg(feature = "compression-zstd")]
impl<W: Write> Sink for zstd::stream::write::Encoder<'static, W> {
    fn finish(self: Box<Self>) -> std::io::Result<()> {
        let mut inner = zstd::stream::write::Encoder::finish(*self)?;
        inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_follow_variant() {
        assert_eq!(Compression::None.extension(), "");
        assert_eq!(Compression::Gzip.extension(), ".gz");
        assert_eq!(Compression::Zstd.extension(), ".zst");
        assert!(Compression::None.ensure_available().is_ok());
    }

    #[test]
    fn uncompressed_input_passes_through() -> Result<()> {
        let data: &'static [u8] = &[0x81, 0xa1, b'a', 0x01];
        let mut reader = auto_detect_reader(data, "-")?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        assert_eq!(out, data);
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn gzip_is_detected_by_magic() -> Result<()> {
        use std::sync::{Arc, Mutex};

        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let compressed = Arc::new(Mutex::new(Vec::new()));
        {
            let mut w = auto_detect_writer(Shared(Arc::clone(&compressed)), "x.gz")?;
            w.write_all(&[0x80, 0x80])?;
            w.finish()?;
        }
        let bytes = compressed.lock().unwrap().clone();
        assert!(bytes.starts_with(&[0x1f, 0x8b]));

        let mut reader = auto_detect_reader(std::io::Cursor::new(bytes), "-")?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        assert_eq!(out, [0x80u8, 0x80]);
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn gzip_trailer_failure_surfaces_in_finish() -> Result<()> {
        use crate::testing::FullDevice;

        // Room for the gzip header only.
        let device = FullDevice::with_capacity(10);
        let mut w = auto_detect_writer(device.clone(), "x.gz")?;
        w.write_all(b"some payload")?;
        assert!(w.finish().is_err());
        assert_eq!(device.written(), 10);
        Ok(())
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn zstd_finish_completes_the_frame() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("x.zst");
        let mut w = auto_detect_writer(std::fs::File::create(&path)?, &path)?;
        w.write_all(&[0x81, 0xa1, b'a', 0x01])?;
        w.finish()?;

        let mut out = Vec::new();
        auto_detect_reader(std::fs::File::open(&path)?, &path)?.read_to_end(&mut out)?;
        assert_eq!(out, [0x81, 0xa1, b'a', 0x01]);
        Ok(())
    }
}
