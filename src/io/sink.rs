//! Output sinks for columns and shards.
//!
//! A [`SinkFactory`] turns a channel name into a [`Sink`]. Names handed to the
//! factory are already safe as bare file names: see [`escape_name`].

use crate::io::compression::{Compression, auto_detect_writer};
use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// File suffix of transpose outputs.
pub const COLUMN_SUFFIX: &str = ".col.msg";
/// File suffix of shard outputs.
pub const SHARD_SUFFIX: &str = ".shard.msg";

/// An output writer with an explicit end.
///
/// `finish` writes whatever the format still owes (a compression trailer),
/// flushes, and releases the writer. Dropping a sink without finishing it
/// loses those errors.
pub trait Sink: Write {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

impl<W: Write> Sink for BufWriter<W> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let mut inner = self.into_inner().map_err(io::IntoInnerError::into_error)?;
        inner.flush()
    }
}

/// Creates one output sink per channel.
pub trait SinkFactory {
    /// Open the sink for `name`. Called at most once per name and run.
    fn open(&mut self, name: &str) -> io::Result<Box<dyn Sink>>;

    /// Where `name` ends up, for log and error messages.
    fn locate(&self, name: &str) -> String {
        name.to_string()
    }
}

/// Sinks as files `<dir>/<name><suffix>[.gz|.zst]`.
#[derive(Debug, Clone)]
pub struct DirSinks {
    dir: PathBuf,
    suffix: &'static str,
    compression: Compression,
}

impl DirSinks {
    /// Create the output directory if needed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn new(
        dir: impl Into<PathBuf>,
        suffix: &'static str,
        compression: Compression,
    ) -> io::Result<Self> {
        let dir = dir.into();
        if !dir.as_os_str().is_empty() {
            create_dir_all(&dir)?;
        }
        Ok(Self {
            dir,
            suffix,
            compression,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the sink for `name`.
    #[must_use]
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{name}{}{}", self.suffix, self.compression.extension()))
    }
}

impl SinkFactory for DirSinks {
    fn open(&mut self, name: &str) -> io::Result<Box<dyn Sink>> {
        let path = self.path_for(name);
        let file = File::create(&path)?;
        auto_detect_writer(file, &path).map_err(|e| io::Error::other(format!("{e:#}")))
    }

    fn locate(&self, name: &str) -> String {
        self.path_for(name).display().to_string()
    }
}

/// Make arbitrary key bytes safe as a bare file name.
///
/// `/`, `\`, NUL, `%` and bytes that are not valid UTF-8 become `%XX`
/// (uppercase hex); everything else is kept. The mapping is injective.
#[must_use]
pub fn escape_name(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '/' | '\\' | '\0' | '%' => push_escaped(&mut out, c as u8),
                _ => out.push(c),
            }
        }
        for &b in chunk.invalid() {
            push_escaped(&mut out, b);
        }
    }
    out
}

fn push_escaped(out: &mut String, b: u8) {
    let _ = write!(out, "%{b:02X}");
}
