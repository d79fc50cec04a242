//! Opening the record stream.
//!
//! The input is stdin (`None` or `"-"`) or every file matching a glob
//! pattern, sorted lexicographically and read back to back. Each file is
//! decompressed on its own, so a directory of `.msg.gz` parts works as one
//! stream.

use crate::io::compression::auto_detect_reader;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Read-buffer size in front of the decoder.
pub const INPUT_BUFFER_SIZE: usize = 16 * 1024;

/// Open the record stream described by `source`.
///
/// # Errors
/// Returns an error if the pattern is invalid, matches no file, or the first
/// file cannot be opened.
pub fn open_input(source: Option<&str>) -> Result<Box<dyn BufRead>> {
    match source {
        None | Some("-") => {
            let stdin = auto_detect_reader(io::stdin(), "-").context("open stdin")?;
            Ok(Box::new(BufReader::with_capacity(INPUT_BUFFER_SIZE, stdin)))
        }
        Some(pattern) => {
            let files = expand_pattern(pattern)?;
            tracing::debug!(pattern, files = files.len(), "resolved input files");
            let chain = FileChain::new(files)?;
            Ok(Box::new(BufReader::with_capacity(INPUT_BUFFER_SIZE, chain)))
        }
    }
}

/// Files matching `pattern`, sorted. Zero matches is an error.
///
/// # Errors
/// Returns an error if the pattern is invalid, a match cannot be read, or
/// nothing matches.
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| format!("error reading glob entry for {pattern}"))?;
        if path.is_file() {
            files.push(path);
        }
    }
    if files.is_empty() {
        bail!("no input files match {pattern}");
    }
    files.sort();
    Ok(files)
}

/// Concatenation of decompressed files, opened one at a time.
struct FileChain {
    pending: VecDeque<PathBuf>,
    current: Box<dyn Read>,
}

impl FileChain {
    fn new(files: Vec<PathBuf>) -> Result<Self> {
        let mut pending = VecDeque::from(files);
        let first = pending.pop_front().context("empty input file list")?;
        let current = open_file(&first)?;
        Ok(Self { pending, current })
    }
}

impl Read for FileChain {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            let Some(next) = self.pending.pop_front() else {
                return Ok(0);
            };
            self.current = open_file(&next).map_err(|e| io::Error::other(format!("{e:#}")))?;
        }
    }
}

fn open_file(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    tracing::debug!(path = %path.display(), "reading input file");
    auto_detect_reader(file, path)
        .with_context(|| format!("setup decompression for {}", path.display()))
}
