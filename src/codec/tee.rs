//! Raw capture of consumed input.

use std::io::{self, BufRead, Read};

/// A [`BufRead`] wrapper that remembers every byte its consumer consumes.
///
/// Bytes are captured in [`BufRead::consume`], so read-ahead held in the
/// inner buffer never leaks into the capture: after a decoder has walked one
/// record, [`TeeReader::captured`] holds exactly that record's encoding.
/// Call [`TeeReader::clear`] at every record boundary.
pub struct TeeReader<R> {
    inner: R,
    captured: Vec<u8>,
}

impl<R: BufRead> TeeReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            captured: Vec::new(),
        }
    }

    /// Bytes consumed since the last [`clear`](Self::clear).
    #[must_use]
    pub fn captured(&self) -> &[u8] {
        &self.captured
    }

    /// Forget the captured bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.captured.clear();
    }
}

impl<R: BufRead> Read for TeeReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = {
            let available = self.fill_buf()?;
            let n = available.len().min(out.len());
            out[..n].copy_from_slice(&available[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for TeeReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if amt > 0 {
            // The bytes being consumed are still buffered, so this does no I/O.
            if let Ok(buf) = self.inner.fill_buf() {
                let len = amt.min(buf.len());
                self.captured.extend_from_slice(&buf[..len]);
            }
        }
        self.inner.consume(amt);
    }
}
