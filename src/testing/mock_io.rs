//! In-memory sinks for exercising registries and pipelines without files.

use crate::io::sink::{Sink, SinkFactory};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Entry {
    data: Vec<u8>,
    flushed: bool,
}

#[derive(Default)]
struct Shared {
    entries: BTreeMap<String, Entry>,
    opened: Vec<String>,
}

/// A [`SinkFactory`] keeping every sink in memory.
///
/// Clones share their contents, so a test can hand one clone to a registry
/// and inspect the output through another.
///
/// ```
/// use msgsplit::column::ColumnRegistry;
/// use msgsplit::testing::MemorySinks;
///
/// let sinks = MemorySinks::new();
/// let mut columns = ColumnRegistry::new(sinks.clone());
/// columns.write(b"a", &[0x01]).unwrap();
/// columns.advance_row();
/// columns.close().unwrap();
/// assert_eq!(sinks.contents("a").unwrap(), [0x01]);
/// ```
#[derive(Clone, Default)]
pub struct MemorySinks {
    shared: Arc<Mutex<Shared>>,
    failing: Option<String>,
}

impl MemorySinks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the sink named `name` fail every flush.
    #[must_use]
    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing = Some(name.to_string());
        self
    }

    /// Bytes written to `name`, if it was ever opened.
    ///
    /// # Panics
    /// Panics if the shared state is poisoned.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let shared = self.shared.lock().unwrap();
        shared.entries.get(name).map(|e| e.data.clone())
    }

    /// Whether `name` has been flushed successfully at least once.
    ///
    /// # Panics
    /// Panics if the shared state is poisoned.
    #[must_use]
    pub fn flushed(&self, name: &str) -> Option<bool> {
        let shared = self.shared.lock().unwrap();
        shared.entries.get(name).map(|e| e.flushed)
    }

    /// Sink names in the order they were opened.
    ///
    /// # Panics
    /// Panics if the shared state is poisoned.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.shared.lock().unwrap().opened.clone()
    }
}

impl SinkFactory for MemorySinks {
    fn open(&mut self, name: &str) -> io::Result<Box<dyn Sink>> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| io::Error::other("memory sinks poisoned"))?;
        if shared.entries.contains_key(name) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("sink {name} opened twice"),
            ));
        }
        shared.entries.insert(name.to_string(), Entry::default());
        shared.opened.push(name.to_string());
        Ok(Box::new(MemorySink {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
            fail_flush: self.failing.as_deref() == Some(name),
        }))
    }
}

struct MemorySink {
    name: String,
    shared: Arc<Mutex<Shared>>,
    fail_flush: bool,
}

impl MemorySink {
    fn with_entry<T>(&self, f: impl FnOnce(&mut Entry) -> T) -> io::Result<T> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| io::Error::other("memory sinks poisoned"))?;
        let entry = shared
            .entries
            .get_mut(&self.name)
            .ok_or_else(|| io::Error::other(format!("sink {} vanished", self.name)))?;
        Ok(f(entry))
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_entry(|e| e.data.extend_from_slice(buf))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.fail_flush {
            return Err(io::Error::other("injected flush failure"));
        }
        self.with_entry(|e| e.flushed = true)
    }
}

impl Sink for MemorySink {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()
    }
}

/// A writer with a fixed capacity, failing with `StorageFull` once it is
/// used up. Clones share the stored bytes.
///
/// ```
/// use msgsplit::testing::FullDevice;
/// use std::io::Write;
///
/// let mut device = FullDevice::with_capacity(2);
/// assert!(device.write_all(b"abc").is_err());
/// assert_eq!(device.written(), 2);
/// ```
#[derive(Clone)]
pub struct FullDevice {
    capacity: usize,
    data: Arc<Mutex<Vec<u8>>>,
}

impl FullDevice {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            data: Arc::default(),
        }
    }

    /// Bytes accepted so far.
    ///
    /// # Panics
    /// Panics if the shared state is poisoned.
    #[must_use]
    pub fn written(&self) -> usize {
        self.data.lock().unwrap().len()
    }
}

impl Write for FullDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| io::Error::other("device poisoned"))?;
        let room = self.capacity - data.len();
        if room == 0 && !buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::StorageFull, "device full"));
        }
        let n = room.min(buf.len());
        data.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
