//! In-memory implementation of the kernel-boundary traits for tests.
//!
//! `MockIo` keeps a map of attribute/node contents, an ordered journal of
//! every write, and per-path failure injection. Clones share state, so a
//! test can hand the mock to a resource context and still inspect what the
//! context did.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{ControlRequest, DevicePort, OpenMode, PlatformIo};

#[derive(Default)]
struct MockState {
    /// Attribute and node contents, also updated by port writes.
    attrs: HashMap<PathBuf, String>,
    /// Paths that `exists()` reports present without any content.
    present: HashSet<PathBuf>,
    /// Every attribute or port write, in application order.
    journal: Vec<(PathBuf, String)>,
    /// Bytes queued for port reads, drained front-first.
    read_data: HashMap<PathBuf, Vec<u8>>,
    /// Raw bytes written through ports, per path.
    written: HashMap<PathBuf, Vec<u8>>,
    /// Control requests in application order.
    controls: Vec<(PathBuf, ControlRequest)>,
    /// Paths opened through `open()`, in order.
    opened: Vec<PathBuf>,
    fail_open: HashMap<PathBuf, i32>,
    fail_write: HashMap<PathBuf, i32>,
}

/// Scriptable `PlatformIo` double.
#[derive(Clone, Default)]
pub struct MockIo {
    state: Arc<Mutex<MockState>>,
}

impl MockIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an attribute or node with content.
    pub fn set_attr(&self, path: impl Into<PathBuf>, value: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        let path = path.into();
        state.present.insert(path.clone());
        state.attrs.insert(path, value.into());
    }

    /// Mark a path as existing without content (e.g. a sysfs directory).
    pub fn add_path(&self, path: impl Into<PathBuf>) {
        self.state.lock().unwrap().present.insert(path.into());
    }

    /// Current content of an attribute, if any write reached it.
    pub fn attr(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state.lock().unwrap().attrs.get(path.as_ref()).cloned()
    }

    /// Ordered journal of every attribute and port write.
    pub fn journal(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().unwrap().journal.clone()
    }

    /// Paths opened through `open()`, in order.
    pub fn opened(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().opened.clone()
    }

    /// Control requests applied to ports, in order.
    pub fn controls(&self) -> Vec<(PathBuf, ControlRequest)> {
        self.state.lock().unwrap().controls.clone()
    }

    /// Queue bytes to be returned by port reads on `path`.
    pub fn set_read_data(&self, path: impl Into<PathBuf>, data: Vec<u8>) {
        self.state.lock().unwrap().read_data.insert(path.into(), data);
    }

    /// Raw bytes written through the port at `path`.
    pub fn written(&self, path: impl AsRef<Path>) -> Vec<u8> {
        self.state
            .lock()
            .unwrap()
            .written
            .get(path.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    /// Make `open()` on `path` fail with the given errno.
    pub fn fail_open(&self, path: impl Into<PathBuf>, errno: i32) {
        self.state.lock().unwrap().fail_open.insert(path.into(), errno);
    }

    /// Make writes to `path` (attribute or port) fail with the given errno.
    pub fn fail_write(&self, path: impl Into<PathBuf>, errno: i32) {
        self.state.lock().unwrap().fail_write.insert(path.into(), errno);
    }
}

impl PlatformIo for MockIo {
    fn open(&self, path: &Path, _mode: OpenMode) -> io::Result<Box<dyn DevicePort>> {
        let mut state = self.state.lock().unwrap();
        if let Some(&errno) = state.fail_open.get(path) {
            return Err(io::Error::from_raw_os_error(errno));
        }
        state.opened.push(path.to_path_buf());
        Ok(Box::new(MockPort {
            state: self.state.clone(),
            path: path.to_path_buf(),
            pos: 0,
        }))
    }

    fn read_attr(&self, path: &Path) -> io::Result<String> {
        self.state
            .lock()
            .unwrap()
            .attrs
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }

    fn write_attr(&self, path: &Path, value: &str) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(&errno) = state.fail_write.get(path) {
            return Err(io::Error::from_raw_os_error(errno));
        }
        state.attrs.insert(path.to_path_buf(), value.to_string());
        state.journal.push((path.to_path_buf(), value.to_string()));
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.lock().unwrap();
        state.present.contains(path) || state.attrs.contains_key(path)
    }
}

struct MockPort {
    state: Arc<Mutex<MockState>>,
    path: PathBuf,
    pos: usize,
}

impl DevicePort for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        // Queued device data takes priority over attribute content.
        if let Some(queue) = state.read_data.get_mut(&self.path) {
            if !queue.is_empty() {
                let n = buf.len().min(queue.len());
                buf[..n].copy_from_slice(&queue[..n]);
                queue.drain(..n);
                return Ok(n);
            }
        }
        let content = state.attrs.get(&self.path).cloned().unwrap_or_default();
        let bytes = content.as_bytes();
        if self.pos >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - self.pos);
        buf[..n].copy_from_slice(&bytes[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if let Some(&errno) = state.fail_write.get(&self.path) {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let text = String::from_utf8_lossy(buf).to_string();
        state.attrs.insert(self.path.clone(), text.clone());
        state.journal.push((self.path.clone(), text));
        state
            .written
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn control(&mut self, req: ControlRequest) -> io::Result<()> {
        self.state
            .lock()
            .unwrap()
            .controls
            .push((self.path.clone(), req));
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        if tx.len() != rx.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "transfer buffers must be the same length",
            ));
        }
        let mut state = self.state.lock().unwrap();
        state
            .written
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(tx);
        rx.fill(0);
        if let Some(queue) = state.read_data.get_mut(&self.path) {
            let n = rx.len().min(queue.len());
            rx[..n].copy_from_slice(&queue[..n]);
            queue.drain(..n);
        }
        Ok(())
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.pos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_round_trip_and_journal() {
        let io = MockIo::new();
        io.write_attr(Path::new("/sys/test/a"), "1").unwrap();
        io.write_attr(Path::new("/sys/test/b"), "2").unwrap();
        assert_eq!(io.read_attr(Path::new("/sys/test/a")).unwrap(), "1");
        assert_eq!(
            io.journal(),
            vec![
                (PathBuf::from("/sys/test/a"), "1".to_string()),
                (PathBuf::from("/sys/test/b"), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_port_reads_attr_content_with_rewind() {
        let io = MockIo::new();
        io.set_attr("/sys/test/value", "42");
        let mut port = io.open(Path::new("/sys/test/value"), OpenMode::ReadOnly).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf).unwrap(), 2);
        assert_eq!(port.read(&mut buf).unwrap(), 0);
        port.rewind().unwrap();
        assert_eq!(port.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"42");
    }

    #[test]
    fn test_failure_injection() {
        let io = MockIo::new();
        io.fail_open("/dev/i2c-0", libc::EACCES);
        assert!(io.open(Path::new("/dev/i2c-0"), OpenMode::ReadWrite).is_err());

        io.fail_write("/sys/test/x", libc::EBUSY);
        let err = io.write_attr(Path::new("/sys/test/x"), "1").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EBUSY));
    }

    #[test]
    fn test_read_data_queue_drains() {
        let io = MockIo::new();
        io.set_read_data("/dev/i2c-1", vec![0xaa, 0xbb]);
        let mut port = io.open(Path::new("/dev/i2c-1"), OpenMode::ReadWrite).unwrap();
        let mut buf = [0u8; 1];
        port.read(&mut buf).unwrap();
        assert_eq!(buf[0], 0xaa);
        port.read(&mut buf).unwrap();
        assert_eq!(buf[0], 0xbb);
    }
}
