//! How an engine reports back to whoever drives it.
use crate::engine::VId;
use baa::BitVecValue;
use parking_lot::Mutex;
use sluice_ir::Whence;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;

/// A stream descriptor handed out by [Interface::fopen].
pub type FId = u64;

/// Callbacks from an engine to its caller. Notifications cannot fail from
/// the engine's point of view; stream operations can.
pub trait Interface: Send {
    /// Publishes the value of an output variable.
    fn write(&mut self, id: VId, bits: &BitVecValue);
    fn debug(&mut self, action: u32, text: &str);
    fn finish(&mut self, arg: u32);
    fn restart(&mut self, path: &str);
    fn retarget(&mut self, target: &str);
    fn save(&mut self, path: &str);
    fn yield_now(&mut self);

    fn fopen(&mut self, path: &str) -> io::Result<FId>;
    /// Reads at most `max` bytes. Fewer bytes than requested means the
    /// stream reached its end.
    fn get(&mut self, fd: FId, max: usize) -> io::Result<Vec<u8>>;
    fn put(&mut self, fd: FId, bytes: &[u8]) -> io::Result<()>;
    fn seek(&mut self, fd: FId, offset: u64, whence: Whence) -> io::Result<()>;
    fn flush(&mut self, fd: FId) -> io::Result<()>;
    fn eof(&mut self, fd: FId) -> io::Result<bool>;
    /// Clears the end-of-file flag of a stream.
    fn clear(&mut self, fd: FId) -> io::Result<()>;
}

/// The caller's interface plus the bytes read ahead of a formatted read,
/// per stream. Formatted I/O lives in [crate::io].
pub struct Host {
    interface: Box<dyn Interface>,
    pub(crate) pending: HashMap<FId, VecDeque<u8>>,
}

pub type SharedHost = Arc<Mutex<Host>>;

impl Host {
    pub fn new(interface: Box<dyn Interface>) -> Self {
        Self {
            interface,
            pending: HashMap::new(),
        }
    }

    pub fn shared<I: Interface + 'static>(interface: I) -> SharedHost {
        Arc::new(Mutex::new(Self::new(Box::new(interface))))
    }

    pub fn interface(&mut self) -> &mut dyn Interface {
        self.interface.as_mut()
    }
}

/// A notification recorded by [LocalInterface].
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Write(VId, BitVecValue),
    Debug(u32, String),
    Finish(u32),
    Restart(String),
    Retarget(String),
    Save(String),
    Yield,
}

#[derive(Debug, Default)]
struct MemStream {
    data: Vec<u8>,
    pos: usize,
    eof: bool,
}

#[derive(Debug, Default)]
struct LocalState {
    events: Vec<HostEvent>,
    streams: HashMap<FId, MemStream>,
    files: HashMap<String, Vec<u8>>,
    next_fd: FId,
}

/// An in-process interface backed by memory buffers. Clones share their
/// state, so a caller can keep a handle after giving one to an engine.
#[derive(Debug, Clone, Default)]
pub struct LocalInterface {
    state: Arc<Mutex<LocalState>>,
}

/// Descriptors below this are reserved for the standard streams.
const FIRST_FD: FId = 6;

impl LocalInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `bytes` readable from stream `fd`.
    pub fn with_stream(self, fd: FId, bytes: &[u8]) -> Self {
        self.state.lock().streams.insert(
            fd,
            MemStream {
                data: bytes.to_vec(),
                ..Default::default()
            },
        );
        self
    }

    /// Makes `bytes` the contents of the file `path` for later `fopen`s.
    pub fn with_file(self, path: &str, bytes: &[u8]) -> Self {
        self.state.lock().files.insert(path.to_string(), bytes.to_vec());
        self
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.state.lock().events.clone()
    }

    /// Everything written to stream `fd` so far, including its initial
    /// contents.
    pub fn contents(&self, fd: FId) -> Vec<u8> {
        self.state
            .lock()
            .streams
            .get(&fd)
            .map(|s| s.data.clone())
            .unwrap_or_default()
    }

    fn record(&mut self, event: HostEvent) {
        self.state.lock().events.push(event);
    }

    fn with<T>(
        &mut self,
        fd: FId,
        f: impl FnOnce(&mut MemStream) -> T,
    ) -> io::Result<T> {
        let mut state = self.state.lock();
        let stream = state.streams.entry(fd).or_default();
        Ok(f(stream))
    }
}

impl Interface for LocalInterface {
    fn write(&mut self, id: VId, bits: &BitVecValue) {
        self.record(HostEvent::Write(id, bits.clone()));
    }

    fn debug(&mut self, action: u32, text: &str) {
        self.record(HostEvent::Debug(action, text.to_string()));
    }

    fn finish(&mut self, arg: u32) {
        self.record(HostEvent::Finish(arg));
    }

    fn restart(&mut self, path: &str) {
        self.record(HostEvent::Restart(path.to_string()));
    }

    fn retarget(&mut self, target: &str) {
        self.record(HostEvent::Retarget(target.to_string()));
    }

    fn save(&mut self, path: &str) {
        self.record(HostEvent::Save(path.to_string()));
    }

    fn yield_now(&mut self) {
        self.record(HostEvent::Yield);
    }

    fn fopen(&mut self, path: &str) -> io::Result<FId> {
        let mut state = self.state.lock();
        let fd = FIRST_FD.max(state.next_fd);
        state.next_fd = fd + 1;
        let data = state.files.get(path).cloned().unwrap_or_default();
        state.streams.insert(
            fd,
            MemStream {
                data,
                ..Default::default()
            },
        );
        Ok(fd)
    }

    fn get(&mut self, fd: FId, max: usize) -> io::Result<Vec<u8>> {
        self.with(fd, |s| {
            let end = (s.pos + max).min(s.data.len());
            let bytes = s.data[s.pos.min(end)..end].to_vec();
            s.pos = end;
            if bytes.len() < max {
                s.eof = true;
            }
            bytes
        })
    }

    fn put(&mut self, fd: FId, bytes: &[u8]) -> io::Result<()> {
        self.with(fd, |s| {
            let end = s.pos + bytes.len();
            if s.data.len() < end {
                s.data.resize(end, 0);
            }
            s.data[s.pos..end].copy_from_slice(bytes);
            s.pos = end;
        })
    }

    fn seek(&mut self, fd: FId, offset: u64, whence: Whence) -> io::Result<()> {
        self.with(fd, |s| {
            let base = match whence {
                Whence::Begin => 0,
                Whence::Current => s.pos,
                Whence::End => s.data.len(),
            };
            s.pos = base + offset as usize;
        })
    }

    fn flush(&mut self, fd: FId) -> io::Result<()> {
        self.with(fd, |_| ())
    }

    fn eof(&mut self, fd: FId) -> io::Result<bool> {
        self.with(fd, |s| s.eof)
    }

    fn clear(&mut self, fd: FId) -> io::Result<()> {
        self.with(fd, |s| s.eof = false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reads_set_eof_until_cleared() {
        let mut local = LocalInterface::new().with_stream(7, b"abc");
        assert_eq!(local.get(7, 2).unwrap(), b"ab");
        assert!(!local.eof(7).unwrap());
        assert_eq!(local.get(7, 2).unwrap(), b"c");
        assert!(local.eof(7).unwrap());
        local.clear(7).unwrap();
        local.seek(7, 0, Whence::Begin).unwrap();
        assert!(!local.eof(7).unwrap());
        assert_eq!(local.get(7, 3).unwrap(), b"abc");
    }

    #[test]
    fn clones_share_recorded_events() {
        let local = LocalInterface::new().with_file("in.txt", b"12");
        let mut handle = local.clone();
        handle.save("state.json");
        let fd = handle.fopen("in.txt").unwrap();
        assert_eq!(fd, FIRST_FD);
        assert_eq!(local.events(), vec![HostEvent::Save("state.json".into())]);
        assert_eq!(local.contents(fd), b"12");
    }
}
