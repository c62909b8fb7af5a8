//! The binary protocol spoken between clients and the server.
//!
//! Every message starts with a 13-byte header: the opcode, then the client
//! id, engine id and instance index as little-endian `u32`s. Payloads follow
//! the header and depend on the opcode. Variable-length payloads are `u32`
//! length-prefixed, bit vectors are a `u32` width followed by their
//! little-endian bytes, and snapshots are a `u32` count of `(id, bits)`
//! entries. A `fail` reply carries the reason as a payload.
//!
//! Replies to data-channel requests that return something (`fopen`,
//! `stream-get`, `stream-eof`) carry no header: the server is blocked reading
//! them on the same socket.
use crate::errors::{RemoteError, RemoteResult};
use baa::{BitVecOps, BitVecValue};
use sluice_engine::{State, VId};
use std::io::{self, Read, Write};

macro_rules! opcodes {
    ($($(#[$doc:meta])* $name:ident = $code:literal => $text:literal,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($(#[$doc])* $name = $code,)*
        }

        impl Opcode {
            pub fn from_u8(code: u8) -> RemoteResult<Self> {
                match code {
                    $($code => Ok(Opcode::$name),)*
                    _ => Err(RemoteError::UnknownOpcode(code)),
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => $text,)*
                }
            }
        }
    };
}

opcodes! {
    // connection lifecycle
    OpenConn1 = 0 => "open-phase-1",
    OpenConn2 = 1 => "open-phase-2",
    CloseConn = 2 => "close",
    // compiler lifecycle
    Compile = 3 => "compile",
    StopCompile = 4 => "stop-compile",
    Okay = 5 => "okay",
    Fail = 6 => "fail",
    // engine calls
    GetState = 7 => "get-state",
    SetState = 8 => "set-state",
    GetInput = 9 => "get-input",
    SetInput = 10 => "set-input",
    Finalize = 11 => "finalize",
    Read = 12 => "read",
    Evaluate = 13 => "evaluate",
    ThereAreUpdates = 14 => "there-are-updates",
    Update = 15 => "update",
    ThereWereTasks = 16 => "there-were-tasks",
    ConditionalUpdate = 17 => "conditional-update",
    OpenLoop = 18 => "open-loop",
    OverridesDoneStep = 19 => "overrides-done-step",
    DoneStep = 20 => "done-step",
    OverridesDoneSimulation = 21 => "overrides-done-simulation",
    DoneSimulation = 22 => "done-simulation",
    // global coordination
    StateSafeBegin = 23 => "state-safe-begin",
    StateSafeOkay = 24 => "state-safe-okay",
    StateSafeFinish = 25 => "state-safe-finish",
    TeardownEngine = 26 => "teardown-engine",
    // data channel, server to client
    Write = 27 => "write",
    Debug = 28 => "debug",
    Finish = 29 => "finish",
    Restart = 30 => "restart",
    Retarget = 31 => "retarget",
    Save = 32 => "save",
    Yield = 33 => "yield",
    Fopen = 34 => "fopen",
    StreamGet = 35 => "stream-get",
    StreamPut = 36 => "stream-put",
    StreamSeek = 37 => "stream-seek",
    StreamFlush = 38 => "stream-flush",
    StreamEof = 39 => "stream-eof",
    StreamClear = 40 => "stream-clear",
}

impl Opcode {
    /// Engine calls that are not answered, so callers can pipeline them.
    pub fn is_one_way(self) -> bool {
        matches!(
            self,
            Opcode::SetState
                | Opcode::SetInput
                | Opcode::Read
                | Opcode::DoneStep
                | Opcode::DoneSimulation
        )
    }

    /// Messages a server sends on the data channel while an engine call is
    /// in progress.
    pub fn is_data(self) -> bool {
        (Opcode::Write as u8..=Opcode::StreamClear as u8)
            .contains(&(self as u8))
    }
}

pub const HEADER_BYTES: usize = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub op: Opcode,
    pub client: u32,
    pub engine: u32,
    pub instance: u32,
}

impl Header {
    pub fn new(op: Opcode, client: u32, engine: u32, instance: u32) -> Self {
        Self {
            op,
            client,
            engine,
            instance,
        }
    }

    /// A header that carries nothing but its opcode.
    pub fn bare(op: Opcode) -> Self {
        Self::new(op, 0, 0, 0)
    }

    /// The same routing ids with another opcode.
    pub fn with_op(self, op: Opcode) -> Self {
        Self { op, ..self }
    }

    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        out[0] = self.op as u8;
        out[1..5].copy_from_slice(&self.client.to_le_bytes());
        out[5..9].copy_from_slice(&self.engine.to_le_bytes());
        out[9..13].copy_from_slice(&self.instance.to_le_bytes());
        out
    }

    pub fn read<R: Read>(r: &mut R) -> RemoteResult<Self> {
        let mut buf = [0u8; HEADER_BYTES];
        r.read_exact(&mut buf)?;
        let word = |at: usize| {
            u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
        };
        Ok(Self {
            op: Opcode::from_u8(buf[0])?,
            client: word(1),
            engine: word(5),
            instance: word(9),
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.encode())
    }

    /// Fails unless this header carries `op`.
    pub fn expect(&self, op: Opcode) -> RemoteResult<()> {
        if self.op == op {
            Ok(())
        } else if self.op == Opcode::Fail {
            Err(RemoteError::Failed(op.name()))
        } else {
            Err(RemoteError::Unexpected {
                expected: op.name(),
                received: self.op.name(),
            })
        }
    }
}

/// Builds a message in memory so it reaches the socket in one write.
#[derive(Debug, Default)]
pub struct Message(Vec<u8>);

impl Message {
    pub fn new(header: Header) -> Self {
        Self(header.encode().to_vec())
    }

    /// A payload without a header, for replies on the data channel.
    pub fn reply() -> Self {
        Self::default()
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.0.push(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn blob(self, bytes: &[u8]) -> Self {
        let mut this = self.u32(bytes.len() as u32);
        this.0.extend_from_slice(bytes);
        this
    }

    pub fn bits(self, value: &BitVecValue) -> Self {
        let width = value.width();
        self.u32(width).raw(&value.to_bytes_le())
    }

    pub fn state(self, state: &State) -> Self {
        let mut this = self.u32(state.len() as u32);
        for (id, value) in state {
            this = this.u32(*id).bits(value);
        }
        this
    }

    fn raw(mut self, bytes: &[u8]) -> Self {
        self.0.extend_from_slice(bytes);
        self
    }

    pub fn send<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)?;
        w.flush()
    }
}

/// Reads payload fields, refusing lengths above `max` bytes.
pub struct Reader<'a, R> {
    inner: &'a mut R,
    max: usize,
}

impl<'a, R: Read> Reader<'a, R> {
    pub fn new(inner: &'a mut R, max: usize) -> Self {
        Self { inner, max }
    }

    pub fn u8(&mut self) -> RemoteResult<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn u32(&mut self) -> RemoteResult<u32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn u64(&mut self) -> RemoteResult<u64> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn exact(&mut self, len: usize) -> RemoteResult<Vec<u8>> {
        if len > self.max {
            return Err(RemoteError::TooLarge { len, max: self.max });
        }
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn blob(&mut self) -> RemoteResult<Vec<u8>> {
        let len = self.u32()? as usize;
        self.exact(len)
    }

    pub fn string(&mut self) -> RemoteResult<String> {
        Ok(String::from_utf8_lossy(&self.blob()?).into_owned())
    }

    pub fn bits(&mut self) -> RemoteResult<BitVecValue> {
        let width = self.u32()?;
        if width == 0 {
            return Err(RemoteError::Unexpected {
                expected: "a bit vector",
                received: "a zero-width value",
            });
        }
        let bytes = self.exact(width.div_ceil(8) as usize)?;
        Ok(BitVecValue::from_bytes_le(&bytes, width))
    }

    pub fn state(&mut self) -> RemoteResult<State> {
        let count = self.u32()?;
        let mut state = State::new();
        for _ in 0..count {
            let id: VId = self.u32()?;
            let value = self.bits()?;
            state.insert(id, value);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_layout_is_little_endian() {
        let header = Header::new(Opcode::Evaluate, 1, 0x0203, 0x0405_0607);
        let bytes = header.encode();
        assert_eq!(bytes[0], 13);
        assert_eq!(&bytes[1..5], &[1, 0, 0, 0]);
        assert_eq!(&bytes[5..9], &[3, 2, 0, 0]);
        assert_eq!(&bytes[9..], &[7, 6, 5, 4]);
        assert_eq!(Header::read(&mut Cursor::new(bytes)).unwrap(), header);
    }

    #[test]
    fn snapshots_keep_widths() {
        let mut state = State::new();
        state.insert(0, BitVecValue::from_u64(5, 3));
        state.insert(7, BitVecValue::from_u64(u64::MAX, 64));
        let msg = Message::reply().state(&state).u8(9);
        let mut cursor = Cursor::new(msg.0);
        let mut r = Reader::new(&mut cursor, 1024);
        let decoded = r.state().unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded[&0].width(), 3);
        assert_eq!(r.u8().unwrap(), 9);
    }

    #[test]
    fn oversized_blobs_are_refused() {
        let msg = Message::reply().blob(&[0; 32]);
        let mut cursor = Cursor::new(msg.0);
        let err = Reader::new(&mut cursor, 16).blob().unwrap_err();
        assert!(matches!(err, RemoteError::TooLarge { len: 32, max: 16 }));
    }

    #[test]
    fn unknown_opcodes_are_rejected() {
        let mut bytes = Header::bare(Opcode::Okay).encode();
        bytes[0] = 200;
        let err = Header::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, RemoteError::UnknownOpcode(200)));
        assert!(Opcode::StreamEof.is_data());
        assert!(!Opcode::Okay.is_data());
    }
}
