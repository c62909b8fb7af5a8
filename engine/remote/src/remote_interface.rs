//! The data channel: engine callbacks carried to the client that owns the
//! engine, and the client's side of answering them.
//!
//! Notifications and the stream operations that return nothing are one-way.
//! `fopen`, `stream-get` and `stream-eof` block the engine until the client
//! answers with a status byte followed by the result.
use crate::errors::{RemoteError, RemoteResult};
use crate::socket::Socket;
use crate::wire::{Header, Message, Opcode, Reader};
use baa::BitVecValue;
use slog::{warn, Logger};
use sluice_engine::interface::FId;
use sluice_engine::{Interface, VId};
use sluice_ir::Whence;
use std::io;
use std::sync::Arc;

const OK: u8 = 0;
const FAILED: u8 = 1;

fn to_io(err: RemoteError) -> io::Error {
    match err {
        RemoteError::Io(err) => err,
        other => io::Error::other(other),
    }
}

/// Forwards the callbacks of one engine over its client's data socket.
pub struct RemoteInterface {
    socket: Arc<Socket>,
    client: u32,
    engine: u32,
    max_message_bytes: usize,
    logger: Logger,
}

impl RemoteInterface {
    pub fn new(
        socket: Arc<Socket>,
        client: u32,
        engine: u32,
        max_message_bytes: usize,
        logger: Logger,
    ) -> Self {
        Self {
            socket,
            client,
            engine,
            max_message_bytes,
            logger,
        }
    }

    fn message(&self, op: Opcode) -> Message {
        Message::new(Header::new(op, self.client, self.engine, 0))
    }

    fn notify(&self, message: Message) {
        if let Err(err) = message.send(&mut &*self.socket) {
            warn!(
                self.logger,
                "lost a notification: {}", err;
                "client" => self.client
            );
        }
    }

    fn send(&self, message: Message) -> io::Result<()> {
        message.send(&mut &*self.socket)
    }

    /// Reads the status byte of an answer, then the answer itself.
    fn answer<T>(
        &self,
        read: impl FnOnce(&mut Reader<&Socket>) -> RemoteResult<T>,
    ) -> io::Result<T> {
        let mut socket: &Socket = &self.socket;
        let mut reader = Reader::new(&mut socket, self.max_message_bytes);
        match reader.u8().map_err(to_io)? {
            OK => read(&mut reader).map_err(to_io),
            _ => Err(io::Error::other(reader.string().map_err(to_io)?)),
        }
    }
}

impl Interface for RemoteInterface {
    fn write(&mut self, id: VId, bits: &BitVecValue) {
        self.notify(self.message(Opcode::Write).u32(id).bits(bits));
    }

    fn debug(&mut self, action: u32, text: &str) {
        self.notify(
            self.message(Opcode::Debug).u32(action).blob(text.as_bytes()),
        );
    }

    fn finish(&mut self, arg: u32) {
        self.notify(self.message(Opcode::Finish).u32(arg));
    }

    fn restart(&mut self, path: &str) {
        self.notify(self.message(Opcode::Restart).blob(path.as_bytes()));
    }

    fn retarget(&mut self, target: &str) {
        self.notify(self.message(Opcode::Retarget).blob(target.as_bytes()));
    }

    fn save(&mut self, path: &str) {
        self.notify(self.message(Opcode::Save).blob(path.as_bytes()));
    }

    fn yield_now(&mut self) {
        self.notify(self.message(Opcode::Yield));
    }

    fn fopen(&mut self, path: &str) -> io::Result<FId> {
        self.send(self.message(Opcode::Fopen).blob(path.as_bytes()))?;
        self.answer(|r| r.u64())
    }

    fn get(&mut self, fd: FId, max: usize) -> io::Result<Vec<u8>> {
        self.send(self.message(Opcode::StreamGet).u64(fd).u32(max as u32))?;
        self.answer(|r| r.blob())
    }

    fn put(&mut self, fd: FId, bytes: &[u8]) -> io::Result<()> {
        self.send(self.message(Opcode::StreamPut).u64(fd).blob(bytes))
    }

    fn seek(&mut self, fd: FId, offset: u64, whence: Whence) -> io::Result<()> {
        self.send(
            self.message(Opcode::StreamSeek)
                .u64(fd)
                .u64(offset)
                .u8(whence.code()),
        )
    }

    fn flush(&mut self, fd: FId) -> io::Result<()> {
        self.send(self.message(Opcode::StreamFlush).u64(fd))
    }

    fn eof(&mut self, fd: FId) -> io::Result<bool> {
        self.send(self.message(Opcode::StreamEof).u64(fd))?;
        self.answer(|r| Ok(r.u8()? != 0))
    }

    fn clear(&mut self, fd: FId) -> io::Result<()> {
        self.send(self.message(Opcode::StreamClear).u64(fd))
    }
}

fn reply<T>(
    result: io::Result<T>,
    encode: impl FnOnce(Message, T) -> Message,
) -> Message {
    match result {
        Ok(value) => encode(Message::reply().u8(OK), value),
        Err(err) => {
            Message::reply().u8(FAILED).blob(err.to_string().as_bytes())
        }
    }
}

/// Handles one data-channel message whose header was already read, on the
/// client side. A failed one-way stream operation is a
/// [RemoteError::Stream]: its payload was consumed and the channel stays
/// usable.
pub fn serve(
    header: &Header,
    socket: &Socket,
    max_message_bytes: usize,
    interface: &mut dyn Interface,
) -> RemoteResult<()> {
    let mut input: &Socket = socket;
    let mut r = Reader::new(&mut input, max_message_bytes);
    let reply = match header.op {
        Opcode::Write => {
            let id = r.u32()?;
            interface.write(id, &r.bits()?);
            None
        }
        Opcode::Debug => {
            let action = r.u32()?;
            interface.debug(action, &r.string()?);
            None
        }
        Opcode::Finish => {
            interface.finish(r.u32()?);
            None
        }
        Opcode::Restart => {
            interface.restart(&r.string()?);
            None
        }
        Opcode::Retarget => {
            interface.retarget(&r.string()?);
            None
        }
        Opcode::Save => {
            interface.save(&r.string()?);
            None
        }
        Opcode::Yield => {
            interface.yield_now();
            None
        }
        Opcode::Fopen => {
            let path = r.string()?;
            Some(reply(interface.fopen(&path), Message::u64))
        }
        Opcode::StreamGet => {
            let fd = r.u64()?;
            let max = r.u32()? as usize;
            Some(reply(interface.get(fd, max), |m, bytes| m.blob(&bytes)))
        }
        Opcode::StreamEof => {
            let fd = r.u64()?;
            Some(reply(interface.eof(fd), |m, eof| m.u8(eof as u8)))
        }
        Opcode::StreamPut => {
            let fd = r.u64()?;
            interface.put(fd, &r.blob()?).map_err(RemoteError::Stream)?;
            None
        }
        Opcode::StreamSeek => {
            let fd = r.u64()?;
            let offset = r.u64()?;
            let whence = Whence::from_code(r.u8()? as u64).ok_or(
                RemoteError::Unexpected {
                    expected: "a seek origin",
                    received: "an unknown code",
                },
            )?;
            interface.seek(fd, offset, whence).map_err(RemoteError::Stream)?;
            None
        }
        Opcode::StreamFlush => {
            interface.flush(r.u64()?).map_err(RemoteError::Stream)?;
            None
        }
        Opcode::StreamClear => {
            interface.clear(r.u64()?).map_err(RemoteError::Stream)?;
            None
        }
        other => {
            return Err(RemoteError::Unexpected {
                expected: "a data-channel message",
                received: other.name(),
            })
        }
    };
    if let Some(reply) = reply {
        reply.send(&mut &*socket)?;
    }
    Ok(())
}
