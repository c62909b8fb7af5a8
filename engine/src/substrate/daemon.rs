//! Register access forwarded to a device daemon over a local socket.
//!
//! Every request is a fixed 40-byte command packet of five little-endian
//! words `{command, slot, app, addr, data}`. Writes are not acknowledged. A
//! read is a read request followed by a read-response request, which the
//! daemon answers with a 16-byte `{error code, data}` packet.
use super::Substrate;
use crate::errors::{RuntimeError, RuntimeResult};
use std::fmt;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

const COMMAND_BYTES: usize = 40;
const RESPONSE_BYTES: usize = 16;

/// Read-response requests sent before a `retry` answer becomes an error.
const MAX_RETRIES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Command {
    ReadRequest = 0,
    ReadResponse = 1,
    WriteRequest = 2,
    WriteResponse = 3,
}

/// Outcome codes of the daemon protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Success,
    Retry,
    AlignmentFailure,
    ProtectionFailure,
    AppDoesNotExist,
    Timeout,
    Unknown,
}

impl DaemonStatus {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => DaemonStatus::Success,
            1 => DaemonStatus::Retry,
            2 => DaemonStatus::AlignmentFailure,
            3 => DaemonStatus::ProtectionFailure,
            4 => DaemonStatus::AppDoesNotExist,
            5 => DaemonStatus::Timeout,
            _ => DaemonStatus::Unknown,
        }
    }

    pub fn code(self) -> u64 {
        match self {
            DaemonStatus::Success => 0,
            DaemonStatus::Retry => 1,
            DaemonStatus::AlignmentFailure => 2,
            DaemonStatus::ProtectionFailure => 3,
            DaemonStatus::AppDoesNotExist => 4,
            DaemonStatus::Timeout => 5,
            DaemonStatus::Unknown => 6,
        }
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DaemonStatus::Success => "success",
            DaemonStatus::Retry => "retry",
            DaemonStatus::AlignmentFailure => "an alignment failure",
            DaemonStatus::ProtectionFailure => "a protection failure",
            DaemonStatus::AppDoesNotExist => "that the app does not exist",
            DaemonStatus::Timeout => "a timeout",
            DaemonStatus::Unknown => "an unknown failure",
        };
        f.write_str(text)
    }
}

/// A connection to the daemon on behalf of one programmed app.
#[derive(Debug)]
pub struct DaemonSubstrate {
    stream: UnixStream,
    slot: u64,
    app: u64,
}

impl DaemonSubstrate {
    pub fn connect<P: AsRef<Path>>(
        path: P,
        slot: u64,
        app: u64,
    ) -> RuntimeResult<Self> {
        Ok(Self {
            stream: UnixStream::connect(path)?,
            slot,
            app,
        })
    }

    fn send(
        &mut self,
        command: Command,
        addr: u64,
        data: u64,
    ) -> RuntimeResult<()> {
        let mut packet = [0u8; COMMAND_BYTES];
        for (chunk, word) in packet
            .chunks_exact_mut(8)
            .zip([command as u64, self.slot, self.app, addr, data])
        {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        self.stream.write_all(&packet)?;
        Ok(())
    }

    fn receive(&mut self) -> RuntimeResult<(DaemonStatus, u64)> {
        let mut packet = [0u8; RESPONSE_BYTES];
        self.stream.read_exact(&mut packet)?;
        let (code, data) = packet.split_at(8);
        let word = |bytes: &[u8]| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(bytes);
            u64::from_le_bytes(buf)
        };
        Ok((DaemonStatus::from_code(word(code)), word(data)))
    }
}

impl Substrate for DaemonSubstrate {
    fn read(&mut self, addr: u64) -> RuntimeResult<u64> {
        self.send(Command::ReadRequest, addr, 0)?;
        for _ in 0..MAX_RETRIES {
            self.send(Command::ReadResponse, 0, 0)?;
            match self.receive()? {
                (DaemonStatus::Success, data) => return Ok(data),
                (DaemonStatus::Retry, _) => continue,
                (status, _) => {
                    return Err(RuntimeError::Daemon { status, addr }.into());
                }
            }
        }
        Err(RuntimeError::Daemon {
            status: DaemonStatus::Retry,
            addr,
        }
        .into())
    }

    fn write(&mut self, addr: u64, value: u64) -> RuntimeResult<()> {
        self.send(Command::WriteRequest, addr, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn words(packet: &[u8; COMMAND_BYTES]) -> [u64; 5] {
        let mut out = [0; 5];
        for (w, chunk) in out.iter_mut().zip(packet.chunks_exact(8)) {
            *w = u64::from_le_bytes(chunk.try_into().unwrap());
        }
        out
    }

    fn respond(stream: &mut UnixStream, status: DaemonStatus, data: u64) {
        let mut packet = [0u8; RESPONSE_BYTES];
        packet[..8].copy_from_slice(&status.code().to_le_bytes());
        packet[8..].copy_from_slice(&data.to_le_bytes());
        stream.write_all(&packet).unwrap();
    }

    /// A register file behind the daemon protocol. Address 0x40 answers
    /// `retry` once, address 0x80 belongs to nobody.
    fn fake_daemon(
        listener: UnixListener,
    ) -> thread::JoinHandle<Vec<[u64; 5]>> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut registers = HashMap::new();
            let mut seen = vec![];
            let mut pending = 0;
            let mut retried = false;
            let mut packet = [0u8; COMMAND_BYTES];
            while stream.read_exact(&mut packet).is_ok() {
                let [command, _, _, addr, data] = words(&packet);
                seen.push(words(&packet));
                match command {
                    0 => pending = addr,
                    1 if pending == 0x40 && !retried => {
                        retried = true;
                        respond(&mut stream, DaemonStatus::Retry, 0);
                    }
                    1 if pending == 0x80 => {
                        respond(&mut stream, DaemonStatus::ProtectionFailure, 0)
                    }
                    1 => {
                        let value =
                            registers.get(&pending).copied().unwrap_or(0);
                        respond(&mut stream, DaemonStatus::Success, value);
                    }
                    2 => {
                        registers.insert(addr, data);
                    }
                    _ => unreachable!(),
                }
            }
            seen
        })
    }

    #[test]
    fn registers_round_trip_through_the_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.sock");
        let daemon = fake_daemon(UnixListener::bind(&path).unwrap());

        let mut sub = DaemonSubstrate::connect(&path, 3, 11).unwrap();
        sub.write(0x10, 0xdead_beef).unwrap();
        assert_eq!(sub.read(0x10).unwrap(), 0xdead_beef);
        sub.write(0x40, 7).unwrap();
        assert_eq!(sub.read(0x40).unwrap(), 7);
        let err = sub.read(0x80).unwrap_err();
        assert!(matches!(
            &*err,
            RuntimeError::Daemon {
                status: DaemonStatus::ProtectionFailure,
                addr: 0x80
            }
        ));
        drop(sub);

        let seen = daemon.join().unwrap();
        assert_eq!(seen[0], [2, 3, 11, 0x10, 0xdead_beef]);
        assert!(seen.iter().all(|p| p[1] == 3 && p[2] == 11));
        // the retried read sent two response requests
        let polls = seen.iter().filter(|p| p[0] == 1).count();
        assert_eq!(polls, 4);
    }
}
