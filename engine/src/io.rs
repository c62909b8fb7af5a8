//! Formatted reads and writes on top of the caller's stream operations.
use crate::bits;
use crate::interface::{FId, Host};
use baa::{BitVecOps, BitVecValue};
use num_bigint::BigUint;
use sluice_ir::{Radix, Whence};
use std::io;

/// Bytes requested from the caller per refill of a read-ahead buffer.
const CHUNK: usize = 64;

impl Host {
    fn next_byte(&mut self, fd: FId) -> io::Result<Option<u8>> {
        let queue = self.pending.entry(fd).or_default();
        if queue.is_empty() {
            let bytes = self.interface().get(fd, CHUNK)?;
            self.pending.entry(fd).or_default().extend(bytes);
        }
        Ok(self.pending.entry(fd).or_default().pop_front())
    }

    fn unread(&mut self, fd: FId, byte: u8) {
        self.pending.entry(fd).or_default().push_front(byte);
    }

    /// Looks at the next byte without consuming it. This is what raises the
    /// end-of-file flag of an empty stream.
    pub fn peek(&mut self, fd: FId) -> io::Result<Option<u8>> {
        let byte = self.next_byte(fd)?;
        if let Some(b) = byte {
            self.unread(fd, b);
        }
        Ok(byte)
    }

    /// A stream is at its end once the caller reported it and nothing is
    /// left in the read-ahead buffer.
    pub fn eof(&mut self, fd: FId) -> io::Result<bool> {
        let buffered = self.pending.get(&fd).is_some_and(|q| !q.is_empty());
        Ok(!buffered && self.interface().eof(fd)?)
    }

    pub fn clear(&mut self, fd: FId) -> io::Result<()> {
        self.interface().clear(fd)
    }

    pub fn flush(&mut self, fd: FId) -> io::Result<()> {
        self.interface().flush(fd)
    }

    /// Repositions a stream. Read-ahead bytes are dropped.
    pub fn seek(
        &mut self,
        fd: FId,
        offset: u64,
        whence: Whence,
    ) -> io::Result<()> {
        let buffered = self.pending.remove(&fd).map_or(0, |q| q.len() as u64);
        match whence {
            // the caller's position is ahead of ours by the buffered bytes
            Whence::Current if buffered > 0 => self.interface().seek(
                fd,
                offset.wrapping_sub(buffered),
                Whence::Current,
            ),
            _ => self.interface().seek(fd, offset, whence),
        }
    }

    /// Writes `value` as digits in `radix`, without separators.
    pub fn printf(
        &mut self,
        fd: FId,
        value: &BitVecValue,
        radix: Radix,
    ) -> io::Result<()> {
        let text = value.to_big_uint().to_str_radix(radix.base());
        self.interface().put(fd, text.as_bytes())
    }

    /// Skips whitespace and reads one number in `radix`. Returns `None`, and
    /// consumes nothing but the whitespace, if the stream does not continue
    /// with a digit.
    pub fn scanf(
        &mut self,
        fd: FId,
        width: u32,
        radix: Radix,
    ) -> io::Result<Option<BitVecValue>> {
        let mut digits = vec![];
        loop {
            match self.next_byte(fd)? {
                Some(b) if b.is_ascii_whitespace() && digits.is_empty() => {}
                Some(b) if (b as char).is_digit(radix.base()) => digits.push(b),
                Some(b) => {
                    self.unread(fd, b);
                    break;
                }
                None => break,
            }
        }
        Ok(BigUint::parse_bytes(&digits, radix.base())
            .map(|big| bits::from_big(&big, width)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::LocalInterface;

    #[test]
    fn scanf_reads_one_token_at_a_time() {
        let local = LocalInterface::new().with_stream(9, b"  12 ff\n101");
        let mut host = Host::new(Box::new(local));
        let a = host.scanf(9, 8, Radix::Dec).unwrap().unwrap();
        let b = host.scanf(9, 8, Radix::Hex).unwrap().unwrap();
        let c = host.scanf(9, 8, Radix::Bin).unwrap().unwrap();
        assert_eq!(
            (a.to_u64(), b.to_u64(), c.to_u64()),
            (Some(12), Some(255), Some(5))
        );
        assert!(host.scanf(9, 8, Radix::Dec).unwrap().is_none());
        assert!(host.eof(9).unwrap());
    }

    #[test]
    fn scanf_truncates_to_the_destination() {
        let local = LocalInterface::new().with_stream(9, b"300");
        let mut host = Host::new(Box::new(local));
        let v = host.scanf(9, 8, Radix::Dec).unwrap().unwrap();
        assert_eq!(v.to_u64(), Some(300 - 256));
    }

    #[test]
    fn printf_uses_the_radix() {
        let local = LocalInterface::new();
        let mut host = Host::new(Box::new(local.clone()));
        host.printf(3, &BitVecValue::from_u64(10, 8), Radix::Bin).unwrap();
        host.printf(3, &BitVecValue::from_u64(255, 8), Radix::Hex).unwrap();
        assert_eq!(local.contents(3), b"1010ff");
    }

    #[test]
    fn peek_marks_empty_streams() {
        let local = LocalInterface::new().with_stream(4, b"");
        let mut host = Host::new(Box::new(local));
        assert_eq!(host.peek(4).unwrap(), None);
        assert!(host.eof(4).unwrap());
    }
}
