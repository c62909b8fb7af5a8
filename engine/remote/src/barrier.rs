//! The state-safe interrupt: every connected client is brought to a safe
//! point before a disruptive operation runs.
use crate::clients::ClientTable;
use crate::wire::{Header, Opcode};
use parking_lot::Mutex;
use slog::{debug, warn, Logger};
use sluice_engine::RuntimeResult;
use sluice_engine::backend::InterruptScheduler;
use std::sync::Arc;

/// Broadcasts `begin`, waits for every `okay`, runs the operation and
/// broadcasts `finish`. The client table stays locked throughout, so no
/// client joins or leaves mid-barrier and a second interrupt waits for the
/// first to finish.
///
/// There is no acknowledgment timeout: an unresponsive client stalls the
/// barrier. A client whose control socket is closed counts as having
/// acknowledged.
pub struct Barrier {
    clients: Arc<Mutex<ClientTable>>,
    logger: Logger,
}

impl Barrier {
    pub fn new(clients: Arc<Mutex<ClientTable>>, logger: Logger) -> Self {
        Self { clients, logger }
    }
}

impl InterruptScheduler for Barrier {
    fn state_safe(
        &self,
        op: &mut dyn FnMut() -> RuntimeResult<()>,
    ) -> RuntimeResult<()> {
        let clients = self.clients.lock();
        let controls = clients.controls();
        debug!(
            self.logger,
            "state-safe interrupt";
            "clients" => controls.len()
        );

        let mut waiting = vec![];
        for (id, socket) in controls {
            let begin = Header::new(Opcode::StateSafeBegin, id, 0, 0);
            match begin.write(&mut &*socket) {
                Ok(()) => waiting.push((id, socket)),
                Err(err) => debug!(
                    self.logger,
                    "client is gone: {}", err;
                    "client" => id
                ),
            }
        }
        for (id, socket) in &waiting {
            match Header::read(&mut &**socket) {
                Ok(header) if header.op == Opcode::StateSafeOkay => {}
                Ok(header) => warn!(
                    self.logger,
                    "expected {}, received {}",
                    Opcode::StateSafeOkay.name(),
                    header.op.name();
                    "client" => id
                ),
                Err(err) => debug!(
                    self.logger,
                    "client is gone: {}", err;
                    "client" => id
                ),
            }
        }

        // failures go back to the caller, after everyone is released
        let result = op();

        for (id, socket) in &waiting {
            let finish = Header::new(Opcode::StateSafeFinish, *id, 0, 0);
            if let Err(err) = finish.write(&mut &**socket) {
                debug!(self.logger, "client is gone: {}", err; "client" => id);
            }
        }
        drop(clients);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::Socket;
    use std::io::Read;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn discard() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    /// Acknowledges one interrupt and reports what it saw.
    fn client(
        mut stream: UnixStream,
        acked: Arc<AtomicBool>,
    ) -> thread::JoinHandle<Vec<Opcode>> {
        thread::spawn(move || {
            let mut seen = vec![];
            let begin = Header::read(&mut stream).unwrap();
            seen.push(begin.op);
            acked.store(true, Ordering::SeqCst);
            begin.with_op(Opcode::StateSafeOkay).write(&mut stream).unwrap();
            seen.push(Header::read(&mut stream).unwrap().op);
            let mut rest = vec![];
            stream.read_to_end(&mut rest).unwrap();
            seen
        })
    }

    #[test]
    fn operation_runs_after_every_acknowledgment() {
        let clients = Arc::new(Mutex::new(ClientTable::new()));
        let (server, peer) = UnixStream::pair().unwrap();
        clients.lock().open(Arc::new(Socket::Unix(server)));
        let (server, gone) = UnixStream::pair().unwrap();
        clients.lock().open(Arc::new(Socket::Unix(server)));
        drop(gone);

        let acked = Arc::new(AtomicBool::new(false));
        let peer = client(peer, Arc::clone(&acked));
        let barrier = Barrier::new(Arc::clone(&clients), discard());
        let mut ran = false;
        barrier
            .state_safe(&mut || {
                assert!(acked.load(Ordering::SeqCst));
                ran = true;
                Ok(())
            })
            .unwrap();
        assert!(ran);
        clients.lock().close_all();
        assert_eq!(
            peer.join().unwrap(),
            vec![Opcode::StateSafeBegin, Opcode::StateSafeFinish]
        );
    }

    #[test]
    fn interrupts_do_not_interleave() {
        let barrier = Arc::new(Barrier::new(
            Arc::new(Mutex::new(ClientTable::new())),
            discard(),
        ));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let inside = Arc::clone(&inside);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    barrier
                        .state_safe(&mut || {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_millis(10));
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
