//! The client side of a connection. A [Connection] performs the two-phase
//! handshake, answers state-safe interrupts, and compiles modules into
//! [RemoteEngine]s that behave like local ones.
use crate::errors::{RemoteError, RemoteResult};
use crate::remote_interface;
use crate::socket::{Endpoint, Socket};
use crate::wire::{Header, Message, Opcode, Reader};
use baa::BitVecValue;
use parking_lot::Mutex;
use sluice_engine::{
    BoxedRuntimeError, Engine, Input, Interface, RuntimeError, RuntimeResult,
    State, VId,
};
use sluice_ir::Module;
use sluice_ir::parser::to_json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn to_runtime(err: RemoteError) -> BoxedRuntimeError {
    match err {
        RemoteError::Engine(err) => err,
        RemoteError::Io(err) => RuntimeError::Io(err).into(),
        RemoteError::Refused(reason) => RuntimeError::Remote(reason).into(),
        other => RuntimeError::Remote(other.to_string()).into(),
    }
}

/// Reads the answer to a request: `okay` followed by `result`, or `fail`
/// followed by a reason.
fn outcome<T>(
    header: &Header,
    reader: &mut Reader<&Socket>,
    op: Opcode,
    result: impl FnOnce(&mut Reader<&Socket>) -> RemoteResult<T>,
) -> RemoteResult<T> {
    if header.op == Opcode::Fail {
        return Err(RemoteError::Refused(format!(
            "{}: {}",
            op.name(),
            reader.string()?
        )));
    }
    header.expect(Opcode::Okay)?;
    result(reader)
}

struct Link {
    client: u32,
    endpoint: Endpoint,
    /// The data socket. Holding it keeps the client out of a state-safe
    /// interrupt, and an interrupt in progress holds it.
    gate: Arc<Mutex<Socket>>,
    control: Arc<Socket>,
    acknowledger: Mutex<Option<thread::JoinHandle<()>>>,
    closed: AtomicBool,
    max_message_bytes: usize,
}

impl Link {
    /// Sends a request on a fresh connection and reads the answer.
    fn transient<T>(
        &self,
        request: Message,
        op: Opcode,
        result: impl FnOnce(&mut Reader<&Socket>) -> RemoteResult<T>,
    ) -> RemoteResult<T> {
        let socket = self.endpoint.connect()?;
        request.send(&mut &socket)?;
        let header = Header::read(&mut &socket)?;
        let mut input: &Socket = &socket;
        let mut reader = Reader::new(&mut input, self.max_message_bytes);
        let answer = outcome(&header, &mut reader, op, result);
        socket.shutdown();
        answer
    }
}

impl Link {
    /// Says goodbye once. The server closes both sockets in response.
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let close = Header::new(Opcode::CloseConn, self.client, 0, 0);
        let _ = close.write(&mut &*self.gate.lock());
        self.control.shutdown();
        if let Some(handle) = self.acknowledger.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Answers `begin` by taking the gate, so that no engine call is in flight,
/// and keeps it until `finish`.
fn acknowledge(control: Arc<Socket>, gate: Arc<Mutex<Socket>>) {
    while let Ok(header) = Header::read(&mut &*control) {
        if header.op != Opcode::StateSafeBegin {
            break;
        }
        let _held = gate.lock();
        if header
            .with_op(Opcode::StateSafeOkay)
            .write(&mut &*control)
            .is_err()
        {
            break;
        }
        match Header::read(&mut &*control) {
            Ok(header) if header.op == Opcode::StateSafeFinish => {}
            _ => break,
        }
    }
}

/// A connection to a server. Clones share the same connection, which closes
/// when the last clone and the last engine compiled through it are dropped.
#[derive(Clone)]
pub struct Connection {
    link: Arc<Link>,
}

impl Connection {
    pub fn connect(
        endpoint: &Endpoint,
        max_message_bytes: usize,
    ) -> RemoteResult<Self> {
        let control = endpoint.connect()?;
        Header::bare(Opcode::OpenConn1).write(&mut &control)?;
        let reply = Header::read(&mut &control)?;
        reply.expect(Opcode::Okay)?;
        let client = reply.client;

        let data = endpoint.connect()?;
        Header::new(Opcode::OpenConn2, client, 0, 0).write(&mut &data)?;
        let reply = Header::read(&mut &data)?;
        let mut input: &Socket = &data;
        let mut reader = Reader::new(&mut input, max_message_bytes);
        outcome(&reply, &mut reader, Opcode::OpenConn2, |_| Ok(()))?;

        let control = Arc::new(control);
        let gate = Arc::new(Mutex::new(data));
        let acknowledger = thread::Builder::new()
            .name(format!("sluice-client-{client}"))
            .spawn({
                let control = Arc::clone(&control);
                let gate = Arc::clone(&gate);
                move || acknowledge(control, gate)
            })?;
        Ok(Self {
            link: Arc::new(Link {
                client,
                endpoint: endpoint.clone(),
                gate,
                control,
                acknowledger: Mutex::new(Some(acknowledger)),
                closed: AtomicBool::new(false),
                max_message_bytes,
            }),
        })
    }

    /// The id the server assigned to this client.
    pub fn id(&self) -> u32 {
        self.link.client
    }

    /// Compiles `module` with the server's `backend` as engine `engine` of
    /// this client. The engine reports back through `interface`.
    pub fn compile(
        &self,
        engine: u32,
        backend: &str,
        module: &Module,
        interface: Box<dyn Interface>,
    ) -> RemoteResult<RemoteEngine> {
        let source = to_json(module).map_err(RuntimeError::from)?;
        let header = Header::new(Opcode::Compile, self.link.client, engine, 0);
        let request = Message::new(header)
            .blob(backend.as_bytes())
            .blob(&source);
        let instance =
            self.link.transient(request, Opcode::Compile, |r| r.u32())?;
        Ok(RemoteEngine {
            link: Arc::clone(&self.link),
            engine,
            instance,
            interface,
            torn_down: false,
        })
    }

    /// Stops the compiles of `engine` that are still running. Returns how
    /// many there were.
    pub fn stop_compile(&self, engine: u32) -> RemoteResult<u32> {
        let request = Message::new(Header::new(
            Opcode::StopCompile,
            self.link.client,
            engine,
            0,
        ));
        self.link.transient(request, Opcode::StopCompile, |r| r.u32())
    }

    /// Closes the connection. The server tears down every engine of this
    /// client, so engines compiled through it stop working.
    pub fn close(self) {
        self.link.close();
    }
}

/// An engine running on a server.
pub struct RemoteEngine {
    link: Arc<Link>,
    engine: u32,
    instance: u32,
    interface: Box<dyn Interface>,
    torn_down: bool,
}

impl RemoteEngine {
    fn header(&self, op: Opcode) -> Header {
        Header::new(op, self.link.client, self.engine, self.instance)
    }

    /// Sends a call that is not answered.
    fn post(
        &mut self,
        op: Opcode,
        args: impl FnOnce(Message) -> Message,
    ) -> RuntimeResult<()> {
        let socket = self.link.gate.lock();
        args(Message::new(self.header(op))).send(&mut &*socket)?;
        Ok(())
    }

    /// Sends a call and serves the data channel until it is answered.
    fn call<T>(
        &mut self,
        op: Opcode,
        args: impl FnOnce(Message) -> Message,
        result: impl FnOnce(&mut Reader<&Socket>) -> RemoteResult<T>,
    ) -> RuntimeResult<T> {
        let socket = self.link.gate.lock();
        args(Message::new(self.header(op))).send(&mut &*socket)?;
        let mut stream_failure = None;
        let answer = loop {
            let header = Header::read(&mut &*socket).map_err(to_runtime)?;
            if header.op.is_data() {
                match remote_interface::serve(
                    &header,
                    &socket,
                    self.link.max_message_bytes,
                    self.interface.as_mut(),
                ) {
                    Ok(()) => {}
                    Err(RemoteError::Stream(err))
                        if stream_failure.is_none() =>
                    {
                        stream_failure = Some(err);
                    }
                    Err(RemoteError::Stream(_)) => {}
                    Err(err) => return Err(to_runtime(err)),
                }
                continue;
            }
            let mut input: &Socket = &socket;
            let mut reader =
                Reader::new(&mut input, self.link.max_message_bytes);
            break outcome(&header, &mut reader, op, result)
                .map_err(to_runtime)?;
        };
        match stream_failure {
            Some(err) => Err(RuntimeError::Io(err).into()),
            None => Ok(answer),
        }
    }

    fn flag(&mut self, op: Opcode) -> RuntimeResult<bool> {
        self.call(op, |m| m, |r| Ok(r.u8()? != 0))
    }

    fn unit(&mut self, op: Opcode) -> RuntimeResult<()> {
        self.call(op, |m| m, |_| Ok(()))
    }
}

impl RemoteEngine {
    /// Deletes the engine on the server. Dropping the engine does the same,
    /// ignoring failures.
    pub fn teardown(mut self) -> RuntimeResult<()> {
        self.torn_down = true;
        self.unit(Opcode::TeardownEngine)
    }
}

impl Drop for RemoteEngine {
    fn drop(&mut self) {
        if !self.torn_down && !self.link.closed.load(Ordering::SeqCst) {
            let _ = self.unit(Opcode::TeardownEngine);
        }
    }
}

impl Engine for RemoteEngine {
    fn get_state(&mut self) -> RuntimeResult<State> {
        self.call(Opcode::GetState, |m| m, |r| r.state())
    }

    fn set_state(&mut self, state: &State) -> RuntimeResult<()> {
        self.post(Opcode::SetState, |m| m.state(state))
    }

    fn get_input(&mut self) -> RuntimeResult<Input> {
        self.call(Opcode::GetInput, |m| m, |r| r.state())
    }

    fn set_input(&mut self, input: &Input) -> RuntimeResult<()> {
        self.post(Opcode::SetInput, |m| m.state(input))
    }

    fn finalize(&mut self) -> RuntimeResult<()> {
        self.unit(Opcode::Finalize)
    }

    fn read(&mut self, id: VId, bits: &BitVecValue) -> RuntimeResult<()> {
        self.post(Opcode::Read, |m| m.u32(id).bits(bits))
    }

    fn evaluate(&mut self) -> RuntimeResult<()> {
        self.unit(Opcode::Evaluate)
    }

    fn there_are_updates(&mut self) -> RuntimeResult<bool> {
        self.flag(Opcode::ThereAreUpdates)
    }

    fn update(&mut self) -> RuntimeResult<()> {
        self.unit(Opcode::Update)
    }

    fn there_were_tasks(&mut self) -> RuntimeResult<bool> {
        self.flag(Opcode::ThereWereTasks)
    }

    fn conditional_update(&mut self) -> RuntimeResult<bool> {
        self.flag(Opcode::ConditionalUpdate)
    }

    fn open_loop(
        &mut self,
        clk: VId,
        val: bool,
        itr: u32,
    ) -> RuntimeResult<u32> {
        self.call(
            Opcode::OpenLoop,
            |m| m.u32(clk).u8(val as u8).u32(itr),
            |r| r.u32(),
        )
    }

    fn overrides_done_step(&mut self) -> RuntimeResult<bool> {
        self.flag(Opcode::OverridesDoneStep)
    }

    fn done_step(&mut self) -> RuntimeResult<()> {
        self.post(Opcode::DoneStep, |m| m)
    }

    fn overrides_done_simulation(&mut self) -> RuntimeResult<bool> {
        self.flag(Opcode::OverridesDoneSimulation)
    }

    fn done_simulation(&mut self) -> RuntimeResult<()> {
        self.post(Opcode::DoneSimulation, |m| m)
    }
}
