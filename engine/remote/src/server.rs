//! The server: listeners, client handshakes, compile requests and engine
//! calls.
//!
//! A single dispatch thread polls the listeners and every connection it
//! owns. Handshakes and engine calls are served on that thread, in arrival
//! order. Compiles and open-loop runs go to the worker pool, taking their
//! connection out of the poll set until they answer.
use crate::barrier::Barrier;
use crate::clients::ClientTable;
use crate::compile::CompilePipeline;
use crate::config::ServerConfig;
use crate::engine_table::EngineTable;
use crate::errors::RemoteResult;
use crate::poll;
use crate::pool::WorkerPool;
use crate::remote_interface::RemoteInterface;
use crate::socket::{Endpoint, Listener, Socket};
use crate::wire::{Header, Message, Opcode, Reader};
use parking_lot::Mutex;
use slog::{debug, info, o, warn, Logger};
use sluice_engine::backend::Compiler;
use sluice_engine::{Engine, RuntimeResult};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

type Call = Box<
    dyn FnOnce(&mut dyn Engine, Message) -> RuntimeResult<Message> + Send,
>;

fn call<F>(f: F) -> Call
where
    F: FnOnce(&mut dyn Engine, Message) -> RuntimeResult<Message>
        + Send
        + 'static,
{
    Box::new(f)
}

/// A polled connection. Data sockets know their client once bound.
struct Conn {
    socket: Arc<Socket>,
    client: Option<u32>,
}

/// What happens to a connection after one of its messages.
enum Next {
    /// Keep polling it.
    Keep,
    Close,
    /// Someone else owns it now.
    Park,
    /// Try the message again on the next iteration.
    Defer(Header),
}

/// State shared by the dispatch thread and the workers.
struct Shared {
    clients: Arc<Mutex<ClientTable>>,
    engines: Arc<Mutex<EngineTable>>,
    pipeline: CompilePipeline,
    /// Connections handed back by workers.
    rearm: Mutex<Vec<Conn>>,
    max_message_bytes: usize,
    logger: Logger,
}

impl Shared {
    fn reply_fail(
        &self,
        socket: &Socket,
        header: Header,
        reason: &str,
    ) -> RemoteResult<()> {
        Message::new(header.with_op(Opcode::Fail))
            .blob(reason.as_bytes())
            .send(&mut &*socket)?;
        Ok(())
    }

    /// Runs an engine call and answers it, unless it is one-way.
    fn execute(
        &self,
        socket: &Socket,
        header: Header,
        call: Call,
    ) -> RemoteResult<()> {
        let engine = self
            .engines
            .lock()
            .get(header.client, header.engine, header.instance);
        let outcome = match engine {
            Some(engine) => {
                let mut engine = engine.lock();
                call(&mut **engine, Message::new(header.with_op(Opcode::Okay)))
                    .map_err(|e| e.to_string())
            }
            None => Err(format!(
                "no engine {}/{}/{}",
                header.client, header.engine, header.instance
            )),
        };
        match outcome {
            Ok(_) if header.op.is_one_way() => {}
            Ok(reply) => reply.send(&mut &*socket)?,
            Err(reason) if header.op.is_one_way() => {
                warn!(
                    self.logger,
                    "{} failed: {}", header.op.name(), reason;
                    "client" => header.client
                );
            }
            Err(reason) => self.reply_fail(socket, header, &reason)?,
        }
        Ok(())
    }

    fn compile(
        &self,
        socket: &Socket,
        header: Header,
        backend: String,
        source: Vec<u8>,
    ) -> RemoteResult<()> {
        let data = self.clients.lock().data(header.client);
        let Some(data) = data else {
            return self.reply_fail(
                socket,
                header,
                "client has no data channel",
            );
        };
        let interface = RemoteInterface::new(
            data,
            header.client,
            header.engine,
            self.max_message_bytes,
            self.logger.clone(),
        );
        match self.pipeline.compile(
            header.client,
            header.engine,
            &backend,
            &source,
            Box::new(interface),
        ) {
            Ok(instance) => Message::new(header.with_op(Opcode::Okay))
                .u32(instance)
                .send(&mut &*socket)?,
            Err(err) => {
                warn!(
                    self.logger,
                    "compile failed: {}", err;
                    "client" => header.client
                );
                self.reply_fail(socket, header, &err.to_string())?
            }
        }
        Ok(())
    }
}

/// Stops a running server from another thread.
#[derive(Debug, Clone, Default)]
pub struct ServerHandle(Arc<AtomicBool>);

impl ServerHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Server {
    listeners: Vec<Listener>,
    shared: Arc<Shared>,
    pool: WorkerPool,
    poll_timeout: Duration,
    handle: ServerHandle,
    logger: Logger,
}

impl Server {
    /// Binds every listener the configuration names. Nothing is served
    /// until [Server::run].
    pub fn bind(
        config: &ServerConfig,
        compiler: Compiler,
        logger: Logger,
    ) -> RemoteResult<Self> {
        let mut listeners = vec![Listener::tcp(&config.tcp_address())?];
        if let Some(path) = &config.path {
            listeners.push(Listener::unix(path.clone())?);
        }
        let clients = Arc::new(Mutex::new(ClientTable::new()));
        let engines = Arc::new(Mutex::new(EngineTable::new()));
        let barrier = Barrier::new(
            Arc::clone(&clients),
            logger.new(o!("part" => "barrier")),
        );
        let pipeline = CompilePipeline::new(
            compiler,
            config.runtime,
            Arc::clone(&engines),
            Arc::new(barrier),
            logger.clone(),
        );
        Ok(Self {
            listeners,
            shared: Arc::new(Shared {
                clients,
                engines,
                pipeline,
                rearm: Mutex::new(vec![]),
                max_message_bytes: config.max_message_bytes,
                logger: logger.clone(),
            }),
            pool: WorkerPool::new(
                config.workers,
                logger.new(o!("part" => "pool")),
            )?,
            poll_timeout: config.poll_timeout(),
            handle: ServerHandle::default(),
            logger,
        })
    }

    /// Where clients can reach this server.
    pub fn endpoints(&self) -> RemoteResult<Vec<Endpoint>> {
        Ok(self
            .listeners
            .iter()
            .map(Listener::endpoint)
            .collect::<Result<_, _>>()?)
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Serves until [ServerHandle::stop] is called, then tears down every
    /// engine and closes every connection.
    pub fn run(mut self) -> RemoteResult<()> {
        for endpoint in self.endpoints()? {
            info!(self.logger, "listening on {}", endpoint);
        }
        let mut conns: Vec<Conn> = vec![];
        let mut deferred: Vec<(Conn, Header)> = vec![];
        let result = self.serve(&mut conns, &mut deferred);

        for conn in conns.iter().chain(deferred.iter().map(|(c, _)| c)) {
            conn.socket.shutdown();
        }
        self.pool.join();
        self.shared.clients.lock().close_all();
        let engines = self.shared.engines.lock().drain();
        info!(self.logger, "stopped"; "engines" => engines.len());
        result
    }

    fn serve(
        &self,
        conns: &mut Vec<Conn>,
        deferred: &mut Vec<(Conn, Header)>,
    ) -> RemoteResult<()> {
        while !self.handle.stopped() {
            conns.append(&mut self.shared.rearm.lock());
            for (conn, header) in std::mem::take(deferred) {
                self.settle(conn, Ok(header), conns, deferred);
            }

            let fds: Vec<_> = self
                .listeners
                .iter()
                .map(AsRawFd::as_raw_fd)
                .chain(conns.iter().map(|c| c.socket.as_raw_fd()))
                .collect();
            let ready = poll::readable(&fds, self.poll_timeout)?;
            let (listening, polled) = ready.split_at(self.listeners.len());

            let accepting = self
                .listeners
                .iter()
                .zip(listening)
                .filter(|(_, ready)| **ready);
            for (listener, _) in accepting {
                match listener.accept() {
                    Ok(socket) => conns.push(Conn {
                        socket: Arc::new(socket),
                        client: None,
                    }),
                    Err(err) => warn!(self.logger, "accept failed: {}", err),
                }
            }

            let mut idle = Vec::with_capacity(conns.len());
            // connections accepted above were not polled yet
            let readiness =
                polled.iter().copied().chain(std::iter::repeat(false));
            for (conn, ready) in conns.drain(..).zip(readiness) {
                if ready {
                    let header = Header::read(&mut &*conn.socket);
                    self.settle(conn, header, &mut idle, deferred);
                } else {
                    idle.push(conn);
                }
            }
            *conns = idle;
        }
        Ok(())
    }

    /// Handles `first` and whatever else `conn` already has waiting, then
    /// files the connection where it belongs.
    fn settle(
        &self,
        mut conn: Conn,
        first: RemoteResult<Header>,
        polled: &mut Vec<Conn>,
        deferred: &mut Vec<(Conn, Header)>,
    ) {
        let mut next =
            first.and_then(|header| self.dispatch(&mut conn, header));
        loop {
            match next {
                Ok(Next::Keep) => {
                    match poll::has_input(conn.socket.as_raw_fd()) {
                        Ok(true) => {
                            next = Header::read(&mut &*conn.socket).and_then(
                                |header| self.dispatch(&mut conn, header),
                            );
                        }
                        Ok(false) => return polled.push(conn),
                        Err(err) => next = Err(err.into()),
                    }
                }
                Ok(Next::Park) => return,
                Ok(Next::Defer(header)) => return deferred.push((conn, header)),
                Ok(Next::Close) => return conn.socket.shutdown(),
                Err(err) => {
                    debug!(self.logger, "connection closed: {}", err);
                    match conn.client {
                        // the client's data channel is gone, so is the client
                        Some(client) => {
                            let close =
                                Header::new(Opcode::CloseConn, client, 0, 0);
                            next = self.dispatch(&mut conn, close);
                        }
                        None => return conn.socket.shutdown(),
                    }
                }
            }
        }
    }

    fn dispatch(&self, conn: &mut Conn, header: Header) -> RemoteResult<Next> {
        let shared = &self.shared;
        let socket = &conn.socket;
        let mut input: &Socket = socket;
        let mut r = Reader::new(&mut input, shared.max_message_bytes);
        let call = match header.op {
            Opcode::OpenConn1 => {
                let Some(mut clients) = shared.clients.try_lock() else {
                    return Ok(Next::Defer(header));
                };
                let id = clients.open(Arc::clone(socket));
                Header::new(Opcode::Okay, id, 0, 0).write(&mut &**socket)?;
                info!(self.logger, "client connected"; "client" => id);
                return Ok(Next::Park);
            }
            Opcode::OpenConn2 => {
                let Some(mut clients) = shared.clients.try_lock() else {
                    return Ok(Next::Defer(header));
                };
                let bound =
                    clients.bind_data(header.client, Arc::clone(socket));
                if let Err(err) = bound {
                    drop(clients);
                    shared.reply_fail(socket, header, &err.to_string())?;
                    return Ok(Next::Close);
                }
                drop(clients);
                conn.client = Some(header.client);
                header.with_op(Opcode::Okay).write(&mut &**socket)?;
                return Ok(Next::Keep);
            }
            Opcode::CloseConn => {
                let Some(mut clients) = shared.clients.try_lock() else {
                    return Ok(Next::Defer(header));
                };
                if clients.close(header.client) {
                    let engines =
                        shared.engines.lock().teardown_client(header.client);
                    info!(
                        self.logger,
                        "client disconnected";
                        "client" => header.client,
                        "engines" => engines.len()
                    );
                }
                return Ok(Next::Close);
            }
            Opcode::Compile => {
                let backend = r.string()?;
                let source = r.blob()?;
                let shared = Arc::clone(shared);
                let socket = Arc::clone(socket);
                self.pool.submit(move || {
                    let answered =
                        shared.compile(&socket, header, backend, source);
                    if let Err(err) = answered {
                        warn!(
                            shared.logger,
                            "could not answer a compile: {}", err
                        );
                    }
                    socket.shutdown();
                });
                return Ok(Next::Park);
            }
            Opcode::StopCompile => {
                let stopped =
                    shared.pipeline.stop(header.client, header.engine);
                Message::new(header.with_op(Opcode::Okay))
                    .u32(stopped as u32)
                    .send(&mut &**socket)?;
                return Ok(Next::Keep);
            }
            Opcode::TeardownEngine => {
                shared
                    .engines
                    .lock()
                    .teardown(header.client, header.engine, header.instance);
                header.with_op(Opcode::Okay).write(&mut &**socket)?;
                return Ok(Next::Keep);
            }
            Opcode::GetState => call(|e, m| Ok(m.state(&e.get_state()?))),
            Opcode::SetState => {
                let state = r.state()?;
                call(move |e, m| e.set_state(&state).map(|()| m))
            }
            Opcode::GetInput => call(|e, m| Ok(m.state(&e.get_input()?))),
            Opcode::SetInput => {
                let input = r.state()?;
                call(move |e, m| e.set_input(&input).map(|()| m))
            }
            Opcode::Finalize => call(|e, m| e.finalize().map(|()| m)),
            Opcode::Read => {
                let id = r.u32()?;
                let bits = r.bits()?;
                call(move |e, m| e.read(id, &bits).map(|()| m))
            }
            Opcode::Evaluate => call(|e, m| e.evaluate().map(|()| m)),
            Opcode::ThereAreUpdates => {
                call(|e, m| Ok(m.u8(e.there_are_updates()? as u8)))
            }
            Opcode::Update => call(|e, m| e.update().map(|()| m)),
            Opcode::ThereWereTasks => {
                call(|e, m| Ok(m.u8(e.there_were_tasks()? as u8)))
            }
            Opcode::ConditionalUpdate => {
                call(|e, m| Ok(m.u8(e.conditional_update()? as u8)))
            }
            Opcode::OverridesDoneStep => {
                call(|e, m| Ok(m.u8(e.overrides_done_step()? as u8)))
            }
            Opcode::DoneStep => call(|e, m| e.done_step().map(|()| m)),
            Opcode::OverridesDoneSimulation => {
                call(|e, m| Ok(m.u8(e.overrides_done_simulation()? as u8)))
            }
            Opcode::DoneSimulation => {
                call(|e, m| e.done_simulation().map(|()| m))
            }
            Opcode::OpenLoop => {
                let clk = r.u32()?;
                let val = r.u8()? != 0;
                let itr = r.u32()?;
                let open_loop =
                    call(move |e, m| Ok(m.u32(e.open_loop(clk, val, itr)?)));
                let shared = Arc::clone(shared);
                let conn = Conn {
                    socket: Arc::clone(socket),
                    client: conn.client,
                };
                self.pool.submit(move || {
                    let answered =
                        shared.execute(&conn.socket, header, open_loop);
                    if let Err(err) = answered {
                        warn!(
                            shared.logger,
                            "could not answer {}: {}",
                            header.op.name(),
                            err
                        );
                    }
                    shared.rearm.lock().push(conn);
                });
                return Ok(Next::Park);
            }
            other => {
                warn!(self.logger, "unexpected {} from a client", other.name());
                return Ok(Next::Close);
            }
        };
        shared.execute(socket, header, call)?;
        Ok(Next::Keep)
    }
}
