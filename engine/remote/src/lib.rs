//! Serving engines over sockets.
//!
//! A [Server] hosts engines for any number of clients. Each client opens a
//! control connection, reserved for [state-safe interrupts](barrier), and a
//! data connection that carries its engine calls and the callbacks those
//! calls produce. Compiles arrive on short-lived connections of their own.
//! A [Connection] is the client side; its [RemoteEngine]s implement the same
//! [Engine](sluice_engine::Engine) trait as local ones, which is also how
//! the [proxy back end](proxy::ProxyBackend) chains servers.
pub mod barrier;
pub mod client;
pub mod clients;
pub mod compile;
pub mod config;
pub mod engine_table;
pub mod errors;
mod poll;
mod pool;
pub mod proxy;
pub mod remote_interface;
pub mod server;
pub mod socket;
pub mod wire;

pub use client::{Connection, RemoteEngine};
pub use config::ServerConfig;
pub use errors::{RemoteError, RemoteResult};
pub use server::{Server, ServerHandle};
pub use socket::Endpoint;
