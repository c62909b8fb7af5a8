//! The sockets of every connected client.
use crate::errors::{RemoteError, RemoteResult};
use crate::socket::Socket;
use sluice_idx::impl_index;
use sluice_idx::maps::Tombstones;
use sluice_idx::IndexRef;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientIdx(u32);
impl_index!(ClientIdx);

/// A client's control socket, reserved for barrier traffic, and its data
/// socket, bound by the second phase of the handshake.
#[derive(Debug)]
pub struct ClientSockets {
    pub control: Arc<Socket>,
    pub data: Option<Arc<Socket>>,
}

impl ClientSockets {
    fn shutdown(&self) {
        self.control.shutdown();
        if let Some(data) = &self.data {
            data.shutdown();
        }
    }
}

/// Client ids are handed out in increasing order and never reused. A closed
/// client leaves an empty slot behind.
#[derive(Debug, Default)]
pub struct ClientTable {
    clients: Tombstones<ClientIdx, ClientSockets>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, control: Arc<Socket>) -> u32 {
        let idx = self.clients.push(ClientSockets {
            control,
            data: None,
        });
        idx.index() as u32
    }

    pub fn bind_data(
        &mut self,
        id: u32,
        data: Arc<Socket>,
    ) -> RemoteResult<()> {
        let client = self
            .clients
            .get_mut(ClientIdx::new(id as usize))
            .ok_or(RemoteError::UnknownClient(id))?;
        client.data = Some(data);
        Ok(())
    }

    pub fn data(&self, id: u32) -> Option<Arc<Socket>> {
        self.clients
            .get(ClientIdx::new(id as usize))
            .and_then(|c| c.data.clone())
    }

    /// Forgets a client and closes both of its sockets.
    pub fn close(&mut self, id: u32) -> bool {
        match self.clients.retire(ClientIdx::new(id as usize)) {
            Some(sockets) => {
                sockets.shutdown();
                true
            }
            None => false,
        }
    }

    /// Control sockets of every open client, by id.
    pub fn controls(&self) -> Vec<(u32, Arc<Socket>)> {
        self.clients
            .live()
            .map(|(idx, c)| (idx.index() as u32, Arc::clone(&c.control)))
            .collect()
    }

    /// Closes every client.
    pub fn close_all(&mut self) {
        for sockets in self.clients.drain_live() {
            sockets.shutdown();
        }
    }
}
