use crate::shared::ConnectionId;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

/// One accepted or outbound TCP connection. The reader thread exclusively
/// drives the receive side; replies and requests go through `send_frame`,
/// which submits each frame as a single contiguous write under the send
/// lock, so frames from concurrent senders never interleave on the wire.
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    send_lock: Mutex<()>,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream) -> Connection {
        let peer = stream.peer_addr().ok();

        Connection {
            id,
            stream,
            send_lock: Mutex::new(()),
            peer,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[inline]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Submit one framed message as a single contiguous write.
    #[inline]
    pub fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        let _guard = self.send_lock.lock();
        (&self.stream).write_all(frame)
    }

    /// Shut down both directions, releasing a reader parked in `read`.
    #[inline]
    pub fn shutdown(&self) {
        drop(self.stream.shutdown(Shutdown::Both));
    }
}

/// Live connections keyed by id. Handoff records reference connections by
/// id only; the registry resolves them at reply time, so a handoff never
/// keeps a dead socket alive.
pub struct Registry {
    connections: RwLock<IndexMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry {
            connections: RwLock::new(IndexMap::new()),
        }
    }

    #[inline]
    pub fn insert(&self, connection: Arc<Connection>) {
        self.connections.write().insert(connection.id(), connection);
    }

    #[inline]
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().swap_remove(&id)
    }

    #[inline]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Remove and return every live connection. Used during teardown.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        self.connections.write().drain(..).map(|(_, connection)| connection).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }
}
