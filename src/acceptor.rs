use crate::connection::{Connection, Registry};
use crate::logging;
use crate::pool::Pool;
use crate::queue::ChunkQueue;
use crate::reader;
use crate::shared::ConnectionId;
use crate::sync::Semaphore;
use std::net::{Shutdown, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// State shared between the acceptor, the per-connection service threads
/// and the facade.
pub(crate) struct ServerShared {
    pub registry: Registry,
    pub buffers: Arc<Pool<Vec<u8>>>,
    pub queue: Arc<ChunkQueue>,
    pub permits: Semaphore,
    pub connected: AtomicU32,
    pub shutting_down: AtomicBool,
    next_id: AtomicUsize,
    pub log: logging::Logger,
}

impl ServerShared {
    pub fn new(
        buffers: Arc<Pool<Vec<u8>>>,
        queue: Arc<ChunkQueue>,
        max_connections: usize,
        log: logging::Logger,
    ) -> ServerShared {
        ServerShared {
            registry: Registry::new(),
            buffers,
            queue,
            permits: Semaphore::new(max_connections),
            connected: AtomicU32::new(0),
            shutting_down: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
            log,
        }
    }

    #[inline]
    fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Accept loop. Each accepted connection is registered and counted
/// immediately; its service thread then waits for an admission permit, so
/// a saturated server parks new connections without stalling further
/// accepts.
pub(crate) fn run_acceptor(listener: TcpListener, shared: Arc<ServerShared>) {
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(error) => {
                if shared.shutting_down.load(Ordering::Acquire) {
                    break;
                }

                logging::warn!(shared.log, "accept failed"; "error" => ?error);
                continue;
            }
        };

        if shared.shutting_down.load(Ordering::Acquire) {
            drop(stream.shutdown(Shutdown::Both));
            break;
        }

        let id = shared.next_connection_id();
        let connection = Arc::new(Connection::new(id, stream));

        shared.registry.insert(connection.clone());
        shared.connected.fetch_add(1, Ordering::AcqRel);

        logging::debug!(shared.log, "connection accepted";
                        "connection" => id,
                        "peer" => %peer,
                        "connected" => shared.connected.load(Ordering::Acquire));

        let service_shared = shared.clone();
        thread::Builder::new()
            .name(format!("cachewire-conn-{}", id))
            .spawn(move || service_connection(connection, service_shared))
            .expect("connection service thread must spawn");
    }

    logging::debug!(shared.log, "acceptor stopped");
}

/// Runs one connection: admission control first, then the reader loop, then
/// the bookkeeping that keeps permits, counters and the registry balanced.
fn service_connection(connection: Arc<Connection>, shared: Arc<ServerShared>) {
    if shared.permits.acquire() {
        reader::run_reader(&connection, &shared.buffers, &shared.queue, &shared.log);
        shared.permits.release();
    } else {
        // The server closed while this connection was parked for a permit.
        connection.shutdown();
    }

    shared.registry.remove(connection.id());
    shared.connected.fetch_sub(1, Ordering::AcqRel);

    logging::debug!(shared.log, "connection retired";
                    "connection" => connection.id(),
                    "connected" => shared.connected.load(Ordering::Acquire));
}
