use crate::acceptor::{self, ServerShared};
use crate::connection::Connection;
use crate::decode::{self, FrameAssembler};
use crate::frame;
use crate::logging;
use crate::multiplex::Multiplexer;
use crate::pool::Pool;
use crate::queue::ChunkQueue;
use crate::reader;
use crate::shared::{ConnectionId, CorrelationId, Role, TransportError, TransportResult};
use crate::sync::Latch;
use parking_lot::Mutex;
use serde_derive::{Deserialize, Serialize};
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

// Receive buffers and the chunk queue scale with the connection bound.
const POOL_SCALE: usize = 10;

/// Transport tunables. `buffer_size` is the size of each pooled receive
/// buffer; `max_connections` bounds the number of concurrently serviced
/// connections in the server role.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub buffer_size: usize,
    pub max_connections: usize,
}

impl TransportConfig {
    pub const MIN_BUFFER_SIZE: usize = 256;

    fn validate(&self) -> TransportResult<()> {
        if self.buffer_size < Self::MIN_BUFFER_SIZE {
            return Err(TransportError::BadArgument("buffer_size must be at least 256"));
        }

        if self.max_connections < 1 {
            return Err(TransportError::BadArgument("max_connections must be at least 1"));
        }

        Ok(())
    }

    #[inline]
    fn queue_capacity(&self) -> usize {
        POOL_SCALE * self.max_connections
    }
}

/// Message handed to the server handler: the decoded payload plus the
/// routing data `server_send` needs to address the reply. Records are
/// pooled; `server_send` returns them once the reply is submitted.
pub struct ReceivedMessage {
    pub(crate) connection: ConnectionId,
    pub(crate) correlation: CorrelationId,
    pub(crate) payload: Vec<u8>,
}

impl ReceivedMessage {
    pub(crate) fn blank() -> ReceivedMessage {
        ReceivedMessage {
            connection: 0,
            correlation: 0,
            payload: Vec::new(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.connection = 0;
        self.correlation = 0;
        self.payload.clear();
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn correlation(&self) -> CorrelationId {
        self.correlation
    }

    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

/// User-supplied handler invoked with each message a server connection
/// decodes. Runs on the decode worker, so a handler that may block
/// indefinitely must off-load to its own executor.
pub type Handler = Arc<dyn Fn(ReceivedMessage) + Send + Sync>;

struct ClientState {
    connection: Arc<Connection>,
    multiplexer: Arc<Multiplexer>,
    queue: Arc<ChunkQueue>,
    next_correlation: AtomicU32,
    reader: Option<thread::JoinHandle<()>>,
    decoder: Option<thread::JoinHandle<()>>,
}

struct ServerState {
    listener_addr: SocketAddr,
    shared: Arc<ServerShared>,
    acceptor: Option<thread::JoinHandle<()>>,
    decoder: Option<thread::JoinHandle<()>>,
}

enum RoleState {
    Idle,
    Client(ClientState),
    Server(ServerState),
}

impl RoleState {
    #[inline]
    fn role(&self) -> Role {
        match self {
            RoleState::Idle => Role::Idle,
            RoleState::Client(_) => Role::Client,
            RoleState::Server(_) => Role::Server,
        }
    }
}

/// The transport facade: one object that runs as either the client or the
/// server side of the framed cache protocol. At most one role is active at
/// a time; roles switch only through `close`. All pooled resources are
/// owned here and shared with whichever role is running.
pub struct Transport {
    config: TransportConfig,
    role: Mutex<RoleState>,
    buffers: Arc<Pool<Vec<u8>>>,
    assemblers: Arc<Pool<FrameAssembler>>,
    latches: Arc<Pool<Latch>>,
    handoffs: Arc<Pool<ReceivedMessage>>,
    log: logging::Logger,
}

impl Transport {
    /// Build an idle transport. Rejects out-of-range tunables.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        config: TransportConfig,
        log: L,
    ) -> TransportResult<Transport> {
        config.validate()?;

        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            None => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let buffer_size = config.buffer_size;
        let buffer_count = POOL_SCALE * config.max_connections;

        Ok(Transport {
            config,
            role: Mutex::new(RoleState::Idle),
            buffers: Arc::new(Pool::new(buffer_count, buffer_count, move || vec![0u8; buffer_size])),
            assemblers: Arc::new(Pool::with_reset(
                config.max_connections,
                0,
                FrameAssembler::new,
                FrameAssembler::reset,
            )),
            latches: Arc::new(Pool::with_reset(config.max_connections, 0, Latch::new, |latch| {
                latch.reset()
            })),
            handoffs: Arc::new(Pool::with_reset(
                config.max_connections,
                0,
                ReceivedMessage::blank,
                ReceivedMessage::clear,
            )),
            log,
        })
    }

    /// Current role of the facade.
    #[inline]
    pub fn role(&self) -> Role {
        self.role.lock().role()
    }

    /// Number of currently connected clients in the server role.
    pub fn connected_clients(&self) -> u32 {
        match &*self.role.lock() {
            RoleState::Server(server) => server.shared.connected.load(Ordering::Acquire),
            _ => 0,
        }
    }

    /// Local address of the active listener or client socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.role.lock() {
            RoleState::Server(server) => Some(server.listener_addr),
            RoleState::Client(client) => client.connection.stream().local_addr().ok(),
            RoleState::Idle => None,
        }
    }

    /// Connect to a remote peer and enter the client role. Blocks until
    /// the socket is connected; on return the connection reader and the
    /// decode loop are running.
    pub fn connect(&self, address: &str) -> TransportResult<()> {
        let mut role = self.role.lock();

        if role.role() != Role::Idle {
            return Err(TransportError::StateMisuse {
                required: Role::Idle,
                current: role.role(),
            });
        }

        let endpoint = address.parse::<SocketAddr>()?;
        let stream = TcpStream::connect(endpoint)?;

        let connection = Arc::new(Connection::new(0, stream));
        let queue = Arc::new(ChunkQueue::new(self.config.queue_capacity()));
        let multiplexer = Arc::new(Multiplexer::new(self.latches.clone(), self.log.new(logging::o!())));

        let reader = {
            let connection = connection.clone();
            let buffers = self.buffers.clone();
            let queue = queue.clone();
            let multiplexer = multiplexer.clone();
            let log = self.log.new(logging::o!());

            thread::Builder::new()
                .name("cachewire-client-reader".into())
                .spawn(move || {
                    reader::run_reader(&connection, &buffers, &queue, &log);
                    // The stream is gone; no reply can arrive for anyone
                    // still parked.
                    multiplexer.cancel_all();
                })
                .expect("client reader thread must spawn")
        };

        let decoder = {
            let queue = queue.clone();
            let buffers = self.buffers.clone();
            let assemblers = self.assemblers.clone();
            let signal_mux = multiplexer.clone();
            let error_mux = multiplexer.clone();
            let error_connection = connection.clone();
            let log = self.log.new(logging::o!());

            thread::Builder::new()
                .name("cachewire-client-decode".into())
                .spawn(move || {
                    decode::run_decode_loop(
                        queue,
                        buffers,
                        assemblers,
                        move |_, correlation, payload| signal_mux.signal(correlation, payload),
                        move |_, _| {
                            // A desynchronized stream is fatal to the
                            // connection; release every caller.
                            error_connection.shutdown();
                            error_mux.cancel_all();
                        },
                        log,
                    )
                })
                .expect("client decode thread must spawn")
        };

        logging::info!(self.log, "connected"; "peer" => %endpoint);

        *role = RoleState::Client(ClientState {
            connection,
            multiplexer,
            queue,
            next_correlation: AtomicU32::new(1),
            reader: Some(reader),
            decoder: Some(decoder),
        });

        Ok(())
    }

    /// Bind the listener and enter the server role. Decoded messages are
    /// handed to `handler` on the decode worker; the handler replies
    /// through `server_send`. Returns as soon as the acceptor is running.
    pub fn listen(&self, address: &str, handler: Handler) -> TransportResult<()> {
        let mut role = self.role.lock();

        if role.role() != Role::Idle {
            return Err(TransportError::StateMisuse {
                required: Role::Idle,
                current: role.role(),
            });
        }

        let endpoint = address.parse::<SocketAddr>()?;
        let listener = TcpListener::bind(endpoint)?;
        let listener_addr = listener.local_addr()?;

        let queue = Arc::new(ChunkQueue::new(self.config.queue_capacity()));
        let shared = Arc::new(ServerShared::new(
            self.buffers.clone(),
            queue.clone(),
            self.config.max_connections,
            self.log.new(logging::o!()),
        ));

        let acceptor = {
            let shared = shared.clone();

            thread::Builder::new()
                .name("cachewire-acceptor".into())
                .spawn(move || acceptor::run_acceptor(listener, shared))
                .expect("acceptor thread must spawn")
        };

        let decoder = {
            let buffers = self.buffers.clone();
            let assemblers = self.assemblers.clone();
            let handoffs = self.handoffs.clone();
            let sink_shared = shared.clone();
            let error_shared = shared.clone();
            let log = self.log.new(logging::o!());

            thread::Builder::new()
                .name("cachewire-server-decode".into())
                .spawn(move || {
                    decode::run_decode_loop(
                        queue,
                        buffers,
                        assemblers,
                        move |connection, correlation, payload| {
                            // Connections that died between decode and
                            // dispatch have nowhere to reply; skip them.
                            if sink_shared.registry.get(connection).is_none() {
                                return;
                            }

                            let mut message = handoffs.acquire();
                            message.connection = connection;
                            message.correlation = correlation;
                            message.payload = payload;

                            handler(message);
                        },
                        move |connection, _| {
                            // Sever only the offending connection; its
                            // reader notices the shutdown and retires it.
                            if let Some(connection) = error_shared.registry.get(connection) {
                                connection.shutdown();
                            }
                        },
                        log,
                    )
                })
                .expect("server decode thread must spawn")
        };

        logging::info!(self.log, "listening"; "address" => %listener_addr);

        *role = RoleState::Server(ServerState {
            listener_addr,
            shared,
            acceptor: Some(acceptor),
            decoder: Some(decoder),
        });

        Ok(())
    }

    /// Encode and submit one request on the client connection. With
    /// `register_for_response` the caller is registered for the reply
    /// before the frame is written; the returned correlation id is what
    /// `client_receive` later parks on.
    pub fn client_send(&self, payload: &[u8], register_for_response: bool) -> TransportResult<CorrelationId> {
        let (connection, multiplexer, correlation) = {
            let role = self.role.lock();

            match &*role {
                RoleState::Client(client) => (
                    client.connection.clone(),
                    client.multiplexer.clone(),
                    client.next_correlation.fetch_add(1, Ordering::Relaxed),
                ),
                other => {
                    return Err(TransportError::StateMisuse {
                        required: Role::Client,
                        current: other.role(),
                    })
                }
            }
        };

        let frame = frame::encode_frame(correlation, payload)?;

        if register_for_response {
            multiplexer.register(correlation)?;
        }

        if let Err(error) = connection.send_frame(&frame) {
            if register_for_response {
                multiplexer.unregister(correlation);
            }

            return Err(error.into());
        }

        logging::trace!(self.log, "request submitted";
                        "correlation" => correlation,
                        "bytes" => frame.len());

        Ok(correlation)
    }

    /// Park until the reply correlated with `correlation` arrives and
    /// return its payload. A wait released by teardown surfaces as
    /// canceled.
    pub fn client_receive(&self, correlation: CorrelationId) -> TransportResult<Vec<u8>> {
        let multiplexer = {
            let role = self.role.lock();

            match &*role {
                RoleState::Client(client) => client.multiplexer.clone(),
                other => {
                    return Err(TransportError::StateMisuse {
                        required: Role::Client,
                        current: other.role(),
                    })
                }
            }
        };

        multiplexer.wait(correlation)
    }

    /// Reply to a received message: the payload is framed with the
    /// request's correlation id and written to the connection the request
    /// arrived on. The handoff record returns to its pool once the reply
    /// is submitted.
    pub fn server_send(&self, payload: &[u8], received: ReceivedMessage) -> TransportResult<()> {
        let shared = {
            let role = self.role.lock();

            match &*role {
                RoleState::Server(server) => server.shared.clone(),
                other => {
                    return Err(TransportError::StateMisuse {
                        required: Role::Server,
                        current: other.role(),
                    })
                }
            }
        };

        let connection = match shared.registry.get(received.connection) {
            Some(connection) => connection,
            None => {
                self.handoffs.release(received);
                return Err(TransportError::BadArgument("reply connection is no longer present"));
            }
        };

        let frame = frame::encode_frame(received.correlation, payload)?;
        let result = connection.send_frame(&frame).map_err(Into::into);

        logging::trace!(self.log, "reply submitted";
                        "connection" => received.connection,
                        "correlation" => received.correlation,
                        "bytes" => frame.len());

        self.handoffs.release(received);

        result
    }

    /// Leave the active role: wake every parked caller, stop the role's
    /// threads and release the role's sockets. The transport returns to
    /// idle and may connect or listen again.
    pub fn close(&self) {
        let previous = {
            let mut role = self.role.lock();
            mem::replace(&mut *role, RoleState::Idle)
        };

        match previous {
            RoleState::Idle => (),
            RoleState::Client(mut client) => {
                logging::debug!(self.log, "closing client role");

                client.connection.shutdown();
                client.multiplexer.cancel_all();
                client.queue.close();

                if let Some(handle) = client.reader.take() {
                    drop(handle.join());
                }

                if let Some(handle) = client.decoder.take() {
                    drop(handle.join());
                }
            }
            RoleState::Server(mut server) => {
                logging::debug!(self.log, "closing server role");

                server.shared.shutting_down.store(true, Ordering::Release);
                server.shared.permits.close();

                // Shut every live connection down so its reader retires.
                for connection in server.shared.registry.drain() {
                    connection.shutdown();
                }

                // Nudge the acceptor out of its parked accept.
                let mut wake_addr = server.listener_addr;
                if wake_addr.ip().is_unspecified() {
                    wake_addr.set_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
                }
                drop(TcpStream::connect(wake_addr));

                if let Some(handle) = server.acceptor.take() {
                    drop(handle.join());
                }

                // A connection accepted while the drain ran may have been
                // registered afterwards; sweep again now that accepts are
                // done.
                for connection in server.shared.registry.drain() {
                    connection.shutdown();
                }

                server.shared.queue.close();

                if let Some(handle) = server.decoder.take() {
                    drop(handle.join());
                }
            }
        }
    }

    /// Permanent teardown: leaves the active role and drains every pool.
    pub fn dispose(&self) {
        self.close();

        self.buffers.drain();
        self.assemblers.drain();
        self.latches.drain();
        self.handoffs.drain();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.dispose();
    }
}
