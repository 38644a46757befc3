#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Framed, length-prefixed, request-multiplexed TCP transport powering the
//! cache client/server protocol. One [`Transport`](transport::Transport)
//! instance runs as either a server (many connections, user handler,
//! replies) or a client (one shared connection, many concurrent callers
//! correlated by id), switching roles through `close`.

pub mod logging;
pub mod shared;

pub mod frame;
pub mod pool;
pub mod sync;

pub mod queue;
pub mod decode;
pub mod connection;
pub mod multiplex;

pub(crate) mod acceptor;
pub(crate) mod reader;

pub mod transport;

pub use crate::shared::{
    ConnectionId, CorrelationId, ProtocolError, Role, TransportError, TransportResult,
};
pub use crate::transport::{Handler, ReceivedMessage, Transport, TransportConfig};
