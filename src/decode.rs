use crate::frame::FrameHeader;
use crate::logging;
use crate::pool::Pool;
use crate::queue::{Chunk, ChunkEvent, ChunkQueue};
use crate::shared::{ConnectionId, CorrelationId, ProtocolError, HEADER_SIZE};
use hashbrown::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;

/// Per-connection framing state machine. Reassembles discrete messages
/// from a stream of arbitrarily sized chunks: the header is staged until
/// all 8 bytes have arrived, however many chunks that takes, and the
/// payload is accumulated until the length recorded in the header is
/// reached. At any moment the assembler is either awaiting the header or
/// awaiting payload, never both.
pub struct FrameAssembler {
    staged: [u8; HEADER_SIZE],
    staged_len: usize,
    pending: Option<PendingFrame>,
    payload: Vec<u8>,
}

struct PendingFrame {
    remaining: usize,
    correlation: CorrelationId,
}

impl FrameAssembler {
    pub fn new() -> FrameAssembler {
        FrameAssembler {
            staged: [0; HEADER_SIZE],
            staged_len: 0,
            pending: None,
            payload: Vec::new(),
        }
    }

    /// Clears all framing state for reuse through a pool.
    pub fn reset(&mut self) {
        self.staged_len = 0;
        self.pending = None;
        self.payload.clear();
    }

    /// Consume one chunk worth of bytes, emitting every message they
    /// complete. Frames may span many chunks and one chunk may complete
    /// several frames; all completed frames are emitted before the call
    /// returns.
    pub fn feed<F>(&mut self, mut bytes: &[u8], sink: &mut F) -> Result<(), ProtocolError>
    where
        F: FnMut(CorrelationId, Vec<u8>),
    {
        while !bytes.is_empty() {
            match self.pending.take() {
                None => {
                    let take = (HEADER_SIZE - self.staged_len).min(bytes.len());
                    self.staged[self.staged_len..self.staged_len + take].copy_from_slice(&bytes[..take]);
                    self.staged_len += take;
                    bytes = &bytes[take..];

                    // The next chunk continues the header.
                    if self.staged_len < HEADER_SIZE {
                        continue;
                    }

                    let header = FrameHeader::read(&self.staged)?;
                    self.staged_len = 0;

                    if header.payload_len == 0 {
                        sink(header.correlation, Vec::new());
                    } else {
                        self.pending = Some(PendingFrame {
                            remaining: header.payload_len,
                            correlation: header.correlation,
                        });
                    }
                }
                Some(mut frame) => {
                    let take = frame.remaining.min(bytes.len());
                    self.payload.extend_from_slice(&bytes[..take]);
                    frame.remaining -= take;
                    bytes = &bytes[take..];

                    if frame.remaining == 0 {
                        let payload = mem::replace(&mut self.payload, Vec::new());
                        sink(frame.correlation, payload);
                    } else {
                        self.pending = Some(frame);
                    }
                }
            }
        }

        Ok(())
    }
}

/// Drives frame assembly for every connection feeding the shared queue.
/// Assembler state is keyed by the connection tag carried on each chunk,
/// acquired from the pool on a connection's first chunk and released on its
/// closed marker. Buffers return to their pool once consumed. A protocol
/// error poisons only the offending connection: its remaining chunks are
/// discarded until the closed marker arrives and `on_error` decides the
/// teardown. Runs until the queue closes.
pub fn run_decode_loop<S, E>(
    queue: Arc<ChunkQueue>,
    buffers: Arc<Pool<Vec<u8>>>,
    assemblers: Arc<Pool<FrameAssembler>>,
    mut sink: S,
    mut on_error: E,
    log: logging::Logger,
) where
    S: FnMut(ConnectionId, CorrelationId, Vec<u8>),
    E: FnMut(ConnectionId, ProtocolError),
{
    let mut states: HashMap<ConnectionId, FrameAssembler> = HashMap::new();
    let mut poisoned: HashSet<ConnectionId> = HashSet::new();

    while let Some(event) = queue.dequeue() {
        match event {
            ChunkEvent::Data(chunk) => {
                let Chunk { connection, buffer, len } = chunk;

                if !poisoned.contains(&connection) {
                    let state = states
                        .entry(connection)
                        .or_insert_with(|| assemblers.acquire());

                    let result = state.feed(&buffer[..len], &mut |correlation, payload| {
                        sink(connection, correlation, payload)
                    });

                    if let Err(error) = result {
                        logging::error!(log, "desynchronized stream";
                                        "connection" => connection,
                                        "error" => ?error);

                        if let Some(state) = states.remove(&connection) {
                            assemblers.release(state);
                        }

                        poisoned.insert(connection);
                        on_error(connection, error);
                    }
                }

                buffers.release(buffer);
            }
            ChunkEvent::Closed(connection) => {
                if let Some(state) = states.remove(&connection) {
                    assemblers.release(state);
                }

                poisoned.remove(&connection);

                logging::trace!(log, "connection drained"; "connection" => connection);
            }
        }
    }

    // Queue closed mid-stream; hand the remaining scratch state back.
    for (_, state) in states.drain() {
        assemblers.release(state);
    }
}
