use crate::connection::Connection;
use crate::logging;
use crate::pool::Pool;
use crate::queue::{Chunk, ChunkEvent, ChunkQueue};
use std::io::Read;
use std::sync::Arc;

/// Receive loop for one connection. Owns the receive side: every received
/// chunk is tagged with the connection id and handed to the decode loop
/// through the bounded queue. A full queue parks this loop before the next
/// receive is issued, which is what turns into TCP-level back-pressure
/// instead of dropped data. Ends on peer close, receive error or queue
/// closure; the closed marker enqueued on the way out lets the decode loop
/// reclaim the connection's scratch state after its last chunk.
pub(crate) fn run_reader(
    connection: &Arc<Connection>,
    buffers: &Pool<Vec<u8>>,
    queue: &ChunkQueue,
    log: &logging::Logger,
) {
    loop {
        let mut buffer = buffers.acquire();
        let mut stream = connection.stream();

        match stream.read(&mut buffer[..]) {
            Ok(0) => {
                buffers.release(buffer);
                logging::debug!(log, "peer closed connection"; "connection" => connection.id());
                break;
            }
            Ok(len) => {
                let chunk = Chunk {
                    connection: connection.id(),
                    buffer,
                    len,
                };

                if let Err(rejected) = queue.enqueue(ChunkEvent::Data(chunk)) {
                    // The queue closed underneath us; put the buffer back
                    // and stop reading.
                    if let ChunkEvent::Data(chunk) = rejected {
                        buffers.release(chunk.buffer);
                    }

                    logging::debug!(log, "chunk queue closed"; "connection" => connection.id());
                    break;
                }
            }
            Err(error) => {
                buffers.release(buffer);
                logging::debug!(log, "receive failed";
                                "connection" => connection.id(),
                                "error" => ?error);
                break;
            }
        }
    }

    connection.shutdown();
    drop(queue.enqueue(ChunkEvent::Closed(connection.id())));
}
