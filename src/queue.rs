use crate::shared::ConnectionId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// One pooled receive buffer handed from a connection reader to the decode
/// loop. `len` is the count of valid bytes; the buffer goes back to its
/// pool once the decode loop has consumed them.
#[derive(Debug)]
pub struct Chunk {
    pub connection: ConnectionId,
    pub buffer: Vec<u8>,
    pub len: usize,
}

/// Event consumed by the decode loop. `Closed` follows the last chunk of a
/// connection, ordering decoder-state cleanup after all of its data.
#[derive(Debug)]
pub enum ChunkEvent {
    Data(Chunk),
    Closed(ConnectionId),
}

/// Bounded blocking FIFO handing chunks from the receive path to the
/// decode loop. A full queue blocks the producer, which stops further
/// receives on that connection and turns into TCP-level back-pressure.
pub struct ChunkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

struct QueueState {
    items: VecDeque<ChunkEvent>,
    closed: bool,
}

impl ChunkQueue {
    pub fn new(capacity: usize) -> ChunkQueue {
        ChunkQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Append one event, parking while the queue is full. A closed queue
    /// rejects the event and hands it back so the caller can release any
    /// pooled buffer it carries.
    pub fn enqueue(&self, event: ChunkEvent) -> Result<(), ChunkEvent> {
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(event);
            }

            if state.items.len() < self.capacity {
                state.items.push_back(event);
                self.not_empty.notify_one();
                return Ok(());
            }

            self.not_full.wait(&mut state);
        }
    }

    /// Remove the oldest event, parking while the queue is empty. Returns
    /// `None` once the queue is closed and fully drained.
    pub fn dequeue(&self) -> Option<ChunkEvent> {
        let mut state = self.state.lock();

        loop {
            if let Some(event) = state.items.pop_front() {
                self.not_full.notify_one();
                return Some(event);
            }

            if state.closed {
                return None;
            }

            self.not_empty.wait(&mut state);
        }
    }

    /// Close the queue, waking parked producers and consumers.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of events currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn chunk(connection: ConnectionId, fill: u8) -> ChunkEvent {
        ChunkEvent::Data(Chunk {
            connection,
            buffer: vec![fill; 8],
            len: 8,
        })
    }

    fn unwrap_chunk(event: ChunkEvent) -> Chunk {
        match event {
            ChunkEvent::Data(chunk) => chunk,
            event => panic!("unexpected event {:?}", event),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = ChunkQueue::new(4);

        for fill in 0..4 {
            queue.enqueue(chunk(0, fill)).unwrap();
        }

        for fill in 0..4 {
            let chunk = unwrap_chunk(queue.dequeue().unwrap());
            assert_eq!(chunk.buffer[0], fill);
        }
    }

    #[test]
    fn test_enqueue_blocks_when_full() {
        let queue = Arc::new(ChunkQueue::new(2));

        queue.enqueue(chunk(0, 0)).unwrap();
        queue.enqueue(chunk(0, 1)).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.enqueue(chunk(0, 2)).unwrap())
        };

        // The producer must park rather than grow the queue.
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.len(), 2);

        let first = unwrap_chunk(queue.dequeue().unwrap());
        assert_eq!(first.buffer[0], 0);

        producer.join().unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_dequeue_blocks_until_data() {
        let queue = Arc::new(ChunkQueue::new(2));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || unwrap_chunk(queue.dequeue().unwrap()))
        };

        thread::sleep(Duration::from_millis(30));
        queue.enqueue(chunk(7, 9)).unwrap();

        let received = consumer.join().unwrap();
        assert_eq!(received.connection, 7);
        assert_eq!(received.buffer[0], 9);
    }

    #[test]
    fn test_close_rejects_producer_with_event() {
        let queue = ChunkQueue::new(2);

        queue.close();

        let rejected = queue.enqueue(chunk(3, 5)).unwrap_err();
        let rejected = unwrap_chunk(rejected);

        assert_eq!(rejected.connection, 3);
    }

    #[test]
    fn test_close_drains_then_ends() {
        let queue = ChunkQueue::new(4);

        queue.enqueue(chunk(0, 1)).unwrap();
        queue.close();

        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_close_wakes_parked_consumer() {
        let queue = Arc::new(ChunkQueue::new(2));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.dequeue().is_none())
        };

        thread::sleep(Duration::from_millis(30));
        queue.close();

        assert!(consumer.join().unwrap());
    }
}
