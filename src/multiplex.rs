use crate::logging;
use crate::pool::Pool;
use crate::shared::{CorrelationId, ProtocolError, TransportError, TransportResult};
use crate::sync::Latch;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Reply delivered to a waiter: the payload, or notice that the wait was
/// released by connection teardown.
enum Reply {
    Payload(Vec<u8>),
    Canceled,
}

/// Per-caller record: a pooled latch for the wakeup and a single-slot inbox
/// for the reply.
struct Waiter {
    latch: Latch,
    reply: Mutex<Option<Reply>>,
}

/// Correlates responses arriving on the shared client connection with the
/// caller that issued the request. Callers park on pooled latches; the
/// receive side signals them by correlation id in whatever order replies
/// arrive. Registration and removal take the write side of the table lock,
/// lookups for signal and wait take the read side.
pub struct Multiplexer {
    waiters: RwLock<HashMap<CorrelationId, Arc<Waiter>>>,
    latches: Arc<Pool<Latch>>,
    log: logging::Logger,
}

impl Multiplexer {
    pub fn new(latches: Arc<Pool<Latch>>, log: logging::Logger) -> Multiplexer {
        Multiplexer {
            waiters: RwLock::new(HashMap::new()),
            latches,
            log,
        }
    }

    /// Register a waiter before its request is submitted. A collision on
    /// the correlation id is a caller bug, surfaced as a protocol error
    /// distinct from ordinary I/O failures.
    pub fn register(&self, id: CorrelationId) -> TransportResult<()> {
        let mut waiters = self.waiters.write();

        if waiters.contains_key(&id) {
            return Err(TransportError::Protocol(ProtocolError::DuplicateCorrelation(id)));
        }

        let waiter = Arc::new(Waiter {
            latch: self.latches.acquire(),
            reply: Mutex::new(None),
        });

        waiters.insert(id, waiter);

        Ok(())
    }

    /// Deliver a response payload. An unknown id is a late reply for a
    /// caller that already gave up; it is logged and discarded.
    pub fn signal(&self, id: CorrelationId, payload: Vec<u8>) {
        let waiter = self.waiters.read().get(&id).cloned();

        match waiter {
            Some(waiter) => {
                *waiter.reply.lock() = Some(Reply::Payload(payload));
                waiter.latch.set();
            }
            None => {
                logging::warn!(self.log, "discarding reply with no waiter"; "correlation" => id);
            }
        }
    }

    /// Park until the reply for the id arrives, then release the
    /// registration and return the payload.
    pub fn wait(&self, id: CorrelationId) -> TransportResult<Vec<u8>> {
        let waiter = self
            .waiters
            .read()
            .get(&id)
            .cloned()
            .ok_or(TransportError::BadArgument("no waiter registered for correlation id"))?;

        waiter.latch.wait();

        let reply = waiter.reply.lock().take();

        // Give up our handle before unregistering so the waiter unwraps and
        // its latch can return to the pool.
        drop(waiter);
        self.unregister(id);

        match reply {
            Some(Reply::Payload(payload)) => Ok(payload),
            _ => Err(TransportError::Canceled),
        }
    }

    /// Remove the registration and hand its latch back to the pool.
    pub fn unregister(&self, id: CorrelationId) {
        let removed = self.waiters.write().remove(&id);

        if let Some(waiter) = removed {
            if let Ok(waiter) = Arc::try_unwrap(waiter) {
                self.latches.release(waiter.latch);
            }
            // A signal in flight still holds the waiter; the latch drops
            // with it instead of returning to the pool.
        }
    }

    /// Wake every outstanding waiter with a canceled notice. Runs when the
    /// connection goes away so no caller stays parked forever.
    pub fn cancel_all(&self) {
        let drained: Vec<(CorrelationId, Arc<Waiter>)> = self.waiters.write().drain().collect();

        for (id, waiter) in drained {
            logging::debug!(self.log, "canceling waiter"; "correlation" => id);

            *waiter.reply.lock() = Some(Reply::Canceled);
            waiter.latch.set();
        }
    }

    /// Number of registrations still awaiting a reply.
    pub fn outstanding(&self) -> usize {
        self.waiters.read().len()
    }
}
