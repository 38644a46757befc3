use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Reusable one-shot latch. `wait` parks the calling thread until `set`
/// fires; `reset` returns the latch to the unset state so it can go back
/// into a pool. Handles are clonable and share the same underlying state.
#[derive(Clone)]
pub struct Latch {
    inner: Arc<LatchInner>,
}

struct LatchInner {
    set: Mutex<bool>,
    signal: Condvar,
}

impl Latch {
    pub fn new() -> Latch {
        Latch {
            inner: Arc::new(LatchInner {
                set: Mutex::new(false),
                signal: Condvar::new(),
            }),
        }
    }

    #[inline]
    pub fn set(&self) {
        let mut set = self.inner.set.lock();
        *set = true;
        self.inner.signal.notify_all();
    }

    #[inline]
    pub fn wait(&self) {
        let mut set = self.inner.set.lock();

        while !*set {
            self.inner.signal.wait(&mut set);
        }
    }

    #[inline]
    pub fn reset(&self) {
        *self.inner.set.lock() = false;
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        *self.inner.set.lock()
    }
}

/// Counting semaphore bounding the number of concurrently serviced
/// connections. `acquire` parks until a permit frees; `close` releases all
/// parked waiters empty-handed so shutdown never strands a thread.
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    available: Condvar,
}

struct SemaphoreState {
    permits: usize,
    closed: bool,
}

impl Semaphore {
    pub fn new(permits: usize) -> Semaphore {
        Semaphore {
            state: Mutex::new(SemaphoreState { permits, closed: false }),
            available: Condvar::new(),
        }
    }

    /// Take one permit, parking until one frees. Returns false if the
    /// semaphore was closed instead.
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return false;
            }

            if state.permits > 0 {
                state.permits -= 1;
                return true;
            }

            self.available.wait(&mut state);
        }
    }

    /// Return one permit.
    pub fn release(&self) {
        let mut state = self.state.lock();
        state.permits += 1;
        self.available.notify_one();
    }

    /// Wake every parked waiter; subsequent acquires fail.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_latch_set_then_wait() {
        let latch = Latch::new();

        latch.set();
        latch.wait();

        assert!(latch.is_set());
    }

    #[test]
    fn test_latch_wakes_parked_waiter() {
        let latch = Latch::new();
        let waiter = latch.clone();

        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(20));
        latch.set();

        handle.join().unwrap();
    }

    #[test]
    fn test_latch_reset_reuse() {
        let latch = Latch::new();

        latch.set();
        latch.wait();
        latch.reset();

        assert!(!latch.is_set());

        let waiter = latch.clone();
        let handle = thread::spawn(move || waiter.wait());

        thread::sleep(Duration::from_millis(20));
        latch.set();

        handle.join().unwrap();
    }

    #[test]
    fn test_semaphore_bounds_permits() {
        let semaphore = Semaphore::new(2);

        assert!(semaphore.acquire());
        assert!(semaphore.acquire());

        let parked = Arc::new(Semaphore::new(0));
        let waiter = parked.clone();
        let handle = thread::spawn(move || waiter.acquire());

        thread::sleep(Duration::from_millis(20));
        parked.release();

        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_semaphore_close_releases_parked() {
        let semaphore = Arc::new(Semaphore::new(0));
        let waiter = semaphore.clone();

        let handle = thread::spawn(move || waiter.acquire());

        thread::sleep(Duration::from_millis(20));
        semaphore.close();

        assert!(!handle.join().unwrap());
        assert!(!semaphore.acquire());
    }
}
