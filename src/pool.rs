use parking_lot::Mutex;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Bounded LIFO free-list of reusable instances. The pool is a soft cache
/// rather than a hard cap: `acquire` falls back to the factory when the
/// pool is empty, and `release` drops the instance when the pool is already
/// at capacity. No operation blocks.
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    capacity: usize,
    factory: Factory<T>,
    reset: Option<Reset<T>>,
}

impl<T> Pool<T> {
    pub fn new<F>(capacity: usize, initial_fill: usize, factory: F) -> Pool<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(capacity, initial_fill, Box::new(factory), None)
    }

    pub fn with_reset<F, R>(capacity: usize, initial_fill: usize, factory: F, reset: R) -> Pool<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        Self::build(capacity, initial_fill, Box::new(factory), Some(Box::new(reset)))
    }

    fn build(capacity: usize, initial_fill: usize, factory: Factory<T>, reset: Option<Reset<T>>) -> Pool<T> {
        let fill = initial_fill.min(capacity);
        let mut items = Vec::with_capacity(capacity);

        for _ in 0..fill {
            items.push((factory)());
        }

        Pool {
            items: Mutex::new(items),
            capacity,
            factory,
            reset,
        }
    }

    /// Provides a pooled instance if one is available, a fresh one
    /// otherwise.
    #[inline]
    pub fn acquire(&self) -> T {
        let pooled = self.items.lock().pop();

        match pooled {
            Some(item) => item,
            None => (self.factory)(),
        }
    }

    /// Reset the instance and reclaim it into the pool. Instances beyond
    /// capacity are dropped.
    #[inline]
    pub fn release(&self, mut item: T) {
        if let Some(reset) = &self.reset {
            reset(&mut item);
        }

        let mut items = self.items.lock();

        if items.len() < self.capacity {
            items.push(item);
        }
    }

    /// Number of pooled instances currently available.
    #[inline]
    pub fn available(&self) -> usize {
        self.items.lock().len()
    }

    /// Drop every pooled instance.
    #[inline]
    pub fn drain(&self) {
        self.items.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_prefill() {
        let pool: Pool<Vec<u8>> = Pool::new(4, 4, || vec![0u8; 16]);

        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_fill_clamped_to_capacity() {
        let pool: Pool<u64> = Pool::new(2, 10, || 0);

        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_acquire_falls_back_to_factory() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let pool: Pool<u64> = Pool::new(2, 0, move || {
            counter.fetch_add(1, Ordering::Relaxed);
            42
        });

        assert_eq!(pool.acquire(), 42);
        assert_eq!(built.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_release_reuses_lifo() {
        let pool: Pool<Vec<u8>> = Pool::new(2, 0, Vec::new);

        let mut item = pool.acquire();
        item.push(9);
        pool.release(item);

        assert_eq!(pool.available(), 1);
        assert_eq!(pool.acquire(), vec![9]);
    }

    #[test]
    fn test_reset_runs_on_release() {
        let pool: Pool<Vec<u8>> = Pool::with_reset(2, 0, Vec::new, |item| item.clear());

        let mut item = pool.acquire();
        item.extend_from_slice(&[1, 2, 3]);
        pool.release(item);

        assert_eq!(pool.acquire(), Vec::<u8>::new());
    }

    #[test]
    fn test_release_beyond_capacity_drops() {
        let pool: Pool<u64> = Pool::new(1, 0, || 0);

        pool.release(1);
        pool.release(2);

        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_concurrent_churn_stays_within_capacity() {
        let pool: Arc<Pool<Vec<u8>>> = Arc::new(Pool::new(8, 8, || vec![0u8; 32]));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let item = pool.acquire();
                        pool.release(item);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(pool.available() <= 8);
    }
}
