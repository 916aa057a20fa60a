use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;

const MAX_PER_CLASS: usize = 64;

/// Buffer pool for reusing write buffers across outputs
pub struct BufferPool {
    pools: Mutex<HashMap<usize, VecDeque<Vec<u8>>>>,
    pub pooled_bytes: AtomicUsize,
    pub memory_limit: usize,
}

impl BufferPool {
    pub fn new(memory_limit: usize) -> Self {
        BufferPool {
            pools: Mutex::new(HashMap::new()),
            pooled_bytes: AtomicUsize::new(0),
            memory_limit,
        }
    }

    /// Empty buffer with at least `size` bytes of capacity
    pub fn get(&self, size: usize) -> Vec<u8> {
        let size_class = size.next_power_of_two();

        let mut pools = self.pools.lock();
        if let Some(buf) = pools.get_mut(&size_class).and_then(|queue| queue.pop_front()) {
            self.pooled_bytes.fetch_sub(buf.capacity(), Ordering::Relaxed);
            return buf;
        }

        Vec::with_capacity(size_class)
    }

    pub fn return_buffer(&self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity == 0 || !capacity.is_power_of_two() {
            return;
        }
        if self.pooled_bytes.load(Ordering::Relaxed) + capacity > self.memory_limit {
            return;
        }
        buf.clear();

        let mut pools = self.pools.lock();
        let queue = pools.entry(capacity).or_default();
        if queue.len() < MAX_PER_CLASS {
            queue.push_back(buf);
            self.pooled_bytes.fetch_add(capacity, Ordering::Relaxed);
        }
    }

    pub fn pooled(&self) -> usize {
        self.pools.lock().values().map(|q| q.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returned_buffers_are_reused() {
        let pool = BufferPool::new(1024 * 1024);
        let mut buf = pool.get(1000);
        assert!(buf.capacity() >= 1024);
        buf.extend_from_slice(b"leftover");
        pool.return_buffer(buf);
        assert_eq!(pool.pooled(), 1);

        let again = pool.get(1024);
        assert!(again.is_empty());
        assert_eq!(pool.pooled(), 0);
    }

    #[test]
    fn pool_respects_memory_limit() {
        let pool = BufferPool::new(1024);
        pool.return_buffer(Vec::with_capacity(2048));
        assert_eq!(pool.pooled(), 0);
    }
}
