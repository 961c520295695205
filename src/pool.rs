//! Reusable render buffers shared by all execution workers.

use std::ops::{Deref, DerefMut};

use crossbeam_queue::ArrayQueue;

/// Initial capacity of a fresh buffer; a rendered batch of 100 statements
/// is typically a few tens of kilobytes.
const BUFFER_CAPACITY: usize = 64 * 1024;

/// Lock-free pool of `String` buffers. A buffer is cleared before it goes
/// back, and a full pool drops the returned buffer.
#[derive(Debug)]
pub struct BufferPool {
    free: ArrayQueue<String>,
}

impl BufferPool {
    pub fn new(slots: usize) -> Self {
        Self {
            free: ArrayQueue::new(slots.max(1)),
        }
    }

    /// Checks out an empty buffer. It returns to the pool when dropped.
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self
            .free
            .pop()
            .unwrap_or_else(|| String::with_capacity(BUFFER_CAPACITY));
        PooledBuffer {
            pool: self,
            buf: Some(buf),
        }
    }

    /// Buffers currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<String>,
}

impl Deref for PooledBuffer<'_> {
    type Target = String;

    fn deref(&self) -> &String {
        self.buf.as_ref().unwrap_or_else(|| unreachable!("buffer taken before drop"))
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut String {
        self.buf.as_mut().unwrap_or_else(|| unreachable!("buffer taken before drop"))
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            let _ = self.pool.free.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_come_back_empty() {
        let pool = BufferPool::new(2);
        {
            let mut a = pool.get();
            a.push_str("SELECT 1;");
        }
        assert_eq!(pool.idle(), 1);
        let b = pool.get();
        assert!(b.is_empty());
        assert!(b.capacity() >= "SELECT 1;".len());
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn full_pool_drops_extra_buffers() {
        let pool = BufferPool::new(1);
        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn shared_across_threads() {
        let pool = BufferPool::new(4);
        std::thread::scope(|s| {
            for i in 0..8 {
                let pool = &pool;
                s.spawn(move || {
                    let mut buf = pool.get();
                    assert!(buf.is_empty());
                    buf.push_str(&i.to_string());
                });
            }
        });
        assert!(pool.idle() <= 4);
    }
}
