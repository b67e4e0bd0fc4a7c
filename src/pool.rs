// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A bounded LIFO buffer free-pool, scoped to a single sorter or
//! archive-write operation, rather than a process-wide singleton.
//!
//! `get` blocks when the pool is empty and at capacity (i.e. all buffers
//! are on loan); `put` never blocks -- a buffer returned past capacity is
//! simply dropped rather than queued.

use std::sync::{Condvar, Mutex};

struct Inner {
    buffers: Vec<Vec<u8>>,
    on_loan: usize,
}

/// A bounded pool of reusable byte buffers, shared by sibling
/// writers/readers within one sorter or archive-write.
pub struct Pool {
    capacity: usize,
    state: Mutex<Inner>,
    available: Condvar,
}

impl Pool {
    /// Creates an empty pool that allows at most `capacity` buffers on loan
    /// at once.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(Inner {
                buffers: Vec::new(),
                on_loan: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Checks out a buffer, reusing a returned one if available, or
    /// allocating a new one if the pool has not yet reached capacity.
    /// Blocks if the pool is at capacity and every buffer is on loan.
    #[must_use]
    pub fn get(&self) -> Vec<u8> {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.state.lock().unwrap();

        loop {
            if let Some(mut buf) = inner.buffers.pop() {
                buf.clear();
                inner.on_loan += 1;
                return buf;
            }

            if inner.on_loan < self.capacity {
                inner.on_loan += 1;
                return Vec::new();
            }

            #[allow(clippy::unwrap_used)]
            {
                inner = self.available.wait(inner).unwrap();
            }
        }
    }

    /// Returns a buffer to the pool for reuse. Never blocks.
    pub fn put(&self, buf: Vec<u8>) {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.state.lock().unwrap();
        inner.on_loan = inner.on_loan.saturating_sub(1);
        inner.buffers.push(buf);
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use test_log::test;

    #[test]
    fn pool_reuses_returned_buffers() {
        let pool = Pool::new(2);
        let mut a = pool.get();
        a.extend_from_slice(b"hello");
        pool.put(a);

        let b = pool.get();
        assert!(b.is_empty(), "returned buffers are cleared before reuse");
    }

    #[test]
    fn pool_blocks_at_capacity_until_put() {
        let pool = Arc::new(Pool::new(1));
        let _first = pool.get();

        let pool2 = Arc::clone(&pool);
        let handle = std::thread::spawn(move || {
            let _second = pool2.get();
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished(), "second get() should block while pool is exhausted");

        pool.put(Vec::new());
        handle.join().expect("thread should not panic");
    }
}
