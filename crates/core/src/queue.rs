use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::SegQueue;

/// Lock-free multi-producer queue consumed by a single engine thread.
///
/// FIFO per producer; cross-producer order is defined only after dequeue. The
/// length is tracked in a separate atomic so `len`/`is_empty` are exact rather
/// than the backing queue's approximation.
#[derive(Debug, Default)]
pub struct EventQueue<T> {
    inner: SegQueue<T>,
    len: AtomicU64,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
            len: AtomicU64::new(0),
        }
    }

    pub fn enqueue(&self, item: T) {
        self.inner.push(item);
        self.len.fetch_add(1, Ordering::Release);
    }

    pub fn dequeue(&self) -> Option<T> {
        let item = self.inner.pop();
        if item.is_some() {
            self.len.fetch_sub(1, Ordering::Release);
        }
        item
    }

    pub fn clear(&self) {
        while self.dequeue().is_some() {}
    }

    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
