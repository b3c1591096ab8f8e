//! The FIFO, byte-bounded conduit from readers to the writer (spec §4.3).
//!
//! Implemented with a plain `Mutex` + `Condvar`, matching spec §9's
//! "Coroutine control flow" note that a thread-based target should keep a
//! mutex/condition-variable queue rather than reach for an async channel.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
};

use crate::error::{ErrorKind, Result};

/// A batch of documents (or pre-serialized bytes) accompanied by the byte
/// count used for queue accounting (spec §3 `QueueItem`).
pub struct QueueItem<T> {
    pub payload: T,
    pub bytes: u64,
}

impl<T> QueueItem<T> {
    pub fn new(payload: T, bytes: u64) -> Self {
        Self { payload, bytes }
    }
}

struct State<T> {
    items: VecDeque<QueueItem<T>>,
    current_bytes: u64,
    closed: bool,
}

/// A bounded byte-queue, shared between N readers (producers) and one
/// writer (consumer).
pub struct ByteQueue<T> {
    max_bytes: u64,
    state: Mutex<State<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> ByteQueue<T> {
    pub fn new(max_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            max_bytes,
            state: Mutex::new(State {
                items: VecDeque::new(),
                current_bytes: 0,
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        })
    }

    /// Blocks while `current_bytes + bytes > max_bytes`, then enqueues.
    /// Fails if the queue has been closed.
    pub fn push(&self, payload: T, bytes: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(ErrorKind::Internal.with_message("push on a closed queue"));
            }
            // A single item larger than the whole budget is still allowed
            // through once the queue is empty, so one oversized batch can't
            // deadlock the pipeline.
            if state.current_bytes == 0 || state.current_bytes + bytes <= self.max_bytes {
                break;
            }
            state = self.not_full.wait(state).unwrap();
        }
        state.current_bytes += bytes;
        state.items.push_back(QueueItem::new(payload, bytes));
        self.not_empty.notify_one();
        Ok(())
    }

    /// Blocks until an item is available, or the queue is closed and
    /// drained, in which case `None` is returned.
    pub fn pop(&self) -> Option<QueueItem<T>> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                state.current_bytes -= item.bytes;
                self.not_full.notify_all();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Idempotent. After close, `push` fails and `pop` drains remaining
    /// items before returning `None`.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Observational: the current byte occupancy.
    pub fn size_bytes(&self) -> u64 {
        self.state.lock().unwrap().current_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fifo_order_is_preserved() {
        let queue = ByteQueue::new(1024);
        queue.push(1, 10).unwrap();
        queue.push(2, 10).unwrap();
        queue.push(3, 10).unwrap();
        assert_eq!(queue.pop().unwrap().payload, 1);
        assert_eq!(queue.pop().unwrap().payload, 2);
        assert_eq!(queue.pop().unwrap().payload, 3);
    }

    #[test]
    fn close_drains_then_returns_none() {
        let queue = ByteQueue::new(1024);
        queue.push("a", 4).unwrap();
        queue.close();
        assert!(queue.push("b", 4).is_err());
        assert_eq!(queue.pop().unwrap().payload, "a");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn push_blocks_until_space_is_freed() {
        let queue = ByteQueue::new(10);
        queue.push("first", 10).unwrap();

        let queue2 = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            queue2.push("second", 10).unwrap();
        });

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.size_bytes(), 10);

        let popped = queue.pop().unwrap();
        assert_eq!(popped.payload, "first");

        handle.join().unwrap();
        assert_eq!(queue.size_bytes(), 10);
    }
}
