//! Fixed-capacity work queue feeding the worker pool.
//!
//! Wraps `std::sync::mpsc::sync_channel` (a Go buffered channel's closest
//! Rust analogue): bounded capacity, FIFO order, non-blocking `try_send`
//! from the dispatcher side, blocking `recv` on the worker side. Multiple
//! worker threads share one `Receiver` behind a dedicated `Mutex` — its own
//! synchronization, orthogonal to the dispatcher's main mutex.
//!
//! `std::sync::mpsc` has no built-in "current length" query (a Go channel
//! does), so the queue tracks it explicitly with an `AtomicUsize`: the
//! dispatcher increments it while holding its own mutex (right before the
//! `try_send` it has already reserved capacity for), and a worker
//! decrements it immediately after a successful `recv`, with no lock
//! needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvError, SyncSender};
use std::sync::Mutex;

pub struct WorkQueue<T> {
    sender: Mutex<Option<SyncSender<T>>>,
    receiver: Mutex<Receiver<T>>,
    len: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = sync_channel(capacity);
        WorkQueue {
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(rx),
            len: AtomicUsize::new(0),
        }
    }

    /// Number of descriptors currently sitting in the queue (received by
    /// neither a worker nor discarded). Read without blocking; callers
    /// computing "free slots" must hold whatever external lock serializes
    /// admissions to get a consistent answer.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Enqueues `item`. The caller is responsible for having already
    /// reserved capacity (checked `len() < capacity` under its own lock);
    /// this call is expected to always succeed in that case and panics if
    /// the queue has already been closed, which would indicate a logic
    /// error in the caller (the dispatcher never sends after `close`).
    pub fn push(&self, item: T) {
        let guard = self.sender.lock().expect("work queue mutex poisoned");
        let sender = guard.as_ref().expect("push after queue close");
        sender
            .try_send(item)
            .unwrap_or_else(|_| panic!("work queue push exceeded reserved capacity"));
        self.len.fetch_add(1, Ordering::AcqRel);
    }

    /// Blocking receive for a worker thread. Returns `Err` once the queue
    /// is closed and drained.
    pub fn recv(&self) -> Result<T, RecvError> {
        let receiver = self.receiver.lock().expect("work queue mutex poisoned");
        let item = receiver.recv();
        drop(receiver);
        if item.is_ok() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    /// Drops the sender, closing the channel. Workers blocked in `recv`
    /// observe `Err` once the channel is drained.
    pub fn close(&self) {
        let mut guard = self.sender.lock().expect("work queue mutex poisoned");
        *guard = None;
    }
}
