//! Load samples and the quarantine flag - the two pieces of mutable
//! server-side state shared between application code, the publisher, and
//! the quarantine controller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Unbounded FIFO of load samples.
///
/// Application code pushes a sample whenever its notion of busyness
/// changes; the load publisher drains the queue and debounces the stream
/// into store writes. The receiving half can be taken exactly once - by the
/// server that consumes the queue.
#[derive(Clone)]
pub struct LoadQueue {
    tx: UnboundedSender<i32>,
    rx: Arc<Mutex<Option<UnboundedReceiver<i32>>>>,
}

impl LoadQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    /// Enqueues a load sample. A send after the consumer is gone is a
    /// no-op: the server is shutting down and the sample has nowhere to go.
    pub fn push(&self, load: i32) {
        let _ = self.tx.send(load);
    }

    pub(crate) fn take_receiver(&self) -> Option<UnboundedReceiver<i32>> {
        self.rx.lock().expect("load queue lock poisoned").take()
    }
}

impl Default for LoadQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-server quarantine flag with atomic get-and-set.
#[derive(Clone, Default)]
pub struct QuarantineFlag(Arc<AtomicBool>);

impl QuarantineFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sets the flag and returns the previous value.
    pub fn swap(&self, value: bool) -> bool {
        self.0.swap(value, Ordering::SeqCst)
    }
}
