//! Bounded single-producer / single-consumer pipeline between the reader
//! and the writer of a connection.
//!
//! Response ordering relies on there being exactly one producer and one
//! consumer, so neither handle can be cloned. Closing either side is
//! observable by the other: a dropped consumer fails the next `push`
//! (handing the rejected item back), a dropped producer drains the
//! remaining items and then ends `pop` with `None`.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::mpsc;

/// Creates a pipeline holding at most `capacity` items.
pub(crate) fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    let depth = Arc::new(AtomicUsize::new(0));
    (
        Producer {
            tx,
            depth: Arc::clone(&depth),
        },
        Consumer { rx, depth },
    )
}

#[derive(Debug)]
pub(crate) struct Producer<T> {
    tx: mpsc::Sender<T>,
    depth: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub(crate) struct Consumer<T> {
    rx: mpsc::Receiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> Producer<T> {
    /// Inserts an item, suspending while the pipeline is at capacity.
    ///
    /// Fails when the consumer side has been dropped; the rejected item is
    /// handed back so the caller can unwind its bookkeeping.
    pub(crate) async fn push(&self, item: T) -> Result<(), T> {
        match self.tx.send(item).await {
            Ok(()) => {
                self.depth.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::SendError(item)) => Err(item),
        }
    }

    /// Advisory number of items currently queued.
    pub(crate) fn size(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl<T> Consumer<T> {
    /// Removes the oldest item, suspending while the pipeline is empty.
    ///
    /// Returns `None` once the producer has been dropped and every queued
    /// item was delivered.
    pub(crate) async fn pop(&mut self) -> Option<T> {
        let item = self.rx.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }

    pub(crate) fn size(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}
