use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};

/// A bounded FIFO buffer with non-blocking enqueue and timed dequeue.
///
/// Built on a Tokio mpsc channel: any number of producers hold a
/// [`QueueSender`], the queue itself is the single consumer. Enqueue never
/// waits; when the buffer is at capacity the item is handed back.
pub struct EventQueue<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
    capacity: usize,
}

/// Producer handle of an [`EventQueue`]. Cheap to clone, usable from any thread.
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> QueueSender<T> {
    /// Append without blocking. Returns the item back if the queue is full
    /// or its consumer is gone; [`QueueSender::is_closed`] tells the two apart.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        self.tx.try_send(item).map_err(|e| match e {
            TrySendError::Full(item) | TrySendError::Closed(item) => item,
        })
    }

    /// True once the consuming [`EventQueue`] has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> EventQueue<T> {
    /// Create a queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self { tx, rx, capacity }
    }

    pub fn sender(&self) -> QueueSender<T> {
        QueueSender { tx: self.tx.clone() }
    }

    /// Append without blocking. Returns the item back if the queue is full.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        self.sender().enqueue(item)
    }

    /// Pop the oldest item.
    ///
    /// Without a timeout this returns immediately; with one it waits up to
    /// `timeout` for an item to arrive.
    pub async fn dequeue(&mut self, timeout: Option<Duration>) -> Option<T> {
        match timeout {
            None => self.rx.try_recv().ok(),
            Some(timeout) => tokio::time::timeout(timeout, self.rx.recv())
                .await
                .ok()
                .flatten(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
