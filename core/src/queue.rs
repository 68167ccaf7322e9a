// stepflow/src/queue.rs

//! The bounded row queue ("row set") connecting exactly one producer copy to
//! exactly one consumer copy.
//!
//! Built on a bounded `crossbeam_channel`. The queue owns the only `Sender`;
//! `mark_done` drops it, which is what lets the consumer observe the
//! terminal state once the buffer is drained. Capacity is the only
//! backpressure: a producer blocks in `put` rather than growing memory.

use crate::row::{Row, RowShape};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tracing::{event, Level};

/// Producer and consumer endpoints of one queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueId {
  pub from_step: String,
  pub from_copy: usize,
  pub to_step: String,
  pub to_copy: usize,
}

impl fmt::Display for QueueId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{} - {}.{}", self.from_step, self.from_copy, self.to_step, self.to_copy)
  }
}

/// One queued element.
#[derive(Debug, Clone)]
pub struct QueuedRow {
  pub row: Row,
  pub shape: RowShape,
}

/// Outcome of [`RowQueue::get`].
#[derive(Debug)]
pub enum QueueRead {
  Row(QueuedRow),
  /// The timeout elapsed with nothing available; more rows may still come.
  Empty,
  /// `mark_done` was called and every row has been consumed.
  Done,
}

/// Outcome of a [`RowQueue::put`] that did not enqueue.
#[derive(Debug)]
pub enum PutError {
  /// The queue stayed full for the whole timeout. The row is handed back.
  Full(QueuedRow),
  /// The queue was already marked done.
  Done(QueuedRow),
}

pub struct RowQueue {
  id: QueueId,
  capacity: usize,
  sender: Mutex<Option<Sender<QueuedRow>>>,
  receiver: Receiver<QueuedRow>,
}

impl RowQueue {
  pub fn new(id: QueueId, capacity: usize) -> Self {
    // A zero capacity crossbeam channel is a rendezvous channel, which is not a buffer.
    let capacity = capacity.max(1);
    let (tx, rx) = bounded(capacity);
    Self {
      id,
      capacity,
      sender: Mutex::new(Some(tx)),
      receiver: rx,
    }
  }

  pub fn id(&self) -> &QueueId {
    &self.id
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of rows currently buffered.
  pub fn len(&self) -> usize {
    self.receiver.len()
  }

  pub fn is_empty(&self) -> bool {
    self.receiver.is_empty()
  }

  pub fn is_full(&self) -> bool {
    self.receiver.is_full()
  }

  pub fn is_done(&self) -> bool {
    self.sender.lock().is_none()
  }

  /// Enqueues a row, blocking up to `timeout` while the queue is full.
  pub fn put(&self, row: Row, shape: RowShape, timeout: Duration) -> Result<(), PutError> {
    let item = QueuedRow { row, shape };
    // Clone the sender out of the lock so a blocked put never holds it.
    let sender = match self.sender.lock().as_ref() {
      Some(tx) => tx.clone(),
      None => return Err(PutError::Done(item)),
    };
    match sender.send_timeout(item, timeout) {
      Ok(()) => Ok(()),
      Err(SendTimeoutError::Timeout(item)) => Err(PutError::Full(item)),
      Err(SendTimeoutError::Disconnected(item)) => Err(PutError::Done(item)),
    }
  }

  /// Dequeues the next row, waiting up to `timeout`.
  pub fn get(&self, timeout: Duration) -> QueueRead {
    match self.receiver.recv_timeout(timeout) {
      Ok(item) => QueueRead::Row(item),
      Err(RecvTimeoutError::Timeout) => QueueRead::Empty,
      Err(RecvTimeoutError::Disconnected) => QueueRead::Done,
    }
  }

  /// Non-blocking variant of [`get`](Self::get).
  pub fn try_get(&self) -> QueueRead {
    match self.receiver.try_recv() {
      Ok(item) => QueueRead::Row(item),
      Err(TryRecvError::Empty) => QueueRead::Empty,
      Err(TryRecvError::Disconnected) => QueueRead::Done,
    }
  }

  /// Signals that no more rows will be put. Idempotent.
  pub fn mark_done(&self) {
    if self.sender.lock().take().is_some() {
      event!(Level::TRACE, queue = %self.id, "Row queue marked done.");
    }
  }

  pub(crate) fn receiver(&self) -> &Receiver<QueuedRow> {
    &self.receiver
  }
}

impl fmt::Debug for RowQueue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RowQueue")
      .field("id", &self.id.to_string())
      .field("capacity", &self.capacity)
      .field("len", &self.len())
      .field("done", &self.is_done())
      .finish()
  }
}
