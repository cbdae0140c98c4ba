use crate::capacity_gate::CapacityGate;
use crate::error::PoolError;
use crate::task::ManagedTaskInternal;

use fibre::mpsc::{self, AsyncReceiver, AsyncSender, RecvError};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// An internal message type that pairs a task with the queue slot it holds.
///
/// The permit is released when this message is dropped or unwrapped with
/// `into_task`. The dispatcher holds on to a received message until a worker
/// is free, so a task waiting for a worker still counts against the queue.
pub(crate) struct QueueMessage {
  pub(crate) task: ManagedTaskInternal,
  _permit: Permit,
}

impl QueueMessage {
  /// Frees the queue slot and hands over the task.
  pub(crate) fn into_task(self) -> ManagedTaskInternal {
    self.task
  }
}

impl fmt::Debug for QueueMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueMessage")
      .field("task_id", &self.task.task_id)
      .finish_non_exhaustive()
  }
}

/// A slot acquired from the `CapacityGate`, released on drop.
#[derive(Debug)]
pub(crate) struct Permit {
  gate: Arc<CapacityGate>,
}

impl Drop for Permit {
  fn drop(&mut self) {
    self.gate.release();
  }
}

/// A bounded, multi-producer, single-consumer queue for tasks.
///
/// A `CapacityGate` caps the number of queued tasks on top of an unbounded
/// `fibre::mpsc` channel. Sends never wait for room: a full queue rejects.
#[derive(Debug)]
pub(crate) struct TaskQueue {
  tx: AsyncSender<QueueMessage>,
  rx: AsyncReceiver<QueueMessage>,
  gate: Arc<CapacityGate>,
}

impl TaskQueue {
  pub(crate) fn new(capacity: usize) -> Self {
    let (tx, rx) = mpsc::unbounded_async();
    Self {
      tx,
      rx,
      gate: Arc::new(CapacityGate::new(capacity.max(1))),
    }
  }

  /// Splits the queue into its producer and consumer halves.
  pub(crate) fn split(self) -> (QueueProducer, QueueConsumer) {
    (
      QueueProducer {
        tx: self.tx,
        gate: self.gate,
      },
      QueueConsumer { rx: self.rx },
    )
  }
}

/// The producer handle for the `TaskQueue`.
#[derive(Clone)]
pub(crate) struct QueueProducer {
  tx: AsyncSender<QueueMessage>,
  gate: Arc<CapacityGate>,
}

/// The consumer handle for the `TaskQueue`. Not cloneable: the pool has a
/// single dispatcher.
#[derive(Debug)]
pub(crate) struct QueueConsumer {
  rx: AsyncReceiver<QueueMessage>,
}

impl fmt::Debug for QueueProducer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueProducer")
      .field("queued", &self.queued())
      .field("gate_permits", &self.gate.get_permits())
      .finish_non_exhaustive()
  }
}

impl QueueProducer {
  /// Sends a task into the queue.
  ///
  /// Fails with `PoolError::QueueFull` when every slot is taken and with
  /// `PoolError::PoolShuttingDown` once the queue is closed.
  pub(crate) async fn send(
    &self,
    task: ManagedTaskInternal,
    shutdown_token: &CancellationToken,
  ) -> Result<(), PoolError> {
    if shutdown_token.is_cancelled() || self.tx.is_closed() {
      return Err(PoolError::PoolShuttingDown);
    }

    if !self.gate.try_acquire() {
      return Err(PoolError::QueueFull {
        capacity: self.gate.capacity(),
      });
    }

    let message = QueueMessage {
      task,
      _permit: Permit {
        gate: self.gate.clone(),
      },
    };

    // On failure the rejected message, permit included, is dropped here.
    self
      .tx
      .send(message)
      .await
      .map_err(|_| PoolError::PoolShuttingDown)
  }

  pub(crate) fn close(&self) {
    let _ = self.tx.close();
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }

  /// Number of tasks holding a queue slot.
  pub(crate) fn queued(&self) -> usize {
    self.gate.in_use()
  }
}

impl QueueConsumer {
  /// Receives the next queued message. Its slot stays taken until the
  /// message is dropped or unwrapped.
  pub(crate) async fn recv(&mut self) -> Result<QueueMessage, RecvError> {
    self.rx.recv().await
  }
}
