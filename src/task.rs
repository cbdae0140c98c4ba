use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// The type of future that the pool executes.
/// It must be `Send` and `'static`, and produce a result of type `R`.
pub type TaskToExecute<R> = Pin<Box<dyn Future<Output = R> + Send + 'static>>;

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

/// Lifecycle of a pooled task, shared between the queue entry and its handle.
/// A task moves out of `QUEUED` exactly once: either a worker starts it or a
/// cancellation removes it.
#[derive(Debug, Default)]
pub(crate) struct TaskState(AtomicU8);

impl TaskState {
  /// Claims the task for execution. Fails if it was cancelled while queued.
  pub(crate) fn try_start(&self) -> bool {
    self
      .0
      .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  /// Cancels the task if no worker has started it yet.
  pub(crate) fn try_cancel(&self) -> bool {
    self
      .0
      .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire) == CANCELLED
  }
}

/// Internal representation of a task managed by the pool. The result type is
/// erased: `job` already carries the sender for the typed result.
pub(crate) struct ManagedTaskInternal {
  pub(crate) task_id: u64,
  pub(crate) job: TaskToExecute<()>,
  pub(crate) state: Arc<TaskState>,
  pub(crate) token: CancellationToken,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn start_and_cancel_are_mutually_exclusive() {
    let started = TaskState::default();
    assert!(started.try_start());
    assert!(!started.try_cancel());
    assert!(!started.is_cancelled());

    let cancelled = TaskState::default();
    assert!(cancelled.try_cancel());
    assert!(!cancelled.try_start());
    assert!(cancelled.is_cancelled());
  }
}
