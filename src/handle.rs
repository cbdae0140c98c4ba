use crate::error::PoolError;
use crate::task::TaskState;

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// A handle to a task submitted to the `ExecutorPool`.
///
/// Allows for cancelling the task before it starts and awaiting its result.
#[derive(Debug)]
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) state: Arc<TaskState>,
  pub(crate) result_receiver: Option<oneshot::Receiver<Result<R, PoolError>>>,
}

impl<R: Send + 'static> TaskHandle<R> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Checks if this task was cancelled before it started.
  pub fn is_cancellation_requested(&self) -> bool {
    self.state.is_cancelled()
  }

  /// Removes the task from the queue if no worker has picked it up yet.
  ///
  /// Returns `true` if the task was still queued. A task that is already
  /// running or finished is left alone and `false` is returned.
  pub fn cancel(&self) -> bool {
    let cancelled = self.state.try_cancel();
    if cancelled {
      debug!(task_id = %self.task_id, "TaskHandle: Queued task cancelled.");
    } else {
      trace!(task_id = %self.task_id, "TaskHandle: Task already started, cancellation ignored.");
    }
    cancelled
  }

  /// Awaits the completion of the task and returns its result of type `R`.
  ///
  /// # Errors
  /// Returns `PoolError::TaskPanicked` if the task panicked during execution.
  /// Returns `PoolError::TaskCancelled` if the task was cancelled.
  /// Returns `PoolError::ResultChannelError` if the task was dropped without
  /// completing (e.g. the pool shut down while it was queued).
  /// Returns `PoolError::ResultUnavailable` if `await_result` has already been called.
  pub async fn await_result(mut self) -> Result<R, PoolError> {
    match self.result_receiver.take() {
      Some(rx) => match rx.await {
        Ok(task_outcome_result) => task_outcome_result,
        Err(_) if self.state.is_cancelled() => Err(PoolError::TaskCancelled),
        Err(recv_error) => {
          warn!(task_id = %self.task_id, "Result channel receive error: {}", recv_error);
          Err(PoolError::ResultChannelError(format!(
            "Task (id: {}) result channel unexpectedly closed: {}",
            self.task_id, recv_error
          )))
        }
      },
      None => Err(PoolError::ResultUnavailable),
    }
  }
}
