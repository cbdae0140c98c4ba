use std::time::Duration;

use thiserror::Error;

/// The error type an action may fail with.
pub type ActionError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur within the executor pool.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
  #[error("Pool queue is full (capacity {capacity}), task rejected")]
  QueueFull { capacity: usize },

  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShuttingDown,

  #[error("Failed to start the pool's worker runtime: {0}")]
  RuntimeUnavailable(String),

  #[error("Task result channel error (task was dropped before completing): {0}")]
  ResultChannelError(String),

  #[error("Task result already taken or channel was not available")]
  ResultUnavailable,

  #[error("Submitted task future panicked")]
  TaskPanicked,

  #[error("Task was cancelled")]
  TaskCancelled,
}

impl PoolError {
  /// Returns `true` for errors raised at submission time: the pool either had
  /// no room for the task or was no longer accepting work.
  pub fn is_capacity(&self) -> bool {
    matches!(
      self,
      PoolError::QueueFull { .. } | PoolError::PoolShuttingDown | PoolError::RuntimeUnavailable(_)
    )
  }
}

/// Why a single work item did not produce a value. Delivered to the item's
/// failure handler, never returned from `OrderedBatch::run`.
#[derive(Error, Debug)]
pub enum ItemFailure {
  #[error("Action failed: {0}")]
  Action(#[source] ActionError),

  #[error("Timed out after {after:?} waiting for the action's result")]
  TimedOut { after: Duration },

  #[error("Action panicked")]
  Panicked,

  #[error("Action was cancelled before it started")]
  Cancelled,

  #[error("Pool error while awaiting the action's result: {0}")]
  Pool(#[source] PoolError),
}

impl ItemFailure {
  pub fn is_timeout(&self) -> bool {
    matches!(self, ItemFailure::TimedOut { .. })
  }
}

impl From<PoolError> for ItemFailure {
  fn from(error: PoolError) -> Self {
    match error {
      PoolError::TaskPanicked => ItemFailure::Panicked,
      PoolError::TaskCancelled => ItemFailure::Cancelled,
      other => ItemFailure::Pool(other),
    }
  }
}

/// Errors returned by `OrderedBatch::run`.
#[derive(Error, Debug, PartialEq)]
pub enum RunError {
  #[error("Nothing to run: no work items were added")]
  NothingToRun,

  #[error("Batch at slot {slot} was rejected by the pool: {source}")]
  Rejected {
    slot: i32,
    #[source]
    source: PoolError,
  },
}

impl RunError {
  /// Returns the pool error behind a rejected batch, if any.
  pub fn pool_error(&self) -> Option<&PoolError> {
    match self {
      RunError::Rejected { source, .. } => Some(source),
      RunError::NothingToRun => None,
    }
  }
}
