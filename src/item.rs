use crate::error::{ActionError, ItemFailure};
use crate::task::TaskToExecute;

use std::fmt;
use std::future::Future;
use std::time::Duration;

pub(crate) type BoxedAction<R> = Box<dyn FnOnce() -> TaskToExecute<Result<R, ActionError>> + Send + 'static>;
pub(crate) type SuccessHandler<R> = Box<dyn FnOnce(R) + Send + 'static>;
pub(crate) type FailureHandler = Box<dyn FnOnce(ItemFailure) + Send + 'static>;

/// One unit of work for an `OrderedBatch`: an action plus what to do with its outcome.
///
/// ```ignore
/// let item = WorkItem::new(|| async { Ok::<_, std::io::Error>(42) })
///   .on_success(|value| println!("got {value}"))
///   .on_failure(|cause| eprintln!("failed: {cause}"))
///   .timeout(Duration::from_millis(250));
/// ```
pub struct WorkItem<R: Send + 'static> {
  pub(crate) action: BoxedAction<R>,
  pub(crate) on_success: Option<SuccessHandler<R>>,
  pub(crate) on_failure: Option<FailureHandler>,
  pub(crate) timeout: Option<Duration>,
  pub(crate) slot: i32,
}

impl<R: Send + 'static> WorkItem<R> {
  /// Wraps an action. The closure is not called until the item's batch starts.
  pub fn new<F, Fut, E>(action: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    E: Into<ActionError> + 'static,
  {
    let action: BoxedAction<R> = Box::new(move || -> TaskToExecute<Result<R, ActionError>> {
      Box::pin(async move { action().await.map_err(Into::into) })
    });
    Self {
      action,
      on_success: None,
      on_failure: None,
      timeout: None,
      slot: 0,
    }
  }

  /// Called with the action's value, once, if it succeeds in time.
  pub fn on_success(mut self, handler: impl FnOnce(R) + Send + 'static) -> Self {
    self.on_success = Some(Box::new(handler));
    self
  }

  /// Called with the cause, once, if the action fails, panics or times out.
  pub fn on_failure(mut self, handler: impl FnOnce(ItemFailure) + Send + 'static) -> Self {
    self.on_failure = Some(Box::new(handler));
    self
  }

  /// Overrides the batch's default wait for this item's result.
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  /// The slot the builder placed this item at. Zero until it is added.
  pub fn slot(&self) -> i32 {
    self.slot
  }
}

impl<R: Send + 'static> fmt::Debug for WorkItem<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkItem")
      .field("slot", &self.slot)
      .field("timeout", &self.timeout)
      .field("has_on_success", &self.on_success.is_some())
      .field("has_on_failure", &self.on_failure.is_some())
      .finish_non_exhaustive()
  }
}
