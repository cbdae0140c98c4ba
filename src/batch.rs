use crate::error::{ItemFailure, PoolError, RunError};
use crate::gate::GateOwner;
use crate::handle::TaskHandle;
use crate::item::{FailureHandler, SuccessHandler, WorkItem};
use crate::lazy_pool::global_pool;
use crate::pool::ExecutorPool;
use crate::task::TaskToExecute;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

/// How long draining waits for an item that did not set its own timeout.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_millis(5000);

/// Builds and runs slot-ordered batches of work items.
///
/// Every item is placed at an integer slot relative to a cursor that starts at
/// zero. `run` executes all items of the lowest slot together, waits for all of
/// their outcomes, then moves on to the next slot. Items of one batch are held
/// at a start gate until the whole batch has been submitted to the pool.
///
/// ```ignore
/// OrderedBatch::new(pool)
///   .add_before(WorkItem::new(load_config))            // slot -1
///   .add(WorkItem::new(fetch_user))                    // slot -1, alongside load_config
///   .add_after(WorkItem::new(render).on_success(show)) // slot 0, after both
///   .run()
///   .await?;
/// ```
pub struct OrderedBatch<R: Send + 'static> {
  pool: Arc<ExecutorPool>,
  items: Vec<WorkItem<R>>,
  current_slot: i32,
  default_timeout: Duration,
}

impl<R: Send + 'static> fmt::Debug for OrderedBatch<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OrderedBatch")
      .field("pool", &self.pool.name())
      .field("items", &self.items.len())
      .field("current_slot", &self.current_slot)
      .field("default_timeout", &self.default_timeout)
      .finish()
  }
}

impl<R: Send + 'static> OrderedBatch<R> {
  pub fn new(pool: Arc<ExecutorPool>) -> Self {
    Self {
      pool,
      items: Vec::new(),
      current_slot: 0,
      default_timeout: DEFAULT_ITEM_TIMEOUT,
    }
  }

  /// Creates a builder on the process-wide pool, starting it if needed.
  pub fn with_global_pool() -> Result<Self, PoolError> {
    Ok(Self::new(global_pool().get()?))
  }

  pub fn with_default_timeout(mut self, default_timeout: Duration) -> Self {
    self.default_timeout = default_timeout;
    self
  }

  /// The slot the next `add` will use.
  pub fn current_slot(&self) -> i32 {
    self.current_slot
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Adds an item at the current slot.
  pub fn add(mut self, item: WorkItem<R>) -> Self {
    self.push_at(self.current_slot, item);
    self
  }

  /// Moves the cursor one slot down and adds the item there. The move sticks.
  pub fn add_before(mut self, item: WorkItem<R>) -> Self {
    self.current_slot -= 1;
    self.push_at(self.current_slot, item);
    self
  }

  /// Moves the cursor one slot up and adds the item there. The move sticks.
  pub fn add_after(mut self, item: WorkItem<R>) -> Self {
    self.current_slot += 1;
    self.push_at(self.current_slot, item);
    self
  }

  /// Adds the item one slot below the cursor, leaving the cursor where it was.
  pub fn add_before_restoring(mut self, item: WorkItem<R>) -> Self {
    self.push_at(self.current_slot - 1, item);
    self
  }

  /// Adds the item one slot above the cursor, leaving the cursor where it was.
  pub fn add_after_restoring(mut self, item: WorkItem<R>) -> Self {
    self.push_at(self.current_slot + 1, item);
    self
  }

  fn push_at(&mut self, slot: i32, mut item: WorkItem<R>) {
    item.slot = slot;
    trace!(slot, position = self.items.len(), "Work item added.");
    self.items.push(item);
  }

  /// Runs every batch in ascending slot order.
  ///
  /// Returns once the last batch has drained. Item outcomes are delivered to
  /// the items' handlers; the only errors returned here are an empty builder
  /// and a pool rejection, which aborts the rejected batch before it starts
  /// and skips every later one.
  pub async fn run(self) -> Result<(), RunError> {
    let Self {
      pool,
      mut items,
      default_timeout,
      ..
    } = self;

    if items.is_empty() {
      return Err(RunError::NothingToRun);
    }

    // Stable: items sharing a slot keep their insertion order.
    items.sort_by_key(WorkItem::slot);
    let batches = group_by_slot(items);
    info!(pool_name = pool.name(), batches = batches.len(), "Running ordered batches.");

    for (slot, batch) in batches {
      run_batch(&pool, slot, batch, default_timeout).await?;
    }

    debug!(pool_name = pool.name(), "All batches drained.");
    Ok(())
  }
}

/// Splits a slot-sorted list into maximal runs of equal slot.
fn group_by_slot<R: Send + 'static>(sorted: Vec<WorkItem<R>>) -> Vec<(i32, Vec<WorkItem<R>>)> {
  let mut groups: Vec<(i32, Vec<WorkItem<R>>)> = Vec::new();
  for item in sorted {
    match groups.last_mut() {
      Some((slot, group)) if *slot == item.slot => group.push(item),
      _ => groups.push((item.slot, vec![item])),
    }
  }
  groups
}

struct PendingExecution<R: Send + 'static> {
  handle: TaskHandle<Result<R, ItemFailure>>,
  on_success: Option<SuccessHandler<R>>,
  on_failure: Option<FailureHandler>,
  timeout: Duration,
}

impl<R: Send + 'static> PendingExecution<R> {
  async fn drain(self, slot: i32) {
    let Self {
      handle,
      on_success,
      on_failure,
      timeout,
    } = self;
    let task_id = handle.id();

    let outcome = match tokio::time::timeout(timeout, handle.await_result()).await {
      Ok(Ok(action_result)) => action_result,
      Ok(Err(pool_error)) => Err(ItemFailure::from(pool_error)),
      Err(_elapsed) => Err(ItemFailure::TimedOut { after: timeout }),
    };

    match outcome {
      Ok(value) => match on_success {
        Some(handler) => handler(value),
        None => trace!(slot, task_id, "No success handler, result discarded."),
      },
      Err(failure) => match on_failure {
        Some(handler) => {
          debug!(slot, task_id, "Work item failed: {}", failure);
          handler(failure);
        }
        None => warn!(slot, task_id, "Work item failed with no failure handler: {}", failure),
      },
    }
  }
}

async fn run_batch<R: Send + 'static>(
  pool: &ExecutorPool,
  slot: i32,
  batch: Vec<WorkItem<R>>,
  default_timeout: Duration,
) -> Result<(), RunError> {
  debug!(slot, size = batch.len(), "Submitting batch.");
  let gate = GateOwner::new();
  let mut pending = Vec::with_capacity(batch.len());

  for item in batch {
    let WorkItem {
      action,
      on_success,
      on_failure,
      timeout,
      ..
    } = item;

    let waiter = gate.waiter();
    let gated: TaskToExecute<Result<R, ItemFailure>> = Box::pin(async move {
      if !waiter.wait().await {
        return Err(ItemFailure::Cancelled);
      }
      action().await.map_err(ItemFailure::Action)
    });

    match pool.submit(gated).await {
      Ok(handle) => pending.push(PendingExecution {
        handle,
        on_success,
        on_failure,
        timeout: timeout.unwrap_or(default_timeout),
      }),
      Err(source) => {
        warn!(
          slot,
          submitted = pending.len(),
          "Batch rejected by the pool, abandoning it before start: {}",
          source
        );
        // Dropping the unreleased gate turns away the tasks already submitted.
        return Err(RunError::Rejected { slot, source });
      }
    }
  }

  gate.release();
  trace!(slot, "Start gate released.");

  for execution in pending {
    execution.drain(slot).await;
  }
  debug!(slot, "Batch drained.");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PoolConfig;
  use tokio::runtime::Handle as TokioHandle;

  fn unit_pool(name: &str) -> Arc<ExecutorPool> {
    ExecutorPool::with_handle(PoolConfig::default(), TokioHandle::current(), name)
  }

  fn noop() -> WorkItem<()> {
    WorkItem::new(|| async { Ok::<_, std::io::Error>(()) })
  }

  fn slots(batch: &OrderedBatch<()>) -> Vec<i32> {
    batch.items.iter().map(WorkItem::slot).collect()
  }

  #[tokio::test]
  async fn persistent_moves_shift_the_cursor() {
    let batch = OrderedBatch::new(unit_pool("unit_cursor_persistent"))
      .add_before(noop())
      .add(noop())
      .add_after(noop())
      .add_after(noop());
    assert_eq!(slots(&batch), vec![-1, -1, 0, 1]);
    assert_eq!(batch.current_slot(), 1);
  }

  #[tokio::test]
  async fn restoring_moves_leave_the_cursor() {
    let batch = OrderedBatch::new(unit_pool("unit_cursor_restoring"))
      .add(noop())
      .add_before_restoring(noop())
      .add_after_restoring(noop())
      .add(noop());
    assert_eq!(slots(&batch), vec![0, -1, 1, 0]);
    assert_eq!(batch.current_slot(), 0);
  }

  #[tokio::test]
  async fn before_then_after_returns_to_start() {
    let batch = OrderedBatch::new(unit_pool("unit_cursor_round_trip"))
      .add_after(noop())
      .add_after(noop());
    let start = batch.current_slot();
    let batch = batch.add_before(noop()).add_after(noop());
    assert_eq!(batch.current_slot(), start);
  }

  #[tokio::test]
  async fn grouping_keeps_insertion_order_within_a_slot() {
    let mut items: Vec<WorkItem<()>> = [2, 0, 1, 0, 2, -3]
      .into_iter()
      .map(|slot| {
        let mut item = noop();
        item.slot = slot;
        item
      })
      .collect();
    items[1].timeout = Some(Duration::from_millis(1));
    items[3].timeout = Some(Duration::from_millis(2));
    items.sort_by_key(WorkItem::slot);

    let groups = group_by_slot(items);
    let shape: Vec<(i32, usize)> = groups.iter().map(|(slot, group)| (*slot, group.len())).collect();
    assert_eq!(shape, vec![(-3, 1), (0, 2), (1, 1), (2, 2)]);

    let zero_timeouts: Vec<_> = groups[1].1.iter().map(|item| item.timeout).collect();
    assert_eq!(
      zero_timeouts,
      vec![Some(Duration::from_millis(1)), Some(Duration::from_millis(2))]
    );
  }

  #[tokio::test]
  async fn empty_builder_refuses_to_run() {
    let batch = OrderedBatch::<()>::new(unit_pool("unit_empty_run"));
    assert!(batch.is_empty());
    assert_eq!(batch.run().await, Err(RunError::NothingToRun));
  }
}
