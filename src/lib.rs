//! Slot-ordered batches of futures on a bounded Tokio executor pool.
//!
//! An [`OrderedBatch`] collects [`WorkItem`]s at integer slots. Running it
//! executes every item of a slot concurrently, behind a start gate that opens
//! only once the whole batch is submitted, and runs slots in ascending order.
//! Each item may carry a success handler, a failure handler and a timeout.
//! Work runs on an [`ExecutorPool`], which rejects submissions once its queue
//! is full instead of making the submitter wait.

mod batch;
mod capacity_gate;
mod config;
mod error;
mod gate;
mod handle;
mod item;
mod lazy_pool;
mod pool;
mod task;
mod task_queue;

pub use batch::{OrderedBatch, DEFAULT_ITEM_TIMEOUT};
pub use config::{PoolConfig, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_WORKERS, DEFAULT_QUEUE_CAPACITY};
pub use error::{ActionError, ItemFailure, PoolError, RunError};
pub use handle::TaskHandle;
pub use item::WorkItem;
pub use lazy_pool::{global_pool, LazyExecutorPool};
pub use pool::{ExecutorPool, ShutdownMode};
pub use task::TaskToExecute;
