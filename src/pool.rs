use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::handle::TaskHandle;
use crate::task::{ManagedTaskInternal, TaskState, TaskToExecute};
use crate::task_queue::{QueueConsumer, QueueProducer, TaskQueue};

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::{Builder as RuntimeBuilder, Handle as TokioHandle, Runtime};
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_POOL_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Defines how the pool should behave upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Waits for currently running tasks to complete.
  /// Queued tasks that haven't started will not be processed.
  Graceful,
  /// Cancels all running tasks, then waits for them to wind down.
  /// Queued tasks that haven't started will not be processed.
  ForcefulCancel,
}

type ActiveTaskMap = Arc<DashMap<u64, CancellationToken>>;

/// A bounded pool of workers executing submitted futures.
///
/// At most `max_workers` tasks run at once and at most `queue_capacity` wait
/// for a worker. A submission that finds a free worker starts right away
/// without touching the queue. Submissions beyond both limits fail immediately
/// with [`PoolError::QueueFull`]; the pool never makes a submitter wait for room.
pub struct ExecutorPool {
  pool_name: Arc<String>,
  config: PoolConfig,
  tokio_handle: TokioHandle,
  semaphore: Arc<Semaphore>,
  queue: QueueProducer,
  active_task_info: ActiveTaskMap,
  submitted_count: AtomicU64,
  shutdown_token: CancellationToken,
  dispatcher_join_handle: Mutex<Option<JoinHandle<()>>>,
  runtime: Mutex<Option<Runtime>>,
}

impl std::fmt::Debug for ExecutorPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutorPool")
      .field("pool_name", &self.pool_name)
      .field("config", &self.config)
      .field("active", &self.active_task_info.len())
      .field("queue", &self.queue)
      .field("shut_down", &self.shutdown_token.is_cancelled())
      .finish_non_exhaustive()
  }
}

impl ExecutorPool {
  /// Creates a pool backed by its own multi-thread runtime with `core_workers`
  /// worker threads. The runtime is torn down on shutdown.
  ///
  /// Pool workers are Tokio tasks, not threads, so an idle worker holds no
  /// thread and there is nothing for `keep_alive` to reclaim on that side.
  /// `max_workers` and `keep_alive` size the runtime's blocking pool instead:
  /// actions that call `tokio::task::spawn_blocking` get at most `max_workers`
  /// blocking threads, each released after `keep_alive` without work.
  pub fn new(config: PoolConfig, pool_name: &str) -> Result<Arc<Self>, PoolError> {
    let config = config.normalized();
    let runtime = RuntimeBuilder::new_multi_thread()
      .worker_threads(config.core_workers)
      .max_blocking_threads(config.max_workers)
      .thread_keep_alive(config.keep_alive)
      .thread_name(format!("{pool_name}-worker"))
      .enable_all()
      .build()
      .map_err(|e| {
        error!(%pool_name, "Failed to build pool runtime: {}", e);
        PoolError::RuntimeUnavailable(e.to_string())
      })?;
    let tokio_handle = runtime.handle().clone();
    Ok(Self::start(config, tokio_handle, Some(runtime), pool_name))
  }

  /// Creates a pool that runs its tasks on an existing Tokio runtime.
  pub fn with_handle(config: PoolConfig, tokio_handle: TokioHandle, pool_name: &str) -> Arc<Self> {
    Self::start(config.normalized(), tokio_handle, None, pool_name)
  }

  fn start(config: PoolConfig, tokio_handle: TokioHandle, runtime: Option<Runtime>, pool_name: &str) -> Arc<Self> {
    let (producer, consumer) = TaskQueue::new(config.queue_capacity).split();
    let shutdown_token = CancellationToken::new();

    let pool = Arc::new(Self {
      pool_name: Arc::new(pool_name.to_string()),
      semaphore: Arc::new(Semaphore::new(config.max_workers)),
      config,
      tokio_handle: tokio_handle.clone(),
      queue: producer,
      active_task_info: Arc::new(DashMap::new()),
      submitted_count: AtomicU64::new(0),
      shutdown_token: shutdown_token.clone(),
      dispatcher_join_handle: Mutex::new(None),
      runtime: Mutex::new(runtime),
    });

    let dispatcher = tokio_handle.spawn(
      Self::run_dispatch_loop(
        pool.pool_name.clone(),
        pool.semaphore.clone(),
        consumer,
        tokio_handle.clone(),
        pool.active_task_info.clone(),
        shutdown_token,
      )
      .instrument(info_span!("executor_pool_dispatch_loop", name = %pool_name)),
    );
    *pool.dispatcher_join_handle.lock() = Some(dispatcher);

    info!(
      pool_name = %pool.pool_name,
      max_workers = pool.config.max_workers,
      queue_capacity = pool.config.queue_capacity,
      "Executor pool started."
    );
    pool
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  /// Returns the number of tasks currently holding a worker.
  pub fn active_task_count(&self) -> usize {
    self.active_task_info.len()
  }

  /// Returns the current number of tasks in the pending queue.
  pub fn queued_task_count(&self) -> usize {
    self.queue.queued()
  }

  /// Returns how many tasks were accepted since the pool started.
  pub fn submitted_task_count(&self) -> u64 {
    self.submitted_count.load(AtomicOrdering::Acquire)
  }

  pub fn is_shut_down(&self) -> bool {
    self.shutdown_token.is_cancelled()
  }

  /// Schedules a future on the pool and returns a handle to its result.
  ///
  /// The task starts at once if a worker is free, otherwise it waits in the
  /// queue.
  ///
  /// # Errors
  /// Returns `PoolError::QueueFull` if every worker is busy and the queue has
  /// no free slot, and `PoolError::PoolShuttingDown` once shutdown has begun.
  pub async fn submit<T: Send + 'static>(&self, task_future: TaskToExecute<T>) -> Result<TaskHandle<T>, PoolError> {
    if self.shutdown_token.is_cancelled() || self.queue.is_closed() {
      warn!(pool_name = %self.pool_name, "Submit: Attempted to submit task to a pool that is shutting down or closed.");
      return Err(PoolError::PoolShuttingDown);
    }

    let task_id = NEXT_POOL_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let token = CancellationToken::new();
    let state = Arc::new(TaskState::default());
    let (result_tx, result_rx) = oneshot::channel::<Result<T, PoolError>>();

    let job_token = token.clone();
    let job_pool_name = self.pool_name.clone();
    let job: TaskToExecute<()> = Box::pin(async move {
      let outcome = tokio::select! {
        biased;
        _ = job_token.cancelled() => {
          debug!(pool_name = %*job_pool_name, %task_id, "Task execution cancelled by its token.");
          Err(PoolError::TaskCancelled)
        }
        task_result = AssertUnwindSafe(task_future).catch_unwind() => task_result.map_err(|_panic_payload| {
          error!(pool_name = %*job_pool_name, %task_id, "Task panicked during execution.");
          PoolError::TaskPanicked
        }),
      };

      if result_tx.send(outcome).is_err() {
        trace!(pool_name = %*job_pool_name, %task_id, "Result receiver for task was dropped. Outcome discarded.");
      }
    });

    let managed_task_internal = ManagedTaskInternal {
      task_id,
      job,
      state: state.clone(),
      token,
    };

    match self.semaphore.clone().try_acquire_owned() {
      Ok(permit) => {
        // No handle exists yet, so nothing can have cancelled the task.
        let started = state.try_start();
        debug_assert!(started);
        self.submitted_count.fetch_add(1, AtomicOrdering::AcqRel);
        debug!(pool_name = %self.pool_name, %task_id, "Worker free, starting task without queueing.");
        Self::spawn_with_permit(
          &self.pool_name,
          &self.tokio_handle,
          &self.active_task_info,
          managed_task_internal,
          permit,
        );
      }
      Err(_) => {
        if let Err(send_error) = self.queue.send(managed_task_internal, &self.shutdown_token).await {
          warn!(pool_name = %self.pool_name, %task_id, "Submit: Task rejected: {}", send_error);
          return Err(send_error);
        }
        self.submitted_count.fetch_add(1, AtomicOrdering::AcqRel);
        debug!(pool_name = %self.pool_name, %task_id, "Task queued.");
      }
    }

    Ok(TaskHandle {
      task_id,
      state,
      result_receiver: Some(result_rx),
    })
  }

  /// Schedules a future whose result nobody awaits.
  pub async fn execute(&self, task_future: TaskToExecute<()>) -> Result<(), PoolError> {
    let handle = self.submit(task_future).await?;
    trace!(pool_name = %self.pool_name, task_id = handle.id(), "Fire-and-forget task queued.");
    Ok(())
  }

  /// Removes a task from the queue if it has not started yet. See [`TaskHandle::cancel`].
  pub fn cancel<T: Send + 'static>(&self, handle: &TaskHandle<T>) -> bool {
    handle.cancel()
  }

  pub async fn shutdown(&self, mode: ShutdownMode) {
    let already_initiating_shutdown = self.shutdown_token.is_cancelled();

    if !already_initiating_shutdown {
      info!(pool_name = %self.pool_name, "Initiating explicit pool shutdown (mode: {:?}).", mode);
      self.shutdown_token.cancel();
      self.queue.close();

      if mode == ShutdownMode::ForcefulCancel {
        info!(pool_name = %self.pool_name, "Forceful shutdown: Cancelling {} active tasks.", self.active_task_info.len());
        for entry in self.active_task_info.iter() {
          debug!(pool_name = %self.pool_name, task_id = %entry.key(), "Forcefully cancelling active task during shutdown.");
          entry.value().cancel();
        }
      }
    } else {
      info!(pool_name = %self.pool_name, "Shutdown already in progress or initiated by another call/Drop.");
    }

    let handle_to_await = self.dispatcher_join_handle.lock().take();
    if let Some(handle) = handle_to_await {
      match handle.await {
        Ok(()) => debug!(pool_name = %self.pool_name, "Dispatch loop joined."),
        Err(join_error) => {
          error!(pool_name = %self.pool_name, "Error joining dispatch loop during shutdown: {:?}", join_error);
        }
      }
    }

    // Every running task holds a permit, so owning all of them means none is left.
    // Cancelled tasks give theirs back at their next await point.
    let all_permits = u32::try_from(self.config.max_workers).unwrap_or(u32::MAX);
    match self.semaphore.acquire_many(all_permits).await {
      Ok(_permits) => debug!(pool_name = %self.pool_name, "All active tasks finished."),
      Err(_) => warn!(pool_name = %self.pool_name, "Semaphore closed while waiting for active tasks."),
    }

    if let Some(runtime) = self.runtime.lock().take() {
      runtime.shutdown_background();
      debug!(pool_name = %self.pool_name, "Worker runtime released.");
    }

    if !already_initiating_shutdown {
      info!(pool_name = %self.pool_name, "Pool shutdown process completed by this call.");
    }
  }

  /// Starts a task on a worker. The permit and the active-map entry are held
  /// until the task's future ends.
  fn spawn_with_permit(
    pool_name: &Arc<String>,
    tasks_tokio_handle: &TokioHandle,
    active_task_info_map: &ActiveTaskMap,
    managed_task: ManagedTaskInternal,
    permit: OwnedSemaphorePermit,
  ) {
    let task_id = managed_task.task_id;
    active_task_info_map.insert(task_id, managed_task.token.clone());
    let active_guard = ActiveTaskGuard {
      task_id,
      map: active_task_info_map.clone(),
    };
    tasks_tokio_handle.spawn(
      async move {
        let _permit = permit;
        let _active_guard = active_guard;
        managed_task.job.await;
      }
      .instrument(info_span!("pooled_task", pool_name = %**pool_name, %task_id)),
    );
  }

  async fn run_dispatch_loop(
    pool_name: Arc<String>,
    semaphore: Arc<Semaphore>,
    mut task_queue_rx: QueueConsumer,
    tasks_tokio_handle: TokioHandle,
    active_task_info_map: ActiveTaskMap,
    shutdown_token: CancellationToken,
  ) {
    info!(name = %*pool_name, "Dispatch loop started.");

    loop {
      let queued_message = tokio::select! {
        biased;
        _ = shutdown_token.cancelled() => {
          info!(name = %*pool_name, "Shutdown signal received. Dispatch loop terminating.");
          break;
        }
        recv_result = task_queue_rx.recv() => match recv_result {
          Ok(message) => message,
          Err(_) => {
            info!(name = %*pool_name, "Task queue closed and empty. Dispatch loop terminating.");
            break;
          }
        },
      };

      // The message keeps its queue slot until a worker is free for it.
      let permit = tokio::select! {
        biased;
        _ = shutdown_token.cancelled() => {
          info!(name = %*pool_name, "Shutdown signal received while waiting for a worker. Dispatch loop terminating.");
          break;
        }
        permit_acquisition_result = semaphore.clone().acquire_owned() => match permit_acquisition_result {
          Ok(permit) => permit,
          Err(_) => {
            error!(name = %*pool_name, "Semaphore closed. Dispatch loop exiting.");
            break;
          }
        },
      };
      trace!(name = %*pool_name, "Acquired worker permit. Available: {}", semaphore.available_permits());

      let managed_task = queued_message.into_task();
      if !managed_task.state.try_start() {
        debug!(name = %*pool_name, task_id = %managed_task.task_id, "Dequeued task was cancelled while queued. Skipping.");
        continue;
      }

      debug!(name = %*pool_name, task_id = %managed_task.task_id, "Dequeued task. Spawning with permit.");
      Self::spawn_with_permit(&pool_name, &tasks_tokio_handle, &active_task_info_map, managed_task, permit);
    }

    info!(
      name = %*pool_name,
      "Dispatch loop stopped. Active tasks remaining: {}",
      active_task_info_map.len()
    );
  }
}

/// Removes a task from the active map however its future ends, including
/// being dropped by a runtime shutdown.
struct ActiveTaskGuard {
  task_id: u64,
  map: ActiveTaskMap,
}

impl Drop for ActiveTaskGuard {
  fn drop(&mut self) {
    self.map.remove(&self.task_id);
    trace!(task_id = %self.task_id, "Pooled task finished, removed active info.");
  }
}

impl Drop for ExecutorPool {
  fn drop(&mut self) {
    if !self.shutdown_token.is_cancelled() {
      info!(
        pool_name = %*self.pool_name,
        "ExecutorPool instance dropped. Initiating implicit shutdown."
      );
      self.shutdown_token.cancel();
      self.queue.close();
    }

    // Never blocks: dropping a runtime inside async code would panic.
    if let Some(runtime) = self.runtime.get_mut().take() {
      runtime.shutdown_background();
    }
  }
}
