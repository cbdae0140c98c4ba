use std::time::Duration;

/// Maximum number of tasks running at once.
pub const DEFAULT_MAX_WORKERS: usize = 20;
/// Maximum number of tasks waiting in the queue before submissions are rejected.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;
/// How long an idle non-core worker thread is kept around.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(1);

/// Sizing for an `ExecutorPool`.
///
/// The defaults mirror a fixed-size service pool: one core worker per CPU plus
/// one, at most [`DEFAULT_MAX_WORKERS`] tasks in flight and a queue of
/// [`DEFAULT_QUEUE_CAPACITY`] pending tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub core_workers: usize,
  pub max_workers: usize,
  pub queue_capacity: usize,
  pub keep_alive: Duration,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      core_workers: num_cpus::get() + 1,
      max_workers: DEFAULT_MAX_WORKERS,
      queue_capacity: DEFAULT_QUEUE_CAPACITY,
      keep_alive: DEFAULT_KEEP_ALIVE,
    }
  }
}

impl PoolConfig {
  pub fn core_workers(mut self, core_workers: usize) -> Self {
    self.core_workers = core_workers;
    self
  }

  pub fn max_workers(mut self, max_workers: usize) -> Self {
    self.max_workers = max_workers;
    self
  }

  pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
    self.queue_capacity = queue_capacity;
    self
  }

  pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
    self.keep_alive = keep_alive;
    self
  }

  /// Clamps every size to at least one so a misconfigured pool still makes progress.
  pub(crate) fn normalized(mut self) -> Self {
    self.core_workers = self.core_workers.max(1);
    self.max_workers = self.max_workers.max(1);
    self.queue_capacity = self.queue_capacity.max(1);
    self
  }
}
