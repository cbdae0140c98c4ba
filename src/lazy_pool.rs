use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::pool::{ExecutorPool, ShutdownMode};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

lazy_static::lazy_static! {
  static ref GLOBAL_POOL: LazyExecutorPool = LazyExecutorPool::new(PoolConfig::default(), "ordered_batch_global");
}

/// Returns the process-wide pool holder, created on first access with the
/// default configuration.
pub fn global_pool() -> &'static LazyExecutorPool {
  &GLOBAL_POOL
}

/// Holds an `ExecutorPool` that is created on first use.
///
/// After `shutdown`, the next `get` builds a fresh pool.
#[derive(Debug)]
pub struct LazyExecutorPool {
  config: PoolConfig,
  pool_name: String,
  current: Mutex<Option<Arc<ExecutorPool>>>,
}

impl LazyExecutorPool {
  pub fn new(config: PoolConfig, pool_name: &str) -> Self {
    Self {
      config,
      pool_name: pool_name.to_string(),
      current: Mutex::new(None),
    }
  }

  /// Returns the live pool, creating it if there is none or the last one was shut down.
  pub fn get(&self) -> Result<Arc<ExecutorPool>, PoolError> {
    let mut current = self.current.lock();
    if let Some(pool) = current.as_ref().filter(|pool| !pool.is_shut_down()) {
      return Ok(pool.clone());
    }

    info!(pool_name = %self.pool_name, "Creating executor pool on first use.");
    let pool = ExecutorPool::new(self.config.clone(), &self.pool_name)?;
    *current = Some(pool.clone());
    Ok(pool)
  }

  pub fn is_initialized(&self) -> bool {
    self.current.lock().as_ref().is_some_and(|pool| !pool.is_shut_down())
  }

  /// Shuts the current pool down, if any. Callers still holding the old
  /// `Arc<ExecutorPool>` see `PoolError::PoolShuttingDown` on submit.
  pub async fn shutdown(&self, mode: ShutdownMode) {
    let taken = self.current.lock().take();
    match taken {
      Some(pool) => pool.shutdown(mode).await,
      None => debug!(pool_name = %self.pool_name, "Shutdown requested but no pool was created."),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn recreates_pool_after_shutdown() {
    let lazy = LazyExecutorPool::new(PoolConfig::default().core_workers(1), "unit_lazy_pool");
    assert!(!lazy.is_initialized());

    let first = lazy.get().unwrap();
    let again = lazy.get().unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    lazy.shutdown(ShutdownMode::Graceful).await;
    assert!(first.is_shut_down());
    assert!(!lazy.is_initialized());

    let second = lazy.get().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    let handle = second.submit(Box::pin(async { "fresh" })).await.unwrap();
    assert_eq!(handle.await_result().await, Ok("fresh"));
    lazy.shutdown(ShutdownMode::Graceful).await;
  }
}
