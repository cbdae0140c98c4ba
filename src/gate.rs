use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_intrusive::sync::ManualResetEvent;

struct GateInner {
  event: ManualResetEvent,
  abandoned: AtomicBool,
}

impl fmt::Debug for GateInner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GateInner")
      .field("open", &self.event.is_set())
      .field("abandoned", &self.abandoned.load(Ordering::Relaxed))
      .finish()
  }
}

/// A single-release start gate shared by every task of one batch.
///
/// Waiters stay parked until the gate is opened exactly once, either by
/// `release` (the batch may start) or by `abandon` (the batch failed before
/// starting and nobody may run).
#[derive(Debug, Clone)]
pub(crate) struct StartGate {
  inner: Arc<GateInner>,
}

impl StartGate {
  pub(crate) fn new() -> Self {
    Self {
      inner: Arc::new(GateInner {
        event: ManualResetEvent::new(false),
        abandoned: AtomicBool::new(false),
      }),
    }
  }

  /// Waits for the gate to open. Returns `true` if the batch may start.
  pub(crate) async fn wait(&self) -> bool {
    self.inner.event.wait().await;
    !self.inner.abandoned.load(Ordering::Acquire)
  }

  pub(crate) fn release(&self) {
    self.inner.event.set();
  }

  pub(crate) fn abandon(&self) {
    // Store before set: a woken waiter must observe the flag.
    self.inner.abandoned.store(true, Ordering::Release);
    self.inner.event.set();
  }

  pub(crate) fn is_open(&self) -> bool {
    self.inner.event.is_set()
  }
}

/// Owning side of a `StartGate`. Abandons the gate on drop unless it was
/// released, so waiters are never left parked when a batch is torn down early.
#[derive(Debug)]
pub(crate) struct GateOwner {
  gate: StartGate,
}

impl GateOwner {
  pub(crate) fn new() -> Self {
    Self { gate: StartGate::new() }
  }

  pub(crate) fn waiter(&self) -> StartGate {
    self.gate.clone()
  }

  pub(crate) fn release(self) {
    self.gate.release();
  }
}

impl Drop for GateOwner {
  fn drop(&mut self) {
    if !self.gate.is_open() {
      self.gate.abandon();
    }
  }
}
