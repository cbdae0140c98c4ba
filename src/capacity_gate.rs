use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed number of queue slots, acquired without waiting.
///
/// Unlike a semaphore, `try_acquire` never parks the caller: a full gate is
/// reported immediately so the submitter can reject the task.
#[derive(Debug)]
pub(crate) struct CapacityGate {
  capacity: usize,
  in_use: AtomicUsize,
}

impl CapacityGate {
  pub(crate) fn new(capacity: usize) -> Self {
    Self {
      capacity,
      in_use: AtomicUsize::new(0),
    }
  }

  pub(crate) fn try_acquire(&self) -> bool {
    self
      .in_use
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_use| {
        (in_use < self.capacity).then_some(in_use + 1)
      })
      .is_ok()
  }

  pub(crate) fn release(&self) {
    let previous = self.in_use.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0, "CapacityGate released more often than acquired");
  }

  pub(crate) fn capacity(&self) -> usize {
    self.capacity
  }

  pub(crate) fn in_use(&self) -> usize {
    self.in_use.load(Ordering::Acquire)
  }

  pub(crate) fn get_permits(&self) -> usize {
    self.capacity - self.in_use()
  }
}
