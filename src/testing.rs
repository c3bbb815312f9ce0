//! `SystemAlloc` doubles for driving the failure paths deterministically.

use std::ptr;

use crate::system::{LibcSystem, SystemAlloc};

/// Every request fails.
#[derive(Debug, Default)]
pub(crate) struct FailingSystem {
  attempts: usize,
}

impl FailingSystem {
  pub(crate) fn attempts(&self) -> usize {
    self.attempts
  }
}

impl SystemAlloc for FailingSystem {
  unsafe fn alloc(
    &mut self,
    _size: usize,
  ) -> *mut u8 {
    self.attempts += 1;
    ptr::null_mut()
  }

  unsafe fn realloc(
    &mut self,
    _ptr: *mut u8,
    _old_size: usize,
    _new_size: usize,
  ) -> *mut u8 {
    self.attempts += 1;
    ptr::null_mut()
  }

  unsafe fn free(
    &mut self,
    _ptr: *mut u8,
    _size: usize,
  ) {
  }
}

/// libc-backed, but the next `failures` attempts fail.
#[derive(Debug, Default)]
pub(crate) struct FlakySystem {
  failures: usize,
  attempts: usize,
}

impl FlakySystem {
  pub(crate) fn failing_first(failures: usize) -> Self {
    Self {
      failures,
      attempts: 0,
    }
  }

  pub(crate) fn fail_next(
    &mut self,
    failures: usize,
  ) {
    self.failures = failures;
  }

  pub(crate) fn attempts(&self) -> usize {
    self.attempts
  }

  fn should_fail(&mut self) -> bool {
    self.attempts += 1;

    if self.failures > 0 {
      self.failures -= 1;
      true
    } else {
      false
    }
  }
}

impl SystemAlloc for FlakySystem {
  unsafe fn alloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if self.should_fail() {
      return ptr::null_mut();
    }
    unsafe { LibcSystem.alloc(size) }
  }

  unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    old_size: usize,
    new_size: usize,
  ) -> *mut u8 {
    if self.should_fail() {
      return ptr::null_mut();
    }
    unsafe { LibcSystem.realloc(ptr, old_size, new_size) }
  }

  unsafe fn free(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) {
    unsafe { LibcSystem.free(ptr, size) }
  }
}

/// libc-backed until `budget` bytes have been handed out; every request is
/// recorded, successful or not.
#[derive(Debug)]
pub(crate) struct BudgetSystem {
  budget: usize,
  requests: Vec<usize>,
  live: usize,
}

impl BudgetSystem {
  pub(crate) fn new(budget: usize) -> Self {
    Self {
      budget,
      requests: Vec::new(),
      live: 0,
    }
  }

  pub(crate) fn unlimited() -> Self {
    Self::new(usize::MAX)
  }

  pub(crate) fn requests(&self) -> &[usize] {
    &self.requests
  }

  /// Bytes handed out and not yet freed.
  pub(crate) fn live(&self) -> usize {
    self.live
  }
}

impl SystemAlloc for BudgetSystem {
  unsafe fn alloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    self.requests.push(size);

    if size > self.budget {
      return ptr::null_mut();
    }

    let block = unsafe { LibcSystem.alloc(size) };
    if !block.is_null() {
      self.budget -= size;
      self.live += size;
    }
    block
  }

  unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    old_size: usize,
    new_size: usize,
  ) -> *mut u8 {
    self.requests.push(new_size);

    let growth = new_size.saturating_sub(old_size);
    if growth > self.budget {
      return ptr::null_mut();
    }

    let block = unsafe { LibcSystem.realloc(ptr, old_size, new_size) };
    if !block.is_null() {
      self.budget -= growth;
      self.live = self.live - old_size + new_size;
    }
    block
  }

  unsafe fn free(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) {
    self.live -= size;
    unsafe { LibcSystem.free(ptr, size) }
  }
}
