use std::{fmt, mem, ptr::NonNull};

use crate::{
  error::AllocError,
  oom::{OomAction, OomHandler, TrimHandler},
  system::{LibcSystem, SystemAlloc},
};

/// First tier: the system allocator plus an OOM retry loop.
///
/// When the system returns null, the installed [`OomHandler`] runs and the
/// request is retried, indefinitely, until it succeeds or the slot is empty.
/// An empty slot at that point is the only fatal condition in the crate.
pub struct FallbackAllocator<S: SystemAlloc = LibcSystem> {
  system: S,
  oom_handler: Option<Box<dyn OomHandler>>,
}

impl FallbackAllocator<LibcSystem> {
  pub fn new() -> Self {
    Self::with_system(LibcSystem)
  }
}

impl Default for FallbackAllocator<LibcSystem> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: SystemAlloc> FallbackAllocator<S> {
  /// Wraps `system`, with [`TrimHandler`] installed.
  pub fn with_system(system: S) -> Self {
    Self {
      system,
      oom_handler: Some(Box::new(TrimHandler)),
    }
  }

  pub fn system(&self) -> &S {
    &self.system
  }

  pub fn system_mut(&mut self) -> &mut S {
    &mut self.system
  }

  /// Installs `handler` and returns the previous one so the caller can put
  /// it back later. `None` empties the slot.
  pub fn set_oom_handler(
    &mut self,
    handler: Option<Box<dyn OomHandler>>,
  ) -> Option<Box<dyn OomHandler>> {
    mem::replace(&mut self.oom_handler, handler)
  }

  pub fn has_oom_handler(&self) -> bool {
    self.oom_handler.is_some()
  }

  /// Allocates `size` bytes, running the OOM handler until it succeeds.
  ///
  /// # Errors
  ///
  /// [`AllocError::OutOfMemory`] once the system fails with no handler
  /// installed.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if let Some(block) = self.try_allocate_once(size) {
      return Ok(block);
    }

    self.retry(size, |system| unsafe { system.alloc(size.max(1)) })
  }

  /// A single system attempt, without touching the OOM handler.
  pub(crate) fn try_allocate_once(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    NonNull::new(unsafe { self.system.alloc(size.max(1)) })
  }

  /// Resizes a block from [`allocate`](Self::allocate) with the same retry
  /// discipline. On error the old block is still valid.
  ///
  /// # Errors
  ///
  /// [`AllocError::OutOfMemory`] once the system fails with no handler
  /// installed.
  ///
  /// # Safety
  ///
  /// `block` must come from this allocator with `old_size` bytes and must not
  /// have been deallocated.
  pub unsafe fn reallocate(
    &mut self,
    block: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let new_size = new_size.max(1);

    if let Some(moved) =
      NonNull::new(unsafe { self.system.realloc(block.as_ptr(), old_size, new_size) })
    {
      return Ok(moved);
    }

    self.retry(new_size, |system| unsafe {
      system.realloc(block.as_ptr(), old_size, new_size)
    })
  }

  /// Returns a block to the system. Never fails.
  ///
  /// # Safety
  ///
  /// `block` must come from this allocator with `size` bytes and must not
  /// have been deallocated.
  pub unsafe fn deallocate(
    &mut self,
    block: NonNull<u8>,
    size: usize,
  ) {
    unsafe { self.system.free(block.as_ptr(), size) }
  }

  fn retry(
    &mut self,
    requested: usize,
    mut attempt: impl FnMut(&mut S) -> *mut u8,
  ) -> Result<NonNull<u8>, AllocError> {
    log::warn!("system allocation of {requested} bytes failed, entering oom recovery");

    loop {
      let Some(handler) = self.oom_handler.as_mut() else {
        log::error!("out of memory: {requested} bytes and no oom handler installed");
        return Err(AllocError::OutOfMemory { requested });
      };

      if handler.recover() == OomAction::GiveUp {
        log::warn!("oom handler gave up, clearing it");
        self.oom_handler = None;
      }

      if let Some(block) = NonNull::new(attempt(&mut self.system)) {
        return Ok(block);
      }
    }
  }
}

impl<S: SystemAlloc + fmt::Debug> fmt::Debug for FallbackAllocator<S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("FallbackAllocator")
      .field("system", &self.system)
      .field("has_oom_handler", &self.has_oom_handler())
      .finish()
  }
}
