use std::{fmt, marker::PhantomData, mem, ptr, ptr::NonNull, rc::Rc};

use crate::{
  align::ALIGN,
  error::AllocError,
  segregated::SharedAllocator,
  system::{LibcSystem, SystemAlloc},
};

/// Element-counted view of a [`SharedAllocator`] for container code.
///
/// Converts "`count` values of `T`" into bytes, treats zero-count requests as
/// no-ops and leaves construction and destruction of values to explicit
/// [`construct`](Self::construct)/[`destroy`](Self::destroy) calls.
pub struct TypedAllocator<T, S: SystemAlloc = LibcSystem> {
  shared: SharedAllocator<S>,
  _marker: PhantomData<fn() -> T>,
}

impl<T, S: SystemAlloc> TypedAllocator<T, S> {
  /// Compilation fails when `T` needs more than [`ALIGN`] alignment.
  pub fn new(shared: &SharedAllocator<S>) -> Self {
    const {
      assert!(
        mem::align_of::<T>() <= ALIGN,
        "element alignment exceeds the allocator granularity"
      );
    }

    Self {
      shared: Rc::clone(shared),
      _marker: PhantomData,
    }
  }

  pub fn shared(&self) -> &SharedAllocator<S> {
    &self.shared
  }

  /// An allocator for `U` backed by the same context.
  pub fn rebind<U>(&self) -> TypedAllocator<U, S> {
    TypedAllocator::new(&self.shared)
  }

  /// Largest element count whose byte size fits in `usize`.
  pub fn max_size(&self) -> usize {
    usize::MAX / mem::size_of::<T>().max(1)
  }

  /// Space for `count` values. `count == 0` (or a zero-sized `T`) returns a
  /// dangling block without touching the allocator.
  ///
  /// # Errors
  ///
  /// [`AllocError::CapacityOverflow`] when the byte size overflows, and
  /// [`AllocError::OutOfMemory`] on fatal exhaustion.
  pub fn try_allocate(
    &self,
    count: usize,
  ) -> Result<NonNull<T>, AllocError> {
    if count == 0 {
      return Ok(NonNull::dangling());
    }

    match Self::byte_size(count)? {
      0 => Ok(NonNull::dangling()),
      bytes => self
        .shared
        .borrow_mut()
        .allocate(bytes)
        .map(NonNull::cast),
    }
  }

  /// Like [`try_allocate`](Self::try_allocate), for callers that use the
  /// block unconditionally.
  ///
  /// # Panics
  ///
  /// On any [`AllocError`].
  pub fn allocate(
    &self,
    count: usize,
  ) -> NonNull<T> {
    self.try_allocate(count).unwrap_or_else(|err| fatal(err))
  }

  pub fn allocate_one(&self) -> NonNull<T> {
    self.allocate(1)
  }

  /// Gives back space for `count` values. `count == 0` is a no-op.
  ///
  /// # Safety
  ///
  /// `block` must come from an allocator sharing this context with the same
  /// `count`, and any values in it must already be destroyed or moved out.
  pub unsafe fn deallocate(
    &self,
    block: NonNull<T>,
    count: usize,
  ) {
    if count == 0 || mem::size_of::<T>() == 0 {
      return;
    }

    let bytes = count * mem::size_of::<T>();
    unsafe { self.shared.borrow_mut().deallocate(block.cast(), bytes) };
  }

  /// # Safety
  ///
  /// See [`deallocate`](Self::deallocate), with a count of one.
  pub unsafe fn deallocate_one(
    &self,
    block: NonNull<T>,
  ) {
    unsafe { self.deallocate(block, 1) }
  }

  /// Moves the first `min(old_count, new_count)` values into space for
  /// `new_count` values.
  ///
  /// # Errors
  ///
  /// As for [`try_allocate`](Self::try_allocate); `block` stays valid.
  ///
  /// # Safety
  ///
  /// `block` and `old_count` follow the [`deallocate`](Self::deallocate)
  /// contract. Values past `new_count` must be destroyed beforehand.
  pub unsafe fn try_reallocate(
    &self,
    block: NonNull<T>,
    old_count: usize,
    new_count: usize,
  ) -> Result<NonNull<T>, AllocError> {
    if old_count == 0 {
      return self.try_allocate(new_count);
    }

    if new_count == 0 {
      unsafe { self.deallocate(block, old_count) };
      return Ok(NonNull::dangling());
    }

    if mem::size_of::<T>() == 0 {
      return Ok(block);
    }

    let old_bytes = old_count * mem::size_of::<T>();
    let new_bytes = Self::byte_size(new_count)?;

    unsafe {
      self
        .shared
        .borrow_mut()
        .reallocate(block.cast(), old_bytes, new_bytes)
    }
    .map(NonNull::cast)
  }

  /// # Panics
  ///
  /// On any [`AllocError`].
  ///
  /// # Safety
  ///
  /// See [`try_reallocate`](Self::try_reallocate).
  pub unsafe fn reallocate(
    &self,
    block: NonNull<T>,
    old_count: usize,
    new_count: usize,
  ) -> NonNull<T> {
    unsafe { self.try_reallocate(block, old_count, new_count) }
      .unwrap_or_else(|err| fatal(err))
  }

  /// Moves `value` into uninitialized allocated space.
  ///
  /// # Safety
  ///
  /// `block` must point into a live allocation from this context and hold no
  /// value that still needs dropping.
  pub unsafe fn construct(
    &self,
    block: NonNull<T>,
    value: T,
  ) {
    unsafe { block.write(value) }
  }

  /// Drops the value at `block` in place, leaving the space allocated.
  ///
  /// # Safety
  ///
  /// `block` must hold a value previously constructed and not yet destroyed.
  pub unsafe fn destroy(
    &self,
    block: NonNull<T>,
  ) {
    unsafe { ptr::drop_in_place(block.as_ptr()) }
  }

  fn byte_size(count: usize) -> Result<usize, AllocError> {
    let size = mem::size_of::<T>();

    count
      .checked_mul(size)
      .ok_or(AllocError::CapacityOverflow { count, size })
  }
}

impl<T, S: SystemAlloc> Clone for TypedAllocator<T, S> {
  fn clone(&self) -> Self {
    Self {
      shared: Rc::clone(&self.shared),
      _marker: PhantomData,
    }
  }
}

impl<T, S: SystemAlloc> fmt::Debug for TypedAllocator<T, S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("TypedAllocator")
      .field("element", &std::any::type_name::<T>())
      .field("element_size", &mem::size_of::<T>())
      .finish_non_exhaustive()
  }
}

#[cold]
fn fatal(err: AllocError) -> ! {
  log::error!("fatal allocation failure: {err}");
  panic!("{err}")
}
