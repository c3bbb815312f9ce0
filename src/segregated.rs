use std::{cell::RefCell, cmp, fmt, ptr, ptr::NonNull, rc::Rc};

use crate::{
  align::{self, MAX_BYTES, NUM_FREE_LISTS, REFILL_COUNT},
  block::FreeLists,
  error::AllocError,
  fallback::FallbackAllocator,
  oom::OomHandler,
  pool::MemoryPool,
  system::{LibcSystem, SystemAlloc},
};

/// Handle through which every container of a program shares one allocator
/// context. Deliberately `!Send` and `!Sync`.
pub type SharedAllocator<S = LibcSystem> = Rc<RefCell<SegregatedAllocator<S>>>;

/// Second tier: sixteen size-class free lists fed by a memory pool, with
/// requests above [`MAX_BYTES`] forwarded to the [`FallbackAllocator`].
///
/// Blocks are handed out without any header, so every `deallocate` and
/// `reallocate` must be told the size the block was allocated with.
pub struct SegregatedAllocator<S: SystemAlloc = LibcSystem> {
  fallback: FallbackAllocator<S>,
  pool: MemoryPool,
  free_lists: FreeLists,
  refill_count: usize,
}

impl SegregatedAllocator<LibcSystem> {
  pub fn new() -> Self {
    Self::with_system(LibcSystem)
  }
}

impl Default for SegregatedAllocator<LibcSystem> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: SystemAlloc> SegregatedAllocator<S> {
  pub fn with_system(system: S) -> Self {
    Self::with_refill_count(system, REFILL_COUNT)
  }

  /// Uses batches of `refill_count` nodes (at least one) when a free list
  /// has to be refilled from the pool.
  pub fn with_refill_count(
    system: S,
    refill_count: usize,
  ) -> Self {
    Self {
      fallback: FallbackAllocator::with_system(system),
      pool: MemoryPool::new(),
      free_lists: FreeLists::new(),
      refill_count: refill_count.max(1),
    }
  }

  /// Wraps the allocator in the handle containers share.
  pub fn into_shared(self) -> SharedAllocator<S> {
    Rc::new(RefCell::new(self))
  }

  pub fn set_oom_handler(
    &mut self,
    handler: Option<Box<dyn OomHandler>>,
  ) -> Option<Box<dyn OomHandler>> {
    self.fallback.set_oom_handler(handler)
  }

  pub fn fallback_mut(&mut self) -> &mut FallbackAllocator<S> {
    &mut self.fallback
  }

  pub fn system(&self) -> &S {
    self.fallback.system()
  }

  /// Allocates a block of at least `size` bytes, aligned to [`align::ALIGN`].
  ///
  /// A zero-byte request is served as the smallest class.
  ///
  /// # Errors
  ///
  /// [`AllocError::OutOfMemory`] when the system is exhausted, no free list
  /// can be cannibalized and no OOM handler is left.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if size > MAX_BYTES {
      return self.fallback.allocate(size);
    }

    let size = size.max(1);

    match self.free_lists.for_size(size).pop() {
      Some(block) => Ok(block),
      None => self.refill(align::round_up(size)),
    }
  }

  /// Returns a block to its free list, or to the system if it is large.
  ///
  /// # Safety
  ///
  /// `block` must come from this allocator, allocated with `size` bytes, and
  /// must not be used afterwards. A wrong `size` silently corrupts the free
  /// lists.
  pub unsafe fn deallocate(
    &mut self,
    block: NonNull<u8>,
    size: usize,
  ) {
    if size > MAX_BYTES {
      unsafe { self.fallback.deallocate(block, size) };
      return;
    }

    unsafe { self.free_lists.for_size(size.max(1)).push(block) };
  }

  /// Moves a block to one of `new_size` bytes, keeping the first
  /// `min(old_size, new_size)` bytes.
  ///
  /// Only a large-to-large resize reaches the system `realloc`; everything
  /// else is allocate, copy, deallocate.
  ///
  /// # Errors
  ///
  /// [`AllocError::OutOfMemory`] as for [`allocate`](Self::allocate); the old
  /// block is left untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`deallocate`](Self::deallocate) for `block` and
  /// `old_size`.
  pub unsafe fn reallocate(
    &mut self,
    block: NonNull<u8>,
    old_size: usize,
    new_size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    if old_size > MAX_BYTES && new_size > MAX_BYTES {
      return unsafe { self.fallback.reallocate(block, old_size, new_size) };
    }

    let moved = self.allocate(new_size)?;

    unsafe {
      ptr::copy_nonoverlapping(
        block.as_ptr(),
        moved.as_ptr(),
        cmp::min(old_size, new_size),
      );
      self.deallocate(block, old_size);
    }

    Ok(moved)
  }

  /// Number of free blocks in list `index`, zero for an out-of-range index.
  pub fn free_list_len(
    &self,
    index: usize,
  ) -> usize {
    self.free_lists.get(index).map_or(0, |list| list.len())
  }

  pub fn free_list_lens(&self) -> [usize; NUM_FREE_LISTS] {
    self.free_lists.lens()
  }

  /// Bytes parked on the free lists.
  pub fn free_bytes(&self) -> usize {
    self.free_lists.bytes()
  }

  /// Bytes of the current arena not yet carved into blocks.
  pub fn pool_remaining(&self) -> usize {
    self.pool.remaining()
  }

  /// Total bytes ever obtained from the system for arenas.
  pub fn heap_size(&self) -> usize {
    self.pool.heap_size()
  }

  fn refill(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let (chunk, count) = self.pool.chunk_alloc(
      size,
      self.refill_count,
      &mut self.free_lists,
      &mut self.fallback,
    )?;

    log::trace!("refill: {count} blocks of {size} bytes");

    if count > 1 {
      unsafe {
        self
          .free_lists
          .for_size(size)
          .push_chain(chunk.add(size), size, count - 1);
      }
    }

    Ok(chunk)
  }
}

impl<S: SystemAlloc> Drop for SegregatedAllocator<S> {
  fn drop(&mut self) {
    self.pool.release(&mut self.fallback);
  }
}

impl<S: SystemAlloc + fmt::Debug> fmt::Debug for SegregatedAllocator<S> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("SegregatedAllocator")
      .field("fallback", &self.fallback)
      .field("free_list_lens", &self.free_list_lens())
      .field("pool_remaining", &self.pool_remaining())
      .field("heap_size", &self.heap_size())
      .field("refill_count", &self.refill_count)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use rand::{Rng, SeedableRng, rngs::StdRng};
  use test_log::test;

  use super::*;
  use crate::testing::{BudgetSystem, FailingSystem};

  fn allocator() -> SegregatedAllocator<BudgetSystem> {
    let mut alloc = SegregatedAllocator::with_system(BudgetSystem::unlimited());
    alloc.set_oom_handler(None);
    alloc
  }

  #[test]
  fn test_refill_from_empty() {
    let mut alloc = allocator();

    let block = alloc.allocate(40).unwrap();

    assert_eq!(alloc.system().requests(), &[2 * 40 * 20]);
    assert_eq!(alloc.free_list_len(4), 19);
    assert_eq!(alloc.free_list_lens().iter().sum::<usize>(), 19);

    let next = alloc.allocate(40).unwrap();
    assert_eq!(next, unsafe { block.add(40) });
  }

  #[test]
  fn test_lifo_reuse() {
    let mut alloc = allocator();

    let a = alloc.allocate(24).unwrap();
    let b = alloc.allocate(24).unwrap();

    unsafe {
      alloc.deallocate(a, 24);
      alloc.deallocate(b, 24);
    }

    assert_eq!(alloc.allocate(24).unwrap(), b);
    assert_eq!(alloc.allocate(17).unwrap(), a);
  }

  #[test]
  fn test_large_request_bypasses_free_lists() {
    let mut alloc = allocator();
    alloc.allocate(8).unwrap();
    let before = alloc.free_list_lens();
    let pool_before = alloc.pool_remaining();

    let block = alloc.allocate(200).unwrap();

    assert_eq!(alloc.free_list_lens(), before);
    assert_eq!(alloc.pool_remaining(), pool_before);
    assert_eq!(alloc.system().requests().last(), Some(&200));

    unsafe { alloc.deallocate(block, 200) };

    assert_eq!(alloc.free_list_lens(), before);
    assert_eq!(alloc.system().live(), alloc.heap_size());
  }

  #[test]
  fn test_pool_partial_refill_then_salvage() {
    let mut borrowed = vec![0u64; 19];
    let mut alloc = allocator();
    let start = NonNull::new(borrowed.as_mut_ptr().cast::<u8>()).unwrap();
    alloc.pool.install_borrowed(start, 150);

    let first = alloc.allocate(64).unwrap();

    assert_eq!(first, start);
    assert_eq!(alloc.free_list_len(7), 1);
    assert_eq!(alloc.pool_remaining(), 22);
    assert!(alloc.system().requests().is_empty());

    alloc.allocate(64).unwrap();
    alloc.allocate(64).unwrap();

    assert_eq!(alloc.free_list_len(2), 1);
    assert_eq!(alloc.system().requests(), &[2 * 64 * 20]);
    assert_eq!(alloc.free_list_len(7), 19);
  }

  #[test]
  fn test_cannibalizes_when_arena_growth_fails() {
    let mut alloc = SegregatedAllocator::with_system(BudgetSystem::new(2560));
    alloc.set_oom_handler(None);

    alloc.allocate(64).unwrap();
    assert_eq!(alloc.free_list_len(7), 19);
    assert_eq!(alloc.pool_remaining(), 1280);

    alloc.allocate(128).unwrap();
    assert_eq!(alloc.free_list_len(15), 9);
    assert_eq!(alloc.pool_remaining(), 0);

    alloc.allocate(96).unwrap();
    assert_eq!(alloc.free_list_len(15), 8);
    assert_eq!(alloc.free_list_len(11), 0);
    assert_eq!(alloc.pool_remaining(), 32);
    assert_eq!(alloc.heap_size(), 2560);

    alloc.allocate(8).unwrap();
    assert_eq!(alloc.free_list_len(0), 3);
    assert_eq!(alloc.pool_remaining(), 0);
  }

  #[test]
  fn test_fatal_large_request() {
    let mut alloc = SegregatedAllocator::with_system(FailingSystem::default());
    alloc.set_oom_handler(None);

    assert_eq!(
      alloc.allocate(200),
      Err(AllocError::OutOfMemory { requested: 200 })
    );
  }

  #[test]
  fn test_fatal_small_request() {
    let mut alloc = SegregatedAllocator::with_system(FailingSystem::default());
    alloc.set_oom_handler(None);

    assert_eq!(
      alloc.allocate(8),
      Err(AllocError::OutOfMemory { requested: 2 * 8 * 20 })
    );
    assert_eq!(alloc.free_list_lens(), [0; NUM_FREE_LISTS]);
  }

  #[test]
  fn test_custom_refill_count() {
    let mut alloc = SegregatedAllocator::with_refill_count(BudgetSystem::unlimited(), 4);

    alloc.allocate(16).unwrap();

    assert_eq!(alloc.free_list_len(1), 3);
    assert_eq!(alloc.system().requests(), &[2 * 16 * 4]);
  }

  #[test]
  fn test_reallocate_small_to_small() {
    let mut alloc = allocator();
    let block = alloc.allocate(16).unwrap();
    unsafe { block.write_bytes(0x7E, 16) };

    let moved = unsafe { alloc.reallocate(block, 16, 48) }.unwrap();

    assert_eq!(unsafe { moved.add(15).read() }, 0x7E);
    assert_eq!(alloc.free_list_len(1), 20);
  }

  #[test]
  fn test_reallocate_small_to_large_does_not_realloc_pool_memory() {
    let mut alloc = allocator();
    let block = alloc.allocate(100).unwrap();
    unsafe { block.write_bytes(0x3C, 100) };

    let moved = unsafe { alloc.reallocate(block, 100, 500) }.unwrap();

    assert_eq!(alloc.system().requests().last(), Some(&500));
    assert_eq!(unsafe { moved.add(99).read() }, 0x3C);
    assert_eq!(alloc.free_list_len(12), 20);

    unsafe { alloc.deallocate(moved, 500) };
  }

  #[test]
  fn test_reallocate_large_to_large_and_back() {
    let mut alloc = allocator();
    let block = alloc.allocate(300).unwrap();
    unsafe { block.write_bytes(0x42, 300) };

    let grown = unsafe { alloc.reallocate(block, 300, 3000) }.unwrap();
    assert_eq!(unsafe { grown.add(299).read() }, 0x42);
    assert_eq!(alloc.system().live(), 3000);

    let shrunk = unsafe { alloc.reallocate(grown, 3000, 64) }.unwrap();
    assert_eq!(unsafe { shrunk.add(63).read() }, 0x42);
    assert_eq!(alloc.system().live(), alloc.heap_size());
  }

  #[test]
  fn test_zero_byte_request_uses_smallest_class() {
    let mut alloc = allocator();

    let block = alloc.allocate(0).unwrap();
    assert_eq!(alloc.free_list_len(0), 19);

    unsafe { alloc.deallocate(block, 0) };
    assert_eq!(alloc.free_list_len(0), 20);
  }

  #[test]
  fn test_no_byte_created_or_destroyed() {
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut alloc = allocator();
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for step in 0..5_000_usize {
      if live.is_empty() || rng.random_bool(0.6) {
        let size = rng.random_range(1..=MAX_BYTES);
        let tag = (step % 251) as u8;
        let block = alloc.allocate(size).unwrap();
        unsafe { block.write_bytes(tag, size) };
        live.push((block, size, tag));
      } else {
        let (block, size, tag) = live.swap_remove(rng.random_range(0..live.len()));
        for offset in 0..size {
          assert_eq!(unsafe { block.add(offset).read() }, tag);
        }
        unsafe { alloc.deallocate(block, size) };
      }

      let live_bytes: usize = live.iter().map(|&(_, size, _)| align::round_up(size)).sum();
      assert_eq!(
        alloc.free_bytes() + live_bytes + alloc.pool_remaining(),
        alloc.heap_size()
      );
    }
  }

  #[test]
  fn test_release_returns_arenas() {
    let shared = allocator().into_shared();

    shared.borrow_mut().allocate(8).unwrap();
    shared.borrow_mut().allocate(72).unwrap();
    let heap = shared.borrow().heap_size();
    assert_eq!(shared.borrow().system().live(), heap);

    let mut alloc = shared.borrow_mut();
    let SegregatedAllocator { pool, fallback, .. } = &mut *alloc;
    pool.release(fallback);

    assert_eq!(alloc.system().live(), 0);
    assert_eq!(alloc.pool_remaining(), 0);
  }
}
