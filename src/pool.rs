use std::ptr::NonNull;

use crate::{
  align,
  block::FreeLists,
  error::AllocError,
  fallback::FallbackAllocator,
  system::SystemAlloc,
};

/// The uncommitted tail of the current arena, carved front to back into
/// batches of same-sized nodes for the free lists.
///
/// ```text
///   arena from the fallback allocator
///   ┌──────────┬──────────┬──────────┬─────────────────────────────┐
///   │ batch 40 │ batch 64 │ batch 16 │        uncommitted          │
///   └──────────┴──────────┴──────────┴─────────────────────────────┘
///                                    ▲                             ▲
///                                  start                  start + remaining
/// ```
pub(crate) struct MemoryPool {
  start: NonNull<u8>,
  remaining: usize,
  /// Total bytes ever obtained for arenas. Only drives the growth heuristic.
  heap_size: usize,
  arenas: Vec<(NonNull<u8>, usize)>,
}

impl MemoryPool {
  pub(crate) fn new() -> Self {
    Self {
      start: NonNull::dangling(),
      remaining: 0,
      heap_size: 0,
      arenas: Vec::new(),
    }
  }

  pub(crate) fn remaining(&self) -> usize {
    self.remaining
  }

  pub(crate) fn heap_size(&self) -> usize {
    self.heap_size
  }

  /// Hands out up to `count` contiguous nodes of `size` bytes and returns how
  /// many it actually provided (at least one).
  ///
  /// When the pool cannot cover even one node it salvages its leftover into
  /// the matching free list, then tries in order: a fresh arena straight from
  /// the system, a block from a free list of `size` bytes or larger, and
  /// finally the fallback allocator's OOM retry loop, whose failure is fatal.
  ///
  /// `size` must be a multiple of [`align::ALIGN`] no larger than
  /// [`align::MAX_BYTES`].
  pub(crate) fn chunk_alloc<S: SystemAlloc>(
    &mut self,
    size: usize,
    count: usize,
    lists: &mut FreeLists,
    fallback: &mut FallbackAllocator<S>,
  ) -> Result<(NonNull<u8>, usize), AllocError> {
    let total = size
      .checked_mul(count)
      .ok_or(AllocError::CapacityOverflow { count, size })?;

    loop {
      if self.remaining >= total {
        log::trace!("pool: carving {count} x {size} bytes");
        return Ok((self.carve(total), count));
      }

      if self.remaining >= size {
        let actual = self.remaining / size;
        log::trace!("pool: carving {actual} x {size} bytes, {count} wanted");
        return Ok((self.carve(actual * size), actual));
      }

      let bytes_to_get = self.growth_for(total, count, size)?;
      self.salvage(lists);

      if let Some(arena) = fallback.try_allocate_once(bytes_to_get) {
        self.install_arena(arena, bytes_to_get);
        continue;
      }

      if let Some((block, class_size)) = lists.take_at_least(size) {
        log::debug!("pool: arena growth failed, reusing a free {class_size} byte block");
        self.start = block;
        self.remaining = class_size;
        continue;
      }

      let arena = fallback.allocate(bytes_to_get)?;
      self.install_arena(arena, bytes_to_get);
    }
  }

  /// Returns every arena to the fallback allocator. Any block carved from
  /// them becomes dangling.
  pub(crate) fn release<S: SystemAlloc>(
    &mut self,
    fallback: &mut FallbackAllocator<S>,
  ) {
    for (arena, size) in self.arenas.drain(..) {
      unsafe { fallback.deallocate(arena, size) };
    }

    self.start = NonNull::dangling();
    self.remaining = 0;
  }

  /// `2 * total + round_up(heap_size / 16)`
  fn growth_for(
    &self,
    total: usize,
    count: usize,
    size: usize,
  ) -> Result<usize, AllocError> {
    total
      .checked_mul(2)
      .and_then(|bytes| bytes.checked_add(align::round_up(self.heap_size >> 4)))
      .ok_or(AllocError::CapacityOverflow { count, size })
  }

  fn carve(
    &mut self,
    bytes: usize,
  ) -> NonNull<u8> {
    let block = self.start;

    self.start = unsafe { block.add(bytes) };
    self.remaining -= bytes;

    block
  }

  fn salvage(
    &mut self,
    lists: &mut FreeLists,
  ) {
    if self.remaining == 0 {
      return;
    }

    log::debug!("pool: salvaging {} leftover bytes", self.remaining);

    unsafe { lists.for_size(self.remaining).push(self.start) };
    self.remaining = 0;
  }

  fn install_arena(
    &mut self,
    arena: NonNull<u8>,
    size: usize,
  ) {
    log::debug!("pool: new arena of {size} bytes at {arena:?}");

    self.arenas.push((arena, size));
    self.start = arena;
    self.remaining = size;
    self.heap_size += size;
  }

  /// Points the pool at memory it does not own.
  #[cfg(test)]
  pub(crate) fn install_borrowed(
    &mut self,
    start: NonNull<u8>,
    size: usize,
  ) {
    self.start = start;
    self.remaining = size;
  }
}
