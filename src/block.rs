use std::ptr::NonNull;

use crate::align::{self, NUM_FREE_LISTS};

/// Overlay written into the first word of a block while it sits on a free list.
///
/// A caller-owned block holds caller data in the same bytes, so a block is
/// only ever viewed as a `FreeBlock` between `push` and `pop`.
#[repr(C)]
struct FreeBlock {
  next: Option<NonNull<FreeBlock>>,
}

/// Intrusive LIFO list of same-sized free blocks.
pub(crate) struct FreeList {
  head: Option<NonNull<FreeBlock>>,
  len: usize,
}

impl FreeList {
  pub(crate) const fn new() -> Self {
    Self { head: None, len: 0 }
  }

  pub(crate) fn len(&self) -> usize {
    self.len
  }

  #[cfg(test)]
  pub(crate) fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  /// Links `block` in front of the current head.
  ///
  /// # Safety
  ///
  /// `block` must be valid for writes of a pointer, aligned to a pointer, not
  /// already on any list and not used by anyone else until it is popped.
  pub(crate) unsafe fn push(
    &mut self,
    block: NonNull<u8>,
  ) {
    let node = block.cast::<FreeBlock>();

    unsafe { node.write(FreeBlock { next: self.head }) };

    self.head = Some(node);
    self.len += 1;
  }

  /// Unlinks the head block, handing ownership of its bytes to the caller.
  pub(crate) fn pop(&mut self) -> Option<NonNull<u8>> {
    let node = self.head?;

    // Every node on the list was written by `push` or `push_chain`.
    self.head = unsafe { node.read().next };
    self.len -= 1;

    Some(node.cast())
  }

  /// Threads `count` consecutive blocks of `size` bytes starting at `start`
  /// into a chain and installs it in front of the current head.
  ///
  /// # Safety
  ///
  /// `start..start + size * count` must be writable memory that nobody else
  /// uses, `start` pointer-aligned and `size` a multiple of the pointer size.
  pub(crate) unsafe fn push_chain(
    &mut self,
    start: NonNull<u8>,
    size: usize,
    count: usize,
  ) {
    for i in (0..count).rev() {
      unsafe { self.push(start.add(i * size)) };
    }
  }

  /// Iterates over the free blocks from head to tail.
  #[cfg(test)]
  pub(crate) fn iter(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
    let mut current = self.head;

    std::iter::from_fn(move || {
      let node = current?;
      current = unsafe { node.read().next };
      Some(node.cast())
    })
  }
}

/// The full set of size-class free lists, indexed by [`align::free_list_index`].
pub(crate) struct FreeLists {
  lists: [FreeList; NUM_FREE_LISTS],
}

impl FreeLists {
  pub(crate) const fn new() -> Self {
    const EMPTY: FreeList = FreeList::new();

    Self {
      lists: [EMPTY; NUM_FREE_LISTS],
    }
  }

  /// The list serving requests of `bytes` bytes (`1..=MAX_BYTES`).
  pub(crate) fn for_size(
    &mut self,
    bytes: usize,
  ) -> &mut FreeList {
    &mut self.lists[align::free_list_index(bytes)]
  }

  pub(crate) fn get(
    &self,
    index: usize,
  ) -> Option<&FreeList> {
    self.lists.get(index)
  }

  /// Detaches one block from the first non-empty list whose class is at
  /// least `size` bytes, scanning upward. Returns the block and its class
  /// size.
  pub(crate) fn take_at_least(
    &mut self,
    size: usize,
  ) -> Option<(NonNull<u8>, usize)> {
    let first = align::free_list_index(size);

    self.lists[first..]
      .iter_mut()
      .enumerate()
      .find_map(|(offset, list)| {
        list
          .pop()
          .map(|block| (block, align::class_size(first + offset)))
      })
  }

  pub(crate) fn lens(&self) -> [usize; NUM_FREE_LISTS] {
    std::array::from_fn(|index| self.lists[index].len())
  }

  /// Bytes currently parked on all lists, counted at class size.
  pub(crate) fn bytes(&self) -> usize {
    self
      .lists
      .iter()
      .enumerate()
      .map(|(index, list)| list.len() * align::class_size(index))
      .sum()
  }
}
