use std::mem;

use static_assertions::const_assert;

/// Granularity every small request is rounded up to.
pub const ALIGN: usize = 8;

/// Largest request served from the free lists. Anything above goes straight
/// to the fallback allocator.
pub const MAX_BYTES: usize = 128;

/// One free list per size class: 8, 16, ..., 128 bytes.
pub const NUM_FREE_LISTS: usize = MAX_BYTES / ALIGN;

/// Number of nodes requested from the pool when a free list runs dry.
pub const REFILL_COUNT: usize = 20;

const_assert!(ALIGN.is_power_of_two());
const_assert!(ALIGN >= mem::size_of::<*mut u8>());
const_assert!(NUM_FREE_LISTS * ALIGN == MAX_BYTES);
const_assert!(REFILL_COUNT > 0);

/// Rounds a byte count up to the next multiple of [`ALIGN`].
///
/// # Examples
///
/// ```rust
/// use tieralloc::align;
///
/// assert_eq!(align!(13), 16);
/// assert_eq!(align!(16), 16);
/// assert_eq!(align!(1), 8);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    $crate::align_to!($value, $crate::align::ALIGN)
  };
}

/// Rounds a byte count up to the next multiple of `$align`, which must be a
/// power of two.
///
/// # Examples
///
/// ```rust
/// use tieralloc::align_to;
///
/// assert_eq!(align_to!(13, 4), 16);
/// assert_eq!(align_to!(17, 16), 32);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

/// `((n + 7) & !7)`: the block size actually handed out for a request of `n`
/// bytes.
#[inline]
pub const fn round_up(bytes: usize) -> usize {
  align!(bytes)
}

/// `((n + 7) / 8) - 1`: the free list serving a request of `n` bytes.
///
/// Only meaningful for `1..=MAX_BYTES`.
#[inline]
pub const fn free_list_index(bytes: usize) -> usize {
  (bytes + ALIGN - 1) / ALIGN - 1
}

/// Block size held by free list `index`.
#[inline]
pub const fn class_size(index: usize) -> usize {
  (index + 1) * ALIGN
}
