use thiserror::Error;

/// Failures that escape the allocator.
///
/// Exhaustion that the tiers can still absorb (an empty free list, a drained
/// pool, a failed arena growth that another size class can cover) never
/// shows up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The system allocator failed and no OOM handler was left to recover.
  /// Not retryable: the handler loop has already run to completion.
  #[error("out of memory: could not allocate {requested} bytes")]
  OutOfMemory { requested: usize },

  /// The byte size of a request does not fit in `usize`.
  #[error("capacity overflow: {count} elements of {size} bytes")]
  CapacityOverflow { count: usize, size: usize },
}
