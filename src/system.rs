use libc::c_void;

/// Raw access to the operating system's allocator.
///
/// Implementations report failure by returning a null pointer; they never
/// retry and never panic. Retrying is the job of
/// [`FallbackAllocator`](crate::FallbackAllocator).
pub trait SystemAlloc {
  /// Allocates `size` bytes aligned for any fundamental type, or returns null.
  ///
  /// # Safety
  ///
  /// `size` must be non-zero.
  unsafe fn alloc(
    &mut self,
    size: usize,
  ) -> *mut u8;

  /// Resizes a block obtained from this system. Returns null on failure, in
  /// which case `ptr` is still valid and unchanged.
  ///
  /// # Safety
  ///
  /// `ptr` must come from `alloc`/`realloc` on this system with `old_size`
  /// bytes, and must not have been freed.
  unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    old_size: usize,
    new_size: usize,
  ) -> *mut u8;

  /// Returns a block to the system.
  ///
  /// # Safety
  ///
  /// `ptr` must come from `alloc`/`realloc` on this system with `size`
  /// bytes, and must not have been freed.
  unsafe fn free(
    &mut self,
    ptr: *mut u8,
    size: usize,
  );
}

/// `malloc`/`realloc`/`free` from the C library.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibcSystem;

impl SystemAlloc for LibcSystem {
  unsafe fn alloc(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    unsafe { libc::malloc(size) }.cast()
  }

  unsafe fn realloc(
    &mut self,
    ptr: *mut u8,
    _old_size: usize,
    new_size: usize,
  ) -> *mut u8 {
    unsafe { libc::realloc(ptr.cast::<c_void>(), new_size) }.cast()
  }

  unsafe fn free(
    &mut self,
    ptr: *mut u8,
    _size: usize,
  ) {
    unsafe { libc::free(ptr.cast::<c_void>()) }
  }
}
