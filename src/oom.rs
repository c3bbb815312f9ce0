/// What the fallback allocator should do after a handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomAction {
  /// Keep this handler installed and retry the allocation.
  Retry,
  /// Retry once more, but clear the handler slot first: if that attempt
  /// also fails the allocation is fatal.
  GiveUp,
}

/// Recovery strategy run when the system allocator returns null.
///
/// The handler is expected to free or decommit memory somewhere else in the
/// process. It is called again after every failed retry for as long as it
/// answers [`OomAction::Retry`], with no upper bound.
///
/// Handlers run while the allocator is mutably borrowed and must not call
/// back into it.
pub trait OomHandler {
  fn recover(&mut self) -> OomAction;
}

impl<F> OomHandler for F
where
  F: FnMut() -> OomAction,
{
  fn recover(&mut self) -> OomAction {
    self()
  }
}

/// Default handler: asks the C heap to hand unused top-of-heap and
/// free-page reservations back to the OS.
///
/// Retries while the trim actually released something; gives up as soon as
/// a trim comes back empty. On platforms without `malloc_trim` it gives up
/// immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrimHandler;

impl OomHandler for TrimHandler {
  fn recover(&mut self) -> OomAction {
    if release_free_memory() {
      log::warn!("oom handler: malloc_trim released memory, retrying");
      OomAction::Retry
    } else {
      log::warn!("oom handler: nothing left to release, giving up");
      OomAction::GiveUp
    }
  }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn release_free_memory() -> bool {
  unsafe { libc::malloc_trim(0) != 0 }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn release_free_memory() -> bool {
  false
}
