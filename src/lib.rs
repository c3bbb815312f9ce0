//! # tieralloc - A Two-Tier Small-Object Allocator
//!
//! This crate provides a **segregated free-list allocator** for container
//! code: small requests are served from per-size-class free lists refilled
//! out of a growable memory pool, large requests go straight to the system
//! allocator through a tier that can run an out-of-memory recovery hook.
//!
//! ## Overview
//!
//! ```text
//!   Request Flow:
//!
//!   TypedAllocator<T>          count * size_of::<T>() bytes
//!          │
//!          ▼
//!   SegregatedAllocator ────── n > 128 ──────────────────────┐
//!          │                                                 │
//!       n <= 128                                             │
//!          ▼                                                 ▼
//!   ┌──────────────────────────────┐               ┌──────────────────────┐
//!   │ free lists  8 16 24 ... 128  │               │  FallbackAllocator   │
//!   └──────────────────────────────┘               │  malloc + OOM retry  │
//!          │ list empty                            └──────────────────────┘
//!          ▼                                                 ▲
//!   ┌──────────────────────────────┐      arena exhausted    │
//!   │  MemoryPool [start, end)     │ ────────────────────────┘
//!   └──────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tieralloc
//!   ├── align      - Size classes, rounding (align!, align_to!) and constants
//!   ├── block      - Intrusive free lists (internal)
//!   ├── error      - AllocError
//!   ├── system     - SystemAlloc seam and its libc implementation
//!   ├── oom        - OomHandler strategy and the default TrimHandler
//!   ├── fallback   - FallbackAllocator: system allocation with OOM retry
//!   ├── pool       - MemoryPool: chunk carving and arena growth (internal)
//!   ├── segregated - SegregatedAllocator: the free-list tier
//!   └── typed      - TypedAllocator<T>: element-counted front-end
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tieralloc::{SegregatedAllocator, TypedAllocator};
//!
//! let shared = SegregatedAllocator::new().into_shared();
//! let alloc = TypedAllocator::<u64>::new(&shared);
//!
//! unsafe {
//!   let block = alloc.allocate(4);
//!
//!   for i in 0..4 {
//!     alloc.construct(block.add(i), i as u64 * 10);
//!   }
//!   assert_eq!(block.add(3).read(), 30);
//!
//!   alloc.deallocate(block, 4);
//! }
//! ```
//!
//! ## How It Works
//!
//! Every small request is rounded up to a multiple of 8 bytes and mapped to
//! one of 16 free lists. A free block stores the link to the next free block
//! in its own first word, so free memory costs no bookkeeping:
//!
//! ```text
//!   Free list for 40-byte blocks:
//!
//!   head ──▶ ┌────────┬──────────┐    ┌────────┬──────────┐
//!            │  next ─┼──────────┼──▶ │  next ─┼──────────┼──▶ None
//!            └────────┴──────────┘    └────────┴──────────┘
//!              8 bytes   unused         8 bytes   unused
//! ```
//!
//! An empty list asks the pool for a batch of 20 blocks. The pool carves
//! them off its current arena; when the arena is too small for even one
//! block, the leftover is pushed onto the free list that fits it, and a new
//! arena of `2 * batch + heap_size / 16` bytes is requested. If the system
//! refuses, a free block from an equal or larger size class becomes the
//! arena instead, and only when none exists does the fallback allocator's
//! OOM loop get the final word.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives, `!Send` handles
//! - **No trimming**: freed small blocks are recycled, never returned to the
//!   OS while the allocator lives
//! - **Unchecked sizes**: `deallocate`/`reallocate` trust the size they are
//!   given
//! - **8-byte granularity**: element types aligned above 8 bytes are rejected
//!
//! ## Safety
//!
//! Blocks are raw memory. Giving a block back, resizing it and constructing
//! or destroying values in it are `unsafe` operations whose contracts are
//! documented on each method.

pub mod align;
mod block;
mod error;
mod fallback;
mod oom;
mod pool;
mod segregated;
mod system;
#[cfg(test)]
mod testing;
mod typed;

pub use error::AllocError;
pub use fallback::FallbackAllocator;
pub use oom::{OomAction, OomHandler, TrimHandler};
pub use segregated::{SegregatedAllocator, SharedAllocator};
pub use system::{LibcSystem, SystemAlloc};
pub use typed::TypedAllocator;
