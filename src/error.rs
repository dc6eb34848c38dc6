use std::io;

use thiserror::Error;

/// Reasons why [`crate::Heap::init`] can fail.
#[derive(Debug, Error)]
pub enum InitError {
  #[error("heap has already been initialized")]
  AlreadyInitialized,

  #[error("requested heap size is not positive: {0}")]
  NonPositiveCapacity(isize),

  #[error("requested heap size does not fit in a block header: {0}")]
  CapacityTooLarge(isize),

  #[error("mmap cannot allocate {length} bytes: {source}")]
  Map {
    length: usize,
    #[source]
    source: io::Error,
  },
}

/// Reasons why [`crate::Heap::try_alloc`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("heap is not initialized")]
  Uninitialized,

  #[error("requested size is not positive: {0}")]
  InvalidSize(isize),

  #[error("no free block can hold {needed} bytes")]
  OutOfMemory { needed: usize },
}

/// Reasons why [`crate::Heap::free`] rejects a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FreeError {
  #[error("heap is not initialized")]
  Uninitialized,

  #[error("null pointer")]
  Null,

  #[error("pointer {0:#x} is not 8 byte aligned")]
  Misaligned(usize),

  #[error("pointer {0:#x} is outside the heap")]
  OutOfBounds(usize),

  #[error("pointer {0:#x} does not point to the payload of a block")]
  NotABlock(usize),

  #[error("block at {0:#x} is already free")]
  DoubleFree(usize),

  #[error("heap metadata next to {0:#x} is corrupted")]
  Corrupted(usize),
}

/// Broken heap invariant found by [`crate::Heap::check_invariants`]. Offsets
/// are relative to the heap start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
  #[error("block at offset {offset} has invalid size {size}")]
  InvalidSize { offset: usize, size: usize },

  #[error("block at offset {offset} runs past the end of the heap")]
  Overrun { offset: usize },

  #[error("first block does not mark its predecessor as allocated")]
  FirstPrevFree,

  #[error("block at offset {offset} has a stale previous-allocated bit")]
  PrevBitMismatch { offset: usize },

  #[error("free blocks at offset {offset} and its successor were not coalesced")]
  AdjacentFree { offset: usize },

  #[error("free block at offset {offset} has footer {footer}, expected {size}")]
  FooterMismatch {
    offset: usize,
    size: usize,
    footer: usize,
  },

  #[error("blocks add up to {total} bytes, expected {capacity}")]
  CapacityMismatch { total: usize, capacity: usize },

  #[error("end marker missing")]
  MissingEndMarker,
}
