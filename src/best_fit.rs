use std::ptr::NonNull;

use crate::{
  align,
  block::{Block, HEADER_SIZE},
  error::AllocError,
  heap::{Heap, Walk, set_prev_allocated, write_footer, write_header},
};

impl Heap {
  /// Allocates a block that can hold at least `size` bytes and returns a
  /// pointer to its payload, or `None` if `size` is not positive, the heap is
  /// not initialized or no free block is large enough.
  ///
  /// Returned pointers are always 8 byte aligned.
  ///
  /// ```rust
  /// use flexalloc::Heap;
  ///
  /// let mut heap = Heap::with_capacity(4096).unwrap();
  ///
  /// let ptr = heap.alloc(100).unwrap();
  /// assert_eq!(ptr.as_ptr() as usize % 8, 0);
  ///
  /// assert!(heap.alloc(0).is_none());
  /// assert!(heap.alloc(-5).is_none());
  /// ```
  pub fn alloc(
    &mut self,
    size: isize,
  ) -> Option<NonNull<u8>> {
    self.try_alloc(size).ok()
  }

  /// Same as [`Heap::alloc`] but tells why the allocation failed.
  ///
  /// The block is chosen with a best fit policy:
  ///
  /// ```text
  ///   Request needs 32 bytes (header included):
  ///
  ///   ┌───────┬────────┬───────┬────────┬───────┬────────────────┐
  ///   │ alloc │ FREE 64│ alloc │ FREE 40│ alloc │    FREE 3968   │
  ///   └───────┴────────┴───────┴────────┴───────┴────────────────┘
  ///                                 ▲
  ///                                 └── smallest free block larger
  ///                                     than 32 bytes wins
  /// ```
  ///
  /// A free block of exactly the needed size is taken right away without
  /// looking any further. Otherwise the winner is split: its first bytes become
  /// the allocated block and the rest becomes a new free block.
  pub fn try_alloc(
    &mut self,
    size: isize,
  ) -> Result<NonNull<u8>, AllocError> {
    let capacity = self.capacity();
    let region = self.region_mut().ok_or(AllocError::Uninitialized)?;

    let requested = match usize::try_from(size) {
      Ok(requested) if requested > 0 => requested,
      _ => return Err(AllocError::InvalidSize(size)),
    };

    let needed = align!(requested + HEADER_SIZE);

    if needed > capacity {
      log::debug!("alloc({size}): {needed} bytes exceed the heap capacity");
      return Err(AllocError::OutOfMemory { needed });
    }

    let base = region.base();
    let bytes = region.bytes_mut();

    let Some((offset, block)) = find_best_fit(bytes, capacity, needed) else {
      log::debug!("alloc({size}): no free block of {needed} bytes");
      return Err(AllocError::OutOfMemory { needed });
    };

    if block.size > needed {
      let rest = Block::new(block.size - needed, false, true);
      write_header(bytes, offset + needed, rest);
      write_footer(bytes, offset + needed, rest);

      log::debug!(
        "alloc({size}): split {} byte block at offset {offset}, {} bytes left",
        block.size,
        rest.size
      );
    } else {
      log::debug!("alloc({size}): exact fit at offset {offset}");
    }

    write_header(bytes, offset, Block::new(needed, true, block.prev_allocated));
    set_prev_allocated(bytes, offset + needed, true);

    Ok(unsafe { base.add(offset + HEADER_SIZE) })
  }
}

/// Scans the whole heap for the free block that fits `needed` bytes best.
/// Returns the first exact match as soon as it is found, otherwise the
/// smallest larger block, lowest address first among equals.
fn find_best_fit(
  bytes: &[u8],
  capacity: usize,
  needed: usize,
) -> Option<(usize, Block)> {
  let mut best: Option<(usize, Block)> = None;

  for (offset, block) in Walk::new(bytes, capacity) {
    if block.allocated {
      continue;
    }

    if block.size == needed {
      return Some((offset, block));
    }

    if block.size > needed && best.is_none_or(|(_, current)| block.size < current.size) {
      best = Some((offset, block));
    }
  }

  best
}
