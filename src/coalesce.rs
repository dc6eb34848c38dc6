use crate::{
  align::ALIGNMENT,
  block::{Block, FOOTER_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE},
  error::FreeError,
  heap::{HEAP_START, Heap, Walk, read_header, read_word, write_footer, write_header},
};

impl Heap {
  /// Frees the block whose payload starts at `ptr` and merges it with any free
  /// neighbour.
  ///
  /// Rejects null, misaligned and out of range pointers, pointers that were
  /// not returned by [`Heap::alloc`] and blocks that are already free. A
  /// rejected pointer leaves the heap untouched.
  ///
  /// ```text
  ///   Before:
  ///   ┌────────────┬────────────┬────────────┬───────┐
  ///   │  A (FREE)  │ B (alloc)  │  C (FREE)  │ alloc │
  ///   └────────────┴────────────┴────────────┴───────┘
  ///
  ///   After free(B):
  ///   ┌──────────────────────────────────────┬───────┐
  ///   │            A + B + C (FREE)          │ alloc │
  ///   └──────────────────────────────────────┴───────┘
  /// ```
  ///
  /// ```rust
  /// use flexalloc::{FreeError, Heap};
  ///
  /// let mut heap = Heap::with_capacity(4096).unwrap();
  /// let ptr = heap.alloc(24).unwrap();
  ///
  /// assert_eq!(heap.free(ptr.as_ptr()), Ok(()));
  /// assert!(matches!(heap.free(ptr.as_ptr()), Err(FreeError::DoubleFree(_))));
  /// ```
  pub fn free(
    &mut self,
    ptr: *mut u8,
  ) -> Result<(), FreeError> {
    let capacity = self.capacity();
    let region = self.region_mut().ok_or(FreeError::Uninitialized)?;

    if ptr.is_null() {
      return Err(FreeError::Null);
    }

    let address = ptr as usize;

    if address % ALIGNMENT != 0 {
      log::warn!("free({address:#x}): pointer is not aligned");
      return Err(FreeError::Misaligned(address));
    }

    let base = region.base().as_ptr() as usize;
    let header = address - HEADER_SIZE;

    if header < base + HEAP_START || header >= base + HEAP_START + capacity {
      log::warn!("free({address:#x}): pointer is outside the heap");
      return Err(FreeError::OutOfBounds(address));
    }

    let offset = header - base;
    let bytes = region.bytes_mut();

    let is_block = Walk::new(bytes, capacity)
      .take_while(|(start, _)| *start <= offset)
      .any(|(start, _)| start == offset);

    if !is_block {
      log::warn!("free({address:#x}): pointer is not the payload of a block");
      return Err(FreeError::NotABlock(address));
    }

    let mut block = read_header(bytes, offset);

    if !block.allocated {
      log::warn!("free({address:#x}): block is already free");
      return Err(FreeError::DoubleFree(address));
    }

    // Checked before any write.
    let predecessor = if block.prev_allocated {
      None
    } else {
      let prev_size = read_word(bytes, offset - FOOTER_SIZE) as usize;

      match offset.checked_sub(prev_size) {
        Some(prev) if prev_size >= MIN_BLOCK_SIZE && prev >= HEAP_START => Some(prev),
        _ => {
          log::warn!("free({address:#x}): footer of the previous block is corrupted");
          return Err(FreeError::Corrupted(address));
        }
      }
    };

    block.allocated = false;

    let next = offset + block.size;
    let successor = read_word(bytes, next);

    if !Block::is_end(successor) {
      let mut successor = Block::decode(successor);

      if successor.allocated {
        successor.prev_allocated = false;
        write_header(bytes, next, successor);
      } else {
        // The successor header and footer become dead bytes inside this block.
        block.size += successor.size;
        log::debug!("free({address:#x}): merged with next block at offset {next}");
      }
    }

    let mut start = offset;

    if let Some(prev) = predecessor {
      let mut merged = read_header(bytes, prev);
      merged.size += block.size;

      block = merged;
      start = prev;

      log::debug!("free({address:#x}): merged with previous block at offset {prev}");
    }

    write_header(bytes, start, block);
    write_footer(bytes, start, block);

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn shape(heap: &Heap) -> Vec<(usize, bool)> {
    heap
      .blocks()
      .map(|block| (block.size, block.allocated))
      .collect()
  }

  #[test]
  fn test_free_single_block() {
    let mut heap = Heap::with_capacity(4096).unwrap();
    let capacity = heap.capacity();

    let ptr = heap.alloc(100).unwrap();
    assert_eq!(heap.free(ptr.as_ptr()), Ok(()));

    assert_eq!(shape(&heap), vec![(capacity, false)]);
    assert_eq!(heap.check_invariants(), Ok(()));
  }

  #[test]
  fn test_free_clears_successor_prev_bit() {
    let mut heap = Heap::with_capacity(4096).unwrap();

    let first = heap.alloc(12).unwrap();
    heap.alloc(12).unwrap();
    heap.alloc(12).unwrap();

    heap.free(first.as_ptr()).unwrap();

    let blocks: Vec<_> = heap.blocks().collect();
    assert!(!blocks[0].allocated);
    assert!(blocks[1].allocated);
    assert!(!blocks[1].prev_allocated);
    assert_eq!(heap.check_invariants(), Ok(()));
  }

  #[test]
  fn test_coalesce_with_next() {
    let mut heap = Heap::with_capacity(4096).unwrap();
    let capacity = heap.capacity();

    let a = heap.alloc(12).unwrap();
    let b = heap.alloc(12).unwrap();

    heap.free(b.as_ptr()).unwrap();
    assert_eq!(shape(&heap), vec![(16, true), (capacity - 16, false)]);

    heap.free(a.as_ptr()).unwrap();
    assert_eq!(shape(&heap), vec![(capacity, false)]);
    assert_eq!(heap.check_invariants(), Ok(()));
  }

  #[test]
  fn test_coalesce_with_previous() {
    let mut heap = Heap::with_capacity(4096).unwrap();
    let capacity = heap.capacity();

    let a = heap.alloc(12).unwrap();
    let b = heap.alloc(28).unwrap();
    heap.alloc(12).unwrap();

    heap.free(a.as_ptr()).unwrap();
    heap.free(b.as_ptr()).unwrap();

    assert_eq!(
      shape(&heap),
      vec![(48, false), (16, true), (capacity - 64, false)]
    );
    assert!(heap.blocks().next().unwrap().prev_allocated);
    assert_eq!(heap.check_invariants(), Ok(()));
  }

  #[test]
  fn test_coalesce_both_sides() {
    let mut heap = Heap::with_capacity(4096).unwrap();
    let capacity = heap.capacity();

    heap.alloc(4).unwrap();
    let a = heap.alloc(20).unwrap();
    let b = heap.alloc(36).unwrap();
    let c = heap.alloc(52).unwrap();
    heap.alloc(4).unwrap();

    heap.free(a.as_ptr()).unwrap();
    heap.free(c.as_ptr()).unwrap();
    assert_eq!(
      shape(&heap),
      vec![
        (8, true),
        (24, false),
        (40, true),
        (56, false),
        (8, true),
        (capacity - 136, false),
      ]
    );

    heap.free(b.as_ptr()).unwrap();
    assert_eq!(
      shape(&heap),
      vec![(8, true), (24 + 40 + 56, false), (8, true), (capacity - 136, false)]
    );
    assert_eq!(heap.check_invariants(), Ok(()));

    // The merged block is reused as a whole.
    assert_eq!(heap.alloc(116), Some(a));
  }

  #[test]
  fn test_round_trip_restores_free_bytes() {
    let mut heap = Heap::with_capacity(4096).unwrap();

    heap.alloc(100).unwrap();
    let hole = heap.alloc(200).unwrap();
    heap.alloc(100).unwrap();
    heap.free(hole.as_ptr()).unwrap();

    for size in [1, 50, 196, 300, 1000] {
      let before = heap.report().free;

      let ptr = heap.alloc(size).unwrap();
      heap.free(ptr.as_ptr()).unwrap();

      assert_eq!(heap.report().free, before);
      assert_eq!(heap.check_invariants(), Ok(()));
    }
  }

  #[test]
  fn test_double_free() {
    let mut heap = Heap::with_capacity(4096).unwrap();

    heap.alloc(16).unwrap();
    let ptr = heap.alloc(16).unwrap();
    heap.alloc(16).unwrap();

    assert_eq!(heap.free(ptr.as_ptr()), Ok(()));
    let after_first = heap.report();

    assert_eq!(
      heap.free(ptr.as_ptr()),
      Err(FreeError::DoubleFree(ptr.as_ptr() as usize))
    );
    assert_eq!(heap.report(), after_first);
    assert_eq!(heap.check_invariants(), Ok(()));
  }

  #[test]
  fn test_invalid_pointers() {
    let mut heap = Heap::with_capacity(4096).unwrap();

    let ptr = heap.alloc(32).unwrap().as_ptr();
    let before = heap.report();

    assert_eq!(heap.free(std::ptr::null_mut()), Err(FreeError::Null));

    let misaligned = ptr.wrapping_add(4);
    assert_eq!(
      heap.free(misaligned),
      Err(FreeError::Misaligned(misaligned as usize))
    );

    let start = heap.heap_start().unwrap().as_ptr();
    let below = start.wrapping_sub(4);
    assert_eq!(heap.free(below), Err(FreeError::OutOfBounds(below as usize)));

    let beyond = start.wrapping_add(heap.capacity() + HEADER_SIZE);
    assert_eq!(heap.free(beyond), Err(FreeError::OutOfBounds(beyond as usize)));

    let mut local = 0u64;
    let foreign = &mut local as *mut u64 as *mut u8;
    assert!(matches!(
      heap.free(foreign),
      Err(FreeError::OutOfBounds(_))
    ));

    let interior = ptr.wrapping_add(8);
    assert_eq!(heap.free(interior), Err(FreeError::NotABlock(interior as usize)));

    assert_eq!(heap.report(), before);
    assert_eq!(heap.free(ptr), Ok(()));
  }

  #[test]
  fn test_corrupted_footer_is_rejected() {
    let mut heap = Heap::with_capacity(4096).unwrap();

    let a = heap.alloc(12).unwrap();
    let b = heap.alloc(12).unwrap();
    heap.alloc(12).unwrap();
    heap.free(a.as_ptr()).unwrap();

    // Footer of `a` claims a size reaching before the heap start.
    let bytes = heap.region_mut().unwrap().bytes_mut();
    crate::heap::write_word(bytes, HEAP_START + 16 - FOOTER_SIZE, 64);
    let before = heap.report();

    assert_eq!(
      heap.free(b.as_ptr()),
      Err(FreeError::Corrupted(b.as_ptr() as usize))
    );
    assert_eq!(heap.report(), before);
  }

  #[test]
  fn test_free_on_uninitialized_heap() {
    let mut heap = Heap::new();
    let mut local = 0u64;

    assert_eq!(
      heap.free(&mut local as *mut u64 as *mut u8),
      Err(FreeError::Uninitialized)
    );
  }

  #[test]
  fn test_random_sequence_keeps_invariants() {
    let mut heap = Heap::with_capacity(3 * 4096).unwrap();
    let mut live = Vec::new();

    // Small xorshift generator, deterministic across runs.
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut next = move || {
      state ^= state << 13;
      state ^= state >> 7;
      state ^= state << 17;
      state
    };

    for _ in 0..2000 {
      let roll = next();

      if roll % 3 != 0 || live.is_empty() {
        let size = (next() % 300) as isize + 1;
        if let Some(ptr) = heap.alloc(size) {
          assert_eq!(ptr.as_ptr() as usize % 8, 0);
          live.push(ptr);
        }
      } else {
        let index = (next() as usize) % live.len();
        let ptr = live.swap_remove(index);
        assert_eq!(heap.free(ptr.as_ptr()), Ok(()));
      }

      assert_eq!(heap.check_invariants(), Ok(()));
    }

    for ptr in live {
      assert_eq!(heap.free(ptr.as_ptr()), Ok(()));
    }

    assert_eq!(shape(&heap), vec![(heap.capacity(), false)]);
  }
}
