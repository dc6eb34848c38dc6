use std::fmt;

use crate::{
  align::ALIGNMENT,
  block::{Block, FOOTER_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE},
  error::Corruption,
  heap::{HEAP_START, Heap, Walk, read_word},
};

/// One block as seen by a traversal of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Position of the block in address order, starting at 1.
  pub index: usize,
  /// Offset of the header from the heap start.
  pub offset: usize,
  /// Address of the first byte of the block (its header).
  pub begin: usize,
  /// Address of the last byte of the block.
  pub end: usize,
  pub size: usize,
  pub allocated: bool,
  pub prev_allocated: bool,
}

impl BlockInfo {
  /// Address right after the header, what [`Heap::alloc`] hands out.
  pub fn payload(&self) -> usize {
    self.begin + HEADER_SIZE
  }
}

/// Iterator over all blocks of a heap, see [`Heap::blocks`].
pub struct Blocks<'a> {
  walk: Walk<'a>,
  base: usize,
  index: usize,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let (offset, block) = self.walk.next()?;
    self.index += 1;

    let begin = self.base + offset;

    Some(BlockInfo {
      index: self.index,
      offset: offset - HEAP_START,
      begin,
      end: begin + block.size - 1,
      size: block.size,
      allocated: block.allocated,
      prev_allocated: block.prev_allocated,
    })
  }
}

/// Snapshot of every block plus used and free totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapReport {
  pub blocks: Vec<BlockInfo>,
  /// Bytes in allocated blocks, headers included.
  pub used: usize,
  /// Bytes in free blocks.
  pub free: usize,
}

impl HeapReport {
  pub fn total(&self) -> usize {
    self.used + self.free
  }
}

fn status(allocated: bool) -> &'static str {
  if allocated { "alloc" } else { "FREE" }
}

impl fmt::Display for HeapReport {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let rule = "-".repeat(72);

    writeln!(f, "{:=^72}", " HEAP: Block List ")?;
    writeln!(
      f,
      "{:<5} {:<6} {:<6} {:<18} {:<18} {:>8}",
      "No.", "Status", "Prev", "Begin", "End", "Size"
    )?;
    writeln!(f, "{rule}")?;

    for block in &self.blocks {
      writeln!(
        f,
        "{:<5} {:<6} {:<6} {:#018x} {:#018x} {:>8}",
        block.index,
        status(block.allocated),
        status(block.prev_allocated),
        block.begin,
        block.end,
        block.size
      )?;
    }

    writeln!(f, "{rule}")?;
    writeln!(f, "Total used size = {:>8}", self.used)?;
    writeln!(f, "Total free size = {:>8}", self.free)?;
    writeln!(f, "Total size      = {:>8}", self.total())?;
    write!(f, "{}", "=".repeat(72))
  }
}

impl Heap {
  /// Walks the heap from its start to the end marker. Yields nothing if the
  /// heap is not initialized.
  pub fn blocks(&self) -> Blocks<'_> {
    match self.region() {
      Some(region) => Blocks {
        walk: Walk::new(region.bytes(), self.capacity()),
        base: region.base().as_ptr() as usize,
        index: 0,
      },
      None => Blocks {
        walk: Walk::new(&[], 0),
        base: 0,
        index: 0,
      },
    }
  }

  pub fn report(&self) -> HeapReport {
    let blocks: Vec<_> = self.blocks().collect();

    let (used, free) = blocks.iter().fold((0, 0), |(used, free), block| {
      if block.allocated {
        (used + block.size, free)
      } else {
        (used, free + block.size)
      }
    });

    HeapReport { blocks, used, free }
  }

  /// Prints [`Heap::report`] to stdout.
  pub fn print(&self) {
    println!("{}", self.report());
  }

  /// Verifies the block layout and returns the first problem found. An
  /// uninitialized heap is trivially valid.
  pub fn check_invariants(&self) -> Result<(), Corruption> {
    let Some(region) = self.region() else {
      return Ok(());
    };

    let bytes = region.bytes();
    let capacity = self.capacity();
    let end = HEAP_START + capacity;

    let mut offset = HEAP_START;
    let mut total = 0;
    let mut previous: Option<(usize, Block)> = None;

    loop {
      let word = read_word(bytes, offset);

      if Block::is_end(word) {
        break;
      }

      if offset == end {
        return Err(Corruption::MissingEndMarker);
      }

      let block = Block::decode(word);
      let relative = offset - HEAP_START;

      if block.size < MIN_BLOCK_SIZE || block.size % ALIGNMENT != 0 {
        return Err(Corruption::InvalidSize {
          offset: relative,
          size: block.size,
        });
      }

      if offset + block.size > end {
        return Err(Corruption::Overrun { offset: relative });
      }

      match previous {
        None if !block.prev_allocated => return Err(Corruption::FirstPrevFree),
        Some((_, prev)) if prev.allocated != block.prev_allocated => {
          return Err(Corruption::PrevBitMismatch { offset: relative });
        }
        Some((prev_offset, prev)) if !prev.allocated && !block.allocated => {
          return Err(Corruption::AdjacentFree {
            offset: prev_offset - HEAP_START,
          });
        }
        _ => {}
      }

      if !block.allocated {
        let footer = read_word(bytes, offset + block.size - FOOTER_SIZE) as usize;

        if footer != block.size {
          return Err(Corruption::FooterMismatch {
            offset: relative,
            size: block.size,
            footer,
          });
        }
      }

      total += block.size;
      previous = Some((offset, block));
      offset += block.size;
    }

    if total != capacity {
      return Err(Corruption::CapacityMismatch { total, capacity });
    }

    Ok(())
  }
}
