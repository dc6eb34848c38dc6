use bitflags::bitflags;

/// Size in bytes of a block header. Footers have the same size.
pub const HEADER_SIZE: usize = 4;

/// Size in bytes of a footer.
pub const FOOTER_SIZE: usize = HEADER_SIZE;

/// Smallest block the heap ever creates: a header plus a footer, so that the
/// block can hold its boundary tag once it becomes free.
pub const MIN_BLOCK_SIZE: usize = HEADER_SIZE + FOOTER_SIZE;

/// Raw word of the end marker: size 0 with the allocated bit set.
pub const END_MARKER: u32 = Status::ALLOCATED.bits();

bitflags! {
  /// Status bits stored in the low bits of every header word. Block sizes are
  /// multiples of 8, so these bits are never part of the size.
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct Status: u32 {
    /// The block holds live payload.
    const ALLOCATED      = 1 << 0;
    /// The block right before this one in address order is allocated.
    const PREV_ALLOCATED = 1 << 1;
  }
}

/// Decoded block header.
///
/// All heap logic works on this struct. Bits are only packed and unpacked by
/// [`Block::encode`] and [`Block::decode`] when a header word is written to or
/// read from the mapping.
///
/// ```text
///   Allocated block:                Free block:
///   ┌──────────────────────┐        ┌──────────────────────┐
///   │ header: size | a | p │        │ header: size | 0 | p │
///   ├──────────────────────┤        ├──────────────────────┤
///   │                      │        │                      │
///   │       payload        │        │       (unused)       │
///   │                      │        │                      │
///   │                      │        ├──────────────────────┤
///   │                      │        │ footer: size         │
///   └──────────────────────┘        └──────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
  /// Total size in bytes, header (and footer) included.
  pub size: usize,
  pub allocated: bool,
  pub prev_allocated: bool,
}

impl Block {
  pub fn new(
    size: usize,
    allocated: bool,
    prev_allocated: bool,
  ) -> Self {
    Self {
      size,
      allocated,
      prev_allocated,
    }
  }

  /// Unpacks a header word.
  pub fn decode(word: u32) -> Self {
    let status = Status::from_bits_truncate(word);

    Self {
      size: (word & !Status::all().bits()) as usize,
      allocated: status.contains(Status::ALLOCATED),
      prev_allocated: status.contains(Status::PREV_ALLOCATED),
    }
  }

  /// Packs this block into a header word. The heap never creates blocks
  /// larger than what fits in a `u32`, see [`crate::Heap::init`].
  pub fn encode(&self) -> u32 {
    let mut status = Status::empty();
    status.set(Status::ALLOCATED, self.allocated);
    status.set(Status::PREV_ALLOCATED, self.prev_allocated);

    self.size as u32 | status.bits()
  }

  /// Footer word of this block: the size only.
  pub fn footer(&self) -> u32 {
    self.size as u32
  }

  /// Whether a raw header word is the end marker.
  pub fn is_end(word: u32) -> bool {
    word == END_MARKER
  }
}
