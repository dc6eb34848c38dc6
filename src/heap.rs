use std::ptr::NonNull;

use crate::{
  align_to,
  block::{Block, END_MARKER, FOOTER_SIZE, HEADER_SIZE},
  error::InitError,
  region::{Region, page_size},
};

/// Offset of the first block header inside the mapping. Skipping one header
/// word puts every payload on an 8 byte boundary.
pub(crate) const HEAP_START: usize = HEADER_SIZE;

/// Bytes of the mapping that never belong to a block: the leading alignment
/// pad and the end marker.
pub const RESERVED: usize = HEAP_START + HEADER_SIZE;

/// A fixed size heap carved out of a single mapping.
///
/// All metadata lives inside the mapping itself. Blocks are laid out back to
/// back starting right after a 4 byte pad and the last one is followed by the
/// end marker:
///
/// ```text
///   ┌─────┬──────────┬──────────┬─────┬──────────────────┬─────┐
///   │ pad │  block   │  block   │ ... │      block       │ END │
///   └─────┴──────────┴──────────┴─────┴──────────────────┴─────┘
///         ▲                                                   ▲
///         heap start                          heap start + capacity
/// ```
///
/// A heap is created empty with [`Heap::new`] and formatted exactly once with
/// [`Heap::init`]. It is not thread safe: every operation that touches blocks
/// borrows the heap mutably.
pub struct Heap {
  region: Option<Region>,
  capacity: usize,
}

impl Heap {
  /// Builds a heap that has not requested any memory yet. Every allocation
  /// fails until [`Heap::init`] succeeds.
  pub const fn new() -> Self {
    Self {
      region: None,
      capacity: 0,
    }
  }

  /// Shorthand for [`Heap::new`] followed by [`Heap::init`].
  pub fn with_capacity(capacity: isize) -> Result<Self, InitError> {
    let mut heap = Self::new();
    heap.init(capacity)?;

    Ok(heap)
  }

  /// Requests at least `capacity` bytes from the OS and formats them as one
  /// big free block.
  ///
  /// The length of the mapping is `capacity` rounded up to the page size, 8
  /// bytes of which are reserved for alignment and the end marker. Fails if
  /// the heap was already initialized, if `capacity` is not positive or if the
  /// OS cannot provide the memory. A failed call leaves the heap untouched.
  ///
  /// ```rust
  /// use flexalloc::{Heap, InitError};
  ///
  /// let mut heap = Heap::new();
  /// assert!(heap.init(4096).is_ok());
  /// assert!(matches!(heap.init(4096), Err(InitError::AlreadyInitialized)));
  /// ```
  pub fn init(
    &mut self,
    capacity: isize,
  ) -> Result<(), InitError> {
    if self.region.is_some() {
      log::warn!("heap has already been initialized");
      return Err(InitError::AlreadyInitialized);
    }

    if capacity <= 0 {
      log::warn!("requested heap size is not positive: {capacity}");
      return Err(InitError::NonPositiveCapacity(capacity));
    }

    let length = align_to!(capacity as usize, page_size());

    if length > u32::MAX as usize {
      log::warn!("requested heap size is too large: {capacity}");
      return Err(InitError::CapacityTooLarge(capacity));
    }

    let mut region = Region::map(length).map_err(|source| {
      log::warn!("mmap cannot allocate {length} bytes: {source}");
      InitError::Map { length, source }
    })?;

    let capacity = length - RESERVED;
    let bytes = region.bytes_mut();

    // There is no real block before the first one, marking it as allocated
    // keeps the deallocator from coalescing past the heap start.
    let first = Block::new(capacity, false, true);
    write_header(bytes, HEAP_START, first);
    write_footer(bytes, HEAP_START, first);
    write_word(bytes, HEAP_START + capacity, END_MARKER);

    log::debug!("heap initialized, {capacity} bytes available");

    self.region = Some(region);
    self.capacity = capacity;

    Ok(())
  }

  pub fn is_initialized(&self) -> bool {
    self.region.is_some()
  }

  /// Sum of all block sizes in bytes, 0 if the heap is not initialized.
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Address of the first block header.
  pub fn heap_start(&self) -> Option<NonNull<u8>> {
    self
      .region
      .as_ref()
      .map(|region| unsafe { region.base().add(HEAP_START) })
  }

  pub(crate) fn region(&self) -> Option<&Region> {
    self.region.as_ref()
  }

  pub(crate) fn region_mut(&mut self) -> Option<&mut Region> {
    self.region.as_mut()
  }
}

impl Default for Heap {
  fn default() -> Self {
    Self::new()
  }
}

/// Reads the 4 byte word at `offset`.
pub(crate) fn read_word(
  bytes: &[u8],
  offset: usize,
) -> u32 {
  let mut word = [0; HEADER_SIZE];
  word.copy_from_slice(&bytes[offset..offset + HEADER_SIZE]);

  u32::from_ne_bytes(word)
}

pub(crate) fn write_word(
  bytes: &mut [u8],
  offset: usize,
  word: u32,
) {
  bytes[offset..offset + HEADER_SIZE].copy_from_slice(&word.to_ne_bytes());
}

pub(crate) fn read_header(
  bytes: &[u8],
  offset: usize,
) -> Block {
  Block::decode(read_word(bytes, offset))
}

pub(crate) fn write_header(
  bytes: &mut [u8],
  offset: usize,
  block: Block,
) {
  write_word(bytes, offset, block.encode());
}

/// Writes the footer of a block whose header lives at `offset`.
pub(crate) fn write_footer(
  bytes: &mut [u8],
  offset: usize,
  block: Block,
) {
  write_word(bytes, offset + block.size - FOOTER_SIZE, block.footer());
}

/// Sets or clears the previous-allocated bit of the block at `offset`, unless
/// `offset` holds the end marker.
pub(crate) fn set_prev_allocated(
  bytes: &mut [u8],
  offset: usize,
  prev_allocated: bool,
) {
  let word = read_word(bytes, offset);

  if Block::is_end(word) {
    return;
  }

  let mut block = Block::decode(word);
  block.prev_allocated = prev_allocated;
  write_header(bytes, offset, block);
}

/// Forward traversal from the heap start to the end marker. Yields the offset
/// of each header within the mapping together with the decoded header.
pub(crate) struct Walk<'a> {
  bytes: &'a [u8],
  offset: usize,
  end: usize,
}

impl<'a> Walk<'a> {
  pub fn new(
    bytes: &'a [u8],
    capacity: usize,
  ) -> Self {
    Self {
      bytes,
      offset: HEAP_START,
      end: HEAP_START + capacity,
    }
  }
}

impl Iterator for Walk<'_> {
  type Item = (usize, Block);

  fn next(&mut self) -> Option<Self::Item> {
    if self.offset >= self.end {
      return None;
    }

    let word = read_word(self.bytes, self.offset);

    if Block::is_end(word) {
      return None;
    }

    let block = Block::decode(word);

    // A zero sized block would never advance. Only a corrupted heap has one.
    if block.size == 0 {
      return None;
    }

    let offset = self.offset;
    self.offset += block.size;

    Some((offset, block))
  }
}
