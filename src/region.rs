use std::{io, ptr::NonNull, slice, sync::OnceLock};

/// Virtual memory page size, queried once from the OS.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Virtual memory page size in bytes. 4096 on most computers, but we only know
/// the real value at run time.
pub fn page_size() -> usize {
  *PAGE_SIZE.get_or_init(platform::page_size)
}

/// Zero filled, page aligned memory obtained from the OS in one piece. The
/// heap formats it once and never asks for more. Memory goes back to the OS
/// when the region is dropped.
///
/// ```text
///   ┌──────────────────────────────────────────────────────────┐
///   │ page │ page │ page │              ...             │ page │
///   └──────────────────────────────────────────────────────────┘
///   ▲                                                          ▲
///   base                                             base + length
/// ```
pub(crate) struct Region {
  base: NonNull<u8>,
  length: usize,
}

impl Region {
  /// Maps `length` bytes. `length` must be a non zero multiple of
  /// [`page_size`].
  pub fn map(length: usize) -> io::Result<Self> {
    let base = unsafe { platform::request_memory(length) }?;

    log::debug!("mapped {length} bytes at {base:?}");

    Ok(Self { base, length })
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn bytes(&self) -> &[u8] {
    // The mapping is valid for `length` bytes for as long as `self` lives.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.length) }
  }

  pub fn bytes_mut(&mut self) -> &mut [u8] {
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.length) }
  }
}

impl Drop for Region {
  fn drop(&mut self) {
    unsafe { platform::return_memory(self.base, self.length) }
  }
}

#[cfg(all(unix, not(miri)))]
mod platform {
  use std::{io, ptr::{self, NonNull}};

  pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
  }

  pub unsafe fn request_memory(length: usize) -> io::Result<NonNull<u8>> {
    // Memory protection. Read-Write only.
    let protection = libc::PROT_READ | libc::PROT_WRITE;

    // Private to our process and not backed by any file. Anonymous mappings
    // are zero filled by the kernel.
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    let address = unsafe { libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) };

    if address == libc::MAP_FAILED {
      return Err(io::Error::last_os_error());
    }

    NonNull::new(address.cast()).ok_or_else(|| io::Error::other("mmap returned null"))
  }

  pub unsafe fn return_memory(
    address: NonNull<u8>,
    length: usize,
  ) {
    if unsafe { libc::munmap(address.as_ptr().cast(), length) } != 0 {
      log::warn!(
        "munmap of {length} bytes at {address:?} failed: {}",
        io::Error::last_os_error()
      );
    }
  }
}

#[cfg(miri)]
mod platform {
  //! Miri has no FFI support, so the global allocator stands in for `mmap`.

  use std::{alloc::{self, Layout}, io, ptr::NonNull};

  pub fn page_size() -> usize {
    4096
  }

  fn to_layout(length: usize) -> io::Result<Layout> {
    Layout::from_size_align(length, page_size()).map_err(io::Error::other)
  }

  pub unsafe fn request_memory(length: usize) -> io::Result<NonNull<u8>> {
    let layout = to_layout(length)?;
    NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
      .ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))
  }

  pub unsafe fn return_memory(
    address: NonNull<u8>,
    length: usize,
  ) {
    if let Ok(layout) = to_layout(length) {
      unsafe { alloc::dealloc(address.as_ptr(), layout) }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_page_size() {
    let size = page_size();

    assert!(size > 0);
    assert!(size.is_power_of_two());
    assert_eq!(size, page_size());
  }

  #[test]
  fn test_map_is_zeroed_and_aligned() {
    let mut region = Region::map(2 * page_size()).unwrap();

    assert_eq!(region.bytes().len(), 2 * page_size());
    assert_eq!(region.base().as_ptr() as usize % page_size(), 0);
    assert!(region.bytes().iter().all(|byte| *byte == 0));

    region.bytes_mut()[0] = 0xAB;
    assert_eq!(region.bytes()[0], 0xAB);
  }
}
