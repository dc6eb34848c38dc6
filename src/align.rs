/// Granularity of every block size in bytes. Payloads handed out by the heap
/// are aligned to this value as well.
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the next multiple of [`ALIGNMENT`].
///
/// # Examples
///
/// ```rust
/// use flexalloc::align;
///
/// assert_eq!(align!(1), 8);
/// assert_eq!(align!(8), 8);
/// assert_eq!(align!(13), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Rounds `value` up to the next multiple of `to`, which must be a power of two.
///
/// Used for page rounding, where the page size is only known at run time.
#[macro_export]
macro_rules! align_to {
  ($value:expr, $to:expr) => {
    ($value + $to - 1) & !($to - 1)
  };
}
