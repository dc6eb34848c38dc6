//! # flexalloc - A Best Fit Heap with Boundary Tags
//!
//! This crate provides a small `malloc`/`free` style heap that manages a single
//! fixed size memory region requested from the OS with `mmap`.
//!
//! ## Overview
//!
//! The heap never grows and keeps no bookkeeping outside the region itself.
//! Every block starts with a one word header and every free block ends with a
//! footer, so the heap can be walked forwards through headers and backwards
//! through footers:
//!
//! ```text
//!   Boundary Tags:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                           HEAP REGION                                │
//!   │                                                                      │
//!   │  ┌────┬──────────┬────┬──────────────┬────┬──────────┬────┬──────┐   │
//!   │  │ H  │ payload  │ H  │   (free)   F │ H  │ payload  │ H  │ ...  │   │
//!   │  └────┴──────────┴────┴──────────────┴────┴──────────┴────┴──────┘   │
//!   │   ▲                ▲                ▲                                │
//!   │   │                │                └── footer: size only           │
//!   │   │                └── header: size | allocated | prev allocated     │
//!   │   └── heap start                                                     │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   flexalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Header codec and block size constants
//!   ├── region     - Page size and the mmap backed region (internal)
//!   ├── heap       - Heap type, initialization and metadata access
//!   ├── best_fit   - Heap::alloc, best fit search and splitting
//!   ├── coalesce   - Heap::free, validation and coalescing
//!   ├── diag       - Block traversal, report and invariant checks
//!   └── error      - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use flexalloc::Heap;
//!
//! let mut heap = Heap::with_capacity(4096).unwrap();
//!
//! let ptr = heap.alloc(64).unwrap();
//!
//! unsafe {
//!     // Use the memory
//!     ptr.as_ptr().cast::<u64>().write(42);
//!     assert_eq!(ptr.as_ptr().cast::<u64>().read(), 42);
//! }
//!
//! // Free the memory
//! heap.free(ptr.as_ptr()).unwrap();
//! assert_eq!(heap.report().free, heap.capacity());
//! ```
//!
//! ## How It Works
//!
//! Allocation picks the smallest free block that can hold the request (best
//! fit) and splits off whatever is left:
//!
//! ```text
//!   alloc(20), 24 bytes needed:
//!
//!   ┌──────────────────────────────┐        ┌────────┬─────────────────────┐
//!   │          FREE 4088           │  ───►  │ alloc  │     FREE 4064       │
//!   └──────────────────────────────┘        │   24   │                     │
//!                                           └────────┴─────────────────────┘
//! ```
//!
//! Freeing a block merges it right away with free neighbours, so two free
//! blocks are never adjacent:
//!
//! ```text
//!   free(B):
//!
//!   ┌────────┬────────┬────────┐        ┌──────────────────────────┐
//!   │ FREE A │ alloc B│ FREE C │  ───►  │        FREE A+B+C        │
//!   └────────┴────────┴────────┘        └──────────────────────────┘
//! ```
//!
//! The header of C is found through the size of B, the header of A through the
//! footer of A right before B, and the previous allocated bit of B tells
//! whether that footer exists at all.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Fixed size**: The heap cannot grow after initialization
//! - **Unix-only**: Requires `libc` and `mmap` (POSIX systems)
//!
//! ## Safety
//!
//! The heap API itself is safe, but pointers returned by [`Heap::alloc`] are
//! raw and reading or writing through them requires `unsafe` blocks. Writing
//! past the requested size corrupts the metadata of the next block, which
//! [`Heap::check_invariants`] can detect.

pub mod align;
mod best_fit;
pub mod block;
mod coalesce;
mod diag;
mod error;
mod heap;
mod region;

pub use diag::{BlockInfo, Blocks, HeapReport};
pub use error::{AllocError, Corruption, FreeError, InitError};
pub use heap::{Heap, RESERVED};
pub use region::page_size;
