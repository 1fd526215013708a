//! # growmap - A File-Backed Growable Mapping Library
//!
//! This crate provides a **virtual-memory manager** that maps a file into a
//! single contiguous address range and grows the mapping on demand, using
//! POSIX `mmap` through the `libc` crate.
//!
//! ## Overview
//!
//! The manager reserves address space up front with a `PROT_NONE` anonymous
//! mapping (the "landlord": it claims addresses without committing memory)
//! and then binds consecutive chunks of the backing file over that
//! reservation with `MAP_FIXED`:
//!
//! ```text
//!   Reservation and mapped prefix:
//!
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                    RESERVED ADDRESS RANGE                        │
//!   │                                                                  │
//!   │   ┌────────┬────────┬────────┬────────────────────────────────┐  │
//!   │   │chunk 0 │chunk 1 │chunk 2 │        PROT_NONE tail          │  │
//!   │   │ file   │ file   │ file   │    (claimed, not mapped)       │  │
//!   │   └────────┴────────┴────────┴────────────────────────────────┘  │
//!   │   ▲                          ▲                                ▲  │
//!   │   │                          │                                │  │
//!   │  base                 base + mapped_size()          reserved_size()
//!   └──────────────────────────────────────────────────────────────────┘
//!
//!   Growing within the reservation overlays the tail in place: the base
//!   address never changes. Growing past the reservation takes a fresh,
//!   larger reservation and remaps the prefix: the base address may move.
//! ```
//!
//! Once a base address has been observed it stays valid across every
//! non-moving growth step; a moving step is reported explicitly so callers
//! can refresh their pointers.
//!
//! ## Crate Structure
//!
//! ```text
//!   growmap
//!   ├── align      - align_forward rounding helper
//!   ├── error      - MapError and the stable numeric ErrorCode table
//!   ├── fmt        - human-readable memory-size formatting
//!   ├── manager    - MmapManager: create / map_next / map_full / close
//!   └── ffi        - flat C-ABI surface (growmap_* functions)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use growmap::{CHUNK_SIZE, CreateOptions, MapNextOptions, MmapManager};
//!
//! let mut man = MmapManager::create(&CreateOptions {
//!     backing_file: "data.bin".into(),
//!     initial_reserved_size: 64 * CHUNK_SIZE,
//!     reserve_existing_file_size: true,
//! })?;
//!
//! // Make the first four chunks addressable (growing the file to match).
//! man.map_next(MapNextOptions {
//!     chunks_to_map_next: 4,
//!     ..Default::default()
//! })?;
//!
//! man.mapped_mut()[0] = 42;   // writes through to data.bin
//! man.sync()?;                // msync when durability matters
//! man.close()?;
//! ```
//!
//! ## Limitations
//!
//! - **Unix-only**: built directly on POSIX `open`, `stat`, `ftruncate`,
//!   `mmap`, `munmap`, `msync`
//! - **Single-owner**: no internal synchronization; one owner serializes
//!   all operations on a manager
//! - **Grow-only**: neither the file nor the reservation ever shrinks
//! - **Contiguous prefix**: mapped chunks are always `[0, num_chunks_mapped)`,
//!   never sparse
//!
//! ## Safety
//!
//! The manager's internals perform raw pointer arithmetic and issue mmap
//! syscalls, but the public Rust API is safe: the mapped region is only
//! handed out as a bounded byte slice whose lifetime is tied to the
//! manager, and teardown runs on drop. The `ffi` module exposes the same
//! functionality as a flat, C-linkage surface for other language runtimes.

pub mod ffi;

mod align;
mod error;
mod fmt;
mod manager;

pub use align::align_forward;
pub use error::{ErrorCode, MapError};
pub use fmt::format_memory_size;
pub use manager::{CHUNK_SIZE, CreateOptions, MapNext, MapNextOptions, MmapManager};
