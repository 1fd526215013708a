//! # File-backed growable mapping manager
//!
//! The manager keeps three kernel resources in lockstep:
//!
//! 1. the backing file's length,
//! 2. a `PROT_NONE` anonymous reservation that claims a contiguous range of
//!    virtual addresses without committing memory, and
//! 3. a `MAP_SHARED` file mapping placed with `MAP_FIXED` over a prefix of
//!    that reservation.
//!
//! ## Address-space layout
//!
//! ```text
//!                      num_chunks_reserved * CHUNK_SIZE
//!   ┌─────────────────────────────────────────────────────────────────┐
//!   │                       RESERVATION (one VMA claim)               │
//!   │                                                                 │
//!   │  ┌──────────┬──────────┬──────────┬─────────────────────────┐   │
//!   │  │ chunk 0  │ chunk 1  │ chunk 2  │   PROT_NONE tail        │   │
//!   │  │ (file)   │ (file)   │ (file)   │   (reserved, unmapped)  │   │
//!   │  └──────────┴──────────┴──────────┴─────────────────────────┘   │
//!   │  ▲                                ▲                             │
//!   │  base                             base + mapped_size()          │
//!   └─────────────────────────────────────────────────────────────────┘
//!
//!   Mapped prefix: MAP_SHARED|MAP_FIXED file mapping at file offset 0,
//!   PROT_READ|PROT_WRITE, always the contiguous range
//!   [base, base + num_chunks_mapped * CHUNK_SIZE).
//! ```
//!
//! ## Growing
//!
//! Two distinct growth steps, decided per `map_next` call:
//!
//! ```text
//!   EXTEND IN PLACE (reservation has room; base address stable)
//!
//!   before:  [ file ][ file ][      PROT_NONE           ]
//!   after:   [ file ][ file ][ file ][   PROT_NONE      ]
//!                             ▲
//!                             one MAP_FIXED overlay over the tail
//!
//!   RESERVATION MOVE (reservation too small; base address may change)
//!
//!   before:  [ file ][ file ][ PROT_NONE ]          at base A
//!   after:   [ file ][ file ][ file ][ PROT_NONE  ] at base B
//!            ▲
//!            munmap the old claim, take a larger anonymous claim,
//!            re-establish the whole file prefix with one MAP_FIXED call
//! ```
//!
//! An extend-in-place never moves `base`, so pointers derived from it stay
//! valid. A reservation move invalidates every absolute pointer held by the
//! caller; [`MapNext::mapping_was_moved`] signals it.

use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr;

use libc::{c_int, c_void, off_t};
use tracing::{debug, error, info};

use crate::align::align_forward;
use crate::error::MapError;
use crate::fmt::format_memory_size;

/// Size of one mapping chunk in bytes.
///
/// Fixed at build time. 8 KiB covers the common 4 KiB and 8 KiB page
/// systems; the file length and the reservation are always whole multiples
/// of it.
pub const CHUNK_SIZE: u64 = 8192;

/// Options for [`MmapManager::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
  /// Path to the backing file. Created with mode `0644` if absent.
  pub backing_file: PathBuf,

  /// Desired reservation in bytes. Clamped up to [`CHUNK_SIZE`] and rounded
  /// up to a whole number of chunks.
  pub initial_reserved_size: u64,

  /// When true and the chunk-aligned length of an existing backing file
  /// exceeds `initial_reserved_size`, reserve the file's length instead.
  pub reserve_existing_file_size: bool,
}

/// Options for [`MmapManager::map_next`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MapNextOptions {
  /// Fail with [`MapError::FullyMapped`] instead of moving the reservation
  /// when the request does not fit the reserved address space. Growing the
  /// backing file within the reservation is always permitted.
  pub dont_grow_if_fully_mapped: bool,

  /// When a reservation move is required, grow the reservation by at least
  /// this many chunks. The effective growth is the maximum of this and
  /// `chunks_to_map_next`.
  pub extra_chunks_to_reserve_on_grow: u64,

  /// How many additional chunks become addressable when the call succeeds.
  /// Zero is a no-op.
  pub chunks_to_map_next: u64,
}

/// Outcome of a successful [`MmapManager::map_next`] / [`MmapManager::map_full`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapNext {
  /// The reservation was moved; absolute pointers into the previous mapping
  /// are invalid.
  pub mapping_was_moved: bool,

  /// How many bytes the backing file was extended by, if any.
  pub file_extension_size: u64,
}

/// File-backed growable mapping manager.
///
/// Owns one backing file descriptor and one contiguous virtual-address
/// reservation whose leading chunks mirror the file (see the module docs for
/// the layout). Single-owner: all operations take `&mut self` or `&self`
/// and there is no internal synchronization. Several managers may share a
/// backing file only under external coordination.
///
/// Chunk counts are 32-bit: with 8 KiB chunks a single manager addresses at
/// most 32 TiB.
///
/// Dropping the manager unmaps the reservation and closes the file,
/// discarding teardown errors; use [`MmapManager::close`] to observe them.
///
/// # Example
///
/// ```rust,ignore
/// use growmap::{CHUNK_SIZE, CreateOptions, MapNextOptions, MmapManager};
///
/// let mut man = MmapManager::create(&CreateOptions {
///   backing_file: "data.bin".into(),
///   initial_reserved_size: 16 * CHUNK_SIZE,
///   reserve_existing_file_size: true,
/// })?;
///
/// man.map_next(MapNextOptions {
///   chunks_to_map_next: 2,
///   ..Default::default()
/// })?;
///
/// man.mapped_mut()[0] = 0xAB;  // backed by byte 0 of data.bin
/// man.close()?;
/// ```
#[derive(Debug)]
pub struct MmapManager {
  /// Start of the reservation; null iff the manager is dead.
  pub(crate) base: *mut u8,

  /// Reservation size in chunks.
  pub(crate) num_chunks_reserved: u32,

  /// Length of the file-mapped prefix in chunks.
  pub(crate) num_chunks_mapped: u32,

  /// Chunk size this manager was built with (always [`CHUNK_SIZE`]; carried
  /// as a field so the C ABI can report it).
  pub(crate) chunk_size: u64,

  /// Path of the backing file.
  pub(crate) path: CString,

  /// Backing file descriptor; `-1` iff closed.
  pub(crate) fd: c_int,
}

fn last_errno() -> c_int {
  std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Byte length of the file at `path` via `stat(2)`.
fn file_size(path: &CStr) -> Result<u64, MapError> {
  let mut statbuf = MaybeUninit::<libc::stat>::uninit();

  // SAFETY: path is NUL-terminated and statbuf provides a full stat struct.
  let r = unsafe { libc::stat(path.as_ptr(), statbuf.as_mut_ptr()) };
  if r != 0 {
    return Err(MapError::StatFile { errno: last_errno() });
  }

  // SAFETY: stat returned 0, so the struct is initialized.
  let statbuf = unsafe { statbuf.assume_init() };
  Ok(statbuf.st_size as u64)
}

impl MmapManager {
  /// Opens (creating if needed) the backing file, rounds its length up to a
  /// chunk multiple, and claims the initial address-space reservation.
  ///
  /// No file pages are mapped yet: the mapped prefix starts empty and grows
  /// through [`MmapManager::map_next`].
  ///
  /// # Errors
  ///
  /// [`MapError::OpenFile`], [`MapError::StatFile`], [`MapError::Ftruncate`]
  /// or [`MapError::Mmap`] when the corresponding syscall fails;
  /// [`MapError::ChunkCountOverflow`] when the requested reservation exceeds
  /// `u32::MAX` chunks. On error nothing is left open.
  pub fn create(opts: &CreateOptions) -> Result<Self, MapError> {
    let path = CString::new(opts.backing_file.as_os_str().as_bytes())
      .map_err(|_| MapError::OpenFile { errno: libc::EINVAL })?;

    // SAFETY: path is NUL-terminated; O_CREAT carries the mode argument.
    let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDWR | libc::O_CREAT, 0o644 as libc::mode_t) };
    if fd == -1 {
      let err = MapError::OpenFile { errno: last_errno() };
      error!(path = %opts.backing_file.display(), %err, "failed to open backing file");
      return Err(err);
    }

    // Everything below must release fd on failure.
    let close_fd = |err: MapError| {
      // SAFETY: fd was returned by open above and is closed exactly once.
      unsafe { libc::close(fd) };
      err
    };

    let existing_file_size = file_size(&path).map_err(close_fd)?;
    debug!(existing_file_size, "backing file size before alignment");

    let new_file_size = align_forward(existing_file_size, CHUNK_SIZE);

    // SAFETY: fd is an open descriptor.
    if unsafe { libc::ftruncate(fd, new_file_size as off_t) } != 0 {
      let err = close_fd(MapError::Ftruncate { errno: last_errno() });
      error!(
        path = %opts.backing_file.display(),
        existing_file_size,
        %err,
        "failed to extend backing file to chunk-size multiple"
      );
      return Err(err);
    }

    let mut reserved_size = opts.initial_reserved_size.max(CHUNK_SIZE);
    if opts.reserve_existing_file_size && new_file_size > reserved_size {
      reserved_size = new_file_size;
    }
    let reserved_size = align_forward(reserved_size, CHUNK_SIZE);

    let num_chunks_reserved = reserved_size / CHUNK_SIZE;
    if num_chunks_reserved > u64::from(u32::MAX) {
      return Err(close_fd(MapError::ChunkCountOverflow));
    }

    // SAFETY: plain anonymous reservation; the kernel picks the address.
    let base = unsafe {
      libc::mmap(
        ptr::null_mut(),
        reserved_size as usize,
        libc::PROT_NONE,
        libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
        -1,
        0,
      )
    };
    if base == libc::MAP_FAILED {
      let err = close_fd(MapError::Mmap { errno: last_errno() });
      error!(reserved_size, %err, "failed to reserve initial address space");
      return Err(err);
    }

    let manager = Self {
      base: base as *mut u8,
      num_chunks_reserved: num_chunks_reserved as u32,
      num_chunks_mapped: 0,
      chunk_size: CHUNK_SIZE,
      path,
      fd,
    };

    info!(
      address = ?manager.base,
      reserved = %format_memory_size(manager.reserved_size()),
      "created manager"
    );

    Ok(manager)
  }

  /// Makes `opts.chunks_to_map_next` more chunks addressable, growing the
  /// backing file and/or moving the reservation when required.
  ///
  /// Decision tree:
  ///
  /// ```text
  ///   wanted = num_chunks_mapped + chunks_to_map_next
  ///
  ///   need_grow_file        = file length < wanted * CHUNK_SIZE
  ///   need_grow_reservation = wanted > num_chunks_reserved
  ///
  ///   need_grow_reservation && dont_grow_if_fully_mapped
  ///                         ──► Err(FullyMapped), no effects
  ///
  ///   1. need_grow_file        ──► ftruncate(wanted * CHUNK_SIZE)
  ///   2. need_grow_reservation ──► move reservation, remap whole prefix
  ///                                (mapping_was_moved = true)
  ///   3. otherwise             ──► MAP_FIXED overlay of the next slice
  ///                                (mapping_was_moved = false)
  /// ```
  ///
  /// `chunks_to_map_next == 0` succeeds without any externally visible
  /// syscall.
  ///
  /// # Errors
  ///
  /// On error the manager is unchanged except for a completed `ftruncate`
  /// (the file is then consistently oversized), with one exception: when
  /// the reservation move has already unmapped the old range and cannot
  /// re-establish a mapping, the manager becomes dead — `base` is nulled
  /// rather than left dangling, and only teardown remains valid.
  pub fn map_next(
    &mut self,
    opts: MapNextOptions,
  ) -> Result<MapNext, MapError> {
    if !self.is_alive() {
      return Err(MapError::NotAlive);
    }
    if opts.chunks_to_map_next == 0 {
      return Ok(MapNext::default());
    }

    let file_bytes = file_size(&self.path)?;

    let wanted_mapped = u64::from(self.num_chunks_mapped)
      .checked_add(opts.chunks_to_map_next)
      .filter(|wanted| *wanted <= u64::from(u32::MAX))
      .ok_or(MapError::ChunkCountOverflow)?;
    let wanted_bytes = wanted_mapped * self.chunk_size;

    let need_grow_file = file_bytes < wanted_bytes;
    let need_grow_reservation = wanted_mapped > u64::from(self.num_chunks_reserved);

    debug!(need_grow_file, need_grow_reservation, wanted_mapped, "map_next decision");

    // "Fully mapped" is about address space: file growth inside the
    // reservation is always permitted, since a fresh chunk cannot be mapped
    // over a shorter file at all.
    if need_grow_reservation && opts.dont_grow_if_fully_mapped {
      return Err(MapError::FullyMapped);
    }

    let reserve_grow_chunks = if need_grow_reservation {
      let grow = opts.extra_chunks_to_reserve_on_grow.max(opts.chunks_to_map_next);
      u64::from(self.num_chunks_reserved)
        .checked_add(grow)
        .filter(|total| *total <= u64::from(u32::MAX))
        .ok_or(MapError::ChunkCountOverflow)?;
      grow as u32
    } else {
      0
    };

    let mut file_extension_size = 0;
    if need_grow_file {
      // SAFETY: fd is open; wanted_bytes is a chunk multiple.
      if unsafe { libc::ftruncate(self.fd, wanted_bytes as off_t) } != 0 {
        let err = MapError::Remap { errno: last_errno() };
        error!(path = ?self.path, %err, "failed to extend backing file");
        return Err(err);
      }

      file_extension_size = wanted_bytes - file_bytes;
      info!(
        old = %format_memory_size(file_bytes),
        new = %format_memory_size(wanted_bytes),
        "extended backing file"
      );
    }

    if need_grow_reservation {
      self.grow_reserved_address_space(reserve_grow_chunks)?;

      // The old prefix mappings died with the old reservation. Re-establish
      // the whole prefix over the new base with a single MAP_FIXED call.
      //
      // SAFETY: base points at our own fresh reservation of at least
      // wanted_bytes bytes and the file is at least wanted_bytes long.
      let mapped_addr = unsafe {
        libc::mmap(
          self.base as *mut c_void,
          wanted_bytes as usize,
          libc::PROT_READ | libc::PROT_WRITE,
          libc::MAP_SHARED | libc::MAP_FIXED,
          self.fd,
          0,
        )
      };
      if mapped_addr == libc::MAP_FAILED {
        let err = MapError::Mmap { errno: last_errno() };
        error!(
          reserved = %format_memory_size(self.reserved_size()),
          %err,
          "failed to remap file prefix after moving reservation"
        );

        // The previous mapping is gone and the prefix could not be
        // re-established; release the bare reservation and go dead instead
        // of keeping a pointer no data lives behind.
        //
        // SAFETY: base is our reservation; it is unmapped exactly once.
        unsafe { libc::munmap(self.base as *mut c_void, self.reserved_size() as usize) };
        self.base = ptr::null_mut();
        return Err(err);
      }

      self.num_chunks_mapped = wanted_mapped as u32;
      info!(
        num_chunks_reserved = self.num_chunks_reserved,
        num_chunks_mapped = self.num_chunks_mapped,
        "moved reservation and remapped file prefix"
      );

      return Ok(MapNext { mapping_was_moved: true, file_extension_size });
    }

    self.map_next_within_reservation(opts.chunks_to_map_next)?;
    Ok(MapNext { mapping_was_moved: false, file_extension_size })
  }

  /// Extends the mapped prefix inside the existing reservation: one
  /// `MAP_FIXED` overlay that replaces the leading part of the `PROT_NONE`
  /// tail with a file mapping. The base address does not move.
  fn map_next_within_reservation(
    &mut self,
    chunks_to_map: u64,
  ) -> Result<(), MapError> {
    let cur_mapped_bytes = self.mapped_size();
    let slice_bytes = chunks_to_map * self.chunk_size;

    // SAFETY: the target range [base + cur, base + cur + slice) lies inside
    // our reservation (wanted <= num_chunks_reserved was checked) and the
    // file covers it (ftruncate above, or it was already long enough).
    let mapped_addr = unsafe {
      libc::mmap(
        self.base.add(cur_mapped_bytes as usize) as *mut c_void,
        slice_bytes as usize,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_SHARED | libc::MAP_FIXED,
        self.fd,
        cur_mapped_bytes as off_t,
      )
    };
    if mapped_addr == libc::MAP_FAILED {
      let err = MapError::Remap { errno: last_errno() };
      error!(
        num_chunks_mapped = self.num_chunks_mapped,
        chunks_to_map,
        %err,
        "failed to extend mapping within reserved address space"
      );
      return Err(err);
    }

    debug!(chunks_to_map, "mapped chunks at tail");
    self.num_chunks_mapped += chunks_to_map as u32;
    Ok(())
  }

  /// Relinquishes the current reservation and claims a larger one.
  ///
  /// The kernel cannot extend an anonymous VMA in place at a fixed address,
  /// so growth means munmap + fresh `PROT_NONE` mmap; the new base is
  /// wherever the kernel placed it. The caller re-establishes the file
  /// prefix afterwards.
  fn grow_reserved_address_space(
    &mut self,
    grow_num_chunks: u32,
  ) -> Result<(), MapError> {
    let old_reserved_bytes = self.reserved_size();
    let new_reserved_bytes =
      u64::from(self.num_chunks_reserved + grow_num_chunks) * self.chunk_size;

    // SAFETY: base is our live reservation of old_reserved_bytes bytes.
    if unsafe { libc::munmap(self.base as *mut c_void, old_reserved_bytes as usize) } != 0 {
      return Err(MapError::Unmap { errno: last_errno() });
    }

    // SAFETY: plain anonymous reservation; the kernel picks the address.
    let new_base = unsafe {
      libc::mmap(
        ptr::null_mut(),
        new_reserved_bytes as usize,
        libc::PROT_NONE,
        libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
        -1,
        0,
      )
    };
    if new_base == libc::MAP_FAILED {
      let err = MapError::Mmap { errno: last_errno() };
      error!(%err, "failed to re-reserve address space after relinquishing old reservation");

      // The old range is gone; never keep the stale pointer as live.
      self.base = ptr::null_mut();
      return Err(err);
    }

    info!(
      old = %format_memory_size(old_reserved_bytes),
      new = %format_memory_size(new_reserved_bytes),
      "grew reserved address space"
    );

    self.base = new_base as *mut u8;
    self.num_chunks_reserved += grow_num_chunks;
    Ok(())
  }

  /// Maps every not-yet-mapped chunk of the backing file, growing the
  /// reservation if it is too small. Succeeds without effect when the file
  /// is not larger than the mapped prefix.
  ///
  /// # Errors
  ///
  /// [`MapError::PageSizeNonMultiple`] when the unmapped tail of the file is
  /// not a whole number of chunks; otherwise the errors of
  /// [`MmapManager::map_next`].
  pub fn map_full(&mut self) -> Result<MapNext, MapError> {
    if !self.is_alive() {
      return Err(MapError::NotAlive);
    }

    let file_bytes = file_size(&self.path)?;
    if file_bytes <= self.mapped_size() {
      return Ok(MapNext::default());
    }

    let remaining = file_bytes - self.mapped_size();
    if remaining % self.chunk_size != 0 {
      return Err(MapError::PageSizeNonMultiple);
    }

    self.map_next(MapNextOptions {
      dont_grow_if_fully_mapped: false,
      extra_chunks_to_reserve_on_grow: 0,
      chunks_to_map_next: remaining / self.chunk_size,
    })
  }

  /// Flushes the mapped prefix to the backing file with `msync(MS_SYNC)`.
  ///
  /// The manager never syncs on its own; durability is the caller's call.
  /// A no-op when nothing is mapped.
  pub fn sync(&self) -> Result<(), MapError> {
    if self.base.is_null() || self.num_chunks_mapped == 0 {
      return Ok(());
    }

    // SAFETY: [base, base + mapped_size) is our live file mapping.
    if unsafe { libc::msync(self.base as *mut c_void, self.mapped_size() as usize, libc::MS_SYNC) } != 0 {
      return Err(MapError::Msync { errno: last_errno() });
    }
    Ok(())
  }

  /// Unmaps the reservation, closes the backing file and consumes the
  /// manager, reporting the first teardown error.
  ///
  /// Even on error every resource is released or abandoned and the manager
  /// ends dead; dropping instead of calling `close` performs the same
  /// teardown but discards errors.
  pub fn close(mut self) -> Result<(), MapError> {
    self.teardown()
  }

  /// Idempotent teardown shared by [`MmapManager::close`] and `Drop`.
  fn teardown(&mut self) -> Result<(), MapError> {
    let mut first_err = None;

    if !self.base.is_null() {
      // SAFETY: base is our live reservation covering both the PROT_NONE
      // tail and the file-backed prefix; one munmap releases the range.
      if unsafe { libc::munmap(self.base as *mut c_void, self.reserved_size() as usize) } != 0 {
        first_err = Some(MapError::Unmap { errno: last_errno() });
      }
      self.base = ptr::null_mut();
    }

    if self.fd != -1 {
      // SAFETY: fd is our open descriptor; closed exactly once.
      if unsafe { libc::close(self.fd) } != 0 {
        first_err.get_or_insert(MapError::CloseFile { errno: last_errno() });
      }
      self.fd = -1;
    }

    self.num_chunks_mapped = 0;
    self.num_chunks_reserved = 0;

    match first_err {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  /// True iff every reserved chunk is mapped.
  pub fn full(&self) -> bool {
    self.num_chunks_reserved == self.num_chunks_mapped
  }

  /// True iff the manager holds a live reservation.
  pub fn is_alive(&self) -> bool {
    !self.base.is_null()
  }

  /// Reservation size in bytes.
  pub fn reserved_size(&self) -> u64 {
    u64::from(self.num_chunks_reserved) * self.chunk_size
  }

  /// Size of the mapped prefix in bytes.
  pub fn mapped_size(&self) -> u64 {
    u64::from(self.num_chunks_mapped) * self.chunk_size
  }

  /// Reservation size in chunks.
  pub fn num_chunks_reserved(&self) -> u32 {
    self.num_chunks_reserved
  }

  /// Length of the mapped prefix in chunks.
  pub fn num_chunks_mapped(&self) -> u32 {
    self.num_chunks_mapped
  }

  /// Chunk size this manager was built with.
  pub fn chunk_size(&self) -> u64 {
    self.chunk_size
  }

  /// Path of the backing file.
  pub fn path(&self) -> &CStr {
    &self.path
  }

  /// The mapped prefix as a byte slice; empty when dead or nothing is
  /// mapped. The length is always `mapped_size()`, so callers cannot reach
  /// the `PROT_NONE` tail.
  pub fn mapped(&self) -> &[u8] {
    if self.base.is_null() || self.num_chunks_mapped == 0 {
      return &[];
    }
    // SAFETY: [base, base + mapped_size) is our live readable file mapping
    // and &self prevents concurrent remapping through this manager.
    unsafe { std::slice::from_raw_parts(self.base, self.mapped_size() as usize) }
  }

  /// Mutable view of the mapped prefix; empty when dead or nothing is
  /// mapped. Writes land in the backing file (flush with
  /// [`MmapManager::sync`]).
  pub fn mapped_mut(&mut self) -> &mut [u8] {
    if self.base.is_null() || self.num_chunks_mapped == 0 {
      return &mut [];
    }
    // SAFETY: the range is our live writable file mapping; &mut self makes
    // this the only view and blocks remapping for its lifetime.
    unsafe { std::slice::from_raw_parts_mut(self.base, self.mapped_size() as usize) }
  }
}

impl Drop for MmapManager {
  fn drop(&mut self) {
    if let Err(err) = self.teardown() {
      error!(%err, "teardown error while dropping mmap manager");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn create_opts(
    dir: &TempDir,
    name: &str,
    reserved_chunks: u64,
  ) -> CreateOptions {
    CreateOptions {
      backing_file: dir.path().join(name),
      initial_reserved_size: reserved_chunks * CHUNK_SIZE,
      reserve_existing_file_size: false,
    }
  }

  fn map_n(chunks: u64) -> MapNextOptions {
    MapNextOptions {
      dont_grow_if_fully_mapped: false,
      extra_chunks_to_reserve_on_grow: 0,
      chunks_to_map_next: chunks,
    }
  }

  fn file_len(opts: &CreateOptions) -> u64 {
    std::fs::metadata(&opts.backing_file).expect("backing file must exist").len()
  }

  // ═══════════════════════════════════════════════════════════════════════════
  // Creation and teardown
  // ═══════════════════════════════════════════════════════════════════════════

  #[test]
  fn create_with_zero_initial_size_reserves_one_chunk() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "t1", 0);

    let man = MmapManager::create(&opts).expect("create must succeed");
    assert!(man.is_alive());
    assert_eq!(1, man.num_chunks_reserved());
    assert_eq!(0, man.num_chunks_mapped());
    assert_eq!(CHUNK_SIZE, man.reserved_size());
    assert_eq!(0, man.mapped_size());
    assert_eq!(0, file_len(&opts));
    assert!(man.mapped().is_empty());

    man.close().expect("close must succeed");
  }

  #[test]
  fn create_aligns_existing_file_length_forward() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "unaligned", 4);
    std::fs::write(&opts.backing_file, vec![7u8; 100]).unwrap();

    let man = MmapManager::create(&opts).unwrap();
    assert_eq!(CHUNK_SIZE, file_len(&opts));
    assert_eq!(4, man.num_chunks_reserved());
  }

  #[test]
  fn create_can_reserve_existing_file_size() {
    let dir = TempDir::new().unwrap();
    let mut opts = create_opts(&dir, "grown", 2);
    opts.reserve_existing_file_size = true;
    std::fs::write(&opts.backing_file, vec![0u8; 6 * CHUNK_SIZE as usize]).unwrap();

    let man = MmapManager::create(&opts).unwrap();
    assert_eq!(6, man.num_chunks_reserved());

    // Without the option the smaller requested reservation wins.
    let mut opts2 = create_opts(&dir, "grown2", 2);
    opts2.reserve_existing_file_size = false;
    std::fs::write(&opts2.backing_file, vec![0u8; 6 * CHUNK_SIZE as usize]).unwrap();

    let man2 = MmapManager::create(&opts2).unwrap();
    assert_eq!(2, man2.num_chunks_reserved());
  }

  #[test]
  fn create_fails_on_unopenable_path() {
    let dir = TempDir::new().unwrap();
    let opts = CreateOptions {
      backing_file: dir.path().join("no-such-dir").join("file"),
      initial_reserved_size: 0,
      reserve_existing_file_size: false,
    };

    let err = MmapManager::create(&opts).unwrap_err();
    assert!(matches!(err, MapError::OpenFile { .. }));
    assert_eq!(libc::ENOENT, err.saved_errno());
  }

  // ═══════════════════════════════════════════════════════════════════════════
  // map_next: extend in place
  // ═══════════════════════════════════════════════════════════════════════════

  #[test]
  fn map_next_extends_within_reservation() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "extend", 4);
    let mut man = MmapManager::create(&opts).unwrap();

    let res = man
      .map_next(MapNextOptions {
        dont_grow_if_fully_mapped: true,
        extra_chunks_to_reserve_on_grow: 0,
        chunks_to_map_next: 2,
      })
      .expect("growing the file within the reservation is allowed");

    // The file grows, the reservation does not, the base does not move.
    assert!(!res.mapping_was_moved);
    assert_eq!(2 * CHUNK_SIZE, res.file_extension_size);
    assert_eq!(2, man.num_chunks_mapped());
    assert_eq!(4, man.num_chunks_reserved());
    assert_eq!(2 * CHUNK_SIZE, file_len(&opts));
    assert_eq!(2 * CHUNK_SIZE as usize, man.mapped().len());
  }

  #[test]
  fn map_next_zero_chunks_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let mut man = MmapManager::create(&create_opts(&dir, "noop", 2)).unwrap();

    let res = man.map_next(map_n(0)).unwrap();
    assert_eq!(MapNext::default(), res);
    assert_eq!(0, man.num_chunks_mapped());
  }

  #[test]
  fn map_next_rejects_growth_when_disallowed() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "reject", 4);
    let mut man = MmapManager::create(&opts).unwrap();
    man.map_next(map_n(2)).unwrap();

    // wanted = 5 > 4 reserved, growth disallowed: clean failure.
    let err = man
      .map_next(MapNextOptions {
        dont_grow_if_fully_mapped: true,
        extra_chunks_to_reserve_on_grow: 0,
        chunks_to_map_next: 3,
      })
      .unwrap_err();

    assert_eq!(MapError::FullyMapped, err);
    assert_eq!(0, err.saved_errno());
    assert_eq!(2, man.num_chunks_mapped());
    assert_eq!(4, man.num_chunks_reserved());
    assert_eq!(2 * CHUNK_SIZE, file_len(&opts));
  }

  #[test]
  fn map_next_rejects_chunk_count_overflow() {
    let dir = TempDir::new().unwrap();
    let mut man = MmapManager::create(&create_opts(&dir, "overflow", 1)).unwrap();

    let err = man.map_next(map_n(u64::MAX)).unwrap_err();
    assert_eq!(MapError::ChunkCountOverflow, err);

    let err = man.map_next(map_n(u64::from(u32::MAX) + 1)).unwrap_err();
    assert_eq!(MapError::ChunkCountOverflow, err);
    assert_eq!(0, man.num_chunks_mapped());
  }

  // ═══════════════════════════════════════════════════════════════════════════
  // map_next: reservation move
  // ═══════════════════════════════════════════════════════════════════════════

  #[test]
  fn map_next_moves_reservation_and_keeps_data() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "move", 4);
    let mut man = MmapManager::create(&opts).unwrap();

    man.map_next(map_n(2)).unwrap();
    man.mapped_mut()[..2 * CHUNK_SIZE as usize].fill(0xCD);
    man.mapped_mut()[0] = 0x11;

    // wanted = 5 > 4 reserved: the reservation moves and the whole prefix is
    // remapped from file offset 0.
    let res = man.map_next(map_n(3)).unwrap();
    assert!(res.mapping_was_moved);
    assert_eq!(3 * CHUNK_SIZE, res.file_extension_size);
    assert_eq!(5, man.num_chunks_mapped());
    assert!(man.num_chunks_reserved() >= 5);
    assert_eq!(5 * CHUNK_SIZE, file_len(&opts));

    // Bytes written before the move are visible at the new base.
    let view = man.mapped();
    assert_eq!(0x11, view[0]);
    assert!(view[1..2 * CHUNK_SIZE as usize].iter().all(|b| *b == 0xCD));
    assert!(view[2 * CHUNK_SIZE as usize..].iter().all(|b| *b == 0));
  }

  #[test]
  fn map_next_honors_extra_chunks_to_reserve_on_grow() {
    let dir = TempDir::new().unwrap();
    let mut man = MmapManager::create(&create_opts(&dir, "extra", 1)).unwrap();

    let res = man
      .map_next(MapNextOptions {
        dont_grow_if_fully_mapped: false,
        extra_chunks_to_reserve_on_grow: 10,
        chunks_to_map_next: 2,
      })
      .unwrap();

    // grow = max(10, 2) = 10 on top of the single reserved chunk.
    assert!(res.mapping_was_moved);
    assert_eq!(11, man.num_chunks_reserved());
    assert_eq!(2, man.num_chunks_mapped());
    assert!(!man.full());
  }

  // ═══════════════════════════════════════════════════════════════════════════
  // map_full
  // ═══════════════════════════════════════════════════════════════════════════

  #[test]
  fn map_full_maps_externally_extended_file() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "external", 16);
    let mut man = MmapManager::create(&opts).unwrap();

    // Another actor lengthens the backing file behind the manager's back.
    let file = std::fs::OpenOptions::new().write(true).open(&opts.backing_file).unwrap();
    file.set_len(10 * CHUNK_SIZE).unwrap();

    let res = man.map_full().unwrap();
    assert!(!res.mapping_was_moved);
    assert_eq!(0, res.file_extension_size);
    assert_eq!(10, man.num_chunks_mapped());

    // Nothing left to map: success without effect.
    let res = man.map_full().unwrap();
    assert_eq!(MapNext::default(), res);
    assert_eq!(10, man.num_chunks_mapped());
  }

  #[test]
  fn map_full_rejects_non_chunk_multiple_tail() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "ragged", 16);
    let mut man = MmapManager::create(&opts).unwrap();

    let file = std::fs::OpenOptions::new().write(true).open(&opts.backing_file).unwrap();
    file.set_len(3 * CHUNK_SIZE + 123).unwrap();

    let err = man.map_full().unwrap_err();
    assert_eq!(MapError::PageSizeNonMultiple, err);
    assert_eq!(0, man.num_chunks_mapped());
  }

  #[test]
  fn map_full_grows_reservation_when_file_is_larger() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "bigfile", 2);
    let mut man = MmapManager::create(&opts).unwrap();

    let file = std::fs::OpenOptions::new().write(true).open(&opts.backing_file).unwrap();
    file.set_len(8 * CHUNK_SIZE).unwrap();

    let res = man.map_full().unwrap();
    assert!(res.mapping_was_moved);
    assert_eq!(8, man.num_chunks_mapped());
    assert!(man.num_chunks_reserved() >= 8);
  }

  // ═══════════════════════════════════════════════════════════════════════════
  // Invariants over call sequences
  // ═══════════════════════════════════════════════════════════════════════════

  #[test]
  fn counts_are_monotonic_and_bounded_across_growth() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "sweep", 3);
    let mut man = MmapManager::create(&opts).unwrap();

    let mut last_mapped = 0;
    let mut last_reserved = man.num_chunks_reserved();

    for step in 1..=10u64 {
      man
        .map_next(MapNextOptions {
          dont_grow_if_fully_mapped: false,
          extra_chunks_to_reserve_on_grow: step % 3,
          chunks_to_map_next: 1 + step % 2,
        })
        .unwrap();

      assert!(man.num_chunks_mapped() <= man.num_chunks_reserved());
      assert!(man.num_chunks_mapped() >= last_mapped);
      assert!(man.num_chunks_reserved() >= last_reserved);

      let len = file_len(&opts);
      assert_eq!(0, len % CHUNK_SIZE);
      assert!(len >= man.mapped_size());

      last_mapped = man.num_chunks_mapped();
      last_reserved = man.num_chunks_reserved();
    }
  }

  #[test]
  fn stepwise_fill_stays_in_place_until_reservation_is_full() {
    let dir = TempDir::new().unwrap();
    let opts = create_opts(&dir, "fill", 20);
    let mut man = MmapManager::create(&opts).unwrap();

    for _ in 0..5 {
      let res = man.map_next(map_n(4)).unwrap();
      assert!(!res.mapping_was_moved);
    }

    assert_eq!(20, man.num_chunks_mapped());
    assert!(man.full());
    assert_eq!(20 * CHUNK_SIZE, man.mapped_size());

    let err = man
      .map_next(MapNextOptions {
        dont_grow_if_fully_mapped: true,
        extra_chunks_to_reserve_on_grow: 0,
        chunks_to_map_next: 4,
      })
      .unwrap_err();
    assert_eq!(MapError::FullyMapped, err);
  }

  // ═══════════════════════════════════════════════════════════════════════════
  // Persistence through the backing file
  // ═══════════════════════════════════════════════════════════════════════════

  #[test]
  fn written_bytes_survive_close_and_recreate() {
    let dir = TempDir::new().unwrap();
    let opts = CreateOptions {
      backing_file: dir.path().join("persist"),
      initial_reserved_size: 4 * CHUNK_SIZE,
      reserve_existing_file_size: true,
    };

    let offset = CHUNK_SIZE as usize + 17;
    {
      let mut man = MmapManager::create(&opts).unwrap();
      man.map_next(map_n(3)).unwrap();
      man.mapped_mut()[offset] = 0x5A;
      man.sync().unwrap();
      man.close().unwrap();
    }

    let mut man = MmapManager::create(&opts).unwrap();
    man.map_full().unwrap();
    assert_eq!(3, man.num_chunks_mapped());
    assert_eq!(0x5A, man.mapped()[offset]);
  }
}
