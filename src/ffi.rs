//! Stable C ABI over the manager.
//!
//! Everything here is flat data: fixed-width integers, raw byte pointers and
//! `#[repr(C)]` structs, so the surface can be consumed through cgo, ctypes
//! or any other native-interop mechanism. The Rust API reports failures as
//! `Result`; this layer converts them into the sentinel-filled structs C
//! callers expect:
//!
//! - a failed `growmap_create_manager` returns a *dead* [`RawManager`]
//!   (`address == NULL`) with `error_code`/`error_message` populated,
//! - every other operation returns a [`RawErrorResult`] (or a struct
//!   embedding one) whose `error_code` follows the stable numeric table in
//!   [`crate::ErrorCode`].
//!
//! `error_message` pointers are `'static` and never need freeing. The
//! `filepath` pointer inside a live [`RawManager`] is owned by the manager
//! and released by `growmap_delete_manager`; C callers must not free it.

use std::ffi::{CStr, CString, OsStr};
use std::mem::ManuallyDrop;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr;

use libc::{c_char, c_int};

use crate::error::{ErrorCode, MapError};
use crate::manager::{CHUNK_SIZE, CreateOptions, MapNext, MapNextOptions, MmapManager};

/// C mirror of [`CreateOptions`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawCreateOptions {
  /// NUL-terminated path to the backing file; created if absent.
  pub backing_file: *const c_char,

  /// Initial address space to reserve, in bytes.
  pub initial_reserved_size: u64,

  /// Reserve the (chunk-aligned) existing file size instead when it is
  /// larger than `initial_reserved_size`.
  pub reserve_existing_file_size: bool,
}

/// C mirror of the manager state.
///
/// Treat all fields as read-only; they are kept in sync by the `growmap_*`
/// calls that take the struct by pointer.
#[repr(C)]
#[derive(Debug)]
pub struct RawManager {
  pub address: *mut u8,
  pub num_chunks_reserved: u32,
  pub num_chunks_mapped: u32,
  pub chunk_size: u64,
  pub filepath: *mut c_char,
  pub fd: c_int,
  pub error_code: c_int,
  pub error_message: *const c_char,
}

/// Error triple returned over the ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawErrorResult {
  pub error_code: c_int,
  pub error_message: *const c_char,
  pub saved_errno: c_int,
}

/// C mirror of [`MapNextOptions`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMapNextOptions {
  pub dont_grow_if_fully_mapped: bool,
  pub extra_chunks_to_reserve_on_grow: u64,
  pub chunks_to_map_next: u64,
}

/// C mirror of [`MapNext`] plus the error triple.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMapNextChunkResult {
  pub error: RawErrorResult,
  pub mapping_was_moved: bool,
  pub file_extension_size: u64,
}

impl RawErrorResult {
  fn ok() -> Self {
    Self {
      error_code: ErrorCode::None as c_int,
      error_message: ptr::null(),
      saved_errno: 0,
    }
  }

  fn from_error(err: &MapError) -> Self {
    Self {
      error_code: err.code() as c_int,
      error_message: err.message().as_ptr(),
      saved_errno: err.saved_errno(),
    }
  }
}

impl RawMapNextChunkResult {
  fn ok(res: MapNext) -> Self {
    Self {
      error: RawErrorResult::ok(),
      mapping_was_moved: res.mapping_was_moved,
      file_extension_size: res.file_extension_size,
    }
  }

  fn from_error(err: &MapError) -> Self {
    Self {
      error: RawErrorResult::from_error(err),
      mapping_was_moved: false,
      file_extension_size: 0,
    }
  }
}

impl RawManager {
  /// Moves a live manager into its C representation. The path allocation is
  /// handed over via `CString::into_raw` and reclaimed in
  /// [`growmap_delete_manager`].
  fn from_manager(man: MmapManager) -> Self {
    let man = ManuallyDrop::new(man);
    // SAFETY: man is ManuallyDrop, so the path is moved out exactly once
    // and no Drop will touch it afterwards.
    let path = unsafe { ptr::read(&man.path) };

    Self {
      address: man.base,
      num_chunks_reserved: man.num_chunks_reserved,
      num_chunks_mapped: man.num_chunks_mapped,
      chunk_size: man.chunk_size,
      filepath: path.into_raw(),
      fd: man.fd,
      error_code: ErrorCode::None as c_int,
      error_message: ptr::null(),
    }
  }

  /// Dead manager carrying the creation error.
  fn dead(err: &MapError) -> Self {
    Self {
      address: ptr::null_mut(),
      num_chunks_reserved: 0,
      num_chunks_mapped: 0,
      chunk_size: CHUNK_SIZE,
      filepath: ptr::null_mut(),
      fd: -1,
      error_code: err.code() as c_int,
      error_message: err.message().as_ptr(),
    }
  }
}

/// Reconstructs the core manager around the raw fields, runs `f`, and writes
/// the (possibly changed) mapping fields back.
///
/// # Safety
///
/// `raw.filepath` must have originated from [`RawManager::from_manager`];
/// the `ManuallyDrop` keeps this temporary reconstruction from freeing it,
/// and the allocation itself never moves, so the raw pointer stays valid.
unsafe fn with_manager<R>(
  raw: &mut RawManager,
  f: impl FnOnce(&mut MmapManager) -> Result<R, MapError>,
) -> Result<R, MapError> {
  if raw.address.is_null() || raw.filepath.is_null() || raw.fd < 0 {
    return Err(MapError::NotAlive);
  }

  let mut man = ManuallyDrop::new(MmapManager {
    base: raw.address,
    num_chunks_reserved: raw.num_chunks_reserved,
    num_chunks_mapped: raw.num_chunks_mapped,
    chunk_size: raw.chunk_size,
    // SAFETY: per the function contract the pointer came from into_raw.
    path: unsafe { CString::from_raw(raw.filepath) },
    fd: raw.fd,
  });

  let out = f(&mut man);

  raw.address = man.base;
  raw.num_chunks_reserved = man.num_chunks_reserved;
  raw.num_chunks_mapped = man.num_chunks_mapped;
  raw.fd = man.fd;

  out
}

/// Chunk size the library was built with.
#[unsafe(no_mangle)]
pub extern "C" fn growmap_chunk_size() -> u64 {
  CHUNK_SIZE
}

/// Creates a manager over `opts.backing_file`.
///
/// On failure the returned manager is dead (`address == NULL`) with
/// `error_code`/`error_message` set; passing it to the other calls is safe
/// and yields errors (or success, for delete).
///
/// # Safety
///
/// `opts.backing_file` must be null or point to a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn growmap_create_manager(opts: RawCreateOptions) -> RawManager {
  if opts.backing_file.is_null() {
    return RawManager::dead(&MapError::OpenFile { errno: libc::EINVAL });
  }

  // SAFETY: checked non-null; caller guarantees NUL termination.
  let path = unsafe { CStr::from_ptr(opts.backing_file) };
  let create = CreateOptions {
    backing_file: PathBuf::from(OsStr::from_bytes(path.to_bytes())),
    initial_reserved_size: opts.initial_reserved_size,
    reserve_existing_file_size: opts.reserve_existing_file_size,
  };

  match MmapManager::create(&create) {
    Ok(man) => RawManager::from_manager(man),
    Err(err) => RawManager::dead(&err),
  }
}

/// Tears the manager down: unmaps the reservation, closes the file and
/// frees the path. Success on a null or already-dead manager.
///
/// # Safety
///
/// `man` must be null or point to a manager produced by
/// [`growmap_create_manager`] that is not used concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn growmap_delete_manager(man: *mut RawManager) -> RawErrorResult {
  // SAFETY: caller guarantees validity when non-null.
  let Some(raw) = (unsafe { man.as_mut() }) else {
    return RawErrorResult::ok();
  };

  // Reclaim the path first so even a dead-like manager (fd open, address
  // already gone) releases everything it still holds.
  let path = if raw.filepath.is_null() {
    CString::default()
  } else {
    // SAFETY: non-null filepath in a RawManager came from into_raw.
    unsafe { CString::from_raw(raw.filepath) }
  };
  raw.filepath = ptr::null_mut();

  let core = MmapManager {
    base: raw.address,
    num_chunks_reserved: raw.num_chunks_reserved,
    num_chunks_mapped: raw.num_chunks_mapped,
    chunk_size: raw.chunk_size,
    path,
    fd: raw.fd,
  };

  raw.address = ptr::null_mut();
  raw.fd = -1;
  raw.num_chunks_reserved = 0;
  raw.num_chunks_mapped = 0;

  match core.close() {
    Ok(()) => RawErrorResult::ok(),
    Err(err) => RawErrorResult::from_error(&err),
  }
}

/// Maps the next chunks per `opts`; see [`MmapManager::map_next`].
///
/// # Safety
///
/// `man` must be null or point to a manager produced by
/// [`growmap_create_manager`] that is not used concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn growmap_map_next_file_chunk(
  man: *mut RawManager,
  opts: RawMapNextOptions,
) -> RawMapNextChunkResult {
  // SAFETY: caller guarantees validity when non-null.
  let Some(raw) = (unsafe { man.as_mut() }) else {
    return RawMapNextChunkResult::from_error(&MapError::NotAlive);
  };

  // SAFETY: raw was produced by growmap_create_manager.
  let res = unsafe {
    with_manager(raw, |core| {
      core.map_next(MapNextOptions {
        dont_grow_if_fully_mapped: opts.dont_grow_if_fully_mapped,
        extra_chunks_to_reserve_on_grow: opts.extra_chunks_to_reserve_on_grow,
        chunks_to_map_next: opts.chunks_to_map_next,
      })
    })
  };

  match res {
    Ok(r) => RawMapNextChunkResult::ok(r),
    Err(err) => RawMapNextChunkResult::from_error(&err),
  }
}

/// Maps the whole backing file; see [`MmapManager::map_full`].
///
/// # Safety
///
/// `man` must be null or point to a manager produced by
/// [`growmap_create_manager`] that is not used concurrently.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn growmap_map_full_file(man: *mut RawManager) -> RawMapNextChunkResult {
  // SAFETY: caller guarantees validity when non-null.
  let Some(raw) = (unsafe { man.as_mut() }) else {
    return RawMapNextChunkResult::from_error(&MapError::NotAlive);
  };

  // SAFETY: raw was produced by growmap_create_manager.
  let res = unsafe { with_manager(raw, |core| core.map_full()) };

  match res {
    Ok(r) => RawMapNextChunkResult::ok(r),
    Err(err) => RawMapNextChunkResult::from_error(&err),
  }
}

/// True iff every reserved chunk is mapped. False for null.
///
/// # Safety
///
/// `man` must be null or a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn growmap_full(man: *const RawManager) -> bool {
  // SAFETY: caller guarantees validity when non-null.
  match unsafe { man.as_ref() } {
    Some(raw) => raw.num_chunks_reserved == raw.num_chunks_mapped,
    None => false,
  }
}

/// True iff the manager holds a live reservation. False for null.
///
/// # Safety
///
/// `man` must be null or a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn growmap_is_alive(man: *const RawManager) -> bool {
  // SAFETY: caller guarantees validity when non-null.
  match unsafe { man.as_ref() } {
    Some(raw) => !raw.address.is_null(),
    None => false,
  }
}

/// Reservation size in bytes. Zero for null.
///
/// # Safety
///
/// `man` must be null or a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn growmap_reserved_size(man: *const RawManager) -> u64 {
  // SAFETY: caller guarantees validity when non-null.
  match unsafe { man.as_ref() } {
    Some(raw) => u64::from(raw.num_chunks_reserved) * raw.chunk_size,
    None => 0,
  }
}

/// Mapped-prefix size in bytes. Zero for null.
///
/// # Safety
///
/// `man` must be null or a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn growmap_mapped_size(man: *const RawManager) -> u64 {
  // SAFETY: caller guarantees validity when non-null.
  match unsafe { man.as_ref() } {
    Some(raw) => u64::from(raw.num_chunks_mapped) * raw.chunk_size,
    None => 0,
  }
}
