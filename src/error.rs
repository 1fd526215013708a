//! Error taxonomy of the mmap manager.
//!
//! Every fallible operation returns [`MapError`]. Kernel-sourced variants
//! carry the `errno` captured at the failure site; precondition variants
//! (`FullyMapped`, `PageSizeNonMultiple`, overflow) carry none and report a
//! `saved_errno` of zero.
//!
//! The numeric values of [`ErrorCode`] are a stable contract consumed
//! through the C ABI (see [`crate::ffi`]) and must never be renumbered.

use std::ffi::CStr;

use libc::c_int;
use thiserror::Error;

/// Stable numeric error codes exposed over the C ABI.
///
/// ```text
///   ┌──────┬──────────────────────────┐
///   │ Code │ Meaning                  │
///   ├──────┼──────────────────────────┤
///   │  0   │ NONE                     │
///   │  1   │ UNKNOWN                  │
///   │  2   │ FAILED_TO_REMAP          │
///   │  3   │ FAILED_TO_MMAP           │
///   │  4   │ FAILED_TO_STAT_FILE      │
///   │  5   │ FAILED_TO_OPEN_FILE      │
///   │  6   │ FAILED_TO_FTRUNCATE      │
///   │  7   │ FAILED_TO_UNMAP          │
///   │  8   │ FAILED_TO_CLOSE_FILE     │
///   │  9   │ FULLY_MAPPED             │
///   │ 10   │ PAGE_SIZE_NON_MULTIPLE   │
///   └──────┴──────────────────────────┘
/// ```
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
  None = 0,
  Unknown = 1,
  FailedToRemap = 2,
  FailedToMmap = 3,
  FailedToStatFile = 4,
  FailedToOpenFile = 5,
  FailedToFtruncate = 6,
  FailedToUnmap = 7,
  FailedToCloseFile = 8,
  FullyMapped = 9,
  PageSizeNonMultiple = 10,
}

/// Error returned by manager operations.
///
/// The variant tells which syscall or precondition failed; [`MapError::code`]
/// maps it onto the stable numeric contract. Variants that do not correspond
/// to a dedicated stable code (overflow, msync, operating on a dead manager)
/// report [`ErrorCode::Unknown`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
  /// `open(2)` on the backing file failed.
  #[error("failed to open backing file (errno {errno})")]
  OpenFile { errno: c_int },

  /// `stat(2)` on the backing file failed.
  #[error("failed to stat backing file (errno {errno})")]
  StatFile { errno: c_int },

  /// `ftruncate(2)` during creation failed.
  #[error("failed to ftruncate backing file to chunk multiple (errno {errno})")]
  Ftruncate { errno: c_int },

  /// Reserving address space with an anonymous `mmap(2)` failed, or the
  /// full-prefix remap after a reservation move failed.
  #[error("failed to mmap address space (errno {errno})")]
  Mmap { errno: c_int },

  /// `munmap(2)` of the reservation failed.
  #[error("failed to unmap reserved address space (errno {errno})")]
  Unmap { errno: c_int },

  /// Extending the mapped prefix failed: either the `ftruncate(2)` that
  /// grows the file, or the `MAP_FIXED` overlay within the reservation.
  #[error("failed to extend mapping over backing file (errno {errno})")]
  Remap { errno: c_int },

  /// `close(2)` of the backing file descriptor failed.
  #[error("failed to close backing file (errno {errno})")]
  CloseFile { errno: c_int },

  /// The reserved address space was exhausted and
  /// `dont_grow_if_fully_mapped` forbade moving the reservation.
  #[error("address space fully mapped and growth was disallowed")]
  FullyMapped,

  /// The unmapped tail of the file is not a whole number of chunks.
  #[error("unmapped tail of file is not a multiple of chunk size")]
  PageSizeNonMultiple,

  /// The requested chunk count does not fit the manager's 32-bit chunk
  /// accounting.
  #[error("requested chunk count overflows the manager's accounting")]
  ChunkCountOverflow,

  /// The manager is dead (its address space is gone); only teardown is
  /// valid.
  #[error("manager is not alive")]
  NotAlive,

  /// `msync(2)` over the mapped prefix failed.
  #[error("failed to msync mapped prefix (errno {errno})")]
  Msync { errno: c_int },
}

impl MapError {
  /// Stable numeric code for this error.
  pub fn code(&self) -> ErrorCode {
    match self {
      MapError::OpenFile { .. } => ErrorCode::FailedToOpenFile,
      MapError::StatFile { .. } => ErrorCode::FailedToStatFile,
      MapError::Ftruncate { .. } => ErrorCode::FailedToFtruncate,
      MapError::Mmap { .. } => ErrorCode::FailedToMmap,
      MapError::Unmap { .. } => ErrorCode::FailedToUnmap,
      MapError::Remap { .. } => ErrorCode::FailedToRemap,
      MapError::CloseFile { .. } => ErrorCode::FailedToCloseFile,
      MapError::FullyMapped => ErrorCode::FullyMapped,
      MapError::PageSizeNonMultiple => ErrorCode::PageSizeNonMultiple,
      MapError::ChunkCountOverflow | MapError::NotAlive | MapError::Msync { .. } => ErrorCode::Unknown,
    }
  }

  /// Static NUL-terminated message for this error, suitable for handing to
  /// C callers whose lifetime outlives any manager.
  pub fn message(&self) -> &'static CStr {
    match self {
      MapError::OpenFile { .. } => c"failed to open backing file",
      MapError::StatFile { .. } => c"failed to stat backing file",
      MapError::Ftruncate { .. } => c"failed to ftruncate backing file to chunk multiple",
      MapError::Mmap { .. } => c"failed to mmap address space",
      MapError::Unmap { .. } => c"failed to unmap reserved address space",
      MapError::Remap { .. } => c"failed to extend mapping over backing file",
      MapError::CloseFile { .. } => c"failed to close backing file",
      MapError::FullyMapped => c"address space fully mapped and growth was disallowed",
      MapError::PageSizeNonMultiple => c"unmapped tail of file is not a multiple of chunk size",
      MapError::ChunkCountOverflow => c"requested chunk count overflows the manager's accounting",
      MapError::NotAlive => c"manager is not alive",
      MapError::Msync { .. } => c"failed to msync mapped prefix",
    }
  }

  /// The `errno` captured when the failing syscall returned, or `0` for
  /// precondition errors that never reached the kernel.
  pub fn saved_errno(&self) -> c_int {
    match *self {
      MapError::OpenFile { errno }
      | MapError::StatFile { errno }
      | MapError::Ftruncate { errno }
      | MapError::Mmap { errno }
      | MapError::Unmap { errno }
      | MapError::Remap { errno }
      | MapError::CloseFile { errno }
      | MapError::Msync { errno } => errno,
      MapError::FullyMapped
      | MapError::PageSizeNonMultiple
      | MapError::ChunkCountOverflow
      | MapError::NotAlive => 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_codes_are_stable() {
    assert_eq!(0, ErrorCode::None as i32);
    assert_eq!(1, ErrorCode::Unknown as i32);
    assert_eq!(2, ErrorCode::FailedToRemap as i32);
    assert_eq!(3, ErrorCode::FailedToMmap as i32);
    assert_eq!(4, ErrorCode::FailedToStatFile as i32);
    assert_eq!(5, ErrorCode::FailedToOpenFile as i32);
    assert_eq!(6, ErrorCode::FailedToFtruncate as i32);
    assert_eq!(7, ErrorCode::FailedToUnmap as i32);
    assert_eq!(8, ErrorCode::FailedToCloseFile as i32);
    assert_eq!(9, ErrorCode::FullyMapped as i32);
    assert_eq!(10, ErrorCode::PageSizeNonMultiple as i32);
  }

  #[test]
  fn kernel_sourced_errors_keep_their_errno() {
    let err = MapError::OpenFile { errno: libc::ENOENT };
    assert_eq!(libc::ENOENT, err.saved_errno());
    assert_eq!(ErrorCode::FailedToOpenFile, err.code());

    let err = MapError::Mmap { errno: libc::ENOMEM };
    assert_eq!(libc::ENOMEM, err.saved_errno());
    assert_eq!(ErrorCode::FailedToMmap, err.code());
  }

  #[test]
  fn precondition_errors_have_zero_errno() {
    for err in [
      MapError::FullyMapped,
      MapError::PageSizeNonMultiple,
      MapError::ChunkCountOverflow,
      MapError::NotAlive,
    ] {
      assert_eq!(0, err.saved_errno(), "{err} should not carry an errno");
    }

    assert_eq!(ErrorCode::FullyMapped, MapError::FullyMapped.code());
    assert_eq!(ErrorCode::Unknown, MapError::ChunkCountOverflow.code());
  }

  #[test]
  fn messages_are_nul_terminated_statics() {
    let err = MapError::FullyMapped;
    let text = err.message().to_str().expect("message must be utf-8");
    assert!(text.contains("fully mapped"));
  }
}
