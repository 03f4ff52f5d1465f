#![forbid(unsafe_code)]
//! Error types for ChainFS.
//!
//! ChainFS uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `cfs-types` | On-disk format violations detected during byte parsing |
//! | Runtime | `CfsError` | `cfs-error` (this crate) | Errors surfaced through the operation table |
//!
//! `cfs-error` is intentionally independent of `cfs-types` so the dependency
//! graph stays acyclic; the `ParseError -> CfsError` conversion lives in
//! `cfs-core`, which depends on both. Parse failures on live metadata become
//! `Corruption` (the block number enables triage); parse failures without a
//! block context fall back to `Parse`.
//!
//! Every variant maps to exactly one POSIX errno via [`CfsError::to_errno`].
//! The match is exhaustive on purpose: adding a variant without assigning an
//! errno is a compile error. The external host is a kernel-style bridge, so
//! errno is the lingua franca at that boundary.
//!
//! Storage-layer failures (`Io`) abort the in-flight operation and propagate;
//! they never terminate the process and never roll back partial writes —
//! structural mutations are ordered so the authoritative size/count field is
//! committed only after the payload write succeeds.

use thiserror::Error;

/// Unified error type for all ChainFS operations.
#[derive(Debug, Error)]
pub enum CfsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk metadata corruption detected at a known block.
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u32, detail: String },

    /// Parse-layer failure without a block context.
    #[error("parse error: {0}")]
    Parse(String),

    /// Name absent in the directory.
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory operation was applied to a non-directory.
    #[error("not a directory")]
    NotDirectory,

    /// A file operation was applied to a directory.
    #[error("is a directory")]
    IsDirectory,

    /// rmdir on a directory that still has entries.
    #[error("directory not empty")]
    NotEmpty,

    /// Directory entry record exceeds the per-block maximum.
    #[error("name too long")]
    NameTooLong,

    /// The free-block stack is exhausted.
    #[error("no space left on device")]
    NoSpace,

    /// Read or write range starts beyond the entity's logical size.
    #[error("invalid range: offset {offset} beyond size {size}")]
    InvalidRange { offset: u64, size: u64 },

    /// Target name already exists (create, mkdir, link).
    #[error("entry exists")]
    Exists,

    /// `read_link` on an entity that is not a symbolic link.
    #[error("not a symbolic link")]
    NotSymlink,

    /// Malformed name handed in by the host (empty, or otherwise unusable).
    #[error("invalid name")]
    InvalidName,
}

impl CfsError {
    /// Convert this error into a POSIX errno suitable for the bridge host.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Parse(_) | Self::InvalidRange { .. } | Self::NotSymlink | Self::InvalidName => {
                libc::EINVAL
            }
            Self::NotFound(_) => libc::ENOENT,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::NoSpace => libc::ENOSPC,
            Self::Exists => libc::EEXIST,
        }
    }
}

/// Result alias using `CfsError`.
pub type Result<T> = std::result::Result<T, CfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(CfsError, libc::c_int)> = vec![
            (CfsError::Io(std::io::Error::other("boom")), libc::EIO),
            (
                CfsError::Corruption {
                    block: 7,
                    detail: "bad tag".into(),
                },
                libc::EIO,
            ),
            (CfsError::Parse("short read".into()), libc::EINVAL),
            (CfsError::NotFound("a.txt".into()), libc::ENOENT),
            (CfsError::NotDirectory, libc::ENOTDIR),
            (CfsError::IsDirectory, libc::EISDIR),
            (CfsError::NotEmpty, libc::ENOTEMPTY),
            (CfsError::NameTooLong, libc::ENAMETOOLONG),
            (CfsError::NoSpace, libc::ENOSPC),
            (
                CfsError::InvalidRange {
                    offset: 10,
                    size: 5,
                },
                libc::EINVAL,
            ),
            (CfsError::Exists, libc::EEXIST),
            (CfsError::NotSymlink, libc::EINVAL),
            (CfsError::InvalidName, libc::EINVAL),
        ];

        for (error, expected) in &cases {
            assert_eq!(error.to_errno(), *expected, "wrong errno for {error:?}");
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let raw = std::io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(CfsError::Io(raw).to_errno(), libc::EPERM);
    }

    #[test]
    fn display_formatting() {
        let err = CfsError::Corruption {
            block: 42,
            detail: "free tag in live chain".into(),
        };
        assert_eq!(
            err.to_string(),
            "corrupt metadata at block 42: free tag in live chain"
        );
        assert_eq!(CfsError::NotEmpty.to_string(), "directory not empty");
        assert_eq!(
            CfsError::InvalidRange { offset: 9, size: 4 }.to_string(),
            "invalid range: offset 9 beyond size 4"
        );
    }
}
