//! Summary: Error types for the pager core.
//! Copyright (c) YOAB. All rights reserved.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::page::PageId;

/// Result type alias for pager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the pager core (spec §7).
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A caller-supplied argument was out of range or otherwise nonsensical.
    InvalidArgument {
        /// What was wrong and where.
        reason: String,
    },
    /// An operation assumed a page/transaction state that did not hold.
    InvalidState {
        /// Which page (if any) was involved.
        page: Option<PageId>,
        /// What invariant was violated.
        reason: String,
    },
    /// The path does not exist.
    NotFound {
        /// The path that was looked up.
        path: PathBuf,
    },
    /// The path exists but is a directory where a regular file was required.
    IsADirectory {
        /// The offending path.
        path: PathBuf,
    },
    /// The path's parent resolves to something that is not a directory.
    NotAFile {
        /// The offending path.
        path: PathBuf,
    },
    /// No contiguous free range of the requested size could be found.
    NoSpace {
        /// Pages requested.
        requested: u64,
    },
    /// Opening or creating the database file failed.
    FileOpen {
        /// The path being opened.
        path: PathBuf,
        /// The underlying OS error.
        source: io::Error,
    },
    /// Reading file metadata (e.g. length) failed.
    FileMetadata {
        /// The path whose metadata was requested.
        path: PathBuf,
        /// The underlying OS error.
        source: io::Error,
    },
    /// A positional write failed.
    FileWrite {
        /// Byte offset of the write.
        offset: u64,
        /// Length of the write.
        len: usize,
        /// What the write was for.
        context: &'static str,
        /// The underlying OS error.
        source: io::Error,
    },
    /// A positional read failed.
    FileRead {
        /// Byte offset of the read.
        offset: u64,
        /// Length of the read.
        len: usize,
        /// What the read was for.
        context: &'static str,
        /// The underlying OS error.
        source: io::Error,
    },
    /// Growing the file (preallocation) failed.
    FileGrow {
        /// Target minimum length.
        target_len: u64,
        /// The underlying OS error.
        source: io::Error,
    },
    /// `mmap`/`munmap` failed.
    Mmap {
        /// What the mapping was for.
        context: &'static str,
        /// The underlying OS error.
        source: io::Error,
    },
    /// A durability barrier (`fsync`/`fdatasync`) failed.
    FileSync {
        /// What was being synced.
        context: &'static str,
        /// The underlying OS error.
        source: io::Error,
    },
    /// The on-disk file does not describe a valid pager (bad magic/version/size).
    Corrupted {
        /// What check failed.
        context: &'static str,
        /// Human-readable detail.
        details: String,
    },
    /// The pager was poisoned by a prior partially-completed commit and must
    /// be reopened before further transactions can begin.
    Poisoned,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Error::InvalidState { page, reason } => match page {
                Some(p) => write!(f, "invalid state at page {p}: {reason}"),
                None => write!(f, "invalid state: {reason}"),
            },
            Error::NotFound { path } => write!(f, "not found: {}", path.display()),
            Error::IsADirectory { path } => write!(f, "is a directory: {}", path.display()),
            Error::NotAFile { path } => write!(f, "not a file: {}", path.display()),
            Error::NoSpace { requested } => {
                write!(f, "no free range of {requested} contiguous page(s)")
            }
            Error::FileOpen { path, source } => {
                write!(f, "failed to open '{}': {source}", path.display())
            }
            Error::FileMetadata { path, source } => {
                write!(f, "failed to stat '{}': {source}", path.display())
            }
            Error::FileWrite {
                offset,
                len,
                context,
                source,
            } => write!(
                f,
                "write failed at offset {offset} (len {len}, {context}): {source}"
            ),
            Error::FileRead {
                offset,
                len,
                context,
                source,
            } => write!(
                f,
                "read failed at offset {offset} (len {len}, {context}): {source}"
            ),
            Error::FileGrow { target_len, source } => {
                write!(f, "failed to grow file to {target_len} bytes: {source}")
            }
            Error::Mmap { context, source } => write!(f, "mmap failed ({context}): {source}"),
            Error::FileSync { context, source } => {
                write!(f, "durability barrier failed ({context}): {source}")
            }
            Error::Corrupted { context, details } => {
                write!(f, "corrupted database ({context}): {details}")
            }
            Error::Poisoned => write!(
                f,
                "pager is poisoned by a prior failed commit; reopen the database"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::FileOpen { source, .. }
            | Error::FileMetadata { source, .. }
            | Error::FileWrite { source, .. }
            | Error::FileRead { source, .. }
            | Error::FileGrow { source, .. }
            | Error::Mmap { source, .. }
            | Error::FileSync { source, .. } => Some(source),
            _ => None,
        }
    }
}
