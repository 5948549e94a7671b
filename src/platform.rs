//! Summary: Raw file, mmap, and durability primitives (spec §4.A).
//! Copyright (c) YOAB. All rights reserved.
//!
//! Everything here is a thin, checked wrapper around a POSIX syscall. Higher
//! layers never touch `libc`/`nix` directly; they go through this module so
//! every failure mode is mapped to an [`Error`] with enough context to debug
//! a production incident.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Opens the database file at `path`, creating it if absent.
///
/// Returns the open file and whether it was newly created (empty).
pub fn open_or_create(path: &Path) -> Result<(File, bool)> {
    if path.is_dir() {
        return Err(Error::IsADirectory {
            path: path.to_path_buf(),
        });
    }

    let existed_before = path.exists();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| Error::FileOpen {
            path: path.to_path_buf(),
            source: e,
        })?;

    let is_new = !existed_before || file_len(&file, path)? == 0;
    Ok((file, is_new))
}

/// Returns the current length of an open file.
pub fn file_len(file: &File, path: &Path) -> Result<u64> {
    file.metadata()
        .map(|m| m.len())
        .map_err(|e| Error::FileMetadata {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Fsyncs the parent directory of `path`, making a just-created file's
/// directory entry durable (spec §4.A: metadata durability).
pub fn fsync_parent_dir(path: &Path) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir_path: PathBuf = match parent {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from("."),
    };
    let dir = File::open(&dir_path).map_err(|e| Error::FileOpen {
        path: dir_path.clone(),
        source: e,
    })?;
    dir.sync_all().map_err(|e| Error::FileSync {
        context: "fsync parent directory",
        source: e,
    })
}

/// Grows `file` to at least `target_len` bytes, preferring `posix_fallocate`
/// (which reserves real disk blocks, unlike a sparse `set_len`) and falling
/// back to `File::set_len` when the filesystem doesn't support it.
pub fn ensure_file_minimum_size(file: &File, target_len: u64) -> Result<()> {
    match nix::fcntl::posix_fallocate(file.as_raw_fd(), 0, target_len as libc::off_t) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::EOPNOTSUPP) | Err(nix::errno::Errno::EINVAL) => {
            file.set_len(target_len).map_err(|e| Error::FileGrow {
                target_len,
                source: e,
            })
        }
        Err(e) => Err(Error::FileGrow {
            target_len,
            source: io::Error::from(e),
        }),
    }
}

/// A read-write memory mapping of the whole database file.
pub struct MappedFile {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the mapping is backed by a file whose writes go through `pwrite`
// under the pager's single-writer mutex; concurrent readers only ever read
// through the shared slice, which is sound for a `MAP_SHARED` mapping.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Maps the first `len` bytes of `file`.
    pub fn new(file: &File, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::InvalidArgument {
                reason: "cannot mmap a zero-length file".to_string(),
            });
        }
        // SAFETY: `file` is a valid, open fd; `len` is nonzero and checked
        // against the mmap return value below.
        // Mapped read-only: all writes go through `pwrite_all` at a specific
        // offset, never through the mapping, so the kernel enforces that
        // instead of relying on callers to behave.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::Mmap {
                context: "mmap database file",
                source: io::Error::last_os_error(),
            });
        }
        Ok(Self {
            ptr: ptr as *mut u8,
            len,
        })
    }

    /// Current mapped length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the whole mapping as a read-only byte slice.
    ///
    /// Borrowing rules are enforced by the pager: callers must not read a
    /// dirty page through the mapping while a transaction holds a modified
    /// copy of it elsewhere.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the lifetime of `self`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Remaps to cover a grown file. Must only be called while no references
    /// into the old mapping are outstanding (enforced by the pager: remap
    /// happens only between transactions, under the writer mutex).
    pub fn remap(&mut self, file: &File, new_len: usize) -> Result<()> {
        let remapped = Self::new(file, new_len)?;
        self.unmap();
        self.ptr = remapped.ptr;
        self.len = remapped.len;
        std::mem::forget(remapped);
        Ok(())
    }

    fn unmap(&mut self) {
        if self.len > 0 {
            // SAFETY: `ptr`/`len` describe the mapping created in `new`.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        self.unmap();
    }
}

/// Writes `buf` at absolute offset `offset` in `file`, retrying on `EINTR`
/// (spec §4.A: positional writes, no seek-then-write race).
pub fn pwrite_all(file: &File, offset: u64, buf: &[u8], context: &'static str) -> Result<()> {
    let mut written = 0usize;
    while written < buf.len() {
        match nix::sys::uio::pwrite(file, &buf[written..], offset as i64 + written as i64) {
            Ok(0) => {
                return Err(Error::FileWrite {
                    offset,
                    len: buf.len(),
                    context,
                    source: io::Error::from(io::ErrorKind::WriteZero),
                });
            }
            Ok(n) => written += n,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                return Err(Error::FileWrite {
                    offset,
                    len: buf.len(),
                    context,
                    source: io::Error::from(e),
                });
            }
        }
    }
    Ok(())
}

/// Fdatasyncs `file`, falling back to `fsync` on platforms without it.
pub fn fdatasync(file: &File, context: &'static str) -> Result<()> {
    // SAFETY: `fdatasync` is a standard POSIX call, safe with a valid fd.
    let ret = unsafe { libc::fdatasync(file.as_raw_fd()) };
    if ret != 0 {
        return Err(Error::FileSync {
            context,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn tmp_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("thunderpager_platform_test_{name}_{}", std::process::id()));
        p
    }

    #[test]
    fn test_open_or_create_reports_new() {
        let path = tmp_path("new");
        let _ = std::fs::remove_file(&path);
        let (file, is_new) = open_or_create(&path).unwrap();
        assert!(is_new);
        drop(file);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_or_create_reports_existing() {
        let path = tmp_path("existing");
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }
        let (_file, is_new) = open_or_create(&path).unwrap();
        assert!(!is_new);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_open_or_create_rejects_directory() {
        let path = std::env::temp_dir();
        assert!(matches!(open_or_create(&path), Err(Error::IsADirectory { .. })));
    }

    #[test]
    fn test_ensure_file_minimum_size_grows_file() {
        let path = tmp_path("grow");
        let (file, _) = open_or_create(&path).unwrap();
        ensure_file_minimum_size(&file, 65536).unwrap();
        assert_eq!(file_len(&file, &path).unwrap(), 65536);
        drop(file);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_pwrite_and_mmap_roundtrip() {
        let path = tmp_path("mmap");
        let (file, _) = open_or_create(&path).unwrap();
        ensure_file_minimum_size(&file, 8192).unwrap();
        pwrite_all(&file, 100, b"hello", "test").unwrap();
        fdatasync(&file, "test").unwrap();

        let mapped = MappedFile::new(&file, 8192).unwrap();
        assert_eq!(&mapped.as_slice()[100..105], b"hello");
        drop(mapped);
        drop(file);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_mmap_remap_grows() {
        let path = tmp_path("remap");
        let (file, _) = open_or_create(&path).unwrap();
        ensure_file_minimum_size(&file, 8192).unwrap();
        let mut mapped = MappedFile::new(&file, 8192).unwrap();
        ensure_file_minimum_size(&file, 16384).unwrap();
        mapped.remap(&file, 16384).unwrap();
        assert_eq!(mapped.len(), 16384);
        drop(mapped);
        drop(file);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_mmap_rejects_zero_length() {
        let path = tmp_path("zerolen");
        let (file, _) = open_or_create(&path).unwrap();
        assert!(MappedFile::new(&file, 0).is_err());
        drop(file);
        std::fs::remove_file(&path).unwrap();
    }
}
