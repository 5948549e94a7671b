//! Summary: Free-space manager: `allocate_page`/`free_page` (spec §4.E).
//! Copyright (c) YOAB. All rights reserved.

use crate::error::{Error, Result};
use crate::page::{flags, pages_for_bytes, PageId, PageMetadata, PAGE_SIZE};
#[cfg(test)]
use crate::pageio::get_bitmap_bit;
use crate::pageio::{read_bitmap_bytes, set_bitmap_bit};
use crate::tx::Transaction;

fn bitmap_page_count(number_of_pages: u64) -> u64 {
    const BITS_PER_PAGE: u64 = (PAGE_SIZE as u64) * 8;
    number_of_pages.div_ceil(BITS_PER_PAGE)
}

impl<'p> Transaction<'p> {
    /// Allocates a contiguous run of pages large enough to hold `overflow_size`
    /// bytes (or one page, if `overflow_size <= PAGE_SIZE`), preferring
    /// locality to `near_page` (spec §4.E). Returns the first page number.
    pub fn allocate_page(&mut self, overflow_size: u32, near_page: PageId) -> Result<PageId> {
        self.require_writable()?;

        let required = pages_for_bytes(overflow_size as u64).max(1);
        let header = self.pager.header();
        let nbits = header.number_of_pages;
        let bm_pages = bitmap_page_count(nbits);

        let bitmap_bytes = read_bitmap_bytes(self, bm_pages)?;
        let near_pos = near_page.min(nbits.saturating_sub(1));
        let first = crate::bitmap::find_free_range(&bitmap_bytes, nbits, required, near_pos)
            .ok_or(Error::NoSpace { requested: required })?;

        for offset in 0..required {
            let page_num = first + offset;
            set_bitmap_bit(self, page_num, true)?;

            let record = if required == 1 {
                PageMetadata {
                    overflow_size: 0,
                    flags: flags::SINGLE,
                }
            } else if offset == 0 {
                PageMetadata {
                    overflow_size,
                    flags: flags::OVERFLOW_FIRST,
                }
            } else {
                PageMetadata {
                    overflow_size: overflow_size - (offset as u32) * PAGE_SIZE as u32,
                    flags: flags::OVERFLOW_REST,
                }
            };
            self.set_page_metadata(page_num, record)?;
        }

        Ok(first)
    }

    /// Frees `page_num` (and, if it is the head of an overflow run, every
    /// page in that run), clearing their bitmap bits and metadata records.
    ///
    /// Rejects `overflow_rest` pages: only the run's first page may be freed
    /// (spec §9 open question).
    pub fn free_page(&mut self, page_num: PageId) -> Result<()> {
        self.require_writable()?;

        let meta = self.get_page_metadata(page_num)?;
        if !meta.is_busy() {
            return Err(Error::InvalidState {
                page: Some(page_num),
                reason: "double free: page is already free".to_string(),
            });
        }
        if meta.flags & flags::OVERFLOW_REST != 0 {
            return Err(Error::InvalidState {
                page: Some(page_num),
                reason: "cannot free an overflow_rest page directly; free the run's first page"
                    .to_string(),
            });
        }

        let required = if meta.flags & flags::OVERFLOW_FIRST != 0 {
            pages_for_bytes(meta.overflow_size as u64).max(1)
        } else {
            1
        };

        for offset in 0..required {
            let p = page_num + offset;
            set_bitmap_bit(self, p, false)?;
            self.set_page_metadata(p, PageMetadata::FREE)?;
        }

        Ok(())
    }
}

/// Returns whether bit `bit` in the durable bitmap is set, as observed
/// through `txn` (exposed for tests/diagnostics; allocation uses the bulk
/// `read_bitmap_bytes` path instead).
#[cfg(test)]
pub(crate) fn bit_is_busy(txn: &Transaction<'_>, bit: u64) -> Result<bool> {
    get_bitmap_bit(txn, bit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pager::{Pager, PagerConfig};

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("thunderpager_freespace_test_{name}_{}.db", std::process::id()));
        p
    }

    #[test]
    fn test_allocate_single_page_marks_bitmap_busy() {
        let path = tmp_path("alloc_single");
        let _ = std::fs::remove_file(&path);
        let pager = Pager::create(&path, PagerConfig::default()).unwrap();
        let mut txn = pager.begin(true).unwrap();
        let page_num = txn.allocate_page(0, 0).unwrap();
        assert!(bit_is_busy(&txn, page_num).unwrap());
        let meta = txn.get_page_metadata(page_num).unwrap();
        assert_eq!(meta.flags, flags::SINGLE);
        drop(txn);
        drop(pager);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_allocate_then_free_restores_bitmap() {
        let path = tmp_path("alloc_free");
        let _ = std::fs::remove_file(&path);
        let pager = Pager::create(&path, PagerConfig::default()).unwrap();
        let mut txn = pager.begin(true).unwrap();
        let page_num = txn.allocate_page(0, 0).unwrap();
        assert!(bit_is_busy(&txn, page_num).unwrap());
        txn.free_page(page_num).unwrap();
        assert!(!bit_is_busy(&txn, page_num).unwrap());
        let meta = txn.get_page_metadata(page_num).unwrap();
        assert!(!meta.is_busy());
        drop(txn);
        drop(pager);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_free_overflow_rest_page_rejected() {
        let path = tmp_path("free_rest_rejected");
        let _ = std::fs::remove_file(&path);
        let pager = Pager::create(&path, PagerConfig::default()).unwrap();
        let mut txn = pager.begin(true).unwrap();
        let first = txn.allocate_page(PAGE_SIZE as u32 + 1, 0).unwrap();
        let rest = first + 1;
        assert!(matches!(txn.free_page(rest), Err(Error::InvalidState { .. })));
        drop(txn);
        drop(pager);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_double_free_rejected() {
        let path = tmp_path("double_free");
        let _ = std::fs::remove_file(&path);
        let pager = Pager::create(&path, PagerConfig::default()).unwrap();
        let mut txn = pager.begin(true).unwrap();
        let page_num = txn.allocate_page(0, 0).unwrap();
        txn.free_page(page_num).unwrap();
        assert!(matches!(txn.free_page(page_num), Err(Error::InvalidState { .. })));
        drop(txn);
        drop(pager);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_allocate_overflow_size_exactly_one_page() {
        let path = tmp_path("overflow_exact_page");
        let _ = std::fs::remove_file(&path);
        let pager = Pager::create(&path, PagerConfig::default()).unwrap();
        let mut txn = pager.begin(true).unwrap();
        let page_num = txn.allocate_page(PAGE_SIZE as u32, 0).unwrap();
        let meta = txn.get_page_metadata(page_num).unwrap();
        assert_eq!(meta.flags, flags::SINGLE);
        drop(txn);
        drop(pager);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_allocate_overflow_size_one_byte_over_page() {
        let path = tmp_path("overflow_one_over");
        let _ = std::fs::remove_file(&path);
        let pager = Pager::create(&path, PagerConfig::default()).unwrap();
        let mut txn = pager.begin(true).unwrap();
        let size = PAGE_SIZE as u32 + 1;
        let first = txn.allocate_page(size, 0).unwrap();
        let meta_first = txn.get_page_metadata(first).unwrap();
        assert_eq!(meta_first.flags, flags::OVERFLOW_FIRST);
        assert_eq!(meta_first.overflow_size, size);

        let meta_rest = txn.get_page_metadata(first + 1).unwrap();
        assert_eq!(meta_rest.flags, flags::OVERFLOW_REST);
        assert_eq!(meta_rest.overflow_size, 1);
        drop(txn);
        drop(pager);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_allocate_no_space_when_file_full() {
        let path = tmp_path("no_space");
        let _ = std::fs::remove_file(&path);
        let mut config = PagerConfig::default();
        config.initial_file_size_pages = 16;
        let pager = Pager::create(&path, config).unwrap();
        let mut txn = pager.begin(true).unwrap();

        // Exhaust every free page in the small initial file.
        let mut allocated = Vec::new();
        loop {
            match txn.allocate_page(0, 0) {
                Ok(p) => allocated.push(p),
                Err(Error::NoSpace { .. }) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(!allocated.is_empty());
        assert!(matches!(txn.allocate_page(0, 0), Err(Error::NoSpace { .. })));
        drop(txn);
        drop(pager);
        std::fs::remove_file(&path).unwrap();
    }
}
