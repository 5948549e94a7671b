//! Summary: Transactional page access: `get_page`/`modify_page` (spec §4.C).
//! Copyright (c) YOAB. All rights reserved.
//!
//! These are inherent methods on [`Transaction`] split into their own file
//! because they are the hottest, most delicate part of the pager: every
//! other component (`freespace`, higher layers) is built on top of them.

use crate::error::{Error, Result};
use crate::page::{PageId, PageMetadata, PAGE_SIZE};
use crate::tx::{DirtyRun, Transaction};
use crate::{bitmap, metadata};

/// A read-only view of a page (or, for an overflow run, the whole run).
pub struct PageView<'a> {
    pub page_num: PageId,
    pub bytes: &'a [u8],
    pub overflow_size: u32,
}

/// A writable view of a page (or overflow run), backed by the transaction's
/// dirty set.
pub struct PageViewMut<'a> {
    pub page_num: PageId,
    pub bytes: &'a mut [u8],
    pub overflow_size: u32,
}

impl<'p> Transaction<'p> {
    fn validate_page_num(&self, page_num: PageId) -> Result<()> {
        if page_num >= self.pager.header().number_of_pages {
            return Err(Error::InvalidArgument {
                reason: format!(
                    "page {page_num} out of range (file has {} pages)",
                    self.pager.header().number_of_pages
                ),
            });
        }
        Ok(())
    }

    fn run_bytes(&self, run_start: PageId) -> Option<(&[u8], u64)> {
        self.dirty
            .get(&run_start)
            .map(|run: &DirtyRun| (run.buf.as_slice(), run.page_count))
    }

    /// Reads `page_num`'s metadata record, consulting the dirty set first
    /// (spec §4.C: a non-modifying lookup, never recurses into `modify_page`).
    pub fn get_page_metadata(&self, page_num: PageId) -> Result<PageMetadata> {
        let header = self.pager.header();
        let loc = metadata::locate(
            header.number_of_pages,
            page_num,
            header.pages_per_metadata_section,
        );
        let offset = metadata::byte_offset_in_page(loc.index_in_page);

        let record_bytes: [u8; 16] = if let Some(&run_start) = self.page_to_run.get(&loc.metadata_page) {
            let (buf, _) = self.run_bytes(run_start).expect("page_to_run entry must have a dirty run");
            let page_offset = ((loc.metadata_page - run_start) as usize) * PAGE_SIZE;
            buf[page_offset + offset..page_offset + offset + 16]
                .try_into()
                .unwrap()
        } else {
            let base = self.pager.mapping_slice();
            let page_offset = loc.metadata_page as usize * PAGE_SIZE;
            base[page_offset + offset..page_offset + offset + 16]
                .try_into()
                .unwrap()
        };

        PageMetadata::from_bytes(&record_bytes).ok_or_else(|| Error::Corrupted {
            context: "page_metadata record",
            details: format!("page {page_num} has unknown metadata flag bits"),
        })
    }

    /// Writes `record` as `page_num`'s metadata, dirtying the owning
    /// metadata page via `modify_page` (a single, non-overflow page).
    pub fn set_page_metadata(&mut self, page_num: PageId, record: PageMetadata) -> Result<()> {
        self.require_writable()?;
        let header = self.pager.header();
        let loc = metadata::locate(
            header.number_of_pages,
            page_num,
            header.pages_per_metadata_section,
        );
        let offset = metadata::byte_offset_in_page(loc.index_in_page);
        let view = self.modify_page(loc.metadata_page)?;
        record.write_into(view.bytes, offset);
        Ok(())
    }

    /// Returns a read-only view of `page_num`: its dirty copy if one exists
    /// in this transaction, otherwise the mapping (spec §4.C).
    pub fn get_page(&self, page_num: PageId) -> Result<PageView<'_>> {
        self.validate_page_num(page_num)?;
        let meta = self.get_page_metadata(page_num)?;
        let page_count = run_page_count(&meta);

        if let Some(&run_start) = self.page_to_run.get(&page_num) {
            let (buf, _) = self.run_bytes(run_start).expect("dirty run must exist");
            let start = ((page_num - run_start) as usize) * PAGE_SIZE;
            let end = start + (page_count as usize) * PAGE_SIZE;
            return Ok(PageView {
                page_num,
                bytes: &buf[start..end.min(buf.len())],
                overflow_size: meta.overflow_size,
            });
        }

        let base = self.pager.mapping_slice();
        let start = page_num as usize * PAGE_SIZE;
        let end = start + (page_count as usize) * PAGE_SIZE;
        Ok(PageView {
            page_num,
            bytes: &base[start..end],
            overflow_size: meta.overflow_size,
        })
    }

    /// Pins a writable copy of `page_num` (or, for an overflow-first page,
    /// its whole run) in this transaction's dirty set (spec §4.C).
    ///
    /// Calling this twice for the same page within one transaction returns a
    /// view over the same buffer both times.
    pub fn modify_page(&mut self, page_num: PageId) -> Result<PageViewMut<'_>> {
        self.require_writable()?;
        self.validate_page_num(page_num)?;

        if !self.page_to_run.contains_key(&page_num) {
            let meta = self.get_page_metadata(page_num)?;
            if meta.flags & crate::page::flags::OVERFLOW_REST != 0 {
                return Err(Error::InvalidState {
                    page: Some(page_num),
                    reason: "modify_page must be called on the first page of an overflow run"
                        .to_string(),
                });
            }
            let page_count = run_page_count(&meta);
            let run_len = (page_count as usize) * PAGE_SIZE;

            let base = self.pager.mapping_slice();
            let start = page_num as usize * PAGE_SIZE;
            let buf = base[start..start + run_len].to_vec();

            self.dirty.insert(
                page_num,
                DirtyRun {
                    buf,
                    page_count,
                },
            );
            for i in 0..page_count {
                self.page_to_run.insert(page_num + i, page_num);
            }
        }

        let run_start = self.page_to_run[&page_num];
        let meta = self.get_page_metadata(page_num)?;

        let offset_pages = page_num - run_start;
        let run = self.dirty.get_mut(&run_start).expect("dirty run must exist");
        let start = (offset_pages as usize) * PAGE_SIZE;
        // Mirror get_page: an overflow_first page's view spans the whole run,
        // not just its own 8192 bytes.
        let page_count = run_page_count(&meta) as usize;
        let end = (start + page_count * PAGE_SIZE).min(run.buf.len());

        Ok(PageViewMut {
            page_num,
            bytes: &mut run.buf[start..end],
            overflow_size: meta.overflow_size,
        })
    }
}

fn run_page_count(meta: &PageMetadata) -> u64 {
    if meta.flags & crate::page::flags::OVERFLOW_FIRST != 0 {
        crate::page::pages_for_bytes(meta.overflow_size as u64).max(1)
    } else {
        1
    }
}

/// Reads bit `bit` of the on-disk free-space bitmap through `txn`.
pub(crate) fn get_bitmap_bit(txn: &Transaction<'_>, bit: u64) -> Result<bool> {
    let (page, local_bit) = bitmap_page_and_offset(bit);
    let view = txn.get_page(page)?;
    Ok(bitmap::get_bit(view.bytes, local_bit))
}

/// Sets or clears bit `bit` of the on-disk free-space bitmap through `txn`.
pub(crate) fn set_bitmap_bit(txn: &mut Transaction<'_>, bit: u64, set: bool) -> Result<()> {
    let (page, local_bit) = bitmap_page_and_offset(bit);
    let view = txn.modify_page(page)?;
    if set {
        bitmap::set_bit(view.bytes, local_bit);
    } else {
        bitmap::clear_bit(view.bytes, local_bit);
    }
    Ok(())
}

/// Materializes the whole free-space bitmap as a flat byte buffer, reading
/// each bitmap page through `txn` (so in-flight dirty bitmap pages are seen).
pub(crate) fn read_bitmap_bytes(txn: &Transaction<'_>, bitmap_page_count: u64) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity((bitmap_page_count as usize) * PAGE_SIZE);
    for i in 0..bitmap_page_count {
        let view = txn.get_page(1 + i)?;
        out.extend_from_slice(view.bytes);
    }
    Ok(out)
}

/// Maps an absolute bit index to `(bitmap_page, bit_index_within_that_page)`.
fn bitmap_page_and_offset(bit: u64) -> (PageId, u64) {
    const BITS_PER_PAGE: u64 = (PAGE_SIZE as u64) * 8;
    let page = 1 + bit / BITS_PER_PAGE;
    let local_bit = bit % BITS_PER_PAGE;
    (page, local_bit)
}
