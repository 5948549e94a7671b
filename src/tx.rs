//! Summary: The transactional envelope over a `Pager` (spec §4.F).
//! Copyright (c) YOAB. All rights reserved.
//!
//! Unlike the teacher's split `ReadTx`/`WriteTx` types (built around an
//! in-memory B+ tree), a `Transaction` here is a single type parameterised
//! by a read/write flag: both kinds share the same page-granularity dirty
//! set and differ only in whether mutating methods are permitted.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::page::PageId;
use crate::pager::Pager;

/// One dirty, in-memory copy of a contiguous page run, keyed by the run's
/// first page number. Overflow runs are copied and returned as a single
/// contiguous buffer (spec §4.C: "the dirty entry represents the whole run").
pub(crate) struct DirtyRun {
    pub(crate) buf: Vec<u8>,
    pub(crate) page_count: u64,
}

/// A read or write transaction against a [`Pager`].
///
/// Reads never allocate. The first `modify_page`/`allocate_page`/`free_page`
/// call takes a private copy of the affected page(s); subsequent reads and
/// writes within the same transaction observe that copy.
pub struct Transaction<'p> {
    pub(crate) pager: &'p Pager,
    pub(crate) writable: bool,
    pub(crate) dirty: HashMap<PageId, DirtyRun>,
    /// Maps every page covered by a dirty run to that run's first page.
    pub(crate) page_to_run: HashMap<PageId, PageId>,
    /// Held only by writing transactions, enforcing the single-writer rule
    /// for the lifetime of this value (spec §5).
    _writer_guard: Option<std::sync::MutexGuard<'p, ()>>,
}

impl<'p> Transaction<'p> {
    pub(crate) fn new_reading(pager: &'p Pager) -> Self {
        Self {
            pager,
            writable: false,
            dirty: HashMap::new(),
            page_to_run: HashMap::new(),
            _writer_guard: None,
        }
    }

    pub(crate) fn new_writing(pager: &'p Pager, guard: std::sync::MutexGuard<'p, ()>) -> Self {
        Self {
            pager,
            writable: true,
            dirty: HashMap::new(),
            page_to_run: HashMap::new(),
            _writer_guard: Some(guard),
        }
    }

    /// Whether this transaction may call `modify_page`/`allocate_page`/`free_page`.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn require_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(Error::InvalidState {
                page: None,
                reason: "operation requires a writing transaction".to_string(),
            });
        }
        Ok(())
    }

    /// Commits all dirty pages: writes each to its byte offset, then issues a
    /// single durability barrier over the data file (spec §4.F).
    ///
    /// On any I/O failure the pager is marked poisoned (spec §9) and the
    /// transaction is considered aborted; no partial visibility is promised.
    pub fn commit(self) -> Result<()> {
        self.require_writable()?;
        self.pager.commit_dirty_pages(&self.dirty)?;
        Ok(())
    }

    /// Explicitly closes the transaction, discarding any uncommitted changes.
    /// Equivalent to dropping it.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        // An uncommitted writing transaction's dirty set is simply discarded;
        // nothing durable was ever touched.
    }
}
