//! Summary: `Pager`: open/create, bootstrap, writer mutex, poisoning (spec §4.G).
//! Copyright (c) YOAB. All rights reserved.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::header::Header;
use crate::page::{flags, PageId, PageMetadata, DEFAULT_PAGES_PER_METADATA_SECTION, PAGE_SIZE};
use crate::pageio::set_bitmap_bit;
use crate::platform::{self, MappedFile};
use crate::metadata;
use crate::tx::{DirtyRun, Transaction};

/// Tunables for a [`Pager`] (grounded on the teacher's `CheckpointConfig`/
/// `GroupCommitConfig` pattern: a plain `Clone` config struct with `Default`).
#[derive(Debug, Clone)]
pub struct PagerConfig {
    /// Page size in bytes. Fixed at [`PAGE_SIZE`] for the v1 on-disk format,
    /// threaded through for forward compatibility with future versions.
    pub page_size: usize,
    /// Number of pages covered by one page-metadata section (spec §4.D).
    pub pages_per_metadata_section: u64,
    /// Size, in pages, of a freshly created database file (spec §4.G).
    pub initial_file_size_pages: u64,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            pages_per_metadata_section: DEFAULT_PAGES_PER_METADATA_SECTION,
            initial_file_size_pages: 16,
        }
    }
}

/// An open connection to a pager-format database file.
///
/// Multiple read transactions may run concurrently; at most one write
/// transaction runs at a time, enforced by an exclusive writer mutex
/// (spec §5).
pub struct Pager {
    path: PathBuf,
    file: File,
    mapped: MappedFile,
    header: Header,
    config: PagerConfig,
    writer_mutex: Mutex<()>,
    poisoned: AtomicBool,
}

impl Pager {
    /// Opens the database at `path`, bootstrapping a new file if it doesn't
    /// exist or is empty, otherwise validating the existing header (spec §4.G).
    pub fn open<P: AsRef<Path>>(path: P, config: PagerConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (file, is_new) = platform::open_or_create(&path)?;
        if is_new {
            Self::bootstrap(path, file, config)
        } else {
            Self::load_existing(path, file, config)
        }
    }

    /// Equivalent to [`Pager::open`]; kept as a distinct name for callers
    /// who know in advance they expect a fresh database.
    pub fn create<P: AsRef<Path>>(path: P, config: PagerConfig) -> Result<Self> {
        Self::open(path, config)
    }

    fn bootstrap(path: PathBuf, file: File, config: PagerConfig) -> Result<Self> {
        let initial_len = config.initial_file_size_pages * config.page_size as u64;
        platform::ensure_file_minimum_size(&file, initial_len)?;
        platform::fsync_parent_dir(&path)?;

        let number_of_pages = initial_len / PAGE_SIZE as u64;
        let header = Header::new(number_of_pages, config.pages_per_metadata_section);
        platform::pwrite_all(&file, 0, &header.to_bytes(), "write initial header")?;
        platform::fdatasync(&file, "initial header")?;

        let mapped = MappedFile::new(&file, initial_len as usize)?;

        #[cfg(debug_assertions)]
        eprintln!(
            "[thunderpager] bootstrapped new database at '{}' ({number_of_pages} pages)",
            path.display()
        );

        let pager = Self {
            path,
            file,
            mapped,
            header,
            config,
            writer_mutex: Mutex::new(()),
            poisoned: AtomicBool::new(false),
        };
        pager.bootstrap_pages()?;
        Ok(pager)
    }

    fn load_existing(path: PathBuf, file: File, config: PagerConfig) -> Result<Self> {
        let len = platform::file_len(&file, &path)?;
        if len < PAGE_SIZE as u64 {
            return Err(Error::Corrupted {
                context: "file length",
                details: format!("file is only {len} bytes, smaller than one page"),
            });
        }
        let mapped = MappedFile::new(&file, len as usize)?;
        let header = Header::from_bytes(&mapped.as_slice()[0..PAGE_SIZE])?;

        if header.pages_per_metadata_section != config.pages_per_metadata_section {
            return Err(Error::Corrupted {
                context: "pages_per_metadata_section",
                details: format!(
                    "file uses {}, this build is configured for {}",
                    header.pages_per_metadata_section, config.pages_per_metadata_section
                ),
            });
        }

        Ok(Self {
            path,
            file,
            mapped,
            header,
            config,
            writer_mutex: Mutex::new(()),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Marks the header page, every bitmap page, and every metadata-section
    /// page present in the file as busy, in both the bitmap and the
    /// page-metadata records (spec §4.G step 4).
    fn bootstrap_pages(&self) -> Result<()> {
        let mut txn = self.begin(true)?;

        let structural = PageMetadata {
            overflow_size: 0,
            flags: flags::SINGLE | flags::METADATA,
        };

        txn.set_page_metadata(0, structural)?;
        set_bitmap_bit(&mut txn, 0, true)?;

        let bm_pages = bitmap_page_count(self.header.number_of_pages);
        for i in 0..bm_pages {
            let page = 1 + i;
            txn.set_page_metadata(page, structural)?;
            set_bitmap_bit(&mut txn, page, true)?;
        }

        for range_start in metadata::range_starts(
            self.header.number_of_pages,
            self.header.pages_per_metadata_section,
        ) {
            let loc = metadata::locate(
                self.header.number_of_pages,
                range_start,
                self.header.pages_per_metadata_section,
            );
            let count = metadata::section_page_count(
                self.header.number_of_pages,
                range_start,
                self.header.pages_per_metadata_section,
            );
            for p in loc.metadata_page..loc.metadata_page + count {
                txn.set_page_metadata(p, structural)?;
                set_bitmap_bit(&mut txn, p, true)?;
            }
        }

        txn.commit()
    }

    /// Begins a new transaction. Writing transactions block until any other
    /// writer has committed or dropped (spec §5); a poisoned pager refuses
    /// new writes until reopened.
    pub fn begin(&self, writable: bool) -> Result<Transaction<'_>> {
        if writable {
            if self.is_poisoned() {
                return Err(Error::Poisoned);
            }
            let guard = self
                .writer_mutex
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Ok(Transaction::new_writing(self, guard))
        } else {
            Ok(Transaction::new_reading(self))
        }
    }

    /// Whether a prior commit failed partway through, leaving the file in a
    /// potentially inconsistent state (spec §7, §9). Reopen to clear this.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    pub(crate) fn header(&self) -> &Header {
        &self.header
    }

    /// The configuration this pager was opened with.
    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub(crate) fn mapping_slice(&self) -> &[u8] {
        self.mapped.as_slice()
    }

    pub(crate) fn commit_dirty_pages(&self, dirty: &HashMap<PageId, DirtyRun>) -> Result<()> {
        for (&run_start, run) in dirty {
            let offset = run_start * PAGE_SIZE as u64;
            if let Err(e) = platform::pwrite_all(&self.file, offset, &run.buf, "commit dirty page") {
                self.poisoned.store(true, Ordering::SeqCst);
                #[cfg(debug_assertions)]
                eprintln!(
                    "[thunderpager] pager at '{}' poisoned: write failed mid-commit",
                    self.path.display()
                );
                return Err(e);
            }
        }
        if let Err(e) = platform::fdatasync(&self.file, "commit") {
            self.poisoned.store(true, Ordering::SeqCst);
            #[cfg(debug_assertions)]
            eprintln!(
                "[thunderpager] pager at '{}' poisoned: fdatasync failed mid-commit",
                self.path.display()
            );
            return Err(e);
        }
        Ok(())
    }
}

fn bitmap_page_count(number_of_pages: u64) -> u64 {
    const BITS_PER_PAGE: u64 = (PAGE_SIZE as u64) * 8;
    number_of_pages.div_ceil(BITS_PER_PAGE)
}
