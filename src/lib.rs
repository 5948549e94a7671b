//! Summary: Pager core for an embeddable, ACID-oriented storage engine.
//! Copyright (c) YOAB. All rights reserved.
//!
//! Turns a single data file into an addressable, transactional space of
//! fixed-size 8 KiB pages: allocation and freeing (including multi-page
//! "overflow" runs), per-page metadata, a mmap-based read path, and the
//! transactional envelope (begin / modify / commit / close) higher layers
//! build on top of.
//!
//! ```no_run
//! use thunderpager::{Pager, PagerConfig};
//!
//! let pager = Pager::open("example.db", PagerConfig::default())?;
//! let mut txn = pager.begin(true)?;
//! let page_num = txn.allocate_page(0, 0)?;
//! {
//!     let view = txn.modify_page(page_num)?;
//!     view.bytes[0] = 42;
//! }
//! txn.commit()?;
//! # Ok::<(), thunderpager::Error>(())
//! ```

mod bitmap;
mod error;
mod freespace;
mod header;
mod metadata;
mod page;
mod pager;
mod pageio;
mod platform;
mod tx;

pub use error::{Error, Result};
pub use page::{PageId, PAGE_SIZE};
pub use pager::{Pager, PagerConfig};
pub use pageio::{PageView, PageViewMut};
pub use tx::Transaction;
