//! Summary: The file header (page 0): encode, decode, validate (spec §4.G, §6).
//! Copyright (c) YOAB. All rights reserved.
//!
//! Unlike the teacher's double meta-page scheme, this format has exactly one
//! header page: the pager's transactional commit protocol (§4.F) makes a
//! second copy unnecessary, since a torn write to page 0 can only happen
//! during `Pager::create`, before any data exists.

use crc32fast::Hasher;

use crate::error::{Error, Result};
use crate::page::PAGE_SIZE;

/// Magic bytes identifying a pager file.
pub const MAGIC: [u8; 8] = *b"THNDRPGR";

/// On-disk format version understood by this build.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed size of the encoded header, before zero padding to `PAGE_SIZE`.
const HEADER_PAYLOAD_SIZE: usize = 8 + 4 + 4 + 8 + 8 + 4 + 4;

/// Header stored in page 0.
///
/// Layout (little-endian):
/// ```text
/// [0..8)   magic
/// [8..12)  version: u32
/// [12..16) page_size: u32
/// [16..24) number_of_pages: u64
/// [24..32) pages_per_metadata_section: u64
/// [32..36) flags: u32
/// [36..40) header_crc32: u32 (over bytes [0..36))
/// [40..PAGE_SIZE) reserved, zero
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub page_size: u32,
    pub number_of_pages: u64,
    pub pages_per_metadata_section: u64,
    pub flags: u32,
}

impl Header {
    /// Builds a fresh header for a newly created database file.
    pub fn new(number_of_pages: u64, pages_per_metadata_section: u64) -> Self {
        Self {
            version: FORMAT_VERSION,
            page_size: PAGE_SIZE as u32,
            number_of_pages,
            pages_per_metadata_section,
            flags: 0,
        }
    }

    /// Serializes the header into a full `PAGE_SIZE`-byte page.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&self.version.to_le_bytes());
        buf[12..16].copy_from_slice(&self.page_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.number_of_pages.to_le_bytes());
        buf[24..32].copy_from_slice(&self.pages_per_metadata_section.to_le_bytes());
        buf[32..36].copy_from_slice(&self.flags.to_le_bytes());

        let crc = crc32(&buf[0..36]);
        buf[36..40].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses and validates a header page, rejecting anything that does not
    /// describe a pager file this build can open (spec §7: `Corrupted`).
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_PAYLOAD_SIZE + 4 {
            return Err(Error::Corrupted {
                context: "header",
                details: format!("page too short: {} bytes", buf.len()),
            });
        }

        let magic: [u8; 8] = buf[0..8].try_into().unwrap();
        if magic != MAGIC {
            return Err(Error::Corrupted {
                context: "header magic",
                details: "magic bytes do not match".to_string(),
            });
        }

        let header_crc32 = u32::from_le_bytes(buf[36..40].try_into().unwrap());
        let computed = crc32(&buf[0..36]);
        if computed != header_crc32 {
            return Err(Error::Corrupted {
                context: "header checksum",
                details: format!("expected {header_crc32:#x}, computed {computed:#x}"),
            });
        }

        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::Corrupted {
                context: "header version",
                details: format!("unsupported version {version}"),
            });
        }

        let page_size = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        if page_size as usize != PAGE_SIZE {
            return Err(Error::Corrupted {
                context: "header page_size",
                details: format!("expected {PAGE_SIZE}, got {page_size}"),
            });
        }

        let number_of_pages = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let pages_per_metadata_section = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        if pages_per_metadata_section == 0 {
            return Err(Error::Corrupted {
                context: "header pages_per_metadata_section",
                details: "must be nonzero".to_string(),
            });
        }
        let flags = u32::from_le_bytes(buf[32..36].try_into().unwrap());

        Ok(Self {
            version,
            page_size,
            number_of_pages,
            pages_per_metadata_section,
            flags,
        })
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
