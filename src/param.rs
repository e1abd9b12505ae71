//! Geometry of the on-disk log and the object schema.

use static_assertions::const_assert_eq;

/// Block size.
pub const BSIZE: usize = 4096;

/// Space in header block 1 for the end position.
pub const HDRMETA: usize = 8;

/// Number of data-slot addresses that fit in header block 1.
pub const HDRADDRS: usize = (BSIZE - HDRMETA) / 8;

/// Max data slots in the circular log, and the largest batch one
/// append accepts.
pub const LOG_SZ: usize = HDRADDRS;

/// Block number of header block 1 (end position + slot addresses).
pub const LOGHDR: u64 = 0;

/// Block number of header block 2 (start position).
pub const LOGHDR2: u64 = 1;

/// Block number of the first data slot.
pub const LOGSTART: u64 = 2;

/// First block available to data; everything below is the log region.
pub const LOGDISKBLOCKS: u64 = HDRADDRS as u64 + 2;

/// Bits per block.
pub const NBITBLOCK: u64 = BSIZE as u64 * 8;

/// On-disk size of an inode record, the canonical byte-aligned object.
pub const INODESZ: u64 = 128;

const_assert_eq!(LOG_SZ, 511);
const_assert_eq!(LOGDISKBLOCKS, 513);
