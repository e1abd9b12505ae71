//! Block devices.
//!
//! The journal drives any device that can read and write whole blocks
//! and promise durability at a barrier. Runtime I/O failure is fatal:
//! the crash-safety argument assumes the device honors the barrier
//! contract, so implementations panic instead of surfacing errors the
//! layers above could not meaningfully handle.

mod file;
mod mem;

pub use file::FileDisk;
pub use mem::MemDisk;

use crate::addr::Bnum;
use crate::param::BSIZE;

/// A fixed-size disk block buffer.
pub type Block = Box<[u8; BSIZE]>;

/// Returns an all-zero block.
pub fn zero_block() -> Block {
    Box::new([0; BSIZE])
}

/// A logical block-addressed disk.
pub trait Disk: Send + Sync {
    /// Reads block `bnum`.
    ///
    /// Expects `bnum < size()`.
    fn read(&self, bnum: Bnum) -> Block {
        let mut buf = zero_block();
        self.read_to(bnum, &mut buf);
        buf
    }

    /// Reads block `bnum` into `buf`.
    ///
    /// Expects `bnum < size()`.
    fn read_to(&self, bnum: Bnum, buf: &mut Block);

    /// Writes block `bnum`.
    ///
    /// Expects `bnum < size()`. The write is durable only after a later
    /// `barrier`.
    fn write(&self, bnum: Bnum, data: &Block);

    /// Writes a contiguous run of blocks starting at `start`.
    ///
    /// Equivalent to writing each block in turn; implementations may
    /// reorder within the batch, so callers needing atomicity must
    /// bracket the batch with their own commit protocol.
    fn write_batch(&self, start: Bnum, blocks: &[&Block]) {
        for (i, data) in blocks.iter().enumerate() {
            self.write(start + i as u64, data);
        }
    }

    /// Returns only after all prior writes are durable.
    fn barrier(&self);

    /// How big the disk is, in blocks.
    fn size(&self) -> u64;
}
