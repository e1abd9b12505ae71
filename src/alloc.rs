//! A bitmap allocator for disk numbers.
//!
//! The allocator hands out numbers backed by a bitmap region of the
//! disk, one bit per number. Allocation and free run inside a caller's
//! transaction, so an allocation commits (or aborts) atomically with
//! the writes that use the allocated number: crash either way and the
//! bitmap stays consistent with its users.
//!
//! Number 0 is reserved and never handed out, so callers can use it as
//! a null value.

use parking_lot::Mutex;

use crate::addr::{Addr, Bnum};
use crate::param::NBITBLOCK;
use crate::txn::Txn;

/// Allocates numbers from the bitmap stored in blocks
/// `[start, start + len)`.
pub struct Alloc {
    start: Bnum,
    len: u64,
    /// First number to try next, for rotating allocation.
    next: Mutex<u64>,
}

impl Alloc {
    pub fn new(start: Bnum, len: u64) -> Alloc {
        Alloc {
            start,
            len,
            next: Mutex::new(0),
        }
    }

    /// Total numbers the bitmap covers.
    pub fn max(&self) -> u64 {
        self.len * NBITBLOCK
    }

    fn bit_addr(&self, n: u64) -> Addr {
        Addr::new_bit(self.start, n)
    }

    fn inc_next(&self) -> u64 {
        let mut next = self.next.lock();
        *next += 1;
        if *next >= self.max() {
            *next = 0;
        }
        *next
    }

    /// Allocates a free number within `tx`, or `None` if the bitmap is
    /// full.
    ///
    /// The found bit's address stays locked by `tx`, so the number is
    /// not visible to other allocators until the transaction commits;
    /// probed bits that turn out to be used are released right away.
    pub fn alloc_num(&self, tx: &mut Txn) -> Option<u64> {
        let first = self.inc_next();
        let mut num = first;
        loop {
            if num != 0 {
                let addr = self.bit_addr(num);
                if !tx.read_bit(addr) {
                    tx.over_write_bit(addr, true);
                    return Some(num);
                }
                tx.release(addr);
            }
            num = self.inc_next();
            if num == first {
                return None;
            }
        }
    }

    /// Frees `num` within `tx`.
    pub fn free_num(&self, tx: &mut Txn, num: u64) {
        assert!(num != 0, "freeing the reserved number 0");
        assert!(num < self.max(), "freeing a number outside the bitmap");
        tx.over_write_bit(self.bit_addr(num), false);
    }
}
