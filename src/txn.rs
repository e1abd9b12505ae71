//! Two-phase-locking transactions.
//!
//! A transaction buffers its reads and writes locally and acquires the
//! lock of every address it touches, holding all of them until commit.
//! Writes become visible atomically at commit; reads are cached on
//! first load, which is consistent exactly because the address was
//! locked first. Aborting is simply dropping the transaction: its
//! buffered writes vanish and its locks are released.
//!
//! The layer provides the locking mechanism but no ordering policy:
//! callers that acquire several addresses must order their acquisitions
//! consistently to avoid deadlock.

use std::sync::Arc;
use tracing::trace;

use crate::addr::Addr;
use crate::buf::{Buf, BufMap};
use crate::disk::Disk;
use crate::lock::LockMap;
use crate::obj;
use crate::wal::CommitError;

/// The shared transaction manager: the object-layer log plus the global
/// address lock map.
pub struct TxnMgr {
    log: obj::Log,
    locks: LockMap,
}

impl TxnMgr {
    /// Recovers the journal on `disk` and prepares a lock map for its
    /// clients.
    pub fn new(disk: Arc<dyn Disk>) -> Arc<TxnMgr> {
        Arc::new(TxnMgr {
            log: obj::Log::new(disk),
            locks: LockMap::new(),
        })
    }

    /// Begins a transaction holding no locks.
    pub fn begin(self: &Arc<Self>) -> Txn {
        Txn {
            mgr: Arc::clone(self),
            bufs: BufMap::new(),
            acquired: Vec::new(),
        }
    }

    /// Makes every commit so far durable, including `wait = false`
    /// commits.
    pub fn flush(&self) {
        self.log.flush();
    }

    /// The largest commit the log accepts, in blocks.
    pub fn log_sz(&self) -> usize {
        self.log.log_sz()
    }

    pub fn shutdown(&self) {
        self.log.shutdown();
    }
}

/// An in-progress transaction.
///
/// Call [`Txn::commit`] to persist its writes, or drop it to abort.
pub struct Txn {
    mgr: Arc<TxnMgr>,
    /// Objects read or written so far.
    bufs: BufMap,
    /// Flat addresses locked so far, deduplicated.
    acquired: Vec<u64>,
}

impl Txn {
    /// Locks `addr` for this transaction. Idempotent; the lock is held
    /// until commit or drop.
    pub fn acquire(&mut self, addr: Addr) {
        let flat = addr.flat_id();
        if !self.acquired.contains(&flat) {
            self.mgr.locks.acquire(flat);
            self.acquired.push(flat);
        }
    }

    /// Reads the `sz`-bit object at `addr`, locking it first.
    ///
    /// Returns a copy of the object's bytes: callers can hold onto the
    /// result without aliasing the transaction's own buffer.
    pub fn read_buf(&mut self, addr: Addr, sz: u64) -> Vec<u8> {
        self.acquire(addr);
        if self.bufs.lookup(addr).is_none() {
            let b = self.mgr.log.load(addr, sz);
            self.bufs.insert(b);
        }
        let b = self.bufs.lookup(addr).expect("buffered just above");
        assert_eq!(b.sz, sz, "object at {:?} used with two sizes", addr);
        b.data.clone()
    }

    /// Overwrites the `sz`-bit object at `addr` without reading it.
    pub fn over_write(&mut self, addr: Addr, sz: u64, data: &[u8]) {
        assert_eq!(data.len() as u64, (sz + 7) / 8, "over_write data does not match its size");
        self.acquire(addr);
        trace!(blkno = addr.blkno, off = addr.off, sz, "over_write");
        if self.bufs.lookup(addr).is_some() {
            let b = self.bufs.lookup_mut(addr).expect("probed just above");
            assert_eq!(b.sz, sz, "object at {:?} used with two sizes", addr);
            b.data.clear();
            b.data.extend_from_slice(data);
            b.set_dirty();
        } else {
            let mut b = Buf::new(addr, sz, data.to_vec());
            b.set_dirty();
            self.bufs.insert(b);
        }
    }

    /// Reads the bitmap bit at `addr`.
    pub fn read_bit(&mut self, addr: Addr) -> bool {
        let byte = self.read_buf(addr, 1)[0];
        (byte >> (addr.off % 8)) & 1 == 1
    }

    /// Overwrites the bitmap bit at `addr`.
    pub fn over_write_bit(&mut self, addr: Addr, bit: bool) {
        let mut data = [0u8];
        if bit {
            data[0] = 1 << (addr.off % 8);
        }
        self.over_write(addr, 1, &data);
    }

    /// Releases `addr` before commit, forgetting its buffered object.
    ///
    /// For clients like the allocator that probe many addresses and
    /// keep almost none of them. Early release gives up strict
    /// two-phase locking for `addr`: the caller must not rely on the
    /// released object's value afterwards.
    pub fn release(&mut self, addr: Addr) {
        self.bufs.del(addr);
        let flat = addr.flat_id();
        if let Some(i) = self.acquired.iter().position(|&a| a == flat) {
            let _ = self.acquired.swap_remove(i);
            self.mgr.locks.release(flat);
        }
    }

    /// Upper bound on the size of this transaction when committed, in
    /// blocks. Callers use it to stay under [`TxnMgr::log_sz`].
    pub fn ndirty(&self) -> u64 {
        self.bufs.ndirty()
    }

    fn release_all(&mut self) {
        while let Some(flat) = self.acquired.pop() {
            self.mgr.locks.release(flat);
        }
    }

    /// Commits the buffered writes as one atomic group and releases
    /// every acquired lock.
    ///
    /// With `wait` the commit is durable on return; without it the
    /// commit is visible atomically but may be lost on crash until
    /// [`TxnMgr::flush`]. On `Err` the transaction had no effect (its
    /// locks are still released).
    pub fn commit(mut self, wait: bool) -> Result<(), CommitError> {
        let dirty = self.bufs.take_dirty();
        let res = self.mgr.log.commit_wait(&dirty, wait);
        self.release_all();
        res
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        // Abort path: buffered writes vanish, locks are returned.
        self.release_all();
    }
}
