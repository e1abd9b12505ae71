//! The object layer: atomically installs objects from modified buffers
//! into their containing disk blocks and appends the blocks to the
//! write-ahead log. The layers above are responsible for locking and
//! lock ordering.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::addr::{Addr, Bnum};
use crate::buf::Buf;
use crate::disk::{zero_block, Block, Disk};
use crate::param::NBITBLOCK;
use crate::wal::{CommitError, LogPosition, Update, Walog};

/// Mediates access to object loading and installation. There is one
/// `Log` per disk.
pub struct Log {
    wal: Walog,
    /// Serializes commits and remembers the highest un-flushed
    /// position.
    commit: Mutex<LogPosition>,
}

impl Log {
    /// Recovers the object logging system (or initializes from an
    /// all-zero disk).
    pub fn new(disk: Arc<dyn Disk>) -> Log {
        Log {
            wal: Walog::new(disk),
            commit: Mutex::new(0),
        }
    }

    /// Reads the disk object at `addr` into a fresh buf of `sz` bits.
    pub fn load(&self, addr: Addr, sz: u64) -> Buf {
        let blk = self.wal.read(addr.blkno);
        Buf::new_load(addr, sz, &blk)
    }

    /// Installs `bufs` into their containing blocks. A buf may update a
    /// block only partially and several bufs may share one block, so
    /// partial blocks are read through the WAL before merging.
    fn install_bufs(&self, bufs: &[Buf]) -> Vec<Update> {
        let mut blks: BTreeMap<Bnum, Block> = BTreeMap::new();
        for b in bufs {
            if b.sz == NBITBLOCK {
                let mut blk = zero_block();
                blk.copy_from_slice(&b.data);
                let _ = blks.insert(b.addr.blkno, blk);
            } else {
                let blk = blks
                    .entry(b.addr.blkno)
                    .or_insert_with(|| self.wal.read(b.addr.blkno));
                b.install(blk);
            }
        }
        blks.into_iter()
            .map(|(addr, block)| Update::new(addr, block))
            .collect()
    }

    fn do_commit(&self, bufs: &[Buf]) -> Result<LogPosition, CommitError> {
        let mut highest = self.commit.lock();
        let updates = self.install_bufs(bufs);
        debug!(nbufs = bufs.len(), nblocks = updates.len(), "committing");
        let pos = self.wal.mem_append(updates)?;
        *highest = pos;
        Ok(pos)
    }

    /// Commits the dirty bufs of one operation atomically.
    ///
    /// With `wait` the commit is durable when this returns; without it
    /// the commit is visible to other threads but may be lost on crash
    /// until a later [`Log::flush`]. On `Err` the operation had no
    /// effect.
    pub fn commit_wait(&self, bufs: &[Buf], wait: bool) -> Result<(), CommitError> {
        if bufs.is_empty() {
            trace!("commit of a read-only operation");
            return Ok(());
        }
        let pos = self.do_commit(bufs)?;
        if wait {
            self.wal.flush(pos);
        }
        Ok(())
    }

    /// Flushes every commit made so far.
    pub fn flush(&self) {
        let pos = *self.commit.lock();
        self.wal.flush(pos);
    }

    /// The largest commit the log accepts, in blocks.
    pub fn log_sz(&self) -> usize {
        self.wal.log_sz()
    }

    pub fn shutdown(&self) {
        self.wal.shutdown();
    }
}
