//! A block replicated across two adjacent disk blocks.
//!
//! The pair is kept in sync by writing both copies in one transaction,
//! so a torn pair is impossible; readers only ever consult the primary.
//! A worked example of a client of the transaction layer.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::addr::{Addr, Bnum};
use crate::param::{BSIZE, NBITBLOCK};
use crate::txn::TxnMgr;
use crate::wal::CommitError;

pub struct RepBlock {
    mgr: Arc<TxnMgr>,
    /// Serializes readers and writers of this pair.
    m: Mutex<()>,
    primary: Addr,
    backup: Addr,
}

impl RepBlock {
    /// Takes ownership of blocks `blkno` and `blkno + 1`.
    pub fn new(mgr: Arc<TxnMgr>, blkno: Bnum) -> RepBlock {
        RepBlock {
            mgr,
            m: Mutex::new(()),
            primary: Addr::new(blkno, 0),
            backup: Addr::new(blkno + 1, 0),
        }
    }

    /// Reads the block's current contents.
    ///
    /// Can fail in principle only if the read-only commit fails, which
    /// an empty transaction never does.
    pub fn read(&self) -> Result<Vec<u8>, CommitError> {
        let _guard = self.m.lock();
        let mut tx = self.mgr.begin();
        let data = tx.read_buf(self.primary, NBITBLOCK);
        tx.commit(true)?;
        Ok(data)
    }

    /// Durably writes both copies of the block.
    pub fn write(&self, data: &[u8]) -> Result<(), CommitError> {
        assert_eq!(data.len(), BSIZE, "rep block writes are whole blocks");
        let _guard = self.m.lock();
        let mut tx = self.mgr.begin();
        tx.over_write(self.primary, NBITBLOCK, data);
        tx.over_write(self.backup, NBITBLOCK, data);
        tx.commit(true)
    }
}
