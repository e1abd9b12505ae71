//! Write-ahead logging.
//!
//! The log of updates spans four regions:
//!
//! ```text
//! [ installed | logged on disk | frozen, being logged | mutable tail ]
//!  ^           ^                ^                      ^
//!  (home)      start            disk_end               mutable
//! ```
//!
//! Clients append whole-block updates to the mutable tail, where later
//! writes to the same block absorb into the existing entry. The logger
//! thread persists frozen entries to the circular on-disk log, making
//! them crash-durable; the installer thread then writes them to their
//! home blocks and reclaims log space. Updates in the mutable tail can
//! be lost on crash; freezing is postponed (until a flush or a full
//! log) to maximize the chance of absorption.

mod circular;
mod installer;
mod logger;
mod sliding;

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::debug;

use self::circular::CircularAppender;
use self::sliding::Sliding;
use crate::addr::Bnum;
use crate::disk::{Block, Disk};
use crate::lock::WaitChannel;
use crate::param::{LOGDISKBLOCKS, LOG_SZ};
use crate::util::sum_overflows;

/// Monotone count of log entries since format time; indexes the
/// circular log modulo `LOG_SZ`.
pub type LogPosition = u64;

/// A whole-block write destined for a single disk block.
#[derive(Clone)]
pub struct Update {
    pub addr: Bnum,
    pub block: Block,
}

impl Update {
    pub fn new(addr: Bnum, block: Block) -> Update {
        Update { addr, block }
    }
}

/// Why an append was rejected. A rejected append leaves the log
/// byte-identical to its pre-call state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("operation of {0} blocks is larger than the log")]
    TooBig(usize),
    #[error("log position counter would overflow")]
    PositionOverflow,
}

struct WalState {
    mem_log: Sliding,
    /// Highest logical position durable in the on-disk log.
    disk_end: LogPosition,
    shutdown: bool,
    nthread: u64,
}

struct WalShared {
    disk: Arc<dyn Disk>,
    mem: Mutex<WalState>,
    /// Predicates: new frozen updates for the logger; `disk_end`
    /// advanced for `flush` and `mem_append`.
    cond_logger: WaitChannel,
    /// Predicates: newly logged updates for the installer; window
    /// shrunk for the logger.
    cond_install: WaitChannel,
    /// Predicate: `nthread == 0`.
    cond_shut: WaitChannel,
}

/// The write-ahead log: a circular on-disk region plus the in-memory
/// sliding window, serviced by the logger and installer threads.
pub struct Walog {
    shared: Arc<WalShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Walog {
    /// Recovers the log on `disk` (an all-zero region recovers as an
    /// empty log) and launches the background threads.
    pub fn new(disk: Arc<dyn Disk>) -> Walog {
        let (circ, start, end, updates) = CircularAppender::recover(disk.as_ref());
        debug!(start, end, "recovered write-ahead log");

        let shared = Arc::new(WalShared {
            disk,
            mem: Mutex::new(WalState {
                mem_log: Sliding::new(updates, start),
                disk_end: end,
                shutdown: false,
                nthread: 0,
            }),
            cond_logger: WaitChannel::new(),
            cond_install: WaitChannel::new(),
            cond_shut: WaitChannel::new(),
        });

        let logger = thread::Builder::new()
            .name("wal-logger".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || logger::run(&shared, circ)
            })
            .expect("spawning the logger thread");
        let installer = thread::Builder::new()
            .name("wal-installer".into())
            .spawn({
                let shared = Arc::clone(&shared);
                move || installer::run(&shared)
            })
            .expect("spawning the installer thread");

        Walog {
            shared,
            threads: Mutex::new(vec![logger, installer]),
        }
    }

    /// The largest batch one append accepts.
    pub fn log_sz(&self) -> usize {
        LOG_SZ
    }

    /// Appends `bufs` to the in-memory log as one atomic group.
    ///
    /// On success returns the new end position, which `flush` accepts.
    /// Blocks while the log is too full to take the batch. On `Err` the
    /// log is unchanged and the append had no effect.
    pub fn mem_append(&self, bufs: Vec<Update>) -> Result<LogPosition, CommitError> {
        if bufs.len() > LOG_SZ {
            return Err(CommitError::TooBig(bufs.len()));
        }
        for u in &bufs {
            assert!(
                u.addr >= LOGDISKBLOCKS,
                "data write into the log region: block {}",
                u.addr
            );
        }

        let shared = &self.shared;
        let mut st = shared.mem.lock();
        loop {
            if sum_overflows(st.mem_log.end(), bufs.len() as u64) {
                return Err(CommitError::PositionOverflow);
            }
            let mem_size = st.mem_log.end() - st.disk_end;
            if mem_size + bufs.len() as u64 > LOG_SZ as u64 {
                // Freeze everything and wait for the logger to drain.
                debug!(mem_size, n = bufs.len(), "log full; forcing group commit");
                st.mem_log.need_flush = true;
                shared.cond_logger.wakeup();
                shared.cond_logger.sleep(&mut st);
                continue;
            }
            st.mem_log.mem_write(bufs);
            let pos = st.mem_log.end();
            shared.cond_logger.wakeup();
            return Ok(pos);
        }
    }

    /// Waits until every append at or before `pos` is durable in the
    /// on-disk log: after `flush` returns, those appends survive any
    /// crash.
    pub fn flush(&self, pos: LogPosition) {
        let shared = &self.shared;
        let mut st = shared.mem.lock();
        if pos > st.disk_end {
            st.mem_log.need_flush = true;
            shared.cond_logger.wakeup();
        }
        while st.disk_end < pos {
            shared.cond_logger.sleep(&mut st);
        }
    }

    /// A copy of the latest in-memory update for `blkno`, if any.
    pub fn read_mem(&self, blkno: Bnum) -> Option<Block> {
        self.shared.mem.lock().mem_log.read(blkno)
    }

    /// Reads `blkno`'s home location, bypassing the in-memory log.
    pub fn read_installed(&self, blkno: Bnum) -> Block {
        self.shared.disk.read(blkno)
    }

    /// Reads `blkno`, preferring the in-memory log over the home
    /// location.
    pub fn read(&self, blkno: Bnum) -> Block {
        self.read_mem(blkno)
            .unwrap_or_else(|| self.read_installed(blkno))
    }

    /// Stops the logger and installer and waits for both to exit.
    /// Frozen updates they have not reached are lost, as a crash would
    /// lose them; flushed appends are already durable.
    pub fn shutdown(&self) {
        {
            let shared = &self.shared;
            let mut st = shared.mem.lock();
            if !st.shutdown {
                debug!("shutting down write-ahead log");
                st.shutdown = true;
                shared.cond_logger.wakeup();
                shared.cond_install.wakeup();
            }
            while st.nthread > 0 {
                shared.cond_shut.sleep(&mut st);
            }
        }
        for h in self.threads.lock().drain(..) {
            let _ = h.join();
        }
    }
}

impl Drop for Walog {
    fn drop(&mut self) {
        self.shutdown();
    }
}
