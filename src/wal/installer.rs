//! The installer thread: writes logged updates to their home locations
//! and reclaims log space.

use parking_lot::MutexGuard;
use std::collections::HashMap;
use tracing::{debug, trace};

use super::circular::CircularAppender;
use super::{Update, WalShared, WalState};
use crate::addr::Bnum;
use crate::disk::{Block, Disk};

/// Writes `bufs` to their home blocks.
///
/// Repeated writes to one block are first absorbed so only the latest
/// survives; at every intermediate point a block holds either its old
/// value or its final new value. Consecutive runs of block numbers are
/// coalesced into region writes.
fn install_blocks(d: &dyn Disk, bufs: &[Update]) {
    let mut last: HashMap<Bnum, &Block> = HashMap::new();
    for u in bufs {
        let _ = last.insert(u.addr, &u.block);
    }
    let mut writes: Vec<(Bnum, &Block)> = last.into_iter().collect();
    writes.sort_unstable_by_key(|&(addr, _)| addr);

    let mut i = 0;
    while i < writes.len() {
        let mut j = i + 1;
        while j < writes.len() && writes[j].0 == writes[j - 1].0 + 1 {
            j += 1;
        }
        let (start, _) = writes[i];
        trace!(start, n = j - i, "installing block run");
        let run: Vec<&Block> = writes[i..j].iter().map(|&(_, b)| b).collect();
        d.write_batch(start, &run);
        i = j;
    }
}

/// Installs one on-disk transaction from the log to the data region.
///
/// Returns the number of updates installed. Holds the shared lock on
/// entry and exit, releasing it around the disk writes; the home region
/// is owned by this thread.
fn log_install(shared: &WalShared, st: &mut MutexGuard<'_, WalState>) -> usize {
    let install_end = st.disk_end;
    let bufs = st.mem_log.take_till(install_end);
    if bufs.is_empty() {
        return 0;
    }

    MutexGuard::unlocked(st, || {
        trace!(install_end, n = bufs.len(), "installing updates");
        install_blocks(shared.disk.as_ref(), &bufs);
        shared.disk.barrier();
        CircularAppender::advance(shared.disk.as_ref(), install_end);
    });

    st.mem_log.delete_from(install_end);
    shared.cond_install.wakeup();
    bufs.len()
}

/// Body of the installer thread. Polls for logged updates, driven by
/// `cond_install`.
pub(super) fn run(shared: &WalShared) {
    let mut st = shared.mem.lock();
    st.nthread += 1;
    while !st.shutdown {
        let n = log_install(shared, &mut st);
        if n == 0 {
            shared.cond_install.sleep(&mut st);
        }
    }
    debug!("installer: shutdown");
    st.nthread -= 1;
    shared.cond_shut.wakeup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::BSIZE;
    use parking_lot::Mutex;

    /// Records the (start, len) of every region write.
    struct RecordingDisk {
        batches: Mutex<Vec<(Bnum, usize)>>,
    }

    impl Disk for RecordingDisk {
        fn read_to(&self, _bnum: Bnum, _buf: &mut Block) {
            unreachable!("install only writes");
        }

        fn write(&self, bnum: Bnum, _data: &Block) {
            self.batches.lock().push((bnum, 1));
        }

        fn write_batch(&self, start: Bnum, blocks: &[&Block]) {
            self.batches.lock().push((start, blocks.len()));
        }

        fn barrier(&self) {}

        fn size(&self) -> u64 {
            u64::MAX
        }
    }

    fn upd(addr: Bnum, fill: u8) -> Update {
        Update::new(addr, Box::new([fill; BSIZE]))
    }

    fn runs_of(addrs: &[Bnum]) -> Vec<(Bnum, usize)> {
        let d = RecordingDisk { batches: Mutex::new(Vec::new()) };
        let bufs: Vec<Update> = addrs.iter().map(|&a| upd(a, 0)).collect();
        install_blocks(&d, &bufs);
        d.batches.into_inner()
    }

    #[test]
    fn repeated_addresses_collapse_to_one_write() {
        assert_eq!(runs_of(&[957, 957, 957]), vec![(957, 1)]);
    }

    #[test]
    fn consecutive_addresses_become_one_run() {
        assert_eq!(runs_of(&[601, 602, 603]), vec![(601, 3)]);
        assert_eq!(runs_of(&[601, 603, 602, 603]), vec![(601, 3)]);
    }

    #[test]
    fn gaps_split_runs() {
        assert_eq!(
            runs_of(&[605, 601, 602, 602, 603, 605, 607, 608, 609]),
            vec![(601, 3), (605, 1), (607, 3)]
        );
        assert_eq!(
            runs_of(&[621, 617, 618, 620, 619, 633]),
            vec![(617, 5), (633, 1)]
        );
    }

    /// When one block is written several times in a batch, only its
    /// last value reaches the disk.
    #[test]
    fn absorption_keeps_the_final_value() {
        struct LastWrite {
            seen: Mutex<Vec<(Bnum, u8)>>,
        }
        impl Disk for LastWrite {
            fn read_to(&self, _: Bnum, _: &mut Block) {
                unreachable!()
            }
            fn write(&self, bnum: Bnum, data: &Block) {
                self.seen.lock().push((bnum, data[0]));
            }
            fn barrier(&self) {}
            fn size(&self) -> u64 {
                u64::MAX
            }
        }

        let d = LastWrite { seen: Mutex::new(Vec::new()) };
        install_blocks(&d, &[upd(700, 1), upd(701, 5), upd(700, 2), upd(700, 3)]);
        let mut seen = d.seen.into_inner();
        seen.sort_unstable();
        assert_eq!(seen, vec![(700, 3), (701, 5)]);
    }
}
