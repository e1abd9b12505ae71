//! The in-memory sliding window of the write-ahead log.
//!
//! The window is an append-only view of recent updates addressed by
//! logical position. `mutable` divides it: entries in `[start, mutable)`
//! are immutable (being logged or already on disk), entries in
//! `[mutable, end)` may still absorb later writes to the same block.

use std::collections::{HashMap, VecDeque};
use tracing::trace;

use super::{LogPosition, Update};
use crate::addr::Bnum;
use crate::disk::Block;

pub(super) struct Sliding {
    log: VecDeque<Update>,
    start: LogPosition,
    mutable: LogPosition,
    /// Latest logical position per block number.
    addr_pos: HashMap<Bnum, LogPosition>,
    /// Forces the next logger pass to freeze the whole tail.
    pub(super) need_flush: bool,
}

impl Sliding {
    /// A window over `updates`, all of which are already on disk (so
    /// `mutable` starts at the end).
    pub(super) fn new(updates: Vec<Update>, start: LogPosition) -> Sliding {
        let mut addr_pos = HashMap::new();
        for (i, u) in updates.iter().enumerate() {
            let _ = addr_pos.insert(u.addr, start + i as u64);
        }
        let mutable = start + updates.len() as u64;
        Sliding {
            log: updates.into(),
            start,
            mutable,
            addr_pos,
            need_flush: false,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.log.len()
    }

    pub(super) fn end(&self) -> LogPosition {
        self.start + self.log.len() as u64
    }

    fn slot(&self, pos: LogPosition) -> usize {
        (pos - self.start) as usize
    }

    /// Appends `bufs`, absorbing each into an existing mutable entry for
    /// the same block when one exists.
    pub(super) fn mem_write(&mut self, bufs: Vec<Update>) {
        for u in bufs {
            let oldpos = self.addr_pos.get(&u.addr).copied();
            match oldpos {
                Some(pos) if pos >= self.mutable => {
                    trace!(addr = u.addr, pos, "absorbing update");
                    let slot = self.slot(pos);
                    self.log[slot] = u;
                }
                _ => {
                    let pos = self.end();
                    trace!(addr = u.addr, pos, "appending update");
                    let _ = self.addr_pos.insert(u.addr, pos);
                    self.log.push_back(u);
                }
            }
        }
    }

    /// The immutable updates in `[pos, mutable)`, cloned so the caller
    /// can write them out without holding the window's lock. The
    /// immutable region is never rewritten, so the clone stays equal to
    /// the entries it was taken from.
    pub(super) fn take_from(&self, pos: LogPosition) -> Vec<Update> {
        debug_assert!(self.start <= pos && pos <= self.mutable);
        let lo = self.slot(pos);
        let hi = self.slot(self.mutable);
        self.log.iter().take(hi).skip(lo).cloned().collect()
    }

    /// The immutable updates in `[start, pos)`, cloned; `pos` must not
    /// exceed `mutable`.
    pub(super) fn take_till(&self, pos: LogPosition) -> Vec<Update> {
        debug_assert!(pos <= self.mutable);
        let hi = self.slot(pos);
        self.log.iter().take(hi).cloned().collect()
    }

    /// Drops the prefix `[start, new_start)` after it has been installed,
    /// unindexing entries whose latest position was in the prefix.
    pub(super) fn delete_from(&mut self, new_start: LogPosition) {
        assert!(self.start <= new_start && new_start <= self.mutable);
        while self.start < new_start {
            let u = self.log.pop_front().expect("window shorter than its bounds");
            if let Some(pos) = self.addr_pos.get(&u.addr).copied() {
                if pos <= self.start {
                    trace!(addr = u.addr, pos, "unindexing installed update");
                    let _ = self.addr_pos.remove(&u.addr);
                }
            }
            self.start += 1;
        }
    }

    /// Freezes the current tail for logging (group commit).
    pub(super) fn clear_mutable(&mut self) {
        self.mutable = self.end();
    }

    /// A copy of the latest in-memory update for `blkno`, if any.
    pub(super) fn read(&self, blkno: Bnum) -> Option<Block> {
        let &pos = self.addr_pos.get(&blkno)?;
        Some(self.log[self.slot(pos)].block.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Block;
    use proptest::prelude::*;

    fn upd(addr: Bnum, fill: u8) -> Update {
        let blk: Block = Box::new([fill; crate::param::BSIZE]);
        Update::new(addr, blk)
    }

    #[test]
    fn writes_above_mutable_absorb() {
        let mut s = Sliding::new(Vec::new(), 0);
        s.mem_write(vec![upd(600, 1), upd(601, 1)]);
        assert_eq!(s.end(), 2);

        s.mem_write(vec![upd(600, 2)]);
        // Absorbed in place: no new slot.
        assert_eq!(s.end(), 2);
        assert_eq!(s.read(600).unwrap()[0], 2);
    }

    #[test]
    fn writes_below_mutable_append_fresh_entries() {
        let mut s = Sliding::new(vec![upd(600, 1)], 0);
        // The recovered entry is immutable, so this append cannot absorb.
        s.mem_write(vec![upd(600, 2)]);
        assert_eq!(s.end(), 2);
        assert_eq!(s.read(600).unwrap()[0], 2);

        // take_till only sees the immutable prefix.
        let till = s.take_till(1);
        assert_eq!(till.len(), 1);
        assert_eq!(till[0].block[0], 1);
    }

    #[test]
    fn delete_from_keeps_the_index_pointing_at_survivors() {
        let mut s = Sliding::new(Vec::new(), 0);
        s.mem_write(vec![upd(600, 1)]);
        s.clear_mutable();
        s.mem_write(vec![upd(600, 2), upd(601, 1)]);

        // Positions: 0 = (600, old), 1 = (600, new), 2 = (601).
        s.delete_from(1);
        assert_eq!(s.end(), 3);
        // 600's latest entry survived the deletion.
        assert_eq!(s.read(600).unwrap()[0], 2);
        assert!(s.read(601).is_some());
    }

    #[test]
    fn delete_from_unindexes_installed_blocks() {
        let mut s = Sliding::new(Vec::new(), 0);
        s.mem_write(vec![upd(600, 1), upd(601, 1)]);
        s.clear_mutable();
        s.delete_from(2);
        assert_eq!(s.len(), 0);
        assert!(s.read(600).is_none());
        assert!(s.read(601).is_none());
    }

    #[test]
    fn take_from_returns_the_logged_suffix() {
        let mut s = Sliding::new(Vec::new(), 0);
        s.mem_write(vec![upd(600, 1), upd(601, 1), upd(602, 1)]);
        s.clear_mutable();
        let bufs = s.take_from(1);
        assert_eq!(bufs.len(), 2);
        assert_eq!(bufs[0].addr, 601);
        assert_eq!(bufs[1].addr, 602);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// After any sequence of writes into the mutable region, the
        /// window holds exactly one entry per block, carrying the last
        /// value written.
        #[test]
        fn absorption_matches_a_last_write_wins_map(
            writes in proptest::collection::vec((600u64..610, any::<u8>()), 1..60)
        ) {
            let mut s = Sliding::new(Vec::new(), 0);
            let mut model: HashMap<Bnum, u8> = HashMap::new();
            for (addr, fill) in writes {
                s.mem_write(vec![upd(addr, fill)]);
                let _ = model.insert(addr, fill);
            }
            // One live entry per address, holding the model's value.
            prop_assert_eq!(s.len(), model.len());
            for (&addr, &fill) in &model {
                prop_assert_eq!(s.read(addr).unwrap()[0], fill);
            }
        }
    }
}
