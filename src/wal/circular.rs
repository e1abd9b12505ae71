//! The circular on-disk log region.
//!
//! The region is the first `LOGDISKBLOCKS` blocks of the disk: two
//! header blocks followed by `LOG_SZ` data slots. Header 1 carries the
//! end position and the home block number of every slot; header 2
//! carries the start position. The data for logical position `p` lives
//! in slot `p % LOG_SZ`.
//!
//! An append writes the data slots, issues a barrier, then writes
//! header 1 and issues a second barrier. Until header 1 lands, the new
//! slots are not logically part of the log, so a crash anywhere inside
//! an append leaves the log exactly as it was before.

use itertools::izip;
use static_assertions::{const_assert, const_assert_eq};
use tracing::trace;
use zerocopy::byteorder::{LittleEndian, U64};
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

use super::{LogPosition, Update};
use crate::addr::Bnum;
use crate::disk::{zero_block, Block, Disk};
use crate::param::{BSIZE, HDRADDRS, LOGHDR, LOGHDR2, LOGSTART, LOG_SZ};

/// Header block 1: the end position plus the block number held by every
/// data slot. Writing it is the commit point of an append.
#[repr(C)]
#[derive(AsBytes, FromBytes)]
struct Hdr1 {
    end: U64<LittleEndian>,
    addrs: [U64<LittleEndian>; HDRADDRS],
}

/// Header block 2: the start position. Writing it reclaims log space.
#[repr(C)]
#[derive(AsBytes, FromBytes)]
struct Hdr2 {
    start: U64<LittleEndian>,
}

const_assert_eq!(size_of::<Hdr1>(), BSIZE);
const_assert!(size_of::<Hdr2>() <= BSIZE);

/// Owns the on-disk log region and the in-memory copy of the slot
/// address array.
pub(super) struct CircularAppender {
    disk_addrs: Box<[Bnum; HDRADDRS]>,
    /// Reused encoding buffer for header 1.
    hdr_scratch: Block,
}

fn slot_of(pos: LogPosition) -> Bnum {
    LOGSTART + pos % LOG_SZ as u64
}

impl CircularAppender {
    /// Formats the log region: both headers zeroed, so the log is empty
    /// at position zero.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(super) fn init(d: &dyn Disk) -> CircularAppender {
        let zero = zero_block();
        d.write(LOGHDR, &zero);
        d.write(LOGHDR2, &zero);
        d.barrier();
        CircularAppender {
            disk_addrs: Box::new([0; HDRADDRS]),
            hdr_scratch: zero,
        }
    }

    /// Reads the log region back and replays it.
    ///
    /// Returns the appender, the start and end positions, and the
    /// updates in `[start, end)` in log order.
    pub(super) fn recover(d: &dyn Disk) -> (CircularAppender, LogPosition, LogPosition, Vec<Update>) {
        let hdr1_blk = d.read(LOGHDR);
        let hdr1 = LayoutVerified::<_, Hdr1>::new(&hdr1_blk[..]).expect("header 1 is one block");
        let end = hdr1.end.get();

        let hdr2_blk = d.read(LOGHDR2);
        let (hdr2, _) =
            LayoutVerified::<_, Hdr2>::new_from_prefix(&hdr2_blk[..]).expect("header 2 fits a block");
        let start = hdr2.start.get();

        let mut disk_addrs = Box::new([0; HDRADDRS]);
        for (slot, addr) in izip!(disk_addrs.iter_mut(), hdr1.addrs.iter()) {
            *slot = addr.get();
        }

        let mut updates = Vec::with_capacity((end - start) as usize);
        for pos in start..end {
            let addr = disk_addrs[(pos % LOG_SZ as u64) as usize];
            trace!(pos, addr, "replaying logged update");
            updates.push(Update::new(addr, d.read(slot_of(pos))));
        }

        let appender = CircularAppender {
            disk_addrs,
            hdr_scratch: zero_block(),
        };
        (appender, start, end, updates)
    }

    /// Atomically extends the log with `bufs`, which become positions
    /// `[end, end + len)`.
    ///
    /// The caller owns `[end, ...)` exclusively and must ensure the new
    /// entries do not overrun slots still holding uninstalled updates.
    pub(super) fn append(&mut self, d: &dyn Disk, end: LogPosition, bufs: &[Update]) {
        debug_assert!(bufs.len() <= LOG_SZ);
        for (i, u) in bufs.iter().enumerate() {
            let pos = end + i as u64;
            trace!(addr = u.addr, pos, "logging block");
            self.disk_addrs[(pos % LOG_SZ as u64) as usize] = u.addr;
        }

        // At most two contiguous region writes: the run up to the end of
        // the ring, then the wrapped remainder.
        let first_slot = (end % LOG_SZ as u64) as usize;
        let till_wrap = bufs.len().min(LOG_SZ - first_slot);
        let (head, tail) = bufs.split_at(till_wrap);
        let blocks: Vec<&Block> = head.iter().map(|u| &u.block).collect();
        d.write_batch(slot_of(end), &blocks);
        if !tail.is_empty() {
            let blocks: Vec<&Block> = tail.iter().map(|u| &u.block).collect();
            d.write_batch(LOGSTART, &blocks);
        }
        d.barrier();

        // Commit point: header 1 now covers the new entries.
        let mut hdr = LayoutVerified::<_, Hdr1>::new(&mut self.hdr_scratch[..])
            .expect("header 1 is one block");
        hdr.end = U64::new(end + bufs.len() as u64);
        for (dst, src) in izip!(hdr.addrs.iter_mut(), self.disk_addrs.iter()) {
            *dst = U64::new(*src);
        }
        d.write(LOGHDR, &self.hdr_scratch);
        d.barrier();
    }

    /// Advances the on-disk start position to `new_start`, reclaiming
    /// the space before it. Safe to call from whoever owns the home
    /// region; it touches no appender state.
    pub(super) fn advance(d: &dyn Disk, new_start: LogPosition) {
        let mut blk = zero_block();
        let (mut hdr, _) = LayoutVerified::<_, Hdr2>::new_from_prefix(&mut blk[..])
            .expect("header 2 fits a block");
        hdr.start = U64::new(new_start);
        d.write(LOGHDR2, &blk);
        d.barrier();
    }
}
