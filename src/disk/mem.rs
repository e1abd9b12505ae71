//! In-memory disk with an explicit durability boundary.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::{Block, Disk};
use crate::addr::Bnum;
use crate::param::BSIZE;

/// An in-memory disk.
///
/// Writes land in a pending set and only reach the durable image at a
/// `barrier`, which is exactly the promise the barrier contract makes.
/// [`MemDisk::crash`] forks the durable image, so tests can observe the
/// state a real device would expose after losing power mid-operation.
pub struct MemDisk {
    inner: Mutex<Shadow>,
}

struct Shadow {
    durable: Vec<[u8; BSIZE]>,
    /// Writes since the last barrier.
    pending: HashMap<Bnum, [u8; BSIZE]>,
}

impl MemDisk {
    pub fn new(nblocks: u64) -> MemDisk {
        MemDisk {
            inner: Mutex::new(Shadow {
                durable: vec![[0; BSIZE]; nblocks as usize],
                pending: HashMap::new(),
            }),
        }
    }

    /// Returns the disk a crash at this instant would leave behind:
    /// the durable image, with every write since the last barrier lost.
    pub fn crash(&self) -> MemDisk {
        let inner = self.inner.lock();
        debug!(lost = inner.pending.len(), "memdisk: simulated crash");
        MemDisk {
            inner: Mutex::new(Shadow {
                durable: inner.durable.clone(),
                pending: HashMap::new(),
            }),
        }
    }
}

impl Disk for MemDisk {
    fn read_to(&self, bnum: Bnum, buf: &mut Block) {
        let inner = self.inner.lock();
        assert!(bnum < inner.durable.len() as u64, "out-of-bounds read at {}", bnum);
        let src = inner
            .pending
            .get(&bnum)
            .unwrap_or(&inner.durable[bnum as usize]);
        buf.copy_from_slice(src);
    }

    fn write(&self, bnum: Bnum, data: &Block) {
        let mut inner = self.inner.lock();
        assert!(bnum < inner.durable.len() as u64, "out-of-bounds write at {}", bnum);
        let _ = inner.pending.insert(bnum, **data);
    }

    fn barrier(&self) {
        let mut inner = self.inner.lock();
        let Shadow { durable, pending } = &mut *inner;
        for (bnum, data) in pending.drain() {
            durable[bnum as usize] = data;
        }
    }

    fn size(&self) -> u64 {
        self.inner.lock().durable.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::zero_block;

    fn filled(b: u8) -> Block {
        Box::new([b; BSIZE])
    }

    #[test]
    fn reads_see_unbarriered_writes() {
        let d = MemDisk::new(10);
        d.write(3, &filled(0xab));
        assert_eq!(d.read(3)[0], 0xab);
        assert_eq!(d.read(4), zero_block());
    }

    #[test]
    fn crash_loses_exactly_the_unbarriered_writes() {
        let d = MemDisk::new(10);
        d.write(1, &filled(0x11));
        d.barrier();
        d.write(2, &filled(0x22));

        let after = d.crash();
        assert_eq!(after.read(1)[0], 0x11);
        assert_eq!(after.read(2), zero_block());
        // The live disk still sees both.
        assert_eq!(d.read(2)[0], 0x22);
    }

    #[test]
    #[should_panic(expected = "out-of-bounds")]
    fn out_of_bounds_write_panics() {
        let d = MemDisk::new(2);
        d.write(2, &zero_block());
    }
}
