//! In-transaction shadows of disk objects.
//!
//! A [`Buf`] holds the bytes of one object (a bit, a record, or a whole
//! block) together with its address and size in bits. Dirty bufs are
//! merged back into their containing blocks at commit via
//! [`Buf::install`].

use std::collections::HashMap;

use crate::addr::Addr;
use crate::disk::Block;
use crate::param::NBITBLOCK;

/// An in-memory shadow of a disk object.
pub struct Buf {
    pub addr: Addr,
    /// Object size in bits.
    pub sz: u64,
    pub data: Vec<u8>,
    dirty: bool,
}

impl Buf {
    /// A clean buf holding `data`.
    pub fn new(addr: Addr, sz: u64, data: Vec<u8>) -> Buf {
        assert_eq!(data.len() as u64, (sz + 7) / 8, "buf data does not match its size");
        Buf {
            addr,
            sz,
            data,
            dirty: false,
        }
    }

    /// A buf loaded from the containing block's current contents.
    pub fn new_load(addr: Addr, sz: u64, blk: &Block) -> Buf {
        let first = (addr.off / 8) as usize;
        let nbytes = ((sz + 7) / 8) as usize;
        Buf::new(addr, sz, blk[first..first + nbytes].to_vec())
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Merges this buf's bytes into `blk`.
    ///
    /// The supported shapes are the schema's: a whole block, a
    /// byte-aligned run of bytes, or a single bit. Anything else is a
    /// schema violation.
    pub fn install(&self, blk: &mut Block) {
        if self.sz == NBITBLOCK {
            blk.copy_from_slice(&self.data);
        } else if self.sz % 8 == 0 && self.addr.off % 8 == 0 {
            let first = (self.addr.off / 8) as usize;
            blk[first..first + self.data.len()].copy_from_slice(&self.data);
        } else if self.sz == 1 {
            let byte = (self.addr.off / 8) as usize;
            let bit = self.addr.off % 8;
            if self.data[0] & (1 << bit) == 0 {
                blk[byte] &= !(1 << bit);
            } else {
                blk[byte] |= 1 << bit;
            }
        } else {
            panic!("unsupported object size: {} bits at offset {}", self.sz, self.addr.off);
        }
    }
}

/// The objects a transaction has read or written, keyed by address.
#[derive(Default)]
pub struct BufMap {
    bufs: HashMap<Addr, Buf>,
}

impl BufMap {
    pub fn new() -> BufMap {
        BufMap::default()
    }

    pub fn insert(&mut self, buf: Buf) {
        let _ = self.bufs.insert(buf.addr, buf);
    }

    pub fn lookup(&self, addr: Addr) -> Option<&Buf> {
        self.bufs.get(&addr)
    }

    pub fn lookup_mut(&mut self, addr: Addr) -> Option<&mut Buf> {
        self.bufs.get_mut(&addr)
    }

    pub fn del(&mut self, addr: Addr) {
        let _ = self.bufs.remove(&addr);
    }

    /// Number of dirty bufs, an upper bound on the commit's size in
    /// blocks.
    pub fn ndirty(&self) -> u64 {
        self.bufs.values().filter(|b| b.dirty).count() as u64
    }

    /// Drains the dirty bufs, leaving the clean ones buffered.
    pub fn take_dirty(&mut self) -> Vec<Buf> {
        let dirty: Vec<Addr> = self
            .bufs
            .values()
            .filter(|b| b.dirty)
            .map(|b| b.addr)
            .collect();
        dirty
            .into_iter()
            .map(|a| self.bufs.remove(&a).unwrap())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::zero_block;
    use proptest::prelude::*;

    #[test]
    fn installs_a_single_bit_without_touching_neighbors() {
        let mut blk = zero_block();
        blk[0] = 0xff;

        let mut b = Buf::new(Addr::new(9, 3), 1, vec![0]);
        b.set_dirty();
        b.install(&mut blk);
        assert_eq!(blk[0], 0xf7);

        let mut b = Buf::new(Addr::new(9, 3), 1, vec![1 << 3]);
        b.set_dirty();
        b.install(&mut blk);
        assert_eq!(blk[0], 0xff);
        assert_eq!(blk[1], 0);
    }

    #[test]
    fn installs_byte_aligned_records_in_place() {
        let mut blk = zero_block();
        let rec = vec![0xaa; 16];
        let b = Buf::new(Addr::new(9, 32 * 8), 16 * 8, rec.clone());
        b.install(&mut blk);
        assert_eq!(&blk[32..48], &rec[..]);
        assert_eq!(blk[31], 0);
        assert_eq!(blk[48], 0);
    }

    #[test]
    fn whole_block_install_replaces_everything() {
        let mut blk = zero_block();
        blk[100] = 7;
        let b = Buf::new(Addr::new(9, 0), NBITBLOCK, vec![0x42; 4096]);
        b.install(&mut blk);
        assert!(blk.iter().all(|&x| x == 0x42));
    }

    #[test]
    #[should_panic(expected = "unsupported object size")]
    fn unaligned_multi_bit_writes_are_rejected() {
        let mut blk = zero_block();
        Buf::new(Addr::new(9, 3), 16, vec![0, 0]).install(&mut blk);
    }

    #[test]
    fn load_slices_the_containing_bytes() {
        let mut blk = zero_block();
        blk[8] = 0xde;
        blk[9] = 0xad;
        let b = Buf::new_load(Addr::new(9, 64), 16, &blk);
        assert_eq!(b.data, vec![0xde, 0xad]);
        assert!(!b.dirty());
    }

    #[test]
    fn bufmap_tracks_dirtiness() {
        let mut m = BufMap::new();
        m.insert(Buf::new(Addr::new(9, 0), 8, vec![1]));
        let mut b = Buf::new(Addr::new(9, 8), 8, vec![2]);
        b.set_dirty();
        m.insert(b);
        assert_eq!(m.ndirty(), 1);

        let dirty = m.take_dirty();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].addr, Addr::new(9, 8));
        // The clean buf stays behind.
        assert!(m.lookup(Addr::new(9, 0)).is_some());
        assert_eq!(m.ndirty(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// A byte-aligned install changes exactly the addressed range.
        #[test]
        fn byte_install_touches_only_its_range(
            off_bytes in 0usize..4080,
            len in 1usize..16,
            fill in any::<u8>(),
        ) {
            let len = len.min(4096 - off_bytes);
            let mut blk = zero_block();
            for (i, x) in blk.iter_mut().enumerate() {
                *x = i as u8;
            }
            let before = blk.clone();

            let b = Buf::new(
                Addr::new(9, (off_bytes * 8) as u64),
                (len * 8) as u64,
                vec![fill; len],
            );
            b.install(&mut blk);

            for i in 0..4096 {
                if i >= off_bytes && i < off_bytes + len {
                    prop_assert_eq!(blk[i], fill);
                } else {
                    prop_assert_eq!(blk[i], before[i]);
                }
            }
        }
    }
}
