//! File-backed disk.

use cfg_if::cfg_if;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use super::{Block, Disk};
use crate::addr::Bnum;
use crate::param::BSIZE;

/// A disk stored in a regular file, one 4096-byte block per slot.
///
/// The barrier maps to `File::sync_data`; positional reads and writes
/// keep the file offset shared-state free, so the disk can serve the
/// logger, the installer, and client threads concurrently.
pub struct FileDisk {
    file: File,
    nblocks: u64,
}

impl FileDisk {
    /// Opens (creating if necessary) `path` as a disk of `nblocks`
    /// blocks, growing or truncating the file to exactly that size.
    pub fn open<P: AsRef<Path>>(path: P, nblocks: u64) -> io::Result<FileDisk> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.set_len(nblocks * BSIZE as u64)?;
        Ok(FileDisk { file, nblocks })
    }
}

cfg_if! {
    if #[cfg(unix)] {
        fn pread(file: &File, buf: &mut [u8], off: u64) {
            use std::os::unix::fs::FileExt;
            file.read_exact_at(buf, off).expect("disk read failed");
        }

        fn pwrite(file: &File, buf: &[u8], off: u64) {
            use std::os::unix::fs::FileExt;
            file.write_all_at(buf, off).expect("disk write failed");
        }
    } else {
        fn pread(file: &File, buf: &mut [u8], off: u64) {
            use std::os::windows::fs::FileExt;
            let mut done = 0;
            while done < buf.len() {
                let n = file
                    .seek_read(&mut buf[done..], off + done as u64)
                    .expect("disk read failed");
                assert!(n > 0, "disk read past end of file");
                done += n;
            }
        }

        fn pwrite(file: &File, buf: &[u8], off: u64) {
            use std::os::windows::fs::FileExt;
            let mut done = 0;
            while done < buf.len() {
                let n = file
                    .seek_write(&buf[done..], off + done as u64)
                    .expect("disk write failed");
                done += n;
            }
        }
    }
}

impl Disk for FileDisk {
    fn read_to(&self, bnum: Bnum, buf: &mut Block) {
        assert!(bnum < self.nblocks, "out-of-bounds read at {}", bnum);
        pread(&self.file, &mut buf[..], bnum * BSIZE as u64);
    }

    fn write(&self, bnum: Bnum, data: &Block) {
        assert!(bnum < self.nblocks, "out-of-bounds write at {}", bnum);
        pwrite(&self.file, &data[..], bnum * BSIZE as u64);
    }

    fn barrier(&self) {
        self.file.sync_data().expect("disk barrier failed");
    }

    fn size(&self) -> u64 {
        self.nblocks
    }
}
