//! The logger thread: moves frozen in-memory updates into the on-disk
//! circular log.

use parking_lot::MutexGuard;
use tracing::{debug, trace};

use super::circular::CircularAppender;
use super::{WalShared, WalState};
use crate::param::LOG_SZ;

/// Appends to the on-disk log, if there are frozen updates to append.
///
/// Returns whether it made progress. Holds the shared lock on entry and
/// exit, releasing it around the disk writes; the on-disk log region is
/// owned by this thread, so no one else touches it in the gap.
fn log_append(
    shared: &WalShared,
    circ: &mut CircularAppender,
    st: &mut MutexGuard<'_, WalState>,
) -> bool {
    // Wait until the whole in-memory window fits the on-disk log, i.e.
    // the installer has caught up enough that appending cannot overrun
    // slots that still hold uninstalled updates.
    while st.mem_log.len() > LOG_SZ {
        if st.shutdown {
            return false;
        }
        shared.cond_install.sleep(st);
    }

    if st.mem_log.need_flush {
        st.mem_log.clear_mutable();
        st.mem_log.need_flush = false;
    }

    let disk_end = st.disk_end;
    let new_bufs = st.mem_log.take_from(disk_end);
    if new_bufs.is_empty() {
        return false;
    }

    MutexGuard::unlocked(st, || {
        trace!(disk_end, n = new_bufs.len(), "logging updates");
        circ.append(shared.disk.as_ref(), disk_end, &new_bufs);
    });

    st.disk_end = disk_end + new_bufs.len() as u64;
    shared.cond_logger.wakeup();
    shared.cond_install.wakeup();
    true
}

/// Body of the logger thread. Polls for frozen in-memory updates,
/// driven by `cond_logger`.
pub(super) fn run(shared: &WalShared, mut circ: CircularAppender) {
    let mut st = shared.mem.lock();
    st.nthread += 1;
    while !st.shutdown {
        let progress = log_append(shared, &mut circ, &mut st);
        if !progress {
            shared.cond_logger.sleep(&mut st);
        }
    }
    debug!("logger: shutdown");
    st.nthread -= 1;
    shared.cond_shut.wakeup();
}
