//! The lock module.
//!
//! Contains the wait channel used to sleep on predicates over
//! mutex-protected state, and the sharded per-address lock map that
//! gives transactions mutual exclusion on disk objects.

mod lockmap;
mod wait_channel;

pub use lockmap::{LockMap, NSHARD};
pub use wait_channel::WaitChannel;
