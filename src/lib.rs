//! jrnl: a crash-safe journal for sub-block disk objects.
//!
//! The journal provides atomic operations that are buffered locally and
//! manipulate objects via buffers of type [`buf::Buf`]. A client begins a
//! transaction, reads and writes objects within it, and finally commits
//! the buffered writes; committed groups survive crashes, uncommitted
//! ones disappear.
//!
//! The crate is built from three tightly coupled layers:
//!
//! * [`wal`]: a circular on-disk write-ahead log with an in-memory
//!   sliding window, a background logger thread that makes updates
//!   durable, and a background installer thread that writes them to their
//!   home locations and reclaims log space.
//! * [`obj`]: the object layer, which loads sub-block objects and
//!   installs committed buffers into whole blocks appended to the WAL.
//! * [`txn`]: two-phase-locking transactions with per-address locks
//!   from a sharded lock map.
//!
//! Objects have sizes. Implicit in the code is a static schema that
//! determines the disk layout: each block holds objects of exactly one
//! size, and all sizes fit an integer number of objects in a block (one
//! bit, any whole number of bytes, or the full block). This schema
//! guarantees that objects never overlap, as long as operations on an
//! [`addr::Addr`] use the correct size for that block number.
//!
//! Transactions support asynchronous durability by committing with
//! `wait = false`, which makes the writes visible atomically to other
//! threads but allows them to be lost on crash. `TxnMgr::flush` makes
//! every commit so far durable.

// # Tries to deny lints that bit us before (`rustc -W help`).
#![deny(rust_2018_idioms)]
#![deny(trivial_numeric_casts)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]

pub mod addr;
pub mod alloc;
pub mod buf;
pub mod disk;
pub mod lock;
pub mod obj;
pub mod param;
pub mod rep_block;
pub mod txn;
mod util;
pub mod wal;
