//! Sharded per-address mutual exclusion.
//!
//! Callers address locks by flat address (see `Addr::flat_id`) and pick
//! their own granularity; the map itself treats addresses as opaque.
//! Lock state is allocated on first contention-free acquire and
//! reclaimed on the last release, so the map stays proportional to the
//! set of currently held addresses.

use array_macro::array;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

/// Number of shards; flat addresses map to a shard by modulus.
pub const NSHARD: usize = 43;

struct LockState {
    held: bool,
    waiters: u64,
    cond: Arc<Condvar>,
}

struct LockShard {
    state: Mutex<HashMap<u64, LockState>>,
}

impl LockShard {
    fn new() -> LockShard {
        LockShard {
            state: Mutex::new(HashMap::new()),
        }
    }

    fn acquire(&self, addr: u64) {
        let mut state = self.state.lock();
        loop {
            let ent = state.entry(addr).or_insert_with(|| LockState {
                held: false,
                waiters: 0,
                cond: Arc::new(Condvar::new()),
            });
            if !ent.held {
                ent.held = true;
                return;
            }
            ent.waiters += 1;
            let cond = Arc::clone(&ent.cond);
            cond.wait(&mut state);
            if let Some(ent) = state.get_mut(&addr) {
                ent.waiters -= 1;
            }
        }
    }

    fn release(&self, addr: u64) {
        let mut state = self.state.lock();
        let ent = state.get_mut(&addr).expect("release of an unheld address");
        assert!(ent.held, "release of an unheld address");
        ent.held = false;
        if ent.waiters > 0 {
            ent.cond.notify_one();
        } else {
            let _ = state.remove(&addr);
        }
    }
}

/// A map of locks, one per flat address, sharded `NSHARD` ways.
pub struct LockMap {
    shards: [LockShard; NSHARD],
}

impl LockMap {
    pub fn new() -> LockMap {
        LockMap {
            shards: array![_ => LockShard::new(); NSHARD],
        }
    }

    fn shard(&self, flat_addr: u64) -> &LockShard {
        &self.shards[(flat_addr % NSHARD as u64) as usize]
    }

    /// Blocks until this thread exclusively owns `flat_addr`.
    pub fn acquire(&self, flat_addr: u64) {
        self.shard(flat_addr).acquire(flat_addr);
    }

    /// Releases `flat_addr`. May only be called by the current owner.
    pub fn release(&self, flat_addr: u64) {
        self.shard(flat_addr).release(flat_addr);
    }
}

impl Default for LockMap {
    fn default() -> LockMap {
        LockMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    #[test]
    fn reacquire_after_release() {
        let m = LockMap::new();
        m.acquire(12);
        m.release(12);
        m.acquire(12);
        m.release(12);
    }

    #[test]
    #[should_panic(expected = "release of an unheld address")]
    fn releasing_an_unheld_address_panics() {
        LockMap::new().release(99);
    }

    #[test]
    fn state_is_reclaimed_when_uncontended() {
        let m = LockMap::new();
        for a in 0..100u64 {
            m.acquire(a);
            m.release(a);
        }
        for shard in &m.shards {
            assert!(shard.state.lock().is_empty());
        }
    }

    /// At most one thread holds an address at a time: increments of an
    /// unsynchronized counter under the lock never race.
    #[test]
    fn mutual_exclusion_under_contention() {
        const THREADS: u64 = 8;
        const ROUNDS: u64 = 200;

        let m = Arc::new(LockMap::new());
        // Two addresses in the same shard, to cover shard sharing.
        let addrs = [7u64, 7 + NSHARD as u64];
        let counters = Arc::new([AtomicU64::new(0), AtomicU64::new(0)]);

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let m = Arc::clone(&m);
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for i in 0..ROUNDS {
                        let which = ((t + i) % 2) as usize;
                        let addr = addrs[which];
                        m.acquire(addr);
                        // Non-atomic read-modify-write, made safe by the lock.
                        let v = counters[which].load(Ordering::Relaxed);
                        thread::yield_now();
                        counters[which].store(v + 1, Ordering::Relaxed);
                        m.release(addr);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let total = counters[0].load(Ordering::Relaxed) + counters[1].load(Ordering::Relaxed);
        assert_eq!(total, THREADS * ROUNDS);
    }
}
