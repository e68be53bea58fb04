//! The content-addressed trace cache.
//!
//! A multi-way set-associative cache keyed by trace index, one instance per
//! node that opts in. Traces are refcounted per slot: a trace with a nonzero
//! refcount is never evicted, and eviction of a zero-refcount slot releases
//! the backing memory. Victim selection runs in two passes, first over
//! invalid slots and then over unpinned ones, by highest LRU rank.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use libtrace_core::errors::*;

use crate::graph::Trace;

const SUMMARY_INTERVAL: usize = 1_000_000;

struct Slot {
    lru: u8,
    refcount: u8,
    trace: Option<Arc<Trace>>,
}

struct TcSet {
    initialized: bool,
    slots: Vec<Slot>,
}

pub struct TraceCache {
    cache_id: usize,
    nsets: usize,
    nways: usize,
    sets: Vec<Mutex<TcSet>>,

    accesses: AtomicUsize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    stores: AtomicUsize,
    evictions: AtomicUsize,
}

pub struct SetGuard<'a> {
    guard: MutexGuard<'a, TcSet>,
}

/// How many traces fit a byte budget once per-set bookkeeping is charged
/// every `assoc` slots.
fn find_num_traces(trace_size: usize, size_bytes: usize, assoc: usize) -> usize {
    let mut mem_used = std::mem::size_of::<TraceCache>();
    let mut ntraces = 0usize;

    while mem_used < size_bytes {
        if ntraces % assoc == 0 {
            mem_used += std::mem::size_of::<TcSet>() + std::mem::size_of::<Mutex<TcSet>>();
            mem_used += assoc * std::mem::size_of::<Slot>();
        }

        mem_used += trace_size;
        ntraces += 1;
    }

    ntraces
}

impl TraceCache {
    pub fn new(cache_id: usize, nsets: usize, nways: usize) -> Result<Self> {
        if nsets == 0 || nways == 0 {
            return Err(LtError::invalid("cache must have at least one set and way"));
        }

        debug!(
            "creating cache {} with assoc {} sets {}",
            cache_id, nways, nsets
        );

        // per-set slot storage still initializes lazily, as sets are touched
        let sets = (0..nsets)
            .map(|_| {
                Mutex::new(TcSet {
                    initialized: false,
                    slots: Vec::new(),
                })
            })
            .collect();

        Ok(TraceCache {
            cache_id,
            nsets,
            nways,
            sets,
            accesses: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
            evictions: AtomicUsize::new(0),
        })
    }

    /// Derive the geometry from a byte budget and an associativity.
    pub fn sized_for(
        cache_id: usize,
        trace_size: usize,
        size_bytes: usize,
        assoc: usize,
    ) -> Result<Self> {
        if size_bytes < trace_size || assoc == 0 {
            return Err(LtError::invalid(
                "cache size smaller than one trace, or zero associativity",
            ));
        }

        let mut ntraces = find_num_traces(trace_size, size_bytes, assoc);
        ntraces -= ntraces % assoc; // round to even trace sets
        warn!("cache {} can fit {} traces", cache_id, ntraces);

        if ntraces == 0 {
            return Err(LtError::invalid("cache budget fits no complete set"));
        }

        TraceCache::new(cache_id, ntraces / assoc, assoc)
    }

    pub fn nsets(&self) -> usize {
        self.nsets
    }

    pub fn nways(&self) -> usize {
        self.nways
    }

    fn initialize_slots(&self, set: &mut TcSet) {
        set.slots = (0..self.nways)
            .map(|i| Slot {
                lru: (self.nways - i - 1) as u8,
                refcount: 0,
                trace: None,
            })
            .collect();
        set.initialized = true;
    }

    fn update_lru(&self, set: &mut TcSet, way: usize, hit: bool) {
        let thresh = set.slots[way].lru;
        let saturate = (self.nways - 1) as u8;

        for (i, slot) in set.slots.iter_mut().enumerate() {
            if i == way {
                slot.lru = 0;
            } else if (!hit || slot.lru < thresh) && slot.lru < saturate {
                slot.lru += 1;
            }
        }
    }

    fn maybe_report(&self) {
        let accesses = self.accesses.load(Ordering::Relaxed);
        if accesses > 0 && accesses % SUMMARY_INTERVAL == 0 {
            let hits = self.hits.load(Ordering::Relaxed);
            let misses = self.misses.load(Ordering::Relaxed);
            let stores = self.stores.load(Ordering::Relaxed);
            let evictions = self.evictions.load(Ordering::Relaxed);

            warn!(
                "cache {}: {} accesses, {} hits ({:.5}), {} misses ({:.5}), {} stores, {} evictions (holding {})",
                self.cache_id,
                accesses,
                hits,
                hits as f64 / accesses as f64,
                misses,
                misses as f64 / accesses as f64,
                stores,
                evictions,
                stores - evictions
            );
        }
    }

    /// Lock the congruence class for `index`. The guard can be carried across
    /// a miss-then-store pair so racing callers serialize on the fill.
    pub fn lock_set(&self, index: usize) -> SetGuard<'_> {
        let mut guard = self.sets[index % self.nsets].lock();
        if !guard.initialized {
            self.initialize_slots(&mut guard);
        }
        SetGuard { guard }
    }

    /// Search the locked set for `index`; a hit pins the slot.
    pub fn lookup(&self, set: &mut SetGuard<'_>, index: usize) -> Option<Arc<Trace>> {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        self.maybe_report();

        let way = set.guard.slots.iter().position(|slot| {
            slot.trace
                .as_ref()
                .map(|t| t.index() == index)
                .unwrap_or(false)
        });

        match way {
            Some(way) => {
                self.update_lru(&mut set.guard, way, true);
                set.guard.slots[way].refcount += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);

                debug!(
                    "cache {} hit for index {} in way {}, refed {} times",
                    self.cache_id, index, way, set.guard.slots[way].refcount
                );
                set.guard.slots[way].trace.clone()
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("cache {} miss for index {}", self.cache_id, index);
                None
            }
        }
    }

    /// Insert `trace` into the locked set, pinned once.
    ///
    /// Fails with `Exhausted` when every way is held; the caller must either
    /// free the trace or retry.
    pub fn store(&self, set: &mut SetGuard<'_>, index: usize, trace: Arc<Trace>) -> Result<()> {
        // first pass: invalid slots, highest LRU rank wins
        let mut way = None;
        let mut highest = -1i32;
        for (i, slot) in set.guard.slots.iter().enumerate() {
            if slot.trace.is_none() && slot.lru as i32 > highest {
                highest = slot.lru as i32;
                way = Some(i);
            }
        }

        // second pass: no empty slots, look for refcount 0 and highest rank
        if way.is_none() {
            for (i, slot) in set.guard.slots.iter().enumerate() {
                if slot.refcount == 0 && slot.lru as i32 > highest {
                    highest = slot.lru as i32;
                    way = Some(i);
                }
            }
        }

        let way = way.ok_or_else(|| {
            LtError::exhausted(format!(
                "no available slot in cache {} for index {}",
                self.cache_id, index
            ))
        })?;

        self.stores.fetch_add(1, Ordering::Relaxed);
        if let Some(old) = set.guard.slots[way].trace.take() {
            debug!(
                "cache {} evicting index {} from way {}",
                self.cache_id,
                old.index(),
                way
            );
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        set.guard.slots[way].trace = Some(trace);
        set.guard.slots[way].refcount = 1;
        self.update_lru(&mut set.guard, way, false);
        Ok(())
    }

    /// Release one reference on `index`.
    ///
    /// When the passed handle does not match the cached entry the handle is
    /// simply dropped by the caller; the cached entry stays untouched.
    pub fn deref(&self, index: usize, trace: &Arc<Trace>) {
        let mut set = self.lock_set(index);

        for slot in set.guard.slots.iter_mut() {
            let matches = slot
                .trace
                .as_ref()
                .map(|t| t.index() == index)
                .unwrap_or(false);

            if matches {
                if slot
                    .trace
                    .as_ref()
                    .map(|t| Arc::ptr_eq(t, trace))
                    .unwrap_or(false)
                {
                    slot.refcount = slot.refcount.saturating_sub(1);
                    debug!(
                        "cache {} deref index {} to refcount {}",
                        self.cache_id, index, slot.refcount
                    );
                } else {
                    debug!(
                        "cache {} deref for index {} does not match cached entry",
                        self.cache_id, index
                    );
                }
                return;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn counters(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.accesses.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.stores.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }

    #[cfg(test)]
    pub(crate) fn slot_state(&self, index: usize) -> Vec<(u8, u8, Option<usize>)> {
        let set = self.lock_set(index);
        set.guard
            .slots
            .iter()
            .map(|s| (s.lru, s.refcount, s.trace.as_ref().map(|t| t.index())))
            .collect()
    }
}
