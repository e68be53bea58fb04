//! Bound the in-flight index distance between a producer and its consumer.
//!
//! `get(i)` parks while any active request `j` satisfies
//! `j + max_distance < i`; every completion wakes the stalled callers whose
//! index came back within range. At any instant
//! `max(active) - min(active) <= max_distance`.
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use libtrace_core::errors::*;
use libtrace_core::Record;

use crate::graph::{NodeSeed, TraceSet, Transform};

use super::passthrough;

struct WaitEntry {
    count: usize,
    woken: bool,
}

struct SyncState {
    /// Currently in-flight indices, with a refcount of concurrent callers.
    requests: BTreeMap<usize, usize>,
    /// Stalled indices.
    waiting: BTreeMap<usize, WaitEntry>,
}

struct TfmSynchronize {
    max_distance: usize,
    state: Mutex<SyncState>,
    cv: Condvar,
}

impl TfmSynchronize {
    fn synchronize(&self, index: usize) {
        let mut st = self.state.lock();

        let must_stall = |st: &SyncState| {
            st.requests
                .keys()
                .next()
                .map(|&j| j + self.max_distance < index)
                .unwrap_or(false)
        };

        if must_stall(&st) {
            st.waiting
                .entry(index)
                .or_insert(WaitEntry {
                    count: 0,
                    woken: false,
                })
                .count += 1;

            while {
                let entry = st.waiting.get(&index).expect("waiting entry stays put");
                !entry.woken && must_stall(&st)
            } {
                self.cv.wait(&mut st);
            }

            let entry = st.waiting.get_mut(&index).unwrap();
            entry.count -= 1;
            if entry.count == 0 {
                st.waiting.remove(&index);
            }
        }

        *st.requests.entry(index).or_insert(0) += 1;
    }

    fn finalize(&self, index: usize) {
        let mut st = self.state.lock();

        // wake any applicable stalled requests
        let mut woke = false;
        for (&i, entry) in st.waiting.iter_mut() {
            if i <= index + self.max_distance && !entry.woken {
                entry.woken = true;
                woke = true;
            }
        }
        if woke {
            self.cv.notify_all();
        }

        if let Some(count) = st.requests.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                st.requests.remove(&index);
            }
        }
    }
}

impl Transform for TfmSynchronize {
    fn name(&self) -> &'static str {
        "synchronize"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        Ok(NodeSeed::shaped(prev.shape().clone()))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        self.synchronize(index);
        let result = passthrough(ts, index);
        self.finalize(index);
        result
    }
}

pub fn tfm_synchronize(max_distance: usize) -> Box<dyn Transform> {
    Box::new(TfmSynchronize {
        max_distance,
        state: Mutex::new(SyncState {
            requests: BTreeMap::new(),
            waiting: BTreeMap::new(),
        }),
        cv: Condvar::new(),
    })
}
