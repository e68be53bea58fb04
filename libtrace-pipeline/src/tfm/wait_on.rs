//! The side-channel bus and its waiter transformation.
//!
//! A producer node may publish named intermediate streams; a waiter node
//! attaches to one port of its upstream and serves those values as its own
//! records. Pushes are FIFO per port per producer; a waiter's `get` blocks
//! until the producer posts the requested index.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};

use libtrace_core::errors::*;
use libtrace_core::{Port, Record, SetShape};

use crate::graph::{NodeSeed, TraceSet, Transform};

struct WaiterInner {
    available: BTreeMap<usize, Record>,
}

/// One attachment: a waiter set listening on one port.
pub struct Waiter {
    port: Port,
    title_size: usize,
    data_size: usize,
    num_samples: usize,
    /// Entry bound derived from the configured byte budget; 0 = unbounded.
    max_entries: usize,

    inner: Mutex<WaiterInner>,
    cv: Condvar,
}

impl Waiter {
    fn post(
        &self,
        index: usize,
        title: Option<&[u8]>,
        data: Option<&[u8]>,
        samples: Option<&[f32]>,
    ) {
        let rec = Record {
            title: title.map(|t| {
                let mut out = vec![0u8; self.title_size];
                let n = t.len().min(self.title_size);
                out[..n].copy_from_slice(&t[..n]);
                out
            }),
            data: data.map(|d| {
                let mut out = vec![0u8; self.data_size];
                let n = d.len().min(self.data_size);
                out[..n].copy_from_slice(&d[..n]);
                out
            }),
            samples: samples.map(|s| {
                let mut out = vec![0.0f32; self.num_samples];
                let n = s.len().min(self.num_samples);
                out[..n].copy_from_slice(&s[..n]);
                out
            }),
        };

        let mut inner = self.inner.lock();
        inner.available.insert(index, rec);

        // a bounded waiter drops its oldest pending entries
        while self.max_entries > 0 && inner.available.len() > self.max_entries {
            let oldest = *inner.available.keys().next().unwrap();
            debug!("waiter buffer full, dropping index {}", oldest);
            inner.available.remove(&oldest);
        }

        self.cv.notify_all();
    }

    fn take(&self, index: usize) -> Record {
        let mut inner = self.inner.lock();
        loop {
            if let Some(rec) = inner.available.remove(&index) {
                return rec;
            }
            debug!("waiting for pushed trace {}", index);
            self.cv.wait(&mut inner);
        }
    }
}

/// The per-producer registry of waiter attachments.
pub struct Bus {
    waiters: Mutex<Vec<Arc<Waiter>>>,
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            waiters: Mutex::new(Vec::new()),
        }
    }

    fn attach(&self, waiter: Arc<Waiter>) {
        self.waiters.lock().push(waiter);
    }

    /// Copy the pushed payloads to every waiter listening on `port`.
    pub fn push(
        &self,
        port: Port,
        index: usize,
        title: Option<&[u8]>,
        data: Option<&[u8]>,
        samples: Option<&[f32]>,
    ) -> Result<()> {
        for waiter in self.waiters.lock().iter() {
            if waiter.port == port {
                waiter.post(index, title, data, samples);
            }
        }
        Ok(())
    }
}

impl Default for Bus {
    fn default() -> Self {
        Bus::new()
    }
}

struct TfmWaitOn {
    port: Port,
    bufsize: usize,
    waiter: Option<Arc<Waiter>>,
}

impl Transform for TfmWaitOn {
    fn name(&self) -> &'static str {
        "wait_on"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let producer_tfm = prev.tfm().ok_or_else(|| {
            LtError::invalid(
                "previous trace set does not have a transformation, and therefore no ports",
            )
        })?;

        let mut shape: SetShape = prev.shape().clone();
        producer_tfm.init_waiter(&mut shape, self.port, prev)?;

        let entry_size = shape.trace_size().max(1);
        let waiter = Arc::new(Waiter {
            port: self.port,
            title_size: shape.title_size,
            data_size: shape.data_size,
            num_samples: shape.num_samples,
            max_entries: if self.bufsize == 0 {
                0
            } else {
                (self.bufsize / entry_size).max(1)
            },
            inner: Mutex::new(WaiterInner {
                available: BTreeMap::new(),
            }),
            cv: Condvar::new(),
        });

        prev.ensure_bus().attach(waiter.clone());
        self.waiter = Some(waiter);
        Ok(NodeSeed::shaped(shape))
    }

    fn get(&self, _ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        Ok(self.waiter.as_ref().unwrap().take(index))
    }
}

/// Attach to `port` of the upstream node, buffering pending entries within
/// a `bufsize`-byte budget (0 = unbounded).
pub fn tfm_wait_on(port: Port, bufsize: usize) -> Box<dyn Transform> {
    Box::new(TfmWaitOn {
        port,
        bufsize,
        waiter: None,
    })
}
