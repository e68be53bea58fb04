//! Trace-set nodes and the linkage between transformations.
//!
//! A [`TraceSet`] is a vertex in the pipeline DAG. Source-like nodes carry a
//! backend; derived nodes carry an upstream pointer and a transformation.
//! Records materialize lazily through [`TraceSet::get_trace`] and are
//! refcounted by the node's cache when one is attached.
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use log::debug;

use libtrace_backends::{open_backend, Backend};
use libtrace_core::errors::*;
use libtrace_core::{Record, SetShape, TraceHeader};

use crate::cache::TraceCache;
use crate::tfm::wait_on::Bus;
use crate::Pipeline;

/// Everything a transformation hands back from `init`: the derived node's
/// shape, and (for producing transformations like `save`) a backend of its
/// own.
pub struct NodeSeed {
    pub shape: SetShape,
    pub backend: Option<Box<dyn Backend>>,
}

impl NodeSeed {
    pub fn shaped(shape: SetShape) -> Self {
        NodeSeed {
            shape,
            backend: None,
        }
    }
}

/// The hooks a transformation exposes to the graph.
///
/// `init` runs while the node is being built (before it is shared), so
/// implementations may freely set up internal state there. Everything after
/// that point runs behind `&self` and synchronizes internally.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute the derived node's shape from its upstream.
    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed>;

    /// Called once the node exists, for transformations that own threads.
    fn attach(&self, ts: &Arc<TraceSet>) {
        let _ = ts;
    }

    /// Register a waiter on `port` and rewrite its shape accordingly.
    fn init_waiter(
        &self,
        shape: &mut SetShape,
        port: libtrace_core::Port,
        producer: &Arc<TraceSet>,
    ) -> Result<()> {
        let _ = (shape, port, producer);
        Err(LtError::invalid("no ports to register"))
    }

    /// In-memory size of one materialized record, for cache sizing.
    fn trace_size(&self, ts: &TraceSet) -> usize {
        match ts.prev() {
            Some(prev) => prev.trace_size(),
            None => ts.shape().trace_size(),
        }
    }

    /// Produce the record at `index`. A record with all payloads absent is
    /// the silent drop for this index.
    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record>;

    /// Transformation-specific teardown.
    fn exit(&self, ts: &Arc<TraceSet>) {
        let _ = ts;
    }
}

/// A vertex of the pipeline DAG.
pub struct TraceSet {
    set_id: usize,
    pipeline: Weak<Pipeline>,

    shape: SetShape,
    num_traces: AtomicUsize,

    backend: OnceLock<Box<dyn Backend>>,
    prev: Option<Arc<TraceSet>>,
    tfm: Option<Box<dyn Transform>>,

    cache: OnceLock<TraceCache>,
    bus: OnceLock<Arc<Bus>>,
}

/// A concrete materialized record at one index, bound to its owner node.
pub struct Trace {
    owner: Arc<TraceSet>,
    index: usize,
    rec: Record,
}

impl Trace {
    pub fn owner(&self) -> &Arc<TraceSet> {
        &self.owner
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn record(&self) -> &Record {
        &self.rec
    }

    pub fn title(&self) -> Option<&[u8]> {
        self.rec.title.as_deref()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.rec.data.as_deref()
    }

    pub fn samples(&self) -> Option<&[f32]> {
        self.rec.samples.as_deref()
    }
}

/// RAII handle for a materialized trace.
///
/// Dropping the handle releases the cache reference (or frees the backing
/// memory when the trace was never cached).
pub struct TraceRef {
    t: Arc<Trace>,
    cached: bool,
}

impl Deref for TraceRef {
    type Target = Trace;

    fn deref(&self) -> &Trace {
        &self.t
    }
}

impl Drop for TraceRef {
    fn drop(&mut self) {
        if self.cached {
            if let Some(cache) = self.t.owner.cache.get() {
                cache.deref(self.t.index, &self.t);
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_trace(owner: &Arc<TraceSet>, index: usize) -> Arc<Trace> {
    Arc::new(Trace {
        owner: owner.clone(),
        index,
        rec: Record::empty(),
    })
}

pub(crate) fn ts_open(pipeline: &Arc<Pipeline>, spec: &str) -> Result<Arc<TraceSet>> {
    let backend = open_backend(spec)?;
    let shape = backend.shape().clone();

    let set = Arc::new(TraceSet {
        set_id: pipeline.take_set_id(),
        pipeline: Arc::downgrade(pipeline),
        num_traces: AtomicUsize::new(shape.num_traces),
        shape,
        backend: {
            let cell = OnceLock::new();
            let _ = cell.set(backend);
            cell
        },
        prev: None,
        tfm: None,
        cache: OnceLock::new(),
        bus: OnceLock::new(),
    });

    debug!("created source trace set {}", set.set_id);
    pipeline.register(set.clone());
    Ok(set)
}

pub(crate) fn ts_transform(
    pipeline: &Arc<Pipeline>,
    prev: &Arc<TraceSet>,
    mut tfm: Box<dyn Transform>,
) -> Result<Arc<TraceSet>> {
    let seed = tfm.init(prev)?;

    let set = Arc::new(TraceSet {
        set_id: pipeline.take_set_id(),
        pipeline: Arc::downgrade(pipeline),
        num_traces: AtomicUsize::new(seed.shape.num_traces),
        shape: seed.shape,
        backend: {
            let cell = OnceLock::new();
            if let Some(backend) = seed.backend {
                let _ = cell.set(backend);
            }
            cell
        },
        prev: Some(prev.clone()),
        tfm: Some(tfm),
        cache: OnceLock::new(),
        bus: OnceLock::new(),
    });

    debug!(
        "created trace set {} ({}) from set {}",
        set.set_id,
        set.tfm.as_ref().unwrap().name(),
        prev.set_id
    );

    if let Some(tfm) = &set.tfm {
        tfm.attach(&set);
    }

    pipeline.register(set.clone());
    Ok(set)
}

impl TraceSet {
    pub fn set_id(&self) -> usize {
        self.set_id
    }

    pub fn shape(&self) -> &SetShape {
        &self.shape
    }

    pub fn pipeline(&self) -> Option<Arc<Pipeline>> {
        self.pipeline.upgrade()
    }

    pub fn prev(&self) -> Option<&Arc<TraceSet>> {
        self.prev.as_ref()
    }

    pub fn tfm(&self) -> Option<&dyn Transform> {
        self.tfm.as_deref()
    }

    pub fn backend(&self) -> Option<&dyn Backend> {
        self.backend.get().map(|b| b.as_ref())
    }

    /// Current trace count; [`UNKNOWN_NUM_TRACES`] until a producing
    /// transformation finalizes it.
    pub fn num_traces(&self) -> usize {
        self.num_traces.load(Ordering::Acquire)
    }

    pub fn num_samples(&self) -> usize {
        self.shape.num_samples
    }

    pub(crate) fn set_num_traces(&self, count: usize) {
        self.num_traces.store(count, Ordering::Release);
    }

    /// Headers of the nearest source backend upstream, for inheritance.
    pub fn source_headers(&self) -> &[TraceHeader] {
        if let Some(backend) = self.backend.get() {
            return backend.headers();
        }
        match &self.prev {
            Some(prev) => prev.source_headers(),
            None => &[],
        }
    }

    /// In-memory size of one materialized record.
    pub fn trace_size(&self) -> usize {
        match &self.tfm {
            Some(tfm) => tfm.trace_size(self),
            None => self.shape.trace_size(),
        }
    }

    /// Attach a cache sized for `size_bytes` with the given associativity.
    pub fn create_cache(self: &Arc<Self>, size_bytes: usize, assoc: usize) -> Result<()> {
        let id = self
            .pipeline()
            .map(|p| p.take_cache_id())
            .unwrap_or(self.set_id);

        let cache = TraceCache::sized_for(id, self.trace_size(), size_bytes, assoc)?;
        self.cache
            .set(cache)
            .map_err(|_| LtError::invalid("trace set already has a cache"))
    }

    /// Attach a cache with an explicit geometry.
    pub fn create_cache_manual(self: &Arc<Self>, nsets: usize, nways: usize) -> Result<()> {
        let id = self
            .pipeline()
            .map(|p| p.take_cache_id())
            .unwrap_or(self.set_id);

        let cache = TraceCache::new(id, nsets, nways)?;
        self.cache
            .set(cache)
            .map_err(|_| LtError::invalid("trace set already has a cache"))
    }

    pub(crate) fn cache(&self) -> Option<&TraceCache> {
        self.cache.get()
    }

    /// The side-channel bus of this producer, creating it on first use.
    pub(crate) fn ensure_bus(&self) -> &Arc<Bus> {
        self.bus.get_or_init(|| Arc::new(Bus::new()))
    }

    /// Whether any waiter ever attached to this node.
    pub fn has_waiters(&self) -> bool {
        self.bus.get().is_some()
    }

    /// Publish an intermediate value on `port` for any attached waiters.
    pub fn push(
        &self,
        port: libtrace_core::Port,
        index: usize,
        title: Option<&[u8]>,
        data: Option<&[u8]>,
        samples: Option<&[f32]>,
    ) -> Result<()> {
        match self.bus.get() {
            Some(bus) => bus.push(port, index, title, data, samples),
            None => Ok(()),
        }
    }

    fn materialize(self: &Arc<Self>, index: usize) -> Result<Record> {
        if let Some(tfm) = &self.tfm {
            tfm.get(self, index)
        } else if let Some(backend) = self.backend.get() {
            backend.read(index)
        } else {
            Err(LtError::invalid("trace set has neither transform nor backend"))
        }
    }

    /// Materialize the record at `index`, consulting the cache first.
    ///
    /// Concurrent calls for the same index serialize on the cache's per-set
    /// lock: the first caller fills, the others hit.
    pub fn get_trace(self: &Arc<Self>, index: usize) -> Result<TraceRef> {
        if index >= self.num_traces() {
            return Err(LtError::not_found(format!(
                "index {} out of bounds for trace set {}",
                index, self.set_id
            )));
        }

        let cache = match self.cache.get() {
            Some(cache) => cache,
            None => {
                let rec = self.materialize(index)?;
                return Ok(TraceRef {
                    t: Arc::new(Trace {
                        owner: self.clone(),
                        index,
                        rec,
                    }),
                    cached: false,
                });
            }
        };

        // hold the set lock across miss-then-insert so racing callers for
        // this congruence class wait for the fill instead of duplicating it
        let mut set = cache.lock_set(index);
        if let Some(t) = cache.lookup(&mut set, index) {
            return Ok(TraceRef { t, cached: true });
        }

        let rec = self.materialize(index)?;
        let t = Arc::new(Trace {
            owner: self.clone(),
            index,
            rec,
        });

        match cache.store(&mut set, index, t.clone()) {
            Ok(()) => Ok(TraceRef { t, cached: true }),
            Err(LtError::Exhausted { msg }) => {
                debug!("cache store failed ({}), returning uncached", msg);
                Ok(TraceRef { t, cached: false })
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_cache(&self) -> Option<&TraceCache> {
        self.cache.get()
    }

    /// Teardown for this node: transformation exit hook, backend header
    /// finalization.
    pub(crate) fn close(self: &Arc<Self>) {
        debug!("closing trace set {}", self.set_id);
        if let Some(tfm) = &self.tfm {
            tfm.exit(self);
        }
    }
}
