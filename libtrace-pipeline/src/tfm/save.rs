//! Persist an upstream of unknown length as a new on-disk set.
//!
//! Workers resolve upstream records out of order; a commit queue keyed by the
//! upstream index orders them back into sequential on-disk records, drained
//! by a dedicated commit thread. A sentinel entry marks end-of-stream: it
//! freezes the output count, signals a one-shot event, and refuses later
//! inserts.
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, warn};
use parking_lot::{Condvar, Mutex};

use libtrace_backends::create_backend;
use libtrace_core::errors::*;
use libtrace_core::{Record, UNKNOWN_NUM_TRACES};

use crate::graph::{NodeSeed, TraceSet, Transform};

const SENTINEL: usize = usize::MAX;
const COMMIT_NAP: Duration = Duration::from_millis(1);

enum Slot {
    /// A worker holds the upstream index but has not resolved it yet.
    Pending,
    Ready(Record),
    Sentinel,
}

struct QueueInner {
    slots: BTreeMap<usize, Slot>,
    /// Next upstream index to hand to a worker.
    prev_next: usize,
    /// Records committed to the backend so far.
    num_written: usize,
    sentinel_seen: bool,
    shutdown: bool,
    thread_err: Option<String>,
}

struct CommitQueue {
    inner: Mutex<QueueInner>,
    sentinel_event: Condvar,
}

pub struct TfmSave {
    spec: String,
    queue: Arc<CommitQueue>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn commit_thread(queue: Arc<CommitQueue>, ts: Weak<TraceSet>) {
    loop {
        std::thread::sleep(COMMIT_NAP);

        // take the longest ready prefix under the lock
        let batch = {
            let mut inner = queue.inner.lock();
            if inner.shutdown {
                debug!("commit thread exiting cleanly");
                return;
            }

            let mut ready = Vec::new();
            for (&key, slot) in inner.slots.iter() {
                match slot {
                    Slot::Pending => break,
                    Slot::Ready(_) | Slot::Sentinel => ready.push(key),
                }
            }

            ready
                .into_iter()
                .map(|key| (key, inner.slots.remove(&key).unwrap()))
                .collect::<Vec<_>>()
        };

        if batch.is_empty() {
            continue;
        }

        let ts = match ts.upgrade() {
            Some(ts) => ts,
            None => return,
        };

        warn!("writing {} traces", batch.len());
        for (_, slot) in batch {
            match slot {
                Slot::Pending => unreachable!("pending entries never leave the queue"),
                Slot::Sentinel => {
                    let mut inner = queue.inner.lock();
                    debug!(
                        "encountered sentinel, setting num_traces {}",
                        inner.num_written
                    );
                    inner.sentinel_seen = true;
                    ts.set_num_traces(inner.num_written);
                    queue.sentinel_event.notify_all();
                }
                Slot::Ready(rec) => {
                    let seen = queue.inner.lock().sentinel_seen;
                    if seen {
                        error!("encountered trace to write after seeing sentinel");
                        queue.inner.lock().thread_err =
                            Some("write after sentinel".to_string());
                        return;
                    }

                    let index = queue.inner.lock().num_written;
                    let backend = ts.backend().expect("save node always has a backend");
                    if let Err(e) = backend.write(index, &rec) {
                        error!("failed to append trace to file: {}", e);
                        queue.inner.lock().thread_err = Some(e.to_string());
                        return;
                    }

                    queue.inner.lock().num_written += 1;
                }
            }
        }
    }
}

impl TfmSave {
    /// Pull upstream indices until `out_index` is committed or the stream
    /// ends.
    fn render_to_index(&self, ts: &Arc<TraceSet>, out_index: usize) -> Result<()> {
        let prev = ts.prev().unwrap();

        loop {
            let prev_index = {
                let mut inner = self.queue.inner.lock();
                if let Some(err) = &inner.thread_err {
                    return Err(LtError::invalid(format!("commit thread failed: {}", err)));
                }
                if out_index < inner.num_written || inner.sentinel_seen {
                    return Ok(());
                }

                let idx = inner.prev_next;
                inner.prev_next += 1;
                idx
            };

            // the upstream length is read fresh: provisional counts finalize
            // while we run
            if prev_index >= prev.num_traces() {
                // send the sentinel down the queue and wait for the barrier
                let mut inner = self.queue.inner.lock();
                inner.slots.entry(SENTINEL).or_insert(Slot::Sentinel);
                while !inner.sentinel_seen && inner.thread_err.is_none() {
                    self.queue.sentinel_event.wait(&mut inner);
                }
                return Ok(());
            }

            self.queue
                .inner
                .lock()
                .slots
                .insert(prev_index, Slot::Pending);

            let t = match prev.get_trace(prev_index) {
                Ok(t) => t,
                // lost the race against an upstream count finalization
                Err(LtError::NotFound { .. }) if prev_index >= prev.num_traces() => {
                    self.queue.inner.lock().slots.remove(&prev_index);
                    continue;
                }
                Err(e) => {
                    self.queue.inner.lock().slots.remove(&prev_index);
                    return Err(e);
                }
            };

            let shape = ts.shape();
            let valid = t.samples().is_some()
                && (shape.title_size == 0 || t.title().is_some())
                && (shape.data_size == 0 || t.data().is_some());

            let mut inner = self.queue.inner.lock();
            if valid {
                debug!("prev_index {} is a valid index, appending", prev_index);
                inner.slots.insert(prev_index, Slot::Ready(t.record().clone()));
            } else {
                debug!("prev_index {} not a valid index", prev_index);
                inner.slots.remove(&prev_index);
            }
        }
    }
}

impl Transform for TfmSave {
    fn name(&self) -> &'static str {
        "save"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let mut shape = prev.shape().clone();
        shape.num_traces = UNKNOWN_NUM_TRACES;

        let backend = create_backend(&self.spec, &shape, prev.source_headers())?;
        Ok(NodeSeed {
            shape,
            backend: Some(backend),
        })
    }

    fn attach(&self, ts: &Arc<TraceSet>) {
        let queue = self.queue.clone();
        let weak = Arc::downgrade(ts);
        let handle = std::thread::spawn(move || commit_thread(queue, weak));
        *self.handle.lock() = Some(handle);
    }

    fn get(&self, ts: &Arc<TraceSet>, out_index: usize) -> Result<Record> {
        {
            let inner = self.queue.inner.lock();
            if out_index >= inner.num_written && !inner.sentinel_seen {
                drop(inner);
                self.render_to_index(ts, out_index)?;
            }
        }

        let num_written = self.queue.inner.lock().num_written;
        if out_index < num_written {
            debug!("reading trace {} back from file", out_index);
            ts.backend()
                .expect("save node always has a backend")
                .read(out_index)
        } else {
            debug!("setting trace {} to null", out_index);
            Ok(Record::empty())
        }
    }

    fn exit(&self, ts: &Arc<TraceSet>) {
        // wait for the commit list to drain
        loop {
            let inner = self.queue.inner.lock();
            if inner.slots.is_empty() || inner.thread_err.is_some() {
                break;
            }
            drop(inner);
            std::thread::sleep(COMMIT_NAP);
        }

        self.queue.inner.lock().shutdown = true;
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }

        let num_written = self.queue.inner.lock().num_written;
        ts.set_num_traces(num_written);
        if let Some(backend) = ts.backend() {
            if let Err(e) = backend.finalize(num_written) {
                error!("failed to finalize backend headers: {}", e);
            }
        }
    }
}

pub fn tfm_save<S: Into<String>>(spec: S) -> Box<dyn Transform> {
    Box::new(TfmSave {
        spec: spec.into(),
        queue: Arc::new(CommitQueue {
            inner: Mutex::new(QueueInner {
                slots: BTreeMap::new(),
                prev_next: 0,
                num_written: 0,
                sentinel_seen: false,
                shutdown: false,
                thread_err: None,
            }),
            sentinel_event: Condvar::new(),
        }),
        handle: Mutex::new(None),
    })
}
