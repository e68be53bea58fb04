//! Render a trace set: materialize every record with a worker pool.
//!
//! A dispatcher hands monotonically increasing indices to whichever worker
//! is idle; workers block on a per-worker signal and report through a shared
//! done-semaphore. Rendering is how `save` pipelines are driven to disk --
//! the workers' `get_trace` calls resolve the upstream and the records are
//! freed immediately afterwards.
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error};
use parking_lot::Mutex;

use libtrace_core::errors::*;

use crate::graph::TraceSet;
use crate::sem::Semaphore;

enum WorkerStatus {
    Busy,
    Idle,
    Failed(String),
}

struct WorkerSlot {
    signal: Semaphore,
    /// `None` is the clean-shutdown command.
    trace_index: Mutex<Option<usize>>,
    status: Mutex<WorkerStatus>,
}

fn worker(ts: Arc<TraceSet>, slot: Arc<WorkerSlot>, done: Arc<Semaphore>) {
    loop {
        slot.signal.acquire();

        let index = match *slot.trace_index.lock() {
            Some(index) => index,
            None => {
                debug!("render worker exiting cleanly");
                return;
            }
        };

        debug!("working on trace {}", index);
        match ts.get_trace(index) {
            Ok(t) => drop(t),
            // the set's provisional length can finalize below an index the
            // dispatcher already handed out; that is the end of the stream
            Err(_) if index >= ts.num_traces() => {
                debug!("index {} beyond finalized trace count", index);
            }
            Err(e) => {
                error!("render worker failed to get trace {}: {}", index, e);
                *slot.status.lock() = WorkerStatus::Failed(e.to_string());
                done.release();
                return;
            }
        }

        *slot.status.lock() = WorkerStatus::Idle;
        done.release();
    }
}

fn run_render(ts: &Arc<TraceSet>, nthreads: usize) -> Result<()> {
    if nthreads == 0 {
        return Err(LtError::invalid("invalid number of threads"));
    }

    let done = Arc::new(Semaphore::new(nthreads));
    let slots: Vec<Arc<WorkerSlot>> = (0..nthreads)
        .map(|_| {
            Arc::new(WorkerSlot {
                signal: Semaphore::new(0),
                trace_index: Mutex::new(Some(0)),
                status: Mutex::new(WorkerStatus::Idle),
            })
        })
        .collect();

    let handles: Vec<JoinHandle<()>> = slots
        .iter()
        .map(|slot| {
            let ts = ts.clone();
            let slot = slot.clone();
            let done = done.clone();
            std::thread::spawn(move || worker(ts, slot, done))
        })
        .collect();

    let mut curr_index = 0usize;
    let mut failure: Option<String> = None;

    // the trace count may finalize downward while we run (save sentinel)
    'dispatch: while curr_index < ts.num_traces() {
        done.acquire();

        for slot in &slots {
            let mut status = slot.status.lock();
            match &*status {
                WorkerStatus::Idle => {
                    debug!("dispatching index {}", curr_index);
                    *slot.trace_index.lock() = Some(curr_index);
                    curr_index += 1;
                    *status = WorkerStatus::Busy;
                    drop(status);
                    slot.signal.release();
                    continue 'dispatch;
                }
                WorkerStatus::Failed(e) => {
                    failure = Some(e.clone());
                    break 'dispatch;
                }
                WorkerStatus::Busy => {}
            }
        }
    }

    if failure.is_none() {
        // wait for stragglers
        for _ in 0..nthreads {
            done.acquire();
        }
        for slot in &slots {
            if let WorkerStatus::Failed(e) = &*slot.status.lock() {
                failure = Some(e.clone());
            }
        }
    }

    for slot in &slots {
        *slot.trace_index.lock() = None;
        slot.signal.release();
    }
    for handle in handles {
        let _ = handle.join();
    }

    match failure {
        Some(e) => Err(LtError::invalid(format!("render worker failed: {}", e))),
        None => Ok(()),
    }
}

/// Fully render a trace set with `nthreads` workers, blocking until done.
pub fn render(ts: &Arc<TraceSet>, nthreads: usize) -> Result<()> {
    run_render(ts, nthreads)
}

/// An in-flight asynchronous render.
#[derive(Debug)]
pub struct Render {
    handle: JoinHandle<Result<()>>,
}

impl Render {
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| LtError::invalid("render controller panicked"))?
    }
}

/// Start rendering on a controller thread and return immediately.
pub fn render_async(ts: &Arc<TraceSet>, nthreads: usize) -> Render {
    let ts = ts.clone();
    Render {
        handle: std::thread::spawn(move || run_render(&ts, nthreads)),
    }
}
