//! Live multi-plot display of a trace stream through gnuplot.
//!
//! The node passes records through untouched while buffering their samples
//! into base groups of `rows * cols * plots` traces. Complete groups are
//! handed to a dedicated render thread, which drives a gnuplot child process
//! in a multiplot grid laid out by the configured axis fill order, either to
//! an interactive terminal or to an animated file.
use std::io::Write as _;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use fnv::FnvHashMap;
use log::{debug, error};
use parking_lot::Mutex;

use libtrace_core::enums::FillOrder;
use libtrace_core::errors::*;
use libtrace_core::Record;

use crate::graph::{NodeSeed, TraceSet, Transform};

use super::passthrough;

#[derive(Debug, Clone)]
pub struct VizArgs {
    pub rows: usize,
    pub cols: usize,
    pub plots: usize,
    pub samples: usize,
    pub order: [FillOrder; 3],
    pub filename: Option<String>,
}

impl VizArgs {
    fn group_size(&self) -> usize {
        self.rows * self.cols * self.plots
    }

    /// Index of plot `(r, c, p)` within a base group under the fill order.
    fn plot_index(&self, r: usize, c: usize, p: usize) -> usize {
        let (rows, cols, plots) = (self.rows, self.cols, self.plots);
        match (self.order[0], self.order[1]) {
            (FillOrder::Plots, FillOrder::Rows) => r * (cols * plots) + c * plots + p,
            (FillOrder::Plots, FillOrder::Cols) => c * (rows * plots) + r * plots + p,
            (FillOrder::Rows, FillOrder::Plots) => r * (cols * plots) + c + cols * p,
            (FillOrder::Rows, FillOrder::Cols) => r + c + (rows * cols) * p,
            (FillOrder::Cols, FillOrder::Rows) => c * rows + r + (rows * cols) * p,
            (FillOrder::Cols, FillOrder::Plots) => c * (rows * plots) + r + rows * p,
            _ => r * (cols * plots) + c * plots + p,
        }
    }
}

struct Group {
    base: usize,
    count: usize,
    traces: Vec<Option<Vec<f32>>>,
}

struct VizState {
    groups: FnvHashMap<usize, Group>,
    failed: bool,
}

struct TfmVisualize {
    args: VizArgs,
    state: Mutex<VizState>,
    tx: Mutex<Option<Sender<Group>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn spawn_gnuplot(args: &VizArgs) -> Result<Child> {
    let mut child = Command::new("gnuplot")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .map_err(|e| LtError::invalid(format!("failed to open gnuplot -- installed? ({})", e)))?;

    let stdin = child.stdin.as_mut().expect("piped stdin");
    match &args.filename {
        Some(filename) => {
            writeln!(stdin, "set term gif animate size 2560,1440")?;
            writeln!(stdin, "set output \"{}\"", filename)?;
        }
        None => writeln!(stdin, "set term x11")?,
    }
    writeln!(stdin, "set grid")?;
    Ok(child)
}

fn draw_group(child: &mut Child, args: &VizArgs, group: &Group, num_samples: usize) -> Result<()> {
    let stdin = child.stdin.as_mut().expect("piped stdin");
    let step = if args.samples > 0 && num_samples > args.samples {
        num_samples / args.samples
    } else {
        1
    };

    writeln!(
        stdin,
        "set multiplot layout {},{} title \"traces {}..{}\"",
        args.rows,
        args.cols,
        group.base * args.group_size(),
        (group.base + 1) * args.group_size() - 1
    )?;

    for r in 0..args.rows {
        for c in 0..args.cols {
            let curves: Vec<String> = (0..args.plots).map(|_| "'-' with lines".into()).collect();
            writeln!(stdin, "plot {}", curves.join(", "))?;

            for p in 0..args.plots {
                let index = args.plot_index(r, c, p);
                match group.traces.get(index).and_then(|t| t.as_ref()) {
                    // dropped records plot flat zero
                    Some(samples) if !samples.is_empty() => {
                        for v in samples.iter().step_by(step) {
                            writeln!(stdin, "{}", v)?;
                        }
                    }
                    _ => writeln!(stdin, "0")?,
                }
                writeln!(stdin, "e")?;
            }
        }
    }

    writeln!(stdin, "unset multiplot")?;
    stdin.flush()?;
    Ok(())
}

fn render_thread(args: VizArgs, rx: Receiver<Group>, num_samples: usize) {
    let mut child = match spawn_gnuplot(&args) {
        Ok(child) => child,
        Err(e) => {
            error!("{}", e);
            // drain so producers don't block on a dead renderer
            for _ in rx {}
            return;
        }
    };

    for group in rx {
        debug!("rendering group {}", group.base);
        if let Err(e) = draw_group(&mut child, &args, &group, num_samples) {
            error!("failed to render group {}: {}", group.base, e);
            break;
        }
    }

    let _ = child.stdin.take();
    let _ = child.wait();
}

impl Transform for TfmVisualize {
    fn name(&self) -> &'static str {
        "visualize"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        if self.args.group_size() == 0 {
            return Err(LtError::invalid("visualize grid has zero plots"));
        }

        Ok(NodeSeed::shaped(prev.shape().clone()))
    }

    fn attach(&self, ts: &Arc<TraceSet>) {
        let (tx, rx) = channel();
        let args = self.args.clone();
        let num_samples = ts.num_samples();

        *self.tx.lock() = Some(tx);
        *self.handle.lock() = Some(std::thread::spawn(move || {
            render_thread(args, rx, num_samples)
        }));
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        let rec = passthrough(ts, index)?;

        let group_size = self.args.group_size();
        let base = index / group_size;
        let slot = index % group_size;

        let complete = {
            let mut state = self.state.lock();
            if state.failed {
                return Err(LtError::invalid("visualize render thread failed"));
            }

            let group = state.groups.entry(base).or_insert_with(|| Group {
                base,
                count: 0,
                traces: vec![None; group_size],
            });

            if group.traces[slot].is_none() {
                group.count += 1;
            }
            group.traces[slot] = Some(rec.samples.clone().unwrap_or_default());

            if group.count == group_size {
                state.groups.remove(&base)
            } else {
                None
            }
        };

        if let Some(group) = complete {
            let tx = self.tx.lock();
            if let Some(tx) = tx.as_ref() {
                if tx.send(group).is_err() {
                    self.state.lock().failed = true;
                    return Err(LtError::invalid("visualize render thread is gone"));
                }
            }
        }

        Ok(rec)
    }

    fn exit(&self, _ts: &Arc<TraceSet>) {
        // closing the channel lets the render thread drain and finish
        self.tx.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

pub fn tfm_visualize(args: VizArgs) -> Box<dyn Transform> {
    Box::new(TfmVisualize {
        args,
        state: Mutex::new(VizState {
            groups: FnvHashMap::default(),
            failed: false,
        }),
        tx: Mutex::new(None),
        handle: Mutex::new(None),
    })
}
