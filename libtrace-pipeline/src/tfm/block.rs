//! The generic block engine.
//!
//! Groups inputs into blocks by a client predicate, then emits one or more
//! output records per finished block. A shared `next_index` counter hands
//! consecutive input indices to whichever worker asks next, so any number of
//! threads can drive the same node; the block list and the output index
//! assignment live under one state lock.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use libtrace_core::bitconverter::fit_title;
use libtrace_core::errors::*;
use libtrace_core::{Port, Record, SampleCoding, SetShape, UNKNOWN_NUM_TRACES};

use crate::graph::{NodeSeed, Trace, TraceSet, Transform};

pub const LIST_LENGTH: usize = 16;
pub const BLOCK_TITLE_SIZE: usize = 128;

/// When a block's output index is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Immediately on creation -- one block per input.
    Singular,
    /// When the in-flight block list reaches [`LIST_LENGTH`], the oldest
    /// block is closed.
    ListLen,
}

/// The output-shape fields a block client controls.
pub struct BlockShape {
    pub num_samples: usize,
    pub data_size: usize,
    pub coding: SampleCoding,
    pub yscale: f32,
}

/// The client half of a block transformation.
pub trait BlockConsumer: Send + Sync {
    type Block: Send;

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<BlockShape>;

    fn init_waiter(
        &self,
        shape: &mut SetShape,
        port: Port,
        producer: &Arc<TraceSet>,
    ) -> Result<()> {
        let _ = (shape, port, producer);
        Err(LtError::invalid("no ports to register"))
    }

    /// Open a new block for a trace no existing block matched.
    fn initialize(&self, t: &Trace) -> Result<Self::Block>;

    /// Uninteresting traces are dropped before any grouping.
    fn interesting(&self, t: &Trace) -> bool;

    fn matches(&self, t: &Trace, block: &Self::Block) -> bool;

    fn accumulate(&self, t: &Trace, block: &mut Self::Block) -> Result<()>;

    /// Emit one output record. `Ok(true)` means the block has more outputs
    /// pending; `Ok(false)` retires it.
    fn finalize(
        &self,
        rec: &mut Record,
        block: &mut Self::Block,
        ts: &Arc<TraceSet>,
    ) -> Result<bool>;

    fn exit(&self) {}
}

struct BlockEntry<B> {
    done: bool,
    src_index: usize,
    res_index: usize,
    num_out: usize,
    block: B,
}

struct BlockState<B> {
    blocks: Vec<BlockEntry<B>>,
    done_index: usize,
    exhausted: bool,
}

pub struct TfmBlock<C: BlockConsumer> {
    consumer: C,
    criteria: Completion,
    next_index: AtomicUsize,
    state: Mutex<BlockState<C::Block>>,
}

impl<C: BlockConsumer> TfmBlock<C> {
    fn accumulate_into(&self, t: &Trace) -> Result<()> {
        // one block per input: the potentially heavy accumulation can run
        // outside the state lock
        if self.criteria == Completion::Singular {
            let mut block = self.consumer.initialize(t)?;
            self.consumer.accumulate(t, &mut block)?;

            let mut st = self.state.lock();
            let done_index = st.done_index;
            st.done_index += 1;
            st.blocks.push(BlockEntry {
                done: true,
                src_index: t.index(),
                res_index: done_index,
                num_out: 0,
                block,
            });
            return Ok(());
        }

        let mut st = self.state.lock();
        for entry in st.blocks.iter_mut() {
            if !entry.done && self.consumer.matches(t, &entry.block) {
                return self.consumer.accumulate(t, &mut entry.block);
            }
        }

        let mut block = self.consumer.initialize(t)?;
        self.consumer.accumulate(t, &mut block)?;
        st.blocks.push(BlockEntry {
            done: false,
            src_index: t.index(),
            res_index: t.index(),
            num_out: 0,
            block,
        });

        // finalized-but-undelivered blocks still occupy the list, so
        // saturation closes one open block per insert
        if st.blocks.len() >= LIST_LENGTH {
            let done_index = st.done_index;
            if let Some(oldest) = st.blocks.iter_mut().find(|e| !e.done) {
                oldest.done = true;
                oldest.res_index = done_index;
                st.done_index += 1;
            }
        }

        Ok(())
    }

    fn drain_open_blocks(&self, ts: &Arc<TraceSet>) {
        let mut st = self.state.lock();
        if st.exhausted {
            return;
        }

        st.exhausted = true;
        let mut done_index = st.done_index;
        for entry in st.blocks.iter_mut() {
            if !entry.done {
                entry.done = true;
                entry.res_index = done_index;
                done_index += 1;
            }
        }
        st.done_index = done_index;

        // provisional; blocks with more than one output extend it
        ts.set_num_traces(st.done_index);
    }

    fn finalize_out(&self, ts: &Arc<TraceSet>, out_index: usize) -> Result<Record> {
        let mut st = self.state.lock();
        if out_index >= st.done_index {
            return Err(LtError::invalid("finalize called too early"));
        }

        let pos = st
            .blocks
            .iter()
            .position(|e| e.done && e.res_index == out_index)
            .ok_or_else(|| {
                LtError::not_found(format!(
                    "no result block in list for output index {}",
                    out_index
                ))
            })?;

        let mut rec = Record::empty();
        let more = {
            let entry = &mut st.blocks[pos];
            self.consumer.finalize(&mut rec, &mut entry.block, ts)?
        };

        let (src_index, out_no) = {
            let entry = &mut st.blocks[pos];
            let out_no = entry.num_out;
            entry.num_out += 1;
            (entry.src_index, out_no)
        };

        if rec.title.is_none() && !rec.is_empty() {
            rec.title = Some(fit_title(
                &format!("Block {}.{}", src_index, out_no),
                BLOCK_TITLE_SIZE,
            ));
        }

        if more {
            let done_index = st.done_index;
            st.blocks[pos].res_index = done_index;
            st.done_index += 1;
            if st.exhausted {
                ts.set_num_traces(st.done_index);
            }
        } else {
            st.blocks.remove(pos);
            if st.exhausted && st.blocks.is_empty() {
                ts.set_num_traces(st.done_index);
            }
        }

        Ok(rec)
    }
}

impl<C: BlockConsumer> Transform for TfmBlock<C> {
    fn name(&self) -> &'static str {
        "block"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        let block_shape = self.consumer.init(prev)?;

        let shape = SetShape::new(
            UNKNOWN_NUM_TRACES,
            block_shape.num_samples,
            BLOCK_TITLE_SIZE,
            block_shape.data_size,
            block_shape.coding,
            block_shape.yscale,
        );
        Ok(NodeSeed::shaped(shape))
    }

    fn init_waiter(
        &self,
        shape: &mut SetShape,
        port: Port,
        producer: &Arc<TraceSet>,
    ) -> Result<()> {
        self.consumer.init_waiter(shape, port, producer)
    }

    fn trace_size(&self, ts: &TraceSet) -> usize {
        ts.shape().trace_size()
    }

    fn get(&self, ts: &Arc<TraceSet>, out_index: usize) -> Result<Record> {
        let prev = ts.prev().unwrap();

        loop {
            {
                let st = self.state.lock();
                if out_index < st.done_index {
                    break;
                }
                if st.exhausted {
                    return Ok(Record::empty());
                }
            }

            let index = self.next_index.fetch_add(1, Ordering::Relaxed);
            if index >= prev.num_traces() {
                self.drain_open_blocks(ts);
                continue;
            }

            let t = prev.get_trace(index)?;
            if self.consumer.interesting(&t) {
                self.accumulate_into(&t)?;
            }
        }

        self.finalize_out(ts, out_index)
    }

    fn exit(&self, _ts: &Arc<TraceSet>) {
        self.consumer.exit();
    }
}

pub fn tfm_block<C: BlockConsumer + 'static>(
    consumer: C,
    criteria: Completion,
) -> Box<dyn Transform> {
    Box::new(TfmBlock {
        consumer,
        criteria,
        next_index: AtomicUsize::new(0),
        state: Mutex::new(BlockState {
            blocks: Vec::new(),
            done_index: 0,
            exhausted: false,
        }),
    })
}
