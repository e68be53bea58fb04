//! The raw TRS backend.
//!
//! Reading maps the file into memory and slices records at
//! `trace_start + index * trace_length`; writing seeks a plain file handle to
//! the record slot, guarded by the per-set lock, and refreshes the
//! `NUMBER_TRACES` header after every append so a crashed producer leaves a
//! readable prefix behind.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use log::debug;
use memmap2::Mmap;

use libtrace_core::bitconverter::{decode_samples, encode_samples};
use libtrace_core::errors::*;
use libtrace_core::{
    parse_headers, write_headers, Record, SetShape, TraceHeader, UNKNOWN_NUM_TRACES,
};

use crate::Backend;

pub(crate) enum Store {
    /// Read-only mapping of an existing file.
    Map(Mmap),
    /// A file being produced; `num_written` enforces sequential appends.
    File(Mutex<WriteState>),
}

pub(crate) struct WriteState {
    pub file: File,
    pub num_written: usize,
}

pub struct TrsBackend {
    pub(crate) shape: SetShape,
    pub(crate) headers: Vec<TraceHeader>,
    pub(crate) trace_start: usize,
    pub(crate) num_traces_offset: usize,
    pub(crate) store: Store,
}

impl TrsBackend {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: the mapping is read-only and trace sets are never edited in
        // place, so the underlying file does not change under us.
        let map = unsafe { Mmap::map(&file)? };
        let parsed = parse_headers(&map)?;

        debug!(
            "opened trs set {} with {} traces of {} samples",
            path, parsed.shape.num_traces, parsed.shape.num_samples
        );

        Ok(TrsBackend {
            shape: parsed.shape,
            headers: parsed.headers,
            trace_start: parsed.trace_start,
            num_traces_offset: 0,
            store: Store::Map(map),
        })
    }

    pub fn create(path: &str, shape: &SetShape, extras: &[TraceHeader]) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let written = write_headers(shape, extras);
        file.write_all(&written.bytes)?;

        let parsed = parse_headers(&written.bytes)?;
        let mut shape = shape.clone();
        shape.num_traces = UNKNOWN_NUM_TRACES;

        Ok(TrsBackend {
            shape,
            headers: parsed.headers,
            trace_start: written.bytes.len(),
            num_traces_offset: written.num_traces_offset,
            store: Store::File(Mutex::new(WriteState {
                file,
                num_written: 0,
            })),
        })
    }

    fn record_from_raw(&self, raw: &[u8]) -> Result<Record> {
        let title_size = self.shape.title_size;
        let data_size = self.shape.data_size;

        let title = (title_size > 0).then(|| raw[..title_size].to_vec());
        let data = (data_size > 0).then(|| raw[title_size..title_size + data_size].to_vec());
        let samples = if self.shape.num_samples > 0 {
            Some(decode_samples(
                &raw[title_size + data_size..],
                self.shape.num_samples,
                self.shape.coding,
                self.shape.yscale,
            )?)
        } else {
            None
        };

        Ok(Record {
            title,
            data,
            samples,
        })
    }

    pub(crate) fn record_to_raw(&self, rec: &Record) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.shape.trace_length());

        let mut title = rec.title.clone().unwrap_or_default();
        title.resize(self.shape.title_size, 0);
        raw.extend_from_slice(&title);

        let mut data = rec.data.clone().unwrap_or_default();
        data.resize(self.shape.data_size, 0);
        raw.extend_from_slice(&data);

        match &rec.samples {
            Some(samples) => raw.extend_from_slice(&encode_samples(
                samples,
                self.shape.coding,
                self.shape.yscale,
            )),
            None => raw.resize(self.shape.trace_length(), 0),
        }

        raw
    }

    fn patch_num_traces(&self, file: &mut File, count: usize) -> Result<()> {
        file.seek(SeekFrom::Start(self.num_traces_offset as u64))?;
        file.write_all(&(count as u32).to_le_bytes())?;
        file.flush()?;
        Ok(())
    }
}

impl Backend for TrsBackend {
    fn shape(&self) -> &SetShape {
        &self.shape
    }

    fn headers(&self) -> &[TraceHeader] {
        &self.headers
    }

    fn read(&self, index: usize) -> Result<Record> {
        let len = self.shape.trace_length();
        let start = self.trace_start + index * len;

        match &self.store {
            Store::Map(map) => {
                if start + len > map.len() {
                    return Err(LtError::not_found(format!(
                        "trace {} beyond end of mapped set",
                        index
                    )));
                }
                self.record_from_raw(&map[start..start + len])
            }
            Store::File(lock) => {
                let mut state = lock.lock().unwrap();
                if index >= state.num_written {
                    return Err(LtError::not_found(format!(
                        "trace {} not yet written",
                        index
                    )));
                }

                let mut raw = vec![0u8; len];
                state.file.seek(SeekFrom::Start(start as u64))?;
                state.file.read_exact(&mut raw)?;
                self.record_from_raw(&raw)
            }
        }
    }

    fn write(&self, index: usize, rec: &Record) -> Result<()> {
        let lock = match &self.store {
            Store::File(lock) => lock,
            Store::Map(_) => return Err(LtError::invalid("trace set was opened read-only")),
        };

        let mut state = lock.lock().unwrap();
        if index != state.num_written {
            return Err(LtError::invalid(format!(
                "out-of-order trace sent to write ({} != {})",
                index, state.num_written
            )));
        }

        let raw = self.record_to_raw(rec);
        let start = self.trace_start + index * self.shape.trace_length();

        debug!("trace {} writing {} bytes at {}", index, raw.len(), start);
        state.file.seek(SeekFrom::Start(start as u64))?;
        state.file.write_all(&raw)?;

        state.num_written += 1;
        let count = state.num_written;
        self.patch_num_traces(&mut state.file, count)
    }

    fn finalize(&self, num_traces: usize) -> Result<()> {
        match &self.store {
            Store::File(lock) => {
                let mut state = lock.lock().unwrap();
                self.patch_num_traces(&mut state.file, num_traces)
            }
            Store::Map(_) => Ok(()),
        }
    }
}
