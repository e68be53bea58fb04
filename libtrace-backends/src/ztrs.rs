//! The compressed TRS backend.
//!
//! Headers are plain TRS, but each record is framed for bidirectional
//! walking: the record stream opens with an all-ones `u32` sentinel, and each
//! record is `this_size u32 ‖ title ‖ data ‖ deflated samples ‖ this_size
//! u32`. Because record sizes vary, reads walk from a cached
//! `(position, offset)` cursor, so a sequential scan costs one record per
//! read in either direction.
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;
use memmap2::Mmap;

use libtrace_core::bitconverter::{decode_samples, encode_samples};
use libtrace_core::errors::*;
use libtrace_core::{
    parse_headers, write_headers, Record, SetShape, TraceHeader, UNKNOWN_NUM_TRACES,
};

use crate::Backend;

const START_SENTINEL: u32 = u32::MAX;

struct Cursor {
    /// Trace index the cursor is parked before.
    position: usize,
    /// Byte offset of the framing word before record `position`.
    offset: usize,
}

enum Store {
    Map {
        map: Mmap,
        cursor: Mutex<Cursor>,
    },
    File(Mutex<WriteState>),
}

struct WriteState {
    file: File,
    num_written: usize,
}

pub struct ZtrsBackend {
    shape: SetShape,
    headers: Vec<TraceHeader>,
    trace_start: usize,
    num_traces_offset: usize,
    store: Store,
}

fn read_u32(map: &[u8], offset: usize) -> Result<u32> {
    if offset + 4 > map.len() {
        return Err(LtError::decode("record frame truncated"));
    }
    Ok(u32::from_le_bytes([
        map[offset],
        map[offset + 1],
        map[offset + 2],
        map[offset + 3],
    ]))
}

fn inflate(compressed: &[u8], expecting: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expecting);
    ZlibDecoder::new(compressed).read_to_end(&mut out)?;

    if out.len() != expecting {
        return Err(LtError::decode(format!(
            "failed to decompress all data ({} bytes, expecting {})",
            out.len(),
            expecting
        )));
    }
    Ok(out)
}

fn deflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::best());
    enc.write_all(raw)?;
    Ok(enc.finish()?)
}

impl ZtrsBackend {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: read-only mapping of a file that is never edited in place.
        let map = unsafe { Mmap::map(&file)? };
        let parsed = parse_headers(&map)?;

        if read_u32(&map, parsed.trace_start)? != START_SENTINEL {
            return Err(LtError::decode("missing start-of-file record sentinel"));
        }

        debug!(
            "opened ztrs set {} with {} traces of {} samples",
            path, parsed.shape.num_traces, parsed.shape.num_samples
        );

        let trace_start = parsed.trace_start;
        Ok(ZtrsBackend {
            shape: parsed.shape,
            headers: parsed.headers,
            trace_start,
            num_traces_offset: 0,
            store: Store::Map {
                map,
                cursor: Mutex::new(Cursor {
                    position: 0,
                    offset: trace_start,
                }),
            },
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

        Ok(ZtrsBackend {
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
}

impl Backend for ZtrsBackend {
    fn shape(&self) -> &SetShape {
        &self.shape
    }

    fn headers(&self) -> &[TraceHeader] {
        &self.headers
    }

    fn read(&self, index: usize) -> Result<Record> {
        let (map, cursor) = match &self.store {
            Store::Map { map, cursor } => (map, cursor),
            Store::File(_) => {
                return Err(LtError::invalid("reading back a ztrs set being written"))
            }
        };

        let title_size = self.shape.title_size;
        let data_size = self.shape.data_size;
        let raw_len = self.shape.num_samples * self.shape.coding.datum_byte_length();

        let mut cur = cursor.lock().unwrap();
        loop {
            // the framing word at the cursor is the previous record's
            // trailing size (or the start sentinel)
            let last_size = read_u32(map, cur.offset)?;

            if index < cur.position {
                cur.offset = (cur.offset + 4)
                    .checked_sub(title_size + data_size + last_size as usize + 12)
                    .ok_or_else(|| LtError::decode("record frame walks past start of file"))?;
                cur.position -= 1;
                continue;
            }

            let this_size = read_u32(map, cur.offset + 4)? as usize;
            let payload = cur.offset + 8;

            if index > cur.position {
                cur.offset = payload + title_size + data_size + this_size;
                cur.position += 1;
                continue;
            }

            if payload + title_size + data_size + this_size + 4 > map.len() {
                return Err(LtError::decode(format!(
                    "record {} extends past end of file",
                    index
                )));
            }

            let title = (title_size > 0).then(|| map[payload..payload + title_size].to_vec());
            let data = (data_size > 0).then(|| {
                map[payload + title_size..payload + title_size + data_size].to_vec()
            });

            let compressed =
                &map[payload + title_size + data_size..payload + title_size + data_size + this_size];
            let raw = inflate(compressed, raw_len)?;
            let samples = (self.shape.num_samples > 0)
                .then(|| {
                    decode_samples(
                        &raw,
                        self.shape.num_samples,
                        self.shape.coding,
                        self.shape.yscale,
                    )
                })
                .transpose()?;

            // leave the cursor parked for the next position
            cur.offset = payload + title_size + data_size + this_size;
            cur.position += 1;

            return Ok(Record {
                title,
                data,
                samples,
            });
        }
    }

    fn write(&self, index: usize, rec: &Record) -> Result<()> {
        let lock = match &self.store {
            Store::File(lock) => lock,
            Store::Map { .. } => return Err(LtError::invalid("trace set was opened read-only")),
        };

        let mut state = lock.lock().unwrap();
        if index != state.num_written {
            return Err(LtError::invalid(format!(
                "out-of-order trace sent to write ({} != {})",
                index, state.num_written
            )));
        }

        let raw = match &rec.samples {
            Some(samples) => encode_samples(samples, self.shape.coding, self.shape.yscale),
            None => vec![0u8; self.shape.num_samples * self.shape.coding.datum_byte_length()],
        };
        let compressed = deflate(&raw)?;

        debug!(
            "compressed trace {} by {:.3}",
            index,
            compressed.len() as f32 / raw.len().max(1) as f32
        );

        let mut title = rec.title.clone().unwrap_or_default();
        title.resize(self.shape.title_size, 0);
        let mut data = rec.data.clone().unwrap_or_default();
        data.resize(self.shape.data_size, 0);

        state.file.seek(SeekFrom::End(0))?;
        if state.num_written == 0 {
            state.file.write_all(&START_SENTINEL.to_le_bytes())?;
        }

        let size = compressed.len() as u32;
        state.file.write_all(&size.to_le_bytes())?;
        state.file.write_all(&title)?;
        state.file.write_all(&data)?;
        state.file.write_all(&compressed)?;
        state.file.write_all(&size.to_le_bytes())?;

        state.num_written += 1;
        let count = state.num_written as u32;

        state
            .file
            .seek(SeekFrom::Start(self.num_traces_offset as u64))?;
        state.file.write_all(&count.to_le_bytes())?;
        state.file.flush()?;
        Ok(())
    }

    fn finalize(&self, num_traces: usize) -> Result<()> {
        match &self.store {
            Store::File(lock) => {
                let mut state = lock.lock().unwrap();
                state
                    .file
                    .seek(SeekFrom::Start(self.num_traces_offset as u64))?;
                state.file.write_all(&(num_traces as u32).to_le_bytes())?;
                state.file.flush()?;
                Ok(())
            }
            Store::Map { .. } => Ok(()),
        }
    }
}
