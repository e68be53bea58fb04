//! This contains all the enums that are used in TRS headers, the pipeline
//! configuration, and the network protocol.
//!
//! The TRS format conveys how trace records are to be interpreted through a
//! handful of small coded values (sample coding, header tags), which lends
//! itself well to being represented by enums. As a general rule, enums coming
//! off the wire or off disk have fixed numerical values and return an error
//! when an invalid value is found; enums that only ever come from the
//! configuration parser are matched by name there.
use num::FromPrimitive;
#[cfg(any(feature = "to_json", feature = "serde"))]
use serde::{Deserialize, Serialize};

use crate::errors::*;

/// On-disk sample encoding, from the `SAMPLE_CODING` (0x43) header.
///
/// The low nibble is the byte width of one raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[cfg_attr(
    any(feature = "to_json", feature = "serde"),
    derive(Serialize, Deserialize)
)]
pub enum SampleCoding {
    Byte = 0x01,
    Short = 0x02,
    Int = 0x04,
    Float = 0x14,
}

impl std::fmt::Display for SampleCoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "{:?}", self)
    }
}

impl SampleCoding {
    /// NB: We give a result here to make life simpler for ourselves down the line.
    pub fn new(source: u8) -> Result<Self> {
        SampleCoding::from_u8(source).ok_or_else(|| LtError::ParseEnum {
            f: "SampleCoding".to_string(),
            code: source as u16,
        })
    }

    /// The byte length of one raw sample on disk.
    pub fn datum_byte_length(self) -> usize {
        (self as usize) & 0xF
    }
}

/// Side-channel bus ports a waiter node can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum Port {
    Echo = 0,
    CpaProgress,
    CpaSplitPm,
    CpaSplitPmProgress,
    ExtractTimingDebug,
}

impl Port {
    pub fn new(source: u8) -> Result<Self> {
        Port::from_u8(source).ok_or_else(|| LtError::ParseEnum {
            f: "Port".to_string(),
            code: source as u16,
        })
    }
}

/// Fill order axes for the visualize sink's multi-plot layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum FillOrder {
    Rows = 0,
    Cols,
    Plots,
}

/// The cryptographic self-consistency checks `verify` knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CryptoKind {
    Aes128 = 0,
}

/// Summary statistics for the `*_along` block transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SummaryStat {
    Avg = 0,
    Dev,
    Min,
    Max,
}

/// Grouping predicates for the `*_along` block transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum AlongFilter {
    Num = 0,
    Data,
}

/// AES-128 leakage models for `aes_intermediate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum AesLeakage {
    R0R1HdNomc = 0,
    R0HwAddkeyOut,
    R0HwSboxOut,
    R10OutHd,
    R10HwSboxIn,
}

/// Network backend / export server command verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum NetCommand {
    Init = 0,
    Get,
    Die,
}

impl NetCommand {
    pub fn new(source: u32) -> Result<Self> {
        NetCommand::from_u32(source).ok_or_else(|| LtError::ParseEnum {
            f: "NetCommand".to_string(),
            code: source as u16,
        })
    }
}
