//! The TRS TLV header codec.
//!
//! A TRS capture file begins with a sequence of TLV headers terminated by the
//! empty `TRACE_BLOCK` tag (0x5F), followed by fixed-width trace records.
//! Each TLV is `tag u8 ‖ length u8 ‖ payload`; when the length byte has its
//! high bit set, the low 7 bits give the number of following little-endian
//! bytes that carry the actual length.
//!
//! Unknown optional tags survive a read/write cycle: they are parsed as raw
//! bytes and re-emitted verbatim when a new set inherits the headers of its
//! upstream.
use num::FromPrimitive;

use crate::enums::SampleCoding;
use crate::errors::*;
use crate::{SetShape, DEFAULT_TITLE_SIZE, UNKNOWN_NUM_TRACES};

/// All header tags the format defines, with their classic Riscure two-letter
/// names in the comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum HeaderTag {
    NumberTraces = 0x41,  // NT
    NumberSamples = 0x42, // NS
    SampleCoding = 0x43,  // SC
    LengthData = 0x44,    // DS
    TitleSpace = 0x45,    // TS
    TraceTitle = 0x46,    // GT
    Description = 0x47,   // DC
    OffsetX = 0x48,       // XO
    LabelX = 0x49,        // XL
    LabelY = 0x4A,        // YL
    ScaleX = 0x4B,        // XS
    ScaleY = 0x4C,        // YS
    TraceOffset = 0x4D,   // TO
    LogarithmicScale = 0x4E, // LS
    AcquisitionRangeOfScope = 0x55,
    AcquisitionCouplingOfScope = 0x56,
    AcquisitionOffsetOfScope = 0x57,
    AcquisitionInputImpedance = 0x58,
    AcquisitionDeviceId = 0x59,
    AcquisitionTypeFilter = 0x5A,
    AcquisitionFrequencyFilter = 0x5B,
    AcquisitionRangeFilter = 0x5C,
    TraceBlock = 0x5F, // TB
    ExternalClockUsed = 0x60,
    ExternalClockThreshold = 0x61,
    ExternalClockMultiplier = 0x62,
    ExternalClockPhaseShift = 0x63,
    ExternalClockResamplerMask = 0x64,
    ExternalClockResamplerEnabled = 0x65,
    ExternalClockFrequency = 0x66,
    ExternalClockBase = 0x67,
    NumberView = 0x68,
    TraceOverlap = 0x69,
    GoLastTrace = 0x6A,
    InputOffset = 0x6B,
    OutputOffset = 0x6C,
    KeyOffset = 0x6D,
    InputLength = 0x6E,
    OutputLength = 0x6F,
    KeyLength = 0x70,
    NumberOfEnabledChannels = 0x71,
    NumberOfUsedOscilloscopes = 0x72,
    XyScanWidth = 0x73,
    XyScanHeight = 0x74,
    XyMeasurementsPerSpot = 0x75,
}

/// The payload type a known tag carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderType {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
}

impl HeaderTag {
    pub fn new(source: u8) -> Result<Self> {
        HeaderTag::from_u8(source).ok_or_else(|| LtError::ParseEnum {
            f: "HeaderTag".to_string(),
            code: source as u16,
        })
    }

    pub fn header_type(self) -> HeaderType {
        use self::HeaderTag::*;
        match self {
            TraceTitle | Description | LabelX | LabelY => HeaderType::Str,
            AcquisitionDeviceId => HeaderType::Bytes,
            ScaleX | ScaleY | AcquisitionRangeOfScope | AcquisitionOffsetOfScope
            | AcquisitionInputImpedance | AcquisitionFrequencyFilter | AcquisitionRangeFilter
            | ExternalClockThreshold | ExternalClockFrequency => HeaderType::Float,
            ExternalClockUsed | ExternalClockResamplerEnabled | TraceOverlap | GoLastTrace => {
                HeaderType::Bool
            }
            _ => HeaderType::Int,
        }
    }

    /// Whether the tag must be present in a well-formed file.
    pub fn required(self) -> bool {
        matches!(
            self,
            HeaderTag::NumberTraces
                | HeaderTag::NumberSamples
                | HeaderTag::SampleCoding
                | HeaderTag::TraceBlock
        )
    }

    pub fn description(self) -> &'static str {
        use self::HeaderTag::*;
        match self {
            NumberTraces => "Number of traces",
            NumberSamples => "Number of samples per trace",
            SampleCoding => "Sample Coding",
            LengthData => "Length of cryptographic data included in trace",
            TitleSpace => "Title space reserved per trace",
            TraceTitle => "Global trace title",
            Description => "Description",
            OffsetX => "Offset in X-axis for trace representation",
            LabelX => "Label of X-axis",
            LabelY => "Label of Y-axis",
            ScaleX => "Scale value for X-axis",
            ScaleY => "Scale value for Y-axis",
            TraceOffset => "Trace offset for displaying trace numbers",
            LogarithmicScale => "Logarithmic scale",
            AcquisitionRangeOfScope => "Range of the scope used to perform acquisition",
            AcquisitionCouplingOfScope => "Coupling of the scope used to perform acquisition",
            AcquisitionOffsetOfScope => "Offset of the scope used to perform acquisition",
            AcquisitionInputImpedance => "Input impedance of the scope used to perform acquisition",
            AcquisitionDeviceId => "Device ID of the scope used to perform acquisition",
            AcquisitionTypeFilter => "The type of filter used during acquisition",
            AcquisitionFrequencyFilter => "Frequency of the filter used during acquisition",
            AcquisitionRangeFilter => "Range of the filter used during acquisition",
            TraceBlock => "Trace block marker: an empty TLV that marks the end of the header",
            ExternalClockUsed => "External clock used",
            ExternalClockThreshold => "External clock threshold",
            ExternalClockMultiplier => "External clock multiplier",
            ExternalClockPhaseShift => "External clock phase shift",
            ExternalClockResamplerMask => "External clock resampler mask",
            ExternalClockResamplerEnabled => "External clock resampler enabled",
            ExternalClockFrequency => "External clock frequency",
            ExternalClockBase => "External clock time base",
            NumberView => "View number of traces: number of traces to show on opening",
            TraceOverlap => "Overlap: whether to overlap traces in case of multi trace view",
            GoLastTrace => "Go to last trace on opening",
            InputOffset => "Input data offset in trace data",
            OutputOffset => "Output data offset in trace data",
            KeyOffset => "Key data offset in trace data",
            InputLength => "Input data length in trace data",
            OutputLength => "Output data length in trace data",
            KeyLength => "Key data length in trace data",
            NumberOfEnabledChannels => "Number of oscilloscope channels used for measurement",
            NumberOfUsedOscilloscopes => "Number of oscilloscopes used for measurement",
            XyScanWidth => "Number of steps in the \"x\" direction during XY scan",
            XyScanHeight => "Number of steps in the \"y\" direction during XY scan",
            XyMeasurementsPerSpot => {
                "Number of consecutive measurements done per spot during XY scan"
            }
        }
    }
}

/// A parsed header payload. Unknown tags land in `Bytes`.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Int(u32),
    Float(f32),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

impl HeaderValue {
    pub fn as_int(&self) -> Option<u32> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            HeaderValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// One header as it appears in the file: raw tag plus decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceHeader {
    pub tag: u8,
    pub value: HeaderValue,
}

/// Everything learned from a file's header block.
#[derive(Debug, Clone)]
pub struct ParsedHeaders {
    pub headers: Vec<TraceHeader>,
    pub shape: SetShape,
    /// Byte offset of the first trace record.
    pub trace_start: usize,
}

fn read_tag_and_len(buf: &[u8], pos: &mut usize) -> Result<(u8, usize)> {
    if *pos + 2 > buf.len() {
        return Err(LtError::decode("header block truncated in tag/length"));
    }

    let tag = buf[*pos];
    let len = buf[*pos + 1];
    *pos += 2;

    if len & 0x80 != 0 {
        let nbytes = (len & 0x7F) as usize;
        if nbytes > 4 || *pos + nbytes > buf.len() {
            return Err(LtError::decode("header block truncated in long length"));
        }

        let mut actual = 0usize;
        for (i, b) in buf[*pos..*pos + nbytes].iter().enumerate() {
            actual |= (*b as usize) << (8 * i);
        }
        *pos += nbytes;
        Ok((tag, actual))
    } else {
        Ok((tag, len as usize))
    }
}

fn decode_value(tag: u8, payload: &[u8]) -> HeaderValue {
    let ty = HeaderTag::from_u8(tag)
        .map(HeaderTag::header_type)
        .unwrap_or(HeaderType::Bytes);

    match ty {
        HeaderType::Int => {
            let mut v = 0u32;
            for (i, b) in payload.iter().take(4).enumerate() {
                v |= (*b as u32) << (8 * i);
            }
            HeaderValue::Int(v)
        }
        HeaderType::Float => {
            if payload.len() >= 4 {
                HeaderValue::Float(f32::from_le_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]))
            } else {
                HeaderValue::Float(0.0)
            }
        }
        HeaderType::Bool => HeaderValue::Bool(payload.first().copied().unwrap_or(0) != 0),
        HeaderType::Str => {
            HeaderValue::Str(crate::bitconverter::ascii_bytes_to_string(payload))
        }
        HeaderType::Bytes => HeaderValue::Bytes(payload.to_vec()),
    }
}

fn encode_value(value: &HeaderValue, tag: u8) -> Vec<u8> {
    let ty = HeaderTag::from_u8(tag)
        .map(HeaderTag::header_type)
        .unwrap_or(HeaderType::Bytes);

    match (ty, value) {
        (HeaderType::Int, HeaderValue::Int(v)) => {
            let width = fixed_int_width(tag);
            v.to_le_bytes()[..width].to_vec()
        }
        (HeaderType::Float, HeaderValue::Float(v)) => v.to_le_bytes().to_vec(),
        (HeaderType::Bool, HeaderValue::Bool(v)) => vec![*v as u8],
        (_, HeaderValue::Str(s)) => s.as_bytes().to_vec(),
        (_, HeaderValue::Bytes(b)) => b.clone(),
        // a mismatched pairing can only come from a caller bug; emit raw
        (_, HeaderValue::Int(v)) => v.to_le_bytes().to_vec(),
        (_, HeaderValue::Float(v)) => v.to_le_bytes().to_vec(),
        (_, HeaderValue::Bool(v)) => vec![*v as u8],
    }
}

/// Payload widths of the fixed-size integer tags.
fn fixed_int_width(tag: u8) -> usize {
    match HeaderTag::from_u8(tag) {
        Some(HeaderTag::SampleCoding) | Some(HeaderTag::TitleSpace)
        | Some(HeaderTag::LogarithmicScale) => 1,
        Some(HeaderTag::LengthData) => 2,
        _ => 4,
    }
}

/// Parse the TLV block at the start of `buf`.
///
/// Returns the full header list (unknown tags preserved as bytes), the
/// derived [`SetShape`], and the offset of the first trace record.
pub fn parse_headers(buf: &[u8]) -> Result<ParsedHeaders> {
    let mut pos = 0usize;
    let mut headers = Vec::new();

    let mut num_traces = None;
    let mut num_samples = None;
    let mut coding = None;
    let mut title_size = DEFAULT_TITLE_SIZE;
    let mut data_size = 0usize;
    let mut yscale = 1.0f32;

    let mut input = (None, None);
    let mut output = (None, None);
    let mut key = (None, None);

    loop {
        let (tag, len) = read_tag_and_len(buf, &mut pos)?;
        if pos + len > buf.len() {
            return Err(LtError::decode("header block truncated in payload"));
        }

        let value = decode_value(tag, &buf[pos..pos + len]);
        pos += len;

        match (HeaderTag::from_u8(tag), &value) {
            (Some(HeaderTag::NumberTraces), HeaderValue::Int(v)) => num_traces = Some(*v as usize),
            (Some(HeaderTag::NumberSamples), HeaderValue::Int(v)) => {
                num_samples = Some(*v as usize)
            }
            (Some(HeaderTag::SampleCoding), HeaderValue::Int(v)) => {
                coding = Some(SampleCoding::new(*v as u8)?)
            }
            (Some(HeaderTag::TitleSpace), HeaderValue::Int(v)) => title_size = *v as usize,
            (Some(HeaderTag::LengthData), HeaderValue::Int(v)) => data_size = *v as usize,
            (Some(HeaderTag::ScaleY), HeaderValue::Float(v)) => yscale = *v,
            (Some(HeaderTag::InputOffset), HeaderValue::Int(v)) => input.0 = Some(*v as usize),
            (Some(HeaderTag::InputLength), HeaderValue::Int(v)) => input.1 = Some(*v as usize),
            (Some(HeaderTag::OutputOffset), HeaderValue::Int(v)) => output.0 = Some(*v as usize),
            (Some(HeaderTag::OutputLength), HeaderValue::Int(v)) => output.1 = Some(*v as usize),
            (Some(HeaderTag::KeyOffset), HeaderValue::Int(v)) => key.0 = Some(*v as usize),
            (Some(HeaderTag::KeyLength), HeaderValue::Int(v)) => key.1 = Some(*v as usize),
            _ => {}
        }

        let done = tag == HeaderTag::TraceBlock as u8;
        headers.push(TraceHeader { tag, value });
        if done {
            break;
        }
    }

    let (num_traces, num_samples, coding) = match (num_traces, num_samples, coding) {
        (Some(t), Some(s), Some(c)) => (t, s, c),
        _ => return Err(LtError::decode("missing required TRS header")),
    };

    let mut shape = SetShape::new(num_traces, num_samples, title_size, data_size, coding, yscale);
    shape.input = input.0.zip(input.1);
    shape.output = output.0.zip(output.1);
    shape.key = key.0.zip(key.1);

    Ok(ParsedHeaders {
        headers,
        shape,
        trace_start: pos,
    })
}

fn push_tlv(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    out.push(tag);
    if payload.len() < 0x80 {
        out.push(payload.len() as u8);
    } else {
        // long form, emit as many LE bytes as the length needs
        let mut len = payload.len();
        let mut bytes = Vec::new();
        while len > 0 {
            bytes.push((len & 0xFF) as u8);
            len >>= 8;
        }
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
    out.extend_from_slice(payload);
}

/// Serialized header block plus the offset of the `NUMBER_TRACES` payload,
/// which the finalization pass patches in place.
#[derive(Debug, Clone)]
pub struct WrittenHeaders {
    pub bytes: Vec<u8>,
    pub num_traces_offset: usize,
}

/// Serialize a header block for a new set.
///
/// The required and shape-bearing tags are derived from `shape`; every extra
/// header inherited from an upstream set is re-emitted verbatim, except the
/// tags the shape owns and the terminator.
pub fn write_headers(shape: &SetShape, inherited: &[TraceHeader]) -> WrittenHeaders {
    let mut bytes = Vec::new();

    let nt = if shape.num_traces == UNKNOWN_NUM_TRACES {
        0
    } else {
        shape.num_traces as u32
    };

    let num_traces_offset = bytes.len() + 2;
    push_tlv(&mut bytes, HeaderTag::NumberTraces as u8, &nt.to_le_bytes());
    push_tlv(
        &mut bytes,
        HeaderTag::NumberSamples as u8,
        &(shape.num_samples as u32).to_le_bytes(),
    );
    push_tlv(
        &mut bytes,
        HeaderTag::SampleCoding as u8,
        &[shape.coding as u8],
    );
    push_tlv(
        &mut bytes,
        HeaderTag::LengthData as u8,
        &(shape.data_size as u16).to_le_bytes(),
    );
    push_tlv(
        &mut bytes,
        HeaderTag::TitleSpace as u8,
        &[shape.title_size as u8],
    );
    push_tlv(
        &mut bytes,
        HeaderTag::ScaleY as u8,
        &shape.yscale.to_le_bytes(),
    );

    let owned = [
        HeaderTag::NumberTraces as u8,
        HeaderTag::NumberSamples as u8,
        HeaderTag::SampleCoding as u8,
        HeaderTag::LengthData as u8,
        HeaderTag::TitleSpace as u8,
        HeaderTag::ScaleY as u8,
        HeaderTag::TraceBlock as u8,
    ];

    for h in inherited {
        if !owned.contains(&h.tag) {
            push_tlv(&mut bytes, h.tag, &encode_value(&h.value, h.tag));
        }
    }

    push_tlv(&mut bytes, HeaderTag::TraceBlock as u8, &[]);

    WrittenHeaders {
        bytes,
        num_traces_offset,
    }
}

/// Pretty-print every parsed header with its description.
pub fn dump_headers(parsed: &ParsedHeaders) -> String {
    let mut out = String::new();
    for h in &parsed.headers {
        let desc = HeaderTag::from_u8(h.tag)
            .map(HeaderTag::description)
            .unwrap_or("Unknown header");

        let val = match &h.value {
            HeaderValue::Int(v) => format!("{}", v),
            HeaderValue::Float(v) => format!("{}", v),
            HeaderValue::Bool(v) => format!("{}", *v as u8),
            HeaderValue::Str(s) => s.clone(),
            HeaderValue::Bytes(b) => format!("{} bytes", b.len()),
        };

        out.push_str(&format!("{}: {}\n", desc, val));
    }
    out
}
