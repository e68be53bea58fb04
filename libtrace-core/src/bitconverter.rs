//! This submodule deals with converting the raw sample bytes of a record into
//! the `f32` samples the pipeline works on, and back.
//!
//! On read, raw samples are widened to `f32` and multiplied by the set's
//! y-scale; on write the inverse scaling is applied before the lossy cast
//! back to the on-disk encoding. The converter should be chosen once per set
//! for efficiency.
use crate::enums::SampleCoding;
use crate::errors::*;

use tinyvec::TinyVec;

/// This exists to save us a lot of typing.
pub type TVu8 = TinyVec<[u8; 8]>;

pub type SampleDecoder = fn(&[u8], f32) -> f32;
pub type SampleEncoder = fn(f32, f32) -> TVu8;

/// This function chooses the decoder for raw sample bytes.
///
/// ```
/// # use libtrace_core::bitconverter::decoder_chooser;
/// # use libtrace_core::enums::SampleCoding;
/// let decode = decoder_chooser(SampleCoding::Short);
///
/// let bytes = 21i16.to_le_bytes();
/// assert_eq!(decode(&bytes[..], 2.0), 42.0);
/// ```
pub fn decoder_chooser(coding: SampleCoding) -> SampleDecoder {
    match coding {
        SampleCoding::Byte => {
            fn x(input: &[u8], yscale: f32) -> f32 {
                yscale * (input[0] as i8) as f32
            }
            x
        }
        SampleCoding::Short => {
            fn x(input: &[u8], yscale: f32) -> f32 {
                yscale * i16::from_le_bytes([input[0], input[1]]) as f32
            }
            x
        }
        SampleCoding::Int => {
            fn x(input: &[u8], yscale: f32) -> f32 {
                yscale * i32::from_le_bytes([input[0], input[1], input[2], input[3]]) as f32
            }
            x
        }
        SampleCoding::Float => {
            fn x(input: &[u8], yscale: f32) -> f32 {
                yscale * f32::from_le_bytes([input[0], input[1], input[2], input[3]])
            }
            x
        }
    }
}

/// This function chooses the encoder used when writing samples back to disk.
///
/// The inverse scaling is applied before the cast, so for the integer codings
/// the conversion is lossy by design.
pub fn encoder_chooser(coding: SampleCoding) -> SampleEncoder {
    match coding {
        SampleCoding::Byte => {
            fn x(v: f32, yscale: f32) -> TVu8 {
                TinyVec::from(&((v / yscale) as i8).to_le_bytes()[..])
            }
            x
        }
        SampleCoding::Short => {
            fn x(v: f32, yscale: f32) -> TVu8 {
                TinyVec::from(&((v / yscale) as i16).to_le_bytes()[..])
            }
            x
        }
        SampleCoding::Int => {
            fn x(v: f32, yscale: f32) -> TVu8 {
                TinyVec::from(&((v / yscale) as i32).to_le_bytes()[..])
            }
            x
        }
        SampleCoding::Float => {
            fn x(v: f32, yscale: f32) -> TVu8 {
                TinyVec::from(&(v / yscale).to_le_bytes()[..])
            }
            x
        }
    }
}

/// Expand a whole raw sample buffer to scaled `f32` samples.
pub fn decode_samples(
    raw: &[u8],
    num_samples: usize,
    coding: SampleCoding,
    yscale: f32,
) -> Result<Vec<f32>> {
    let width = coding.datum_byte_length();
    if raw.len() < num_samples * width {
        return Err(LtError::decode(format!(
            "raw sample buffer too short ({} bytes, need {})",
            raw.len(),
            num_samples * width
        )));
    }

    let decode = decoder_chooser(coding);
    Ok(raw
        .chunks_exact(width)
        .take(num_samples)
        .map(|chunk| decode(chunk, yscale))
        .collect())
}

/// Pack scaled `f32` samples back into their on-disk encoding.
pub fn encode_samples(samples: &[f32], coding: SampleCoding, yscale: f32) -> Vec<u8> {
    let encode = encoder_chooser(coding);
    let mut out = Vec::with_capacity(samples.len() * coding.datum_byte_length());
    for v in samples {
        out.extend_from_slice(encode(*v, yscale).as_ref());
    }
    out
}

/// A helper function to convert ascii null terminated bytes to a string.
///
/// This function assumes that the string is ascii and will truncate it at the
/// first null byte.
/// ```
/// # use libtrace_core::bitconverter::ascii_bytes_to_string;
/// let input = b"TVLA set Fixed\0\0\0";
/// assert_eq!(&ascii_bytes_to_string(&input[..]), "TVLA set Fixed");
/// ```
pub fn ascii_bytes_to_string(bytes: &[u8]) -> String {
    let mut bytes = bytes.to_vec();
    let i = bytes.iter().position(|x| *x == 0).unwrap_or(bytes.len());
    bytes.truncate(i);
    String::from_utf8_lossy(&bytes).to_string()
}

/// Pad or truncate a title to the set's fixed title space.
pub fn fit_title(title: &str, title_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; title_size];
    let src = title.as_bytes();
    let n = src.len().min(title_size);
    out[..n].copy_from_slice(&src[..n]);
    out
}
