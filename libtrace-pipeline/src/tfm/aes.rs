//! AES-128 instantiations of the CPA engine.
//!
//! `aes_intermediate` attacks one chosen leakage point with 256 guesses per
//! key byte; `aes_knownkey` profiles every intermediate value of the round
//! trellis given the real key in the associated data.
use libtrace_core::errors::*;
use libtrace_core::{AesLeakage, SetShape};

use crate::crypto::{
    add_key, expand_key, hamming_distance, hamming_weight, mix_cols, shift_rows, sub_bytes,
    verify_aes128, SBOX, SBOX_INV, SHIFT_ROWS, SHIFT_ROWS_INV,
};
use crate::graph::Transform;

use super::cpa::{tfm_cpa, PowerModel};

/// 16 key bytes x 256 guesses, 256 models per output trace.
const PMS_PER_TRACE: usize = 256;

struct AesIntermediate {
    leakage: AesLeakage,
    verify_data: bool,
}

impl AesIntermediate {
    fn leak(&self, data: &[u8], key_index: usize, key_guess: u8) -> f32 {
        match self.leakage {
            AesLeakage::R0R1HdNomc => {
                let state = SBOX[(data[key_index] ^ key_guess) as usize];
                hamming_distance(data[SHIFT_ROWS_INV[key_index]], state) as f32
            }
            AesLeakage::R0HwAddkeyOut => hamming_weight(data[key_index] ^ key_guess) as f32,
            AesLeakage::R0HwSboxOut => {
                hamming_weight(SBOX[(data[key_index] ^ key_guess) as usize]) as f32
            }
            AesLeakage::R10OutHd => {
                let state = SBOX_INV[(data[16 + key_index] ^ key_guess) as usize];
                hamming_distance(state, data[16 + SHIFT_ROWS[key_index]]) as f32
            }
            AesLeakage::R10HwSboxIn => {
                let state = data[16 + SHIFT_ROWS_INV[key_index]] ^ key_guess;
                hamming_weight(SBOX_INV[state as usize]) as f32
            }
        }
    }
}

impl PowerModel for AesIntermediate {
    fn output_shape(&self, prev: &SetShape) -> (usize, usize) {
        (16 * 256 / PMS_PER_TRACE, prev.num_samples * PMS_PER_TRACE)
    }

    fn compute(&self, data: &[u8], index: usize) -> Result<f32> {
        if data.len() < 48 {
            return Err(LtError::invalid("trace data too short for AES-128"));
        }
        if self.verify_data && !verify_aes128(data) {
            return Err(LtError::invalid("data failed validation"));
        }

        let key_index = index / 256;
        let key_guess = (index % 256) as u8;
        Ok(self.leak(data, key_index, key_guess))
    }

    fn progress_title(&self, index: usize, count: usize) -> String {
        let key_index = index / 256;
        let key_guess = index % 256;
        format!("CPA {} pm {:02X} ({} traces)", key_index, key_guess, count)
    }
}

pub fn tfm_aes_intermediate(leakage: AesLeakage, verify_data: bool) -> Box<dyn Transform> {
    tfm_cpa(Box::new(AesIntermediate {
        leakage,
        verify_data,
    }))
}

// For each of 10 rounds and 16 byte indices, evaluate 4 intermediate states;
// also for each of 16 byte indices, the input/output bytes themselves.
const KNOWNKEY_NUM_PMS: usize = 16 * (10 * 4 + 1);
const KNOWNKEY_PMS_PER_TRACE: usize = KNOWNKEY_NUM_PMS / 8;

#[derive(Clone, Copy, PartialEq)]
enum AesState {
    AddRoundKey,
    SubBytes,
    ShiftRows,
    MixCols,
}

/// Walk the round trellis up to intermediate `byte_model` and return the
/// state, plus the name/round of the last operation applied.
fn trellis_state(data: &[u8], byte_model: usize) -> ([u8; 16], &'static str, usize) {
    let ks = expand_key(&data[32..48]);
    let mut state = [0u8; 16];
    state.copy_from_slice(&data[0..16]);

    let mut aes_state = AesState::AddRoundKey;
    let mut name = "Input";
    let mut round = 0usize;

    for _ in 0..byte_model {
        match aes_state {
            AesState::AddRoundKey => {
                add_key(&mut state, &ks[16 * round..16 * (round + 1)]);
                round += 1;
                aes_state = AesState::SubBytes;
                name = "AddRoundKey";
            }
            AesState::SubBytes => {
                sub_bytes(&mut state);
                aes_state = AesState::ShiftRows;
                name = "SubBytes";
            }
            AesState::ShiftRows => {
                shift_rows(&mut state);
                aes_state = if round == 10 {
                    AesState::AddRoundKey
                } else {
                    AesState::MixCols
                };
                name = "ShiftRows";
            }
            AesState::MixCols => {
                mix_cols(&mut state);
                aes_state = AesState::AddRoundKey;
                name = "MixCols";
            }
        }
    }

    (state, name, round)
}

struct AesKnownKey;

impl PowerModel for AesKnownKey {
    fn output_shape(&self, prev: &SetShape) -> (usize, usize) {
        (
            KNOWNKEY_NUM_PMS / KNOWNKEY_PMS_PER_TRACE,
            prev.num_samples * KNOWNKEY_PMS_PER_TRACE,
        )
    }

    fn compute(&self, data: &[u8], index: usize) -> Result<f32> {
        if data.len() < 48 {
            return Err(LtError::invalid("trace data too short for AES-128"));
        }

        let byte_index = index % 16;
        let byte_model = index / 16;
        let (state, _, _) = trellis_state(data, byte_model);
        Ok(hamming_weight(state[byte_index]) as f32)
    }

    fn progress_title(&self, index: usize, count: usize) -> String {
        let byte_index = index % 16;
        let byte_model = index / 16;

        if byte_model == 0 {
            format!("CPA HW(pt[{}]) ({} traces)", byte_index, count)
        } else if byte_model == 40 {
            format!("CPA HW(ct[{}]) ({} traces)", byte_index, count)
        } else {
            let (_, name, round) = trellis_state(&[0u8; 48], byte_model);
            format!(
                "CPA HW({}_out_{}[{}]) ({} traces)",
                name, round, byte_index, count
            )
        }
    }
}

pub fn tfm_aes_knownkey() -> Box<dyn Transform> {
    tfm_cpa(Box::new(AesKnownKey))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt_aes128;

    fn sample_data(pt: [u8; 16], key: [u8; 16]) -> Vec<u8> {
        let ct = encrypt_aes128(&pt, &key);
        let mut data = Vec::with_capacity(48);
        data.extend_from_slice(&pt);
        data.extend_from_slice(&ct);
        data.extend_from_slice(&key);
        data
    }

    #[test]
    fn sbox_out_model_matches_direct_computation() {
        let model = AesIntermediate {
            leakage: AesLeakage::R0HwSboxOut,
            verify_data: false,
        };
        let data = sample_data([0x41; 16], [0x2B; 16]);

        // byte 0, guess 0x2B
        let index = 0x2B;
        let expected = hamming_weight(SBOX[(0x41 ^ 0x2B) as usize]) as f32;
        assert_eq!(model.compute(&data, index).unwrap(), expected);
    }

    #[test]
    fn verify_gated_model_rejects_corrupt_data() {
        let model = AesIntermediate {
            leakage: AesLeakage::R0HwSboxOut,
            verify_data: true,
        };
        let mut data = sample_data([1; 16], [2; 16]);
        assert!(model.compute(&data, 0).is_ok());

        data[20] ^= 0xFF;
        assert!(model.compute(&data, 0).is_err());
    }

    #[test]
    fn knownkey_covers_input_and_output_bytes() {
        let pt = [0x13; 16];
        let key = [0x77; 16];
        let data = sample_data(pt, key);
        let model = AesKnownKey;

        // byte_model 0 is the raw input
        for i in 0..16 {
            assert_eq!(
                model.compute(&data, i).unwrap(),
                hamming_weight(pt[i]) as f32
            );
        }

        // byte_model 40 is the ciphertext (10 rounds x 4 states walked)
        let ct = encrypt_aes128(&pt, &key);
        for i in 0..16 {
            assert_eq!(
                model.compute(&data, 40 * 16 + i).unwrap(),
                hamming_weight(ct[i]) as f32
            );
        }
    }

    #[test]
    fn knownkey_output_plan() {
        let prev = SetShape::new(
            100,
            50,
            0,
            48,
            libtrace_core::SampleCoding::Float,
            1.0,
        );
        let (nt, ns) = AesKnownKey.output_shape(&prev);
        assert_eq!(nt, 8);
        assert_eq!(ns, 50 * 82);
        assert_eq!(nt * 82, 656);
    }
}
