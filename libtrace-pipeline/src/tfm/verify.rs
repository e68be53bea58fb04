//! Drop records whose associated data fails its cryptographic
//! self-consistency check.
use std::sync::Arc;

use log::debug;

use libtrace_core::errors::*;
use libtrace_core::{CryptoKind, Record};

use crate::crypto::verify_aes128;
use crate::graph::{NodeSeed, TraceSet, Transform};

use super::passthrough;

struct TfmVerify {
    which: CryptoKind,
}

impl Transform for TfmVerify {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn init(&mut self, prev: &Arc<TraceSet>) -> Result<NodeSeed> {
        match self.which {
            CryptoKind::Aes128 => {
                if prev.shape().data_size < 48 {
                    return Err(LtError::invalid(
                        "AES-128 verification needs pt/ct/key data (48 bytes)",
                    ));
                }
            }
        }

        Ok(NodeSeed::shaped(prev.shape().clone()))
    }

    fn get(&self, ts: &Arc<TraceSet>, index: usize) -> Result<Record> {
        let prev = ts.prev().unwrap();
        let verified = {
            let t = prev.get_trace(index)?;
            match t.data() {
                Some(data) => match self.which {
                    CryptoKind::Aes128 => verify_aes128(data),
                },
                // not an error condition necessarily
                None => false,
            }
        };

        if verified {
            passthrough(ts, index)
        } else {
            debug!("trace {} failed verification", index);
            Ok(Record::empty())
        }
    }
}

pub fn tfm_verify(which: CryptoKind) -> Box<dyn Transform> {
    Box::new(TfmVerify { which })
}
