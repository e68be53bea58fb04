//! The network client backend.
//!
//! Connects to an export server (`<ip> <port>` source string). Every request
//! opens a fresh connection, speaks one command, and closes with `DIE`, so a
//! single serving pipeline can feed many short-lived readers without
//! per-client bookkeeping on our side.
use std::convert::TryInto;
use std::io::Write;
use std::net::TcpStream;

use log::debug;

use libtrace_core::enums::{NetCommand, SampleCoding};
use libtrace_core::errors::*;
use libtrace_core::{Record, SetShape, TraceHeader};

use crate::secure::{recv_frame, send_frame};
use crate::Backend;

/// The INIT response: the serving set's shape on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct NetShape {
    pub num_traces: u64,
    pub num_samples: u64,
    pub datatype: u8,
    pub title_size: u64,
    pub data_size: u64,
    pub yscale: f32,
}

impl NetShape {
    pub const WIRE_LEN: usize = 37;

    pub fn from_shape(shape: &SetShape) -> Self {
        NetShape {
            num_traces: shape.num_traces as u64,
            num_samples: shape.num_samples as u64,
            datatype: shape.coding as u8,
            title_size: shape.title_size as u64,
            data_size: shape.data_size as u64,
            yscale: shape.yscale,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_LEN);
        out.extend_from_slice(&self.num_traces.to_le_bytes());
        out.extend_from_slice(&self.num_samples.to_le_bytes());
        out.push(self.datatype);
        out.extend_from_slice(&self.title_size.to_le_bytes());
        out.extend_from_slice(&self.data_size.to_le_bytes());
        out.extend_from_slice(&self.yscale.to_le_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::WIRE_LEN {
            return Err(LtError::protocol(format!(
                "bad shape descriptor length {}",
                buf.len()
            )));
        }

        Ok(NetShape {
            num_traces: u64::from_le_bytes(buf[0..8].try_into()?),
            num_samples: u64::from_le_bytes(buf[8..16].try_into()?),
            datatype: buf[16],
            title_size: u64::from_le_bytes(buf[17..25].try_into()?),
            data_size: u64::from_le_bytes(buf[25..33].try_into()?),
            yscale: f32::from_le_bytes(buf[33..37].try_into()?),
        })
    }
}

pub struct NetBackend {
    addr: String,
    shape: SetShape,
}

fn send_command(stream: &mut TcpStream, cmd: NetCommand) -> Result<()> {
    send_frame(stream, &(cmd as u32).to_le_bytes())
}

fn close_connection(mut stream: TcpStream) {
    // best effort; the server also cleans up on EOF
    let _ = send_command(&mut stream, NetCommand::Die);
    let _ = stream.flush();
}

impl NetBackend {
    pub fn open(spec: &str) -> Result<Self> {
        let (ip, port) = spec
            .split_once(char::is_whitespace)
            .ok_or_else(|| LtError::invalid(format!("malformed net source string: {}", spec)))?;
        let addr = format!("{}:{}", ip.trim(), port.trim());

        let mut stream = TcpStream::connect(&addr)?;
        send_command(&mut stream, NetCommand::Init)?;
        let resp = recv_frame(&mut stream)?;
        close_connection(stream);

        let net = NetShape::from_bytes(&resp)?;
        let shape = SetShape::new(
            net.num_traces as usize,
            net.num_samples as usize,
            net.title_size as usize,
            net.data_size as usize,
            SampleCoding::new(net.datatype)?,
            net.yscale,
        );

        debug!(
            "net set at {} reports {} traces of {} samples",
            addr, shape.num_traces, shape.num_samples
        );

        Ok(NetBackend { addr, shape })
    }
}

impl Backend for NetBackend {
    fn shape(&self) -> &SetShape {
        &self.shape
    }

    fn headers(&self) -> &[TraceHeader] {
        &[]
    }

    fn read(&self, index: usize) -> Result<Record> {
        let mut stream = TcpStream::connect(&self.addr)?;

        send_command(&mut stream, NetCommand::Get)?;
        send_frame(&mut stream, &(index as u64).to_le_bytes())?;
        let buf = recv_frame(&mut stream)?;
        close_connection(stream);

        let title_size = self.shape.title_size;
        let data_size = self.shape.data_size;
        let expecting = title_size + data_size + self.shape.num_samples * 4;
        if buf.len() != expecting {
            return Err(LtError::protocol(format!(
                "bad trace payload length {} (expecting {})",
                buf.len(),
                expecting
            )));
        }

        let title = (title_size > 0).then(|| buf[..title_size].to_vec());
        let data = (data_size > 0).then(|| buf[title_size..title_size + data_size].to_vec());
        let samples = (self.shape.num_samples > 0).then(|| {
            buf[title_size + data_size..]
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        });

        Ok(Record {
            title,
            data,
            samples,
        })
    }

    fn write(&self, _index: usize, _rec: &Record) -> Result<()> {
        Err(LtError::invalid("writing to a network backend is invalid"))
    }

    fn finalize(&self, _num_traces: usize) -> Result<()> {
        Err(LtError::invalid("writing to a network backend is invalid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libtrace_core::enums::SampleCoding;

    #[test]
    fn shape_descriptor_roundtrip() {
        let shape = SetShape::new(1000, 64, 32, 48, SampleCoding::Short, 0.25);
        let net = NetShape::from_shape(&shape);
        let bytes = net.to_bytes();
        assert_eq!(bytes.len(), NetShape::WIRE_LEN);
        assert_eq!(NetShape::from_bytes(&bytes).unwrap(), net);
    }

    #[test]
    fn short_descriptor_rejected() {
        assert!(NetShape::from_bytes(&[0u8; 20]).is_err());
    }
}
