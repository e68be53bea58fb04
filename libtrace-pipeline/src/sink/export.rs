//! Serve a trace set to network consumers.
//!
//! A controller thread accepts connections; each client gets a worker
//! running the INIT / GET / DIE request loop over the secure framing.
//! Completed workers are reaped between accepts.
use std::convert::TryInto;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, error};

use libtrace_backends::net::NetShape;
use libtrace_backends::secure::{recv_frame, send_frame};
use libtrace_core::errors::*;
use libtrace_core::NetCommand;

use crate::graph::TraceSet;

fn serve_client(ts: Arc<TraceSet>, mut stream: TcpStream) -> Result<()> {
    loop {
        let frame = match recv_frame(&mut stream) {
            Ok(frame) => frame,
            // client hung up without a DIE; treat as a clean close
            Err(LtError::StdIoError(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        if frame.len() != 4 {
            return Err(LtError::protocol("bad command frame length"));
        }
        let cmd = NetCommand::new(u32::from_le_bytes([
            frame[0], frame[1], frame[2], frame[3],
        ]))
        .map_err(|_| LtError::protocol("unrecognized command"))?;

        match cmd {
            NetCommand::Init => {
                let mut shape = ts.shape().clone();
                shape.num_traces = ts.num_traces();
                send_frame(&mut stream, &NetShape::from_shape(&shape).to_bytes())?;
            }
            NetCommand::Get => {
                let frame = recv_frame(&mut stream)?;
                if frame.len() != 8 {
                    return Err(LtError::protocol("bad index frame length"));
                }
                let index = u64::from_le_bytes(frame[..8].try_into()?) as usize;

                let t = ts.get_trace(index)?;
                let shape = ts.shape();

                let mut buf =
                    Vec::with_capacity(shape.title_size + shape.data_size + shape.num_samples * 4);
                let mut title = t.title().unwrap_or(&[]).to_vec();
                title.resize(shape.title_size, 0);
                buf.extend_from_slice(&title);

                let mut data = t.data().unwrap_or(&[]).to_vec();
                data.resize(shape.data_size, 0);
                buf.extend_from_slice(&data);

                match t.samples() {
                    Some(samples) => {
                        for v in samples {
                            buf.extend_from_slice(&v.to_le_bytes());
                        }
                    }
                    None => buf.resize(buf.len() + shape.num_samples * 4, 0),
                }

                send_frame(&mut stream, &buf)?;
            }
            NetCommand::Die => {
                debug!("client closed cleanly");
                return Ok(());
            }
        }
    }
}

fn run_export(ts: &Arc<TraceSet>, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    let mut workers: Vec<JoinHandle<Result<()>>> = Vec::new();

    loop {
        let (stream, addr) = listener.accept()?;
        debug!("accepted export client {}", addr);

        let ts = ts.clone();
        workers.push(std::thread::spawn(move || serve_client(ts, stream)));

        // reap finished workers between accepts
        let mut alive = Vec::new();
        for handle in workers {
            if handle.is_finished() {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("export worker encountered error: {}", e);
                        return Err(e);
                    }
                    Err(_) => return Err(LtError::invalid("export worker panicked")),
                }
            } else {
                alive.push(handle);
            }
        }
        workers = alive;
    }
}

/// Serve forever on `port`, blocking the calling thread.
pub fn export(ts: &Arc<TraceSet>, port: u16) -> Result<()> {
    run_export(ts, port)
}

/// An in-flight asynchronous export server.
#[derive(Debug)]
pub struct Export {
    handle: JoinHandle<Result<()>>,
}

impl Export {
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| LtError::invalid("export controller panicked"))?
    }
}

/// Start serving on a controller thread and return immediately.
pub fn export_async(ts: &Arc<TraceSet>, port: u16) -> Export {
    let ts = ts.clone();
    Export {
        handle: std::thread::spawn(move || run_export(&ts, port)),
    }
}
