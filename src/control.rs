//! Minimal control-plane wire protocol between the pool and its workers.
//!
//! Framing is length-prefixed bincode, the same mechanics as the teacher's
//! `encrypted_comms` module (8-byte little-endian length prefix followed by
//! a bincode payload) but without the AES-GCM layer: this control plane only
//! carries setup metadata and heartbeats, and runs over the same ssh/scp
//! transports that already provide confidentiality for everything else, so
//! adding a second encryption layer here would be redundant.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::setup_metadata::SetupMetadata;

/// Requests a worker's control-plane listener can receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Ask for the frozen [`SetupMetadata`]. Idempotent: the answer is the
    /// same no matter how many times it's asked.
    MetadataPull,
    /// Liveness probe.
    Heartbeat,
}

/// Replies a worker's control-plane listener can send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Metadata(SetupMetadata),
    HeartbeatAck,
}

/// Writes one length-prefixed bincode frame to `stream`.
pub fn send_frame<W: Write, T: Serialize>(stream: &mut W, value: &T) -> Result<()> {
    let payload = bincode::serialize(value)?;
    let len = payload.len() as u64;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(&payload)?;
    stream.flush()?;
    Ok(())
}

/// Reads one length-prefixed bincode frame from `stream`.
pub fn recv_frame<R: Read, T: for<'de> Deserialize<'de>>(stream: &mut R) -> Result<T> {
    let mut len_buf = [0u8; 8];
    stream.read_exact(&mut len_buf)?;
    let len = u64::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(bincode::deserialize(&payload)?)
}

/// A running control-plane listener on a worker. Bound once, at the end of
/// `prepare_remote`; the metadata it serves is fixed at that point.
pub struct ControlServer {
    local_addr: std::net::SocketAddr,
    shutdown: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ControlServer {
    /// Binds a listener on `bind_addr` (use `"127.0.0.1:0"` for an ephemeral
    /// port) and serves `metadata` to every connecting client until
    /// [`ControlServer::shutdown`] is called.
    pub fn spawn(bind_addr: &str, metadata: SetupMetadata) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let metadata = Arc::new(metadata);
        let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || accept_loop(listener, metadata, shutdown_clone));

        Ok(ControlServer { local_addr, shutdown, handle: Some(handle) })
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(listener: TcpListener, metadata: Arc<SetupMetadata>, shutdown: Arc<std::sync::atomic::AtomicBool>) {
    let mut workers = Vec::new();
    while !shutdown.load(std::sync::atomic::Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("control connection from {peer}");
                let metadata = metadata.clone();
                workers.push(thread::spawn(move || {
                    if let Err(err) = serve_connection(stream, &metadata) {
                        warn!("control connection from {peer} ended with error: {err}");
                    }
                }));
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(20));
            }
            Err(err) => {
                error!("control listener accept failed: {err}");
                break;
            }
        }
    }
    for worker in workers {
        let _ = worker.join();
    }
}

fn serve_connection(mut stream: TcpStream, metadata: &SetupMetadata) -> Result<()> {
    loop {
        let command: Command = match recv_frame(&mut stream) {
            Ok(cmd) => cmd,
            Err(Error::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = match command {
            Command::MetadataPull => Response::Metadata(metadata.clone()),
            Command::Heartbeat => Response::HeartbeatAck,
        };
        send_frame(&mut stream, &response)?;
    }
}

/// Client side: connects, sends one command, reads one response.
pub fn request(addr: std::net::SocketAddr, command: &Command) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)?;
    send_frame(&mut stream, command)?;
    recv_frame(&mut stream)
}

/// Pulls setup metadata from a worker's control-plane listener.
pub fn pull_metadata(addr: std::net::SocketAddr) -> Result<SetupMetadata> {
    match request(addr, &Command::MetadataPull)? {
        Response::Metadata(meta) => Ok(meta),
        other => {
            error!("unexpected response to MetadataPull: {other:?}");
            Err(Error::InvalidConfig { reason: "worker returned unexpected control-plane response".to_string() })
        }
    }
}

/// Sends a heartbeat and reports whether the worker responded.
pub fn heartbeat(addr: std::net::SocketAddr) -> Result<bool> {
    match request(addr, &Command::Heartbeat)? {
        Response::HeartbeatAck => Ok(true),
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup_metadata::WorkspacePaths;

    fn sample_metadata() -> SetupMetadata {
        SetupMetadata {
            push_files: vec![("/a".into(), "/remote/a".into())],
            push_dirs: vec![],
            push_dir: None,
            setup_script: vec![],
            env: vec![],
            workspace_paths: WorkspacePaths {
                local: "/local/ws".into(),
                remote: "/remote/ws".into(),
            },
            workspace_pushed: true,
            working_dir: "/remote/ws".into(),
        }
    }

    #[test]
    fn frame_round_trips_over_a_pipe() {
        let mut buf: Vec<u8> = Vec::new();
        send_frame(&mut buf, &Command::Heartbeat).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let cmd: Command = recv_frame(&mut cursor).unwrap();
        assert!(matches!(cmd, Command::Heartbeat));
    }

    #[test]
    fn metadata_pull_returns_the_same_bytes_every_time() {
        let metadata = sample_metadata();
        let server = ControlServer::spawn("127.0.0.1:0", metadata.clone()).unwrap();
        let addr = server.local_addr();

        let first = pull_metadata(addr).unwrap();
        let second = pull_metadata(addr).unwrap();
        assert_eq!(first, metadata);
        assert_eq!(first, second);

        server.shutdown();
    }

    #[test]
    fn heartbeat_gets_acked() {
        let server = ControlServer::spawn("127.0.0.1:0", sample_metadata()).unwrap();
        let addr = server.local_addr();
        assert!(heartbeat(addr).unwrap());
        server.shutdown();
    }

    #[test]
    fn multiple_commands_over_one_connection_are_each_answered() {
        let server = ControlServer::spawn("127.0.0.1:0", sample_metadata()).unwrap();
        let addr = server.local_addr();
        let mut stream = TcpStream::connect(addr).unwrap();

        send_frame(&mut stream, &Command::Heartbeat).unwrap();
        let resp: Response = recv_frame(&mut stream).unwrap();
        assert!(matches!(resp, Response::HeartbeatAck));

        send_frame(&mut stream, &Command::MetadataPull).unwrap();
        let resp: Response = recv_frame(&mut stream).unwrap();
        assert!(matches!(resp, Response::Metadata(_)));

        drop(stream);
        server.shutdown();
    }
}
