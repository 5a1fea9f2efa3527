// DbgMux - app/sources/udp.rs
//
// Receives log lines as UDP datagrams. Each datagram is one message; the
// sender's IP address is used as the process name.

use super::{LineSink, LogSource};
use crate::core::model::{Line, SourceKind};
use crate::core::signal::WaitHandle;
use crate::util::constants::{MAX_UDP_DATAGRAM_SIZE, UDP_READ_TIMEOUT_MS};
use crate::util::error::SourceError;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Debug)]
pub struct UdpSource {
    port: u16,
    local_addr: SocketAddr,
    socket: Option<UdpSocket>,
    sink: LineSink,
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl UdpSource {
    /// Bind all interfaces on `port` (0 picks a free port).
    pub fn bind(port: u16, sink: LineSink) -> Result<Self, SourceError> {
        let bind_err = |e| SourceError::Bind { port, source: e };
        let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(bind_err)?;
        socket
            .set_read_timeout(Some(Duration::from_millis(UDP_READ_TIMEOUT_MS)))
            .map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;
        tracing::info!(address = %local_addr, "UDP source bound");
        Ok(Self {
            port,
            local_addr,
            socket: Some(socket),
            sink,
            cancel: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl LogSource for UdpSource {
    fn description(&self) -> String {
        format!("UDP port {}", self.local_addr.port())
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Udp
    }

    fn address(&self) -> Option<String> {
        Some(self.local_addr.to_string())
    }

    fn line_delimited(&self) -> bool {
        true
    }

    fn wait_handle(&self) -> Option<WaitHandle> {
        Some(self.sink.wait_handle())
    }

    fn initialize(&mut self) -> Result<(), SourceError> {
        let Some(socket) = self.socket.take() else {
            return Ok(());
        };
        let sink = self.sink.clone();
        let cancel = Arc::clone(&self.cancel);
        let thread = std::thread::Builder::new()
            .name(format!("dbgmux-udp-{}", self.local_addr.port()))
            .spawn(move || run_receiver(socket, sink, cancel))
            .map_err(|e| SourceError::Bind {
                port: self.port,
                source: e,
            })?;
        self.thread = Some(thread);
        Ok(())
    }

    fn notify(&mut self, out: &mut Vec<Line>) -> Result<(), SourceError> {
        self.sink.drain_into(out);
        Ok(())
    }

    fn at_end(&self) -> bool {
        false
    }

    fn abort(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.socket = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!(address = %self.local_addr, "UDP receive thread panicked");
            }
        }
    }
}

impl Drop for UdpSource {
    fn drop(&mut self) {
        self.abort();
    }
}

fn run_receiver(socket: UdpSocket, sink: LineSink, cancel: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_UDP_DATAGRAM_SIZE];
    while !cancel.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                let text = text.trim_end_matches(['\r', '\n']);
                if let Err(e) = sink.add(0, peer.ip().to_string(), text) {
                    tracing::warn!(peer = %peer, error = %e, "UDP datagram dropped");
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                tracing::warn!(error = %e, "UDP receive failed");
                sink.diagnostic(format!("UDP receive failed: {e}"));
                std::thread::sleep(Duration::from_millis(UDP_READ_TIMEOUT_MS));
            }
        }
    }
    tracing::debug!("UDP receive thread stopped");
}
