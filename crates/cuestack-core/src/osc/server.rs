//! UDP transport for OSC control.

use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::codec::OscMessage;
use super::dispatch::OscDispatcher;
use crate::error::{Error, Result};

/// How often the receive loop checks its running flag.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 65_536;

/// Receives OSC datagrams on a background thread and dispatches them.
pub struct OscServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl OscServer {
    /// Bind `addr` ("host:port") and start receiving.
    pub fn bind(addr: &str, dispatcher: OscDispatcher) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;

        let prefix = dispatcher.prefix().to_string();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("cuestack-osc".to_string())
            .spawn(move || run(&socket, &dispatcher, &thread_running))?;

        log::info!("OSC listening on {} (prefix {})", local_addr, prefix);
        Ok(Self {
            local_addr,
            running,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop receiving and wait for the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("OSC thread panicked");
            }
        }
    }
}

impl Drop for OscServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(socket: &UdpSocket, dispatcher: &OscDispatcher, running: &AtomicBool) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while running.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                log::error!("OSC receive failed: {}", e);
                std::thread::sleep(RECV_TIMEOUT);
                continue;
            }
        };
        match OscMessage::decode(&buf[..len]) {
            Ok(msg) => {
                log::trace!("OSC from {}: {}", from, msg);
                dispatcher.dispatch(&msg);
            }
            Err(e) => log::warn!("Dropping OSC datagram from {}: {}", from, e),
        }
    }
    log::debug!("OSC receiver stopped");
}

/// Fire-and-forget OSC sender.
pub struct OscClient {
    sock: UdpSocket,
    target: SocketAddr,
}

impl OscClient {
    /// Create a client for `target` ("host:port"), bound to an ephemeral port.
    pub fn new(target: &str) -> Result<Self> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Config(format!("cannot resolve {}", target)))?;
        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        Ok(Self {
            sock: UdpSocket::bind(bind)?,
            target,
        })
    }

    pub fn send(&self, msg: &OscMessage) -> Result<()> {
        self.sock.send_to(&msg.encode(), self.target)?;
        Ok(())
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}
