// Blocking WebSocket server: one session at a time
//
// accept -> handshake -> frame loop -> router, then back to accept.
// `stop()` shuts down the active client socket and wakes the blocked
// `accept()` with a loopback connection, then joins the thread.

use std::io::{BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::frame::{CLOSE_FRAME, read_text};
use super::handshake;
use crate::router::Router;
use crate::sync::lock;

struct Shared {
    running: AtomicBool,
    /// Clone of the session socket, kept so `stop()` can shut it down
    active: Mutex<Option<TcpStream>>,
}

pub struct WsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Arc<Router>,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WsServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, router: Arc<Router>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        info!("WebSocket server listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            router,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                active: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Spawn the accept thread. Calling it while already running is a no-op.
    pub fn start(&self) -> std::io::Result<()> {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return Ok(());
        }

        let listener = self.listener.try_clone()?;
        let router = Arc::clone(&self.router);
        let shared = Arc::clone(&self.shared);
        shared.running.store(true, Ordering::Release);

        *handle = Some(
            thread::Builder::new()
                .name("ws-accept".to_string())
                .spawn(move || accept_loop(listener, router, shared))?,
        );
        Ok(())
    }

    /// Close the active session, unblock `accept()` and join the thread
    pub fn stop(&self) {
        let Some(handle) = lock(&self.handle).take() else {
            return;
        };

        self.shared.running.store(false, Ordering::Release);
        if let Some(client) = lock(&self.shared.active).as_ref() {
            let _ = client.shutdown(Shutdown::Both);
        }

        // std offers no listener shutdown; a loopback connect wakes accept()
        if let Err(e) = TcpStream::connect(wake_addr(self.local_addr)) {
            debug!("Wake connect failed: {}", e);
        }

        if handle.join().is_err() {
            warn!("WebSocket accept thread panicked");
        }
        info!("WebSocket server stopped");
    }
}

impl Drop for WsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wake_addr(bound: SocketAddr) -> SocketAddr {
    match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), bound.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), bound.port()),
        _ => bound,
    }
}

fn accept_loop(listener: TcpListener, router: Arc<Router>, shared: Arc<Shared>) {
    for incoming in listener.incoming() {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }

        match incoming {
            Ok(stream) => serve(stream, &router, &shared),
            Err(e) => warn!("Accept failed: {}", e),
        }
    }
    debug!("Accept loop exited");
}

fn serve(mut stream: TcpStream, router: &Router, shared: &Shared) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    {
        let mut active = lock(&shared.active);
        if !shared.running.load(Ordering::Acquire) {
            return;
        }
        match stream.try_clone() {
            Ok(clone) => *active = Some(clone),
            Err(e) => {
                warn!("Dropping {}: {}", peer, e);
                return;
            }
        }
    }

    info!("Client connected: {}", peer);
    match handshake::accept(&mut stream) {
        Ok(()) => {
            session(&stream, router, shared, &peer);
            let _ = stream.write_all(&CLOSE_FRAME);
        }
        Err(e) => warn!("Handshake with {} failed: {}", peer, e),
    }

    let _ = stream.shutdown(Shutdown::Both);
    *lock(&shared.active) = None;
    info!("Client disconnected: {}", peer);
}

fn session(stream: &TcpStream, router: &Router, shared: &Shared, peer: &str) {
    let mut reader = BufReader::new(stream);

    while shared.running.load(Ordering::Acquire) {
        match read_text(&mut reader) {
            Ok(text) => {
                router.route(&text);
            }
            Err(e) if e.is_disconnect() => {
                debug!("Session with {} ended: {}", peer, e);
                break;
            }
            Err(e) => {
                warn!("Protocol violation from {}: {}", peer, e);
                break;
            }
        }
    }
}
