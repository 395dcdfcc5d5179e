//! TCP Server
//!
//! Accepts client connections and hands each one to its own thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::quorum::QuorumClient;
use crate::route::RouterHandle;

use super::Connection;

/// Sleep between accept polls when no client is waiting
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// TCP front end of the proxy
pub struct Server {
    config: Config,
    router: Arc<RouterHandle>,
    listener: Option<TcpListener>,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

/// Decrements the active connection count when a client thread ends
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Server {
    /// Create a new server with the given config and router
    pub fn new(config: Config, router: Arc<RouterHandle>) -> Self {
        Self {
            config,
            router,
            listener: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bind the listen address; returns the bound address
    pub fn bind(&mut self) -> Result<SocketAddr> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr()?);
        }
        let listener = TcpListener::bind(&self.config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {}", addr);
        self.listener = Some(listener);
        Ok(addr)
    }

    /// Start the server (blocking until shutdown)
    pub fn run(&mut self) -> Result<()> {
        self.bind()?;
        let listener = self
            .listener
            .take()
            .ok_or_else(|| ProxyError::Config("listener not bound".to_string()))?;

        while !self.shutdown.load(Ordering::Acquire) {
            match listener.accept() {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => tracing::warn!("Accept failed: {}", e),
            }
        }

        tracing::info!("Server shutting down");
        self.router.close();
        Ok(())
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        if self.active.load(Ordering::Acquire) >= self.config.max_connections {
            tracing::warn!(
                "Rejecting {}: {} connections already open",
                peer,
                self.config.max_connections
            );
            return;
        }
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!("Could not configure connection from {}: {}", peer, e);
            return;
        }

        self.active.fetch_add(1, Ordering::AcqRel);
        let guard = ActiveGuard(Arc::clone(&self.active));
        let client = QuorumClient::new(Arc::clone(&self.router));

        let spawned = thread::Builder::new()
            .name(format!("client-{}", peer))
            .spawn(move || {
                let _guard = guard;
                match Connection::new(stream, client) {
                    Ok(mut connection) => {
                        if let Err(e) = connection.handle() {
                            tracing::debug!("Connection {} ended with error: {}", peer, e);
                        }
                    }
                    Err(e) => tracing::warn!("Could not set up connection {}: {}", peer, e),
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Could not spawn handler for {}: {}", peer, e);
        }
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Flag that stops `run` when set, for use from another thread
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Number of client connections being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}
