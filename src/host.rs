//! Host Connection
//!
//! Pooled connections to one backend address.
//!
//! ## Responsibilities
//! - Keep a bounded free list of idle connections
//! - Dial lazily, and fail fast during the silence window after a failed dial
//! - Bound every exchange by a deadline; a connection that hit an error or the
//!   deadline is closed, never returned to the free list

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::protocol::{self, Command, Response, Status};

/// Stream wrapper that enforces one overall deadline across many reads/writes
struct DeadlineStream<'a> {
    stream: &'a mut TcpStream,
    deadline: Instant,
}

impl DeadlineStream<'_> {
    fn remaining(&self) -> io::Result<Duration> {
        let now = Instant::now();
        if now >= self.deadline {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "exchange deadline passed"));
        }
        Ok(self.deadline - now)
    }
}

impl Read for DeadlineStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining()?;
        self.stream.set_read_timeout(Some(remaining))?;
        self.stream.read(buf)
    }
}

impl Write for DeadlineStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self.remaining()?;
        self.stream.set_write_timeout(Some(remaining))?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// A pooled, backoff-aware connection manager for one backend
pub struct HostConnection {
    /// host:port of the backend
    addr: String,

    /// Idle connections ready for reuse
    conns: ArrayQueue<TcpStream>,

    /// No dial is attempted before this instant
    next_dial: Mutex<Option<Instant>>,

    closed: AtomicBool,

    connect_timeout: Duration,
    dial_fail_silence: Duration,
    liveness_timeout: Duration,
}

impl HostConnection {
    /// Create a host with an empty free list
    pub fn new(addr: impl Into<String>, config: &Config) -> Self {
        Self {
            addr: addr.into(),
            conns: ArrayQueue::new(config.max_free_conns_per_host.max(1)),
            next_dial: Mutex::new(None),
            closed: AtomicBool::new(false),
            connect_timeout: config.connect_timeout(),
            dial_fail_silence: config.dial_fail_silence(),
            liveness_timeout: config.liveness_timeout(),
        }
    }

    /// The backend address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of idle pooled connections
    pub fn idle_count(&self) -> usize {
        self.conns.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Remaining silence, if the last dial failed recently
    pub fn silenced_for(&self) -> Option<Duration> {
        let next_dial = (*self.next_dial.lock())?;
        next_dial.checked_duration_since(Instant::now())
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        self.addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address for {}", self.addr),
            )
        })
    }

    fn dial(&self) -> Result<TcpStream> {
        if let Some(remaining) = self.silenced_for() {
            return Err(ProxyError::SilenceWindow {
                addr: self.addr.clone(),
                retry_in_ms: remaining.as_millis() as u64,
            });
        }

        let attempt = self
            .resolve()
            .and_then(|addr| TcpStream::connect_timeout(&addr, self.connect_timeout));

        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Err(e) => {
                *self.next_dial.lock() = Some(Instant::now() + self.dial_fail_silence);
                tracing::warn!(
                    "Dial to {} failed, silencing for {:?}: {}",
                    self.addr,
                    self.dial_fail_silence,
                    e
                );
                Err(ProxyError::Io(e))
            }
        }
    }

    fn acquire(&self) -> Result<TcpStream> {
        if self.is_closed() {
            return Err(ProxyError::HostClosed(self.addr.clone()));
        }
        match self.conns.pop() {
            Some(stream) => Ok(stream),
            None => self.dial(),
        }
    }

    fn release(&self, stream: TcpStream) {
        if self.is_closed() {
            return;
        }
        // A full free list drops (closes) the connection
        let _ = self.conns.push(stream);
    }

    /// Run one request/response exchange bounded by `timeout`
    ///
    /// On any error the connection is dropped. A no-reply command is answered
    /// locally with OK once it has been written.
    pub fn send(&self, command: &Command, timeout: Duration) -> Result<Response> {
        let mut stream = self.acquire()?;
        let deadline = Instant::now() + timeout;

        let outcome = Self::exchange(&mut stream, deadline, command);
        match outcome {
            Ok(response) => {
                self.release(stream);
                Ok(response)
            }
            Err(e) => {
                let e = self.classify(e, timeout);
                tracing::debug!("Exchange with {} failed: {}", self.addr, e);
                Err(e)
            }
        }
    }

    fn exchange(stream: &mut TcpStream, deadline: Instant, command: &Command) -> Result<Response> {
        let mut bounded = DeadlineStream { stream, deadline };
        protocol::write_command(&mut bounded, command)?;
        if command.no_reply() {
            return Ok(Response::ok(None));
        }
        let response = protocol::read_response(&mut bounded)?;
        protocol::validate(command, response)
    }

    fn classify(&self, error: ProxyError, timeout: Duration) -> ProxyError {
        match error {
            ProxyError::Io(ref e)
                if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
            {
                ProxyError::Timeout {
                    addr: self.addr.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            }
            other => other,
        }
    }

    /// Send a lightweight PING; true when the backend answered OK in time
    pub fn check_liveness(&self) -> bool {
        match self.send(&Command::Ping, self.liveness_timeout) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Liveness check on {} failed: {}", self.addr, e);
                false
            }
        }
    }

    // =========================================================================
    // Keyed operations
    // =========================================================================

    /// Fetch one value; `Ok(None)` means the backend confirmed it is absent
    pub fn get(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>> {
        let command = Command::Get {
            key: key.to_string(),
        };
        let response = self.send(&command, timeout)?;
        Ok(match response.status {
            Status::Ok => Some(response.payload.unwrap_or_default()),
            _ => None,
        })
    }

    /// Fetch several values; absent keys are simply missing from the result
    pub fn get_multi(&self, keys: &[String], timeout: Duration) -> Result<Vec<(String, Bytes)>> {
        let command = Command::GetMulti {
            keys: keys.to_vec(),
        };
        let response = self.send(&command, timeout)?;
        protocol::decode_items(response.payload.as_deref().unwrap_or(&[]))
    }

    /// Store a value; true when the backend stored it
    pub fn set(&self, key: &str, value: Bytes, no_reply: bool, timeout: Duration) -> Result<bool> {
        let command = Command::Set {
            key: key.to_string(),
            value,
            no_reply,
        };
        let response = self.send(&command, timeout)?;
        Ok(response.status == Status::Ok)
    }

    /// Delete a key; true when the backend deleted it
    pub fn delete(&self, key: &str, timeout: Duration) -> Result<bool> {
        let command = Command::Delete {
            key: key.to_string(),
        };
        let response = self.send(&command, timeout)?;
        Ok(response.status == Status::Ok)
    }

    /// Close all idle connections; later sends fail with `HostClosed`
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        while self.conns.pop().is_some() {}
    }
}

impl std::fmt::Debug for HostConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConnection")
            .field("addr", &self.addr)
            .field("idle", &self.conns.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
