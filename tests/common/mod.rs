//! Shared test helpers
//!
//! An in-process backend speaking the wire protocol on 127.0.0.1, with
//! switchable failure modes and per-command counters.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{BufReader, BufWriter, ErrorKind};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use quorumkv::protocol::{read_command, write_response, Command, Response};
use quorumkv::Config;

/// How the mock answers
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Serve from the in-memory map
    Normal,
    /// Answer every command (PING included) with ERROR
    Error,
    /// Sleep before answering normally
    Delay(Duration),
    /// Answer SET with NOT_FOUND (not stored)
    RejectWrites,
}

#[derive(Default)]
struct Counters {
    get: AtomicUsize,
    getm: AtomicUsize,
    set: AtomicUsize,
    delete: AtomicUsize,
    ping: AtomicUsize,
}

struct MockState {
    store: Mutex<HashMap<String, Bytes>>,
    mode: Mutex<Mode>,
    counters: Counters,
    shutdown: AtomicBool,
}

pub struct MockBackend {
    addr: String,
    state: Arc<MockState>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockBackend {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let state = Arc::new(MockState {
            store: Mutex::new(HashMap::new()),
            mode: Mutex::new(Mode::Normal),
            counters: Counters::default(),
            shutdown: AtomicBool::new(false),
        });

        let accept_state = Arc::clone(&state);
        let acceptor = thread::spawn(move || {
            while !accept_state.shutdown.load(Ordering::Acquire) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let conn_state = Arc::clone(&accept_state);
                        thread::spawn(move || serve(stream, conn_state));
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            addr,
            state,
            acceptor: Some(acceptor),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.state.mode.lock() = mode;
    }

    pub fn insert(&self, key: &str, value: &[u8]) {
        self.state
            .store
            .lock()
            .insert(key.to_string(), Bytes::copy_from_slice(value));
    }

    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.state.store.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.store.lock().len()
    }

    pub fn gets(&self) -> usize {
        self.state.counters.get.load(Ordering::SeqCst)
    }

    pub fn getms(&self) -> usize {
        self.state.counters.getm.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.state.counters.set.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.state.counters.delete.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.counters.ping.load(Ordering::SeqCst)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.state.shutdown.store(true, Ordering::Release);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

fn serve(stream: TcpStream, state: Arc<MockState>) {
    stream.set_nonblocking(false).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = BufWriter::new(stream);

    while let Ok(command) = read_command(&mut reader) {
        if state.shutdown.load(Ordering::Acquire) {
            return;
        }
        let no_reply = command.no_reply();
        let response = answer(&state, command);
        if no_reply {
            continue;
        }
        if write_response(&mut writer, &response).is_err() {
            return;
        }
    }
}

fn answer(state: &MockState, command: Command) -> Response {
    let counters = &state.counters;
    match &command {
        Command::Get { .. } => counters.get.fetch_add(1, Ordering::SeqCst),
        Command::GetMulti { .. } => counters.getm.fetch_add(1, Ordering::SeqCst),
        Command::Set { .. } => counters.set.fetch_add(1, Ordering::SeqCst),
        Command::Delete { .. } => counters.delete.fetch_add(1, Ordering::SeqCst),
        Command::Ping => counters.ping.fetch_add(1, Ordering::SeqCst),
    };

    let mode = *state.mode.lock();
    match mode {
        Mode::Error => return Response::error("mock failure"),
        Mode::Delay(delay) => thread::sleep(delay),
        Mode::Normal | Mode::RejectWrites => {}
    }

    let mut store = state.store.lock();
    match command {
        Command::Get { key } => match store.get(&key) {
            Some(value) => Response::ok(Some(value.clone())),
            None => Response::not_found(),
        },
        Command::GetMulti { keys } => Response::items(
            keys.iter()
                .filter_map(|key| store.get(key).map(|value| (key.as_str(), &value[..]))),
        ),
        Command::Set { key, value, .. } => {
            if mode == Mode::RejectWrites {
                return Response::not_found();
            }
            store.insert(key, value);
            Response::ok(None)
        }
        Command::Delete { key } => match store.remove(&key) {
            Some(_) => Response::ok(None),
            None => Response::not_found(),
        },
        Command::Ping => Response::ok(None),
    }
}

/// An address nothing listens on
pub fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

/// Config with short deadlines and background loops that stay out of the way
pub fn test_config() -> Config {
    Config::builder()
        .quorum(3, 2, 1)
        .connect_timeout_ms(200)
        .dial_fail_silence_ms(1000)
        .read_timeout_ms(500)
        .write_timeout_ms(500)
        .liveness_timeout_ms(200)
        .health_check_interval_ms(60_000)
        .rebalance_interval_ms(60_000)
        .reload_grace_ms(50)
        .build()
}

pub fn start_backends(count: usize) -> Vec<MockBackend> {
    (0..count).map(|_| MockBackend::start()).collect()
}

pub fn addrs(backends: &[MockBackend]) -> Vec<String> {
    backends.iter().map(|b| b.addr().to_string()).collect()
}

pub fn backend<'a>(backends: &'a [MockBackend], addr: &str) -> &'a MockBackend {
    backends.iter().find(|b| b.addr() == addr).unwrap()
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
