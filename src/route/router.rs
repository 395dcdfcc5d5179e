//! Router
//!
//! Maps keys to shards and shards to ordered host lists, and owns the
//! background threads that keep host scores, liveness and partitions current.
//!
//! ## Threads
//! - **feedback worker**: the only consumer of the feedback channel, applies
//!   latency/error observations to the bucket groups
//! - **health checker**: pings every host each period, revives dead ones
//! - **rebalancer**: recomputes scores and nudges partitions each period
//!
//! The request path never writes routing state; it only posts feedback with
//! `try_send`. When the channel is full the observation is dropped and
//! counted, the request is never stalled.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::Result;
use crate::host::HostConnection;
use crate::window::Slot;

use super::bucket::{BucketGroup, ShardStats};
use super::feedback::{ErrorClass, Feedback, Signal};
use super::table::ShardTable;

/// Key hashing function used for shard selection
pub type HashMethod = fn(&[u8]) -> u32;

/// 32-bit FNV-1a
pub fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;
    bytes.iter().fold(OFFSET_BASIS, |hash, &byte| {
        (hash ^ byte as u32).wrapping_mul(PRIME)
    })
}

/// Routing operations consumed by the quorum client
pub trait Scheduler: Send + Sync {
    /// Shard number serving `key`
    fn shard_of(&self, key: &str) -> usize;

    /// Primary hosts of the key's shard (owner first), then its backups
    fn hosts_for(&self, key: &str) -> Vec<Arc<HostConnection>>;

    /// Group keys by shard; the result is indexed by shard number
    fn split_keys_by_shard(&self, keys: &[String]) -> Vec<Vec<String>>;

    /// Post a latency observation
    fn report_latency(&self, addr: &str, key: &str, at: SystemTime, elapsed: Duration);

    /// Post an error observation
    fn report_error(&self, addr: &str, key: &str, at: SystemTime, class: ErrorClass);

    /// Stop background threads, drain pending feedback and close all hosts
    fn close(&self);
}

/// Read-only routing statistics
#[derive(Debug, Clone, PartialEq)]
pub struct RouterStats {
    pub shards: Vec<ShardStats>,
    pub backups: Vec<ShardStats>,
    pub dropped_feedback: u64,
}

/// State shared between the router and its background threads
struct Shared {
    primary: Vec<BucketGroup>,
    backups: Vec<Option<BucketGroup>>,
    /// Every distinct host, sorted by address
    hosts: Vec<Arc<HostConnection>>,
}

impl Shared {
    fn groups_of(&self, shard: usize) -> impl Iterator<Item = &BucketGroup> {
        self.primary
            .get(shard)
            .into_iter()
            .chain(self.backups.get(shard).and_then(Option::as_ref))
    }

    fn all_groups(&self) -> impl Iterator<Item = &BucketGroup> {
        self.primary
            .iter()
            .chain(self.backups.iter().filter_map(Option::as_ref))
    }

    fn apply(&self, feedback: Feedback) {
        for group in self.groups_of(feedback.shard) {
            if !group.contains(&feedback.addr) {
                continue;
            }
            match feedback.signal {
                Signal::Latency(micros) => {
                    group.record_success(&feedback.addr, feedback.at, micros);
                }
                Signal::Error(class) => {
                    group.record_failure(&feedback.addr, feedback.at, class);
                }
            }
        }
    }

    fn check_hosts(&self) {
        for host in &self.hosts {
            if host.check_liveness() {
                for group in self.all_groups() {
                    group.mark_alive(host.addr());
                }
            } else {
                tracing::warn!("Health check failed for {}", host.addr());
            }
        }
    }

    fn rebalance(&self) {
        for group in &self.primary {
            group.recompute_scores();
            group.rebalance_if_needed();
        }
    }
}

/// Key → shard → hosts router with adaptive in-shard ownership
pub struct Router {
    shared: Arc<Shared>,
    hash: HashMethod,
    bit_width: u32,
    shard_count: usize,

    feedback_tx: RwLock<Option<Sender<Feedback>>>,
    dropped_feedback: AtomicU64,

    /// Dropping the sender stops the periodic loops
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    /// Build a router for `table` and start its background threads
    ///
    /// Fails if the table or config violates a routing invariant.
    pub fn new(table: &ShardTable, config: &Config) -> Result<Self> {
        config.validate()?;
        table.validate()?;

        let hosts: BTreeMap<&str, Arc<HostConnection>> = table
            .addresses()
            .map(|addr| (addr, Arc::new(HostConnection::new(addr, config))))
            .collect();
        let pick = |addrs: Vec<&str>| -> Vec<Arc<HostConnection>> {
            addrs
                .into_iter()
                .filter_map(|addr| hosts.get(addr).cloned())
                .collect()
        };

        let shard_count = table.shard_count();
        let mut primary = Vec::with_capacity(shard_count);
        let mut backups = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            let mains = pick(table.primaries(shard));
            if mains.len() < config.n {
                tracing::warn!(
                    "Shard {:x} has {} primary hosts, fewer than N={}",
                    shard,
                    mains.len(),
                    config.n
                );
            }
            primary.push(BucketGroup::new(shard, mains, config)?);

            let spares = pick(table.backups(shard));
            backups.push(if spares.is_empty() {
                None
            } else {
                Some(BucketGroup::new(shard, spares, config)?)
            });
        }

        let shared = Arc::new(Shared {
            primary,
            backups,
            hosts: hosts.into_values().collect(),
        });

        let (feedback_tx, feedback_rx) = channel::bounded(config.feedback_queue_size);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let router = Self {
            shared: Arc::clone(&shared),
            hash: fnv1a,
            bit_width: shard_count.trailing_zeros(),
            shard_count,
            feedback_tx: RwLock::new(Some(feedback_tx)),
            dropped_feedback: AtomicU64::new(0),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            workers: Mutex::new(Vec::new()),
        };

        let worker_state = Arc::clone(&shared);
        router.spawn("feedback", move || run_feedback(worker_state, feedback_rx))?;

        let health_state = Arc::clone(&shared);
        let health_stop = shutdown_rx.clone();
        let health_every = Duration::from_millis(config.health_check_interval_ms.max(1));
        router.spawn("health-check", move || {
            run_periodic(health_stop, health_every, || health_state.check_hosts())
        })?;

        let rebalance_state = shared;
        let rebalance_every = Duration::from_millis(config.rebalance_interval_ms.max(1));
        router.spawn("rebalance", move || {
            run_periodic(shutdown_rx, rebalance_every, || rebalance_state.rebalance())
        })?;

        tracing::info!(
            "Router started: {} shards, {} hosts",
            shard_count,
            router.shared.hosts.len()
        );
        Ok(router)
    }

    fn spawn<F>(&self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("router-{}", name))
            .spawn(body)?;
        self.workers.lock().push(handle);
        Ok(())
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn bit_width(&self) -> u32 {
        self.bit_width
    }

    /// The primary group of a shard
    pub fn bucket(&self, shard: usize) -> Option<&BucketGroup> {
        self.shared.primary.get(shard)
    }

    /// The backup group of a shard, if it has backups
    pub fn backup_bucket(&self, shard: usize) -> Option<&BucketGroup> {
        self.shared.backups.get(shard).and_then(Option::as_ref)
    }

    /// Every distinct backend host
    pub fn hosts(&self) -> &[Arc<HostConnection>] {
        &self.shared.hosts
    }

    /// Number of feedback messages dropped because the channel was full
    pub fn dropped_feedback(&self) -> u64 {
        self.dropped_feedback.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            shards: self.shared.primary.iter().map(BucketGroup::stats).collect(),
            backups: self
                .shared
                .backups
                .iter()
                .filter_map(Option::as_ref)
                .map(BucketGroup::stats)
                .collect(),
            dropped_feedback: self.dropped_feedback(),
        }
    }

    /// Raw latency slots of `addr` within `shard`
    pub fn latency_window(&self, shard: usize, addr: &str) -> Option<Vec<Slot>> {
        self.shared
            .groups_of(shard)
            .find_map(|group| group.latency_window(addr))
    }

    /// Run one health-check pass immediately
    pub fn check_hosts_now(&self) {
        self.shared.check_hosts();
    }

    /// Run one scoring and rebalance pass immediately
    pub fn rebalance_now(&self) {
        self.shared.rebalance();
    }

    fn post(&self, feedback: Feedback) {
        let guard = self.feedback_tx.read();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(feedback) {
            Ok(()) => {}
            Err(TrySendError::Full(feedback)) => {
                self.dropped_feedback.fetch_add(1, Ordering::Relaxed);
                if let Signal::Error(class) = feedback.signal {
                    tracing::warn!(
                        "Feedback queue full, dropped {:?} for {}",
                        class,
                        feedback.addr
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Scheduler for Router {
    fn shard_of(&self, key: &str) -> usize {
        if self.bit_width == 0 {
            return 0;
        }

        // "@<hex>..." addresses a shard directly
        if let Some(rest) = key.strip_prefix('@') {
            let digits = self.bit_width.div_ceil(4) as usize;
            if let Some(shard) = rest
                .get(..digits)
                .and_then(|hex| usize::from_str_radix(hex, 16).ok())
                .filter(|&shard| shard < self.shard_count)
            {
                return shard;
            }
        }

        let hashed = key.strip_prefix('?').unwrap_or(key);
        ((self.hash)(hashed.as_bytes()) >> (32 - self.bit_width)) as usize
    }

    fn hosts_for(&self, key: &str) -> Vec<Arc<HostConnection>> {
        let shard = self.shard_of(key);
        let mut hosts = self.shared.primary[shard].route(key);
        if let Some(backup) = &self.shared.backups[shard] {
            hosts.extend(backup.hosts());
        }
        hosts
    }

    fn split_keys_by_shard(&self, keys: &[String]) -> Vec<Vec<String>> {
        let mut groups = vec![Vec::new(); self.shard_count];
        let mut seen = HashSet::with_capacity(keys.len());
        for key in keys {
            if seen.insert(key.as_str()) {
                groups[self.shard_of(key)].push(key.clone());
            }
        }
        groups
    }

    fn report_latency(&self, addr: &str, key: &str, at: SystemTime, elapsed: Duration) {
        self.post(Feedback {
            addr: addr.to_string(),
            shard: self.shard_of(key),
            signal: Signal::Latency(elapsed.as_nanos() as f64 / 1_000.0),
            at,
        });
    }

    fn report_error(&self, addr: &str, key: &str, at: SystemTime, class: ErrorClass) {
        self.post(Feedback {
            addr: addr.to_string(),
            shard: self.shard_of(key),
            signal: Signal::Error(class),
            at,
        });
    }

    fn close(&self) {
        // Stop the loops first, then let the worker drain what is queued
        drop(self.shutdown_tx.lock().take());
        drop(self.feedback_tx.write().take());

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return;
        }
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Router thread panicked during shutdown");
            }
        }

        for host in &self.shared.hosts {
            host.close();
        }
        tracing::info!("Router closed");
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        Scheduler::close(self);
    }
}

fn run_feedback(shared: Arc<Shared>, feedback_rx: Receiver<Feedback>) {
    // Ends once every sender is gone and the queue is empty
    for feedback in feedback_rx.iter() {
        shared.apply(feedback);
    }
    tracing::debug!("Feedback worker stopped");
}

fn run_periodic<F: Fn()>(stop: Receiver<()>, every: Duration, task: F) {
    let ticker = channel::tick(every);
    loop {
        let stopped = channel::select! {
            recv(stop) -> _ => true,
            recv(ticker) -> _ => false,
        };
        if stopped {
            break;
        }
        task();
    }
}
