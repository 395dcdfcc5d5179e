//! Quorum Client
//!
//! Executes get, get-multi, set and delete against the hosts the router picks,
//! applying the N/W/R rules and reporting what it observed back to the router.
//!
//! ## Quorum Rules
//! - **get**: walk the first N hosts in order, stop at the first value; an
//!   absent key needs R error-free answers
//! - **get_multi**: one fan-out per shard, each shard needs R error-free answers
//! - **set**: all N main hosts concurrently, then the backups if fewer than W
//!   stored the value
//! - **delete**: hosts are tried in order until N confirm; at most one failure
//!   is tolerated
//!
//! A client is meant to be owned by one request stream at a time. It records
//! the hosts that served the last operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{ProxyError, Result};
use crate::host::HostConnection;
use crate::route::{ErrorClass, Router, RouterHandle, Scheduler};

/// Keys found in one shard, plus the hosts that returned any of them
type ShardFetch = (Vec<(String, Bytes)>, Vec<String>);

pub struct QuorumClient {
    router: Arc<RouterHandle>,

    n: usize,
    w: usize,
    r: usize,

    read_timeout: Duration,
    write_timeout: Duration,
    item_size_stats: usize,

    successful_targets: Vec<String>,
    closed: bool,
}

impl QuorumClient {
    /// Create a client using the router's configured quorum
    pub fn new(router: Arc<RouterHandle>) -> Self {
        let config = router.config();
        Self {
            n: config.n,
            w: config.w,
            r: config.r,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            item_size_stats: config.item_size_stats,
            successful_targets: Vec::new(),
            closed: false,
            router,
        }
    }

    /// Create a client with its own quorum
    pub fn with_quorum(router: Arc<RouterHandle>, n: usize, w: usize, r: usize) -> Result<Self> {
        if n == 0 || w == 0 || r == 0 || w > n || r > n {
            return Err(ProxyError::Config(format!(
                "invalid quorum N={} W={} R={}",
                n, w, r
            )));
        }
        let mut client = Self::new(router);
        client.n = n;
        client.w = w;
        client.r = r;
        Ok(client)
    }

    /// Hosts that served the last operation
    pub fn successful_targets(&self) -> &[String] {
        &self.successful_targets
    }

    /// Forget per-operation state
    pub fn clean(&mut self) {
        self.successful_targets.clear();
    }

    /// Release the client; later operations fail with `ClientClosed`
    pub fn close(&mut self) {
        self.closed = true;
        self.successful_targets.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn begin(&mut self) -> Result<Arc<Router>> {
        if self.closed {
            return Err(ProxyError::ClientClosed);
        }
        self.successful_targets.clear();
        Ok(self.router.load())
    }

    // =========================================================================
    // Get
    // =========================================================================

    /// Read one key
    ///
    /// `Ok(None)` means at least R hosts answered without error and none had
    /// the key.
    pub fn get(&mut self, key: &str) -> Result<Option<Bytes>> {
        let router = self.begin()?;
        let hosts = router.hosts_for(key);

        let mut responded = 0;
        for host in hosts.iter().take(self.n) {
            let at = SystemTime::now();
            let started = Instant::now();
            match host.get(key, self.read_timeout) {
                Ok(Some(value)) => {
                    if value.len() < self.item_size_stats {
                        router.report_latency(host.addr(), key, at, started.elapsed());
                    }
                    self.successful_targets = vec![host.addr().to_string()];
                    return Ok(Some(value));
                }
                Ok(None) => {
                    responded += 1;
                    self.successful_targets.push(host.addr().to_string());
                }
                Err(e) => {
                    tracing::debug!("get {} from {} failed: {}", key, host.addr(), e);
                    router.report_error(host.addr(), key, at, ErrorClass::of(&e, ErrorClass::Hard));
                }
            }
        }

        if responded >= self.r {
            Ok(None)
        } else {
            Err(ProxyError::QuorumNotMet {
                op: "get",
                succeeded: responded,
                required: self.r,
            })
        }
    }

    /// Read many keys at once
    ///
    /// Keys are grouped by shard and every shard is fetched concurrently.
    /// Absent keys are missing from the result. Fails if any shard got fewer
    /// than R error-free answers.
    pub fn get_multi(&mut self, keys: &[String]) -> Result<HashMap<String, Bytes>> {
        let router = self.begin()?;
        let groups = router.split_keys_by_shard(keys);

        let found = Mutex::new(HashMap::with_capacity(keys.len()));
        let targets = Mutex::new(Vec::new());
        let failures = Mutex::new(Vec::new());

        let this = &*self;
        thread::scope(|scope| {
            for group in groups.into_iter().filter(|group| !group.is_empty()) {
                let (router, found, targets, failures) = (&router, &found, &targets, &failures);
                scope.spawn(move || match this.fetch_shard(router, group) {
                    Ok((items, hosts)) => {
                        found.lock().extend(items);
                        targets.lock().extend(hosts);
                    }
                    Err(e) => failures.lock().push(e),
                });
            }
        });

        if let Some(e) = failures.into_inner().into_iter().next() {
            return Err(e);
        }
        let mut targets = targets.into_inner();
        targets.sort();
        targets.dedup();
        self.successful_targets = targets;
        Ok(found.into_inner())
    }

    /// Fetch one shard's keys, asking the next host only for what is still missing
    fn fetch_shard(&self, router: &Router, keys: Vec<String>) -> Result<ShardFetch> {
        let hosts = router.hosts_for(&keys[0]);

        let mut pending = keys;
        let mut found = Vec::with_capacity(pending.len());
        let mut targets = Vec::new();
        let mut responded = 0;

        for host in hosts.iter().take(self.n) {
            let at = SystemTime::now();
            match host.get_multi(&pending, self.read_timeout) {
                Ok(items) => {
                    responded += 1;
                    let before = found.len();
                    for (key, value) in items {
                        if let Some(position) = pending.iter().position(|k| *k == key) {
                            pending.swap_remove(position);
                            found.push((key, value));
                        }
                    }
                    if found.len() > before {
                        targets.push(host.addr().to_string());
                    }
                    if pending.is_empty() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("getm of {} keys from {} failed: {}", pending.len(), host.addr(), e);
                    router.report_error(
                        host.addr(),
                        &pending[0],
                        at,
                        ErrorClass::of(&e, ErrorClass::Hard),
                    );
                }
            }
        }

        if responded >= self.r {
            Ok((found, targets))
        } else {
            Err(ProxyError::QuorumNotMet {
                op: "getm",
                succeeded: responded,
                required: self.r,
            })
        }
    }

    // =========================================================================
    // Set
    // =========================================================================

    /// Store a value on W hosts
    pub fn set(&mut self, key: &str, value: Bytes) -> Result<bool> {
        self.store(key, value, false)
    }

    /// Store a value without waiting for backend replies
    ///
    /// Every host the command was written to counts as stored.
    pub fn set_no_reply(&mut self, key: &str, value: Bytes) -> Result<bool> {
        self.store(key, value, true)
    }

    fn store(&mut self, key: &str, value: Bytes, no_reply: bool) -> Result<bool> {
        let router = self.begin()?;
        let hosts = router.hosts_for(key);
        if hosts.len() < self.n {
            return Err(ProxyError::QuorumNotMet {
                op: "set",
                succeeded: 0,
                required: self.w,
            });
        }

        let (main, backups) = hosts.split_at(self.n);
        let (mut stored, mut targets) = self.store_on(&router, main, key, &value, no_reply);
        if stored < self.w && !backups.is_empty() {
            let (extra, extra_targets) = self.store_on(&router, backups, key, &value, no_reply);
            stored += extra;
            targets.extend(extra_targets);
        }

        self.successful_targets = targets;
        if stored >= self.w {
            Ok(true)
        } else {
            Err(ProxyError::QuorumNotMet {
                op: "set",
                succeeded: stored,
                required: self.w,
            })
        }
    }

    /// Send the set to every host in `hosts` at once; returns the stored count
    fn store_on(
        &self,
        router: &Router,
        hosts: &[Arc<HostConnection>],
        key: &str,
        value: &Bytes,
        no_reply: bool,
    ) -> (usize, Vec<String>) {
        let timeout = self.write_timeout;
        let outcomes: Vec<(&Arc<HostConnection>, SystemTime, Result<bool>)> =
            thread::scope(|scope| {
                let handles: Vec<_> = hosts
                    .iter()
                    .map(|host| {
                        scope.spawn(move || {
                            let at = SystemTime::now();
                            (host, at, host.set(key, value.clone(), no_reply, timeout))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .filter_map(|handle| handle.join().ok())
                    .collect()
            });

        let mut stored = 0;
        let mut targets = Vec::new();
        for (host, at, outcome) in outcomes {
            match outcome {
                Ok(true) => {
                    stored += 1;
                    targets.push(host.addr().to_string());
                }
                Ok(false) => {
                    tracing::debug!("set {} not stored by {}", key, host.addr());
                    router.report_error(host.addr(), key, at, ErrorClass::HardWrite);
                }
                Err(e) => {
                    tracing::debug!("set {} on {} failed: {}", key, host.addr(), e);
                    // Only reads report silence-window errors
                    if !e.is_retryable() {
                        router.report_error(host.addr(), key, at, ErrorClass::HardWrite);
                    }
                }
            }
        }
        (stored, targets)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a key from every host holding it
    ///
    /// Hosts are tried in order until N of them confirmed a deletion. The
    /// result is true if any host deleted the key; a single failed host is
    /// tolerated, two or more fail the operation.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        let router = self.begin()?;
        let hosts = router.hosts_for(key);

        let mut deleted = 0;
        let mut failed = Vec::new();
        let mut last_error = None;
        for (index, host) in hosts.iter().enumerate() {
            let at = SystemTime::now();
            match host.delete(key, self.read_timeout) {
                Ok(true) => {
                    deleted += 1;
                    self.successful_targets.push(host.addr().to_string());
                }
                Ok(false) => {}
                Err(e) => {
                    if index < self.n && !e.is_retryable() {
                        router.report_error(host.addr(), key, at, ErrorClass::HardDelete);
                    }
                    failed.push(host.addr().to_string());
                    last_error = Some(e);
                }
            }
            if deleted >= self.n {
                break;
            }
        }

        if let Some(e) = last_error {
            tracing::warn!("delete {} failed on {:?}, last error: {}", key, failed, e);
        }
        if failed.len() >= 2 {
            return Err(ProxyError::QuorumNotMet {
                op: "delete",
                succeeded: deleted,
                required: hosts.len().saturating_sub(1),
            });
        }
        Ok(deleted > 0)
    }
}

impl std::fmt::Debug for QuorumClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumClient")
            .field("n", &self.n)
            .field("w", &self.w)
            .field("r", &self.r)
            .field("closed", &self.closed)
            .finish()
    }
}
