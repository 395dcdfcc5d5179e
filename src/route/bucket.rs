//! Bucket Group
//!
//! One shard's hosts, their latency windows, scores and liveness, plus the
//! partition deciding which host owns which key.
//!
//! ## Concurrency
//! - `route` only takes the partition's read lock
//! - Host scores and liveness live behind one RwLock, written by the feedback
//!   worker and the background loops only
//! - Each host's `TimeWindow` carries its own lock
//! - Lock order: states -> partition

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::{ProxyError, Result};
use crate::host::HostConnection;
use crate::partition::Partition;
use crate::window::{totals, SampleKind, Slot, TimeWindow};

use super::feedback::ErrorClass;

/// Score and liveness of one host within a shard
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostState {
    pub score: f64,
    pub alive: bool,
}

/// Read-only view of one host in a shard
#[derive(Debug, Clone, PartialEq)]
pub struct HostStats {
    pub addr: String,
    pub score: f64,
    pub alive: bool,
    pub arc_width: u32,
}

/// Read-only view of one shard
#[derive(Debug, Clone, PartialEq)]
pub struct ShardStats {
    pub shard: usize,
    pub hosts: Vec<HostStats>,
}

struct HostSlot {
    conn: Arc<HostConnection>,
    window: TimeWindow,
}

/// The hosts serving one shard
pub struct BucketGroup {
    shard: usize,

    /// Sorted by address once; partition arc `i` belongs to `hosts[i]`
    hosts: Vec<HostSlot>,

    states: RwLock<Vec<HostState>>,

    partition: Partition,

    response_time_seconds: usize,
    error_seconds: usize,
    max_connect_errors: u64,
    score_deviation: f64,
    response_time_min: f64,
    rebalance_step: u32,
}

impl BucketGroup {
    /// Build a group over `hosts`, with evenly sized arcs
    pub fn new(shard: usize, mut hosts: Vec<Arc<HostConnection>>, config: &Config) -> Result<Self> {
        if hosts.is_empty() {
            return Err(ProxyError::Config(format!("shard {:x} has no hosts", shard)));
        }
        hosts.sort_by(|a, b| a.addr().cmp(b.addr()));
        hosts.dedup_by(|a, b| a.addr() == b.addr());

        let partition =
            Partition::new(config.ring_size, hosts.len())?.with_min_width(config.min_arc_width);
        if partition.replicas() != hosts.len() {
            return Err(ProxyError::Config(format!(
                "shard {:x}: {} hosts but {} arcs",
                shard,
                hosts.len(),
                partition.replicas()
            )));
        }

        let stale = std::time::Duration::from_secs(config.window_stale_secs);
        let states = vec![
            HostState {
                score: 0.0,
                alive: true,
            };
            hosts.len()
        ];
        let hosts = hosts
            .into_iter()
            .map(|conn| HostSlot {
                conn,
                window: TimeWindow::new(stale),
            })
            .collect();

        Ok(Self {
            shard,
            hosts,
            states: RwLock::new(states),
            partition,
            response_time_seconds: config.response_time_seconds,
            error_seconds: config.error_seconds,
            max_connect_errors: config.max_connect_errors,
            score_deviation: config.score_deviation,
            response_time_min: config.response_time_min,
            rebalance_step: config.rebalance_step,
        })
    }

    pub fn shard(&self) -> usize {
        self.shard
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    fn index_of(&self, addr: &str) -> Option<usize> {
        self.hosts
            .binary_search_by(|slot| slot.conn.addr().cmp(addr))
            .ok()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.index_of(addr).is_some()
    }

    /// Hosts in their fixed (address) order
    pub fn hosts(&self) -> Vec<Arc<HostConnection>> {
        self.hosts.iter().map(|slot| Arc::clone(&slot.conn)).collect()
    }

    /// Hosts for `key`, owner first, the rest following the fixed order
    pub fn route(&self, key: &str) -> Vec<Arc<HostConnection>> {
        let owner = self.partition.owner_of(key);
        let count = self.hosts.len();
        (0..count)
            .map(|i| Arc::clone(&self.hosts[(owner + i) % count].conn))
            .collect()
    }

    pub fn is_alive(&self, addr: &str) -> Option<bool> {
        let index = self.index_of(addr)?;
        Some(self.states.read()[index].alive)
    }

    pub fn state(&self, addr: &str) -> Option<HostState> {
        let index = self.index_of(addr)?;
        Some(self.states.read()[index])
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    fn score_of(&self, slot: &HostSlot, now: SystemTime) -> f64 {
        let latency = slot
            .window
            .query_at(SampleKind::Latency, self.response_time_seconds, now);
        let (count, sum) = totals(&latency);
        let mean = if count == 0 { 0.0 } else { sum / count as f64 };

        let errors = slot
            .window
            .query_at(SampleKind::Error, self.response_time_seconds, now);
        let (_, penalty) = totals(&errors);

        mean.max(self.response_time_min) + penalty
    }

    pub fn recompute_scores(&self) {
        self.recompute_scores_at(SystemTime::now());
    }

    /// Refresh every alive host's score from its recent samples
    pub fn recompute_scores_at(&self, now: SystemTime) {
        let scores: Vec<f64> = self
            .hosts
            .iter()
            .map(|slot| self.score_of(slot, now))
            .collect();

        let mut states = self.states.write();
        for (state, score) in states.iter_mut().zip(scores) {
            state.score = if state.alive { score } else { 0.0 };
        }
    }

    /// Move one step of ring space from the slowest to the fastest alive host
    ///
    /// Returns true if the partition changed.
    pub fn rebalance_if_needed(&self) -> bool {
        let states = self.states.read();
        let alive: Vec<(usize, f64)> = states
            .iter()
            .enumerate()
            .filter(|(_, state)| state.alive)
            .map(|(index, state)| (index, state.score))
            .collect();

        let slowest = alive.iter().copied().max_by(|a, b| a.1.total_cmp(&b.1));
        let fastest = alive.iter().copied().min_by(|a, b| a.1.total_cmp(&b.1));
        let (Some((from, slow)), Some((to, fast))) = (slowest, fastest) else {
            return false;
        };
        if from == to || slow - fast <= self.score_deviation {
            return false;
        }

        let moved = self.partition.rebalance(from, to, self.rebalance_step);
        if moved > 0 {
            tracing::debug!(
                "Shard {:x}: moved {} ring units from {} ({:.0}us) to {} ({:.0}us)",
                self.shard,
                moved,
                self.hosts[from].conn.addr(),
                slow,
                self.hosts[to].conn.addr(),
                fast
            );
        }
        moved > 0
    }

    // =========================================================================
    // Feedback
    // =========================================================================

    /// Record a latency sample (microseconds); false for an unknown host
    pub fn record_success(&self, addr: &str, at: SystemTime, micros: f64) -> bool {
        let Some(index) = self.index_of(addr) else {
            return false;
        };
        self.hosts[index]
            .window
            .record(SampleKind::Latency, at, micros);
        true
    }

    /// Record a failed interaction
    ///
    /// Hard errors count toward the dead threshold; a retryable error is only
    /// recorded as a slow sample. Returns true if the host just went dead.
    pub fn record_failure(&self, addr: &str, at: SystemTime, class: ErrorClass) -> bool {
        let Some(index) = self.index_of(addr) else {
            return false;
        };
        let window = &self.hosts[index].window;

        if class.is_retryable() {
            window.record(SampleKind::Latency, at, class.penalty());
            return false;
        }

        window.record(SampleKind::Error, at, class.penalty());
        let (errors, _) = totals(&window.query_at(SampleKind::Error, self.error_seconds, at));
        if errors <= self.max_connect_errors {
            return false;
        }

        {
            let mut states = self.states.write();
            if !states[index].alive {
                return false;
            }
            states[index].alive = false;
            states[index].score = 0.0;
        }

        let collapsed = self.partition.remove(index);
        tracing::warn!(
            "Shard {:x}: host {} marked dead after {} errors in {}s (arc collapsed: {})",
            self.shard,
            addr,
            errors,
            self.error_seconds,
            collapsed
        );
        true
    }

    /// Bring a dead host back, discarding its stale history
    ///
    /// The collapsed arc is not restored here. The host owns keys again only
    /// once `rebalance_if_needed` finds it faster than the slowest host by
    /// more than the score deviation. Returns true if the host was dead.
    pub fn mark_alive(&self, addr: &str) -> bool {
        let Some(index) = self.index_of(addr) else {
            return false;
        };
        {
            let mut states = self.states.write();
            if states[index].alive {
                return false;
            }
            states[index].alive = true;
        }
        self.hosts[index].window.clear();
        tracing::info!("Shard {:x}: host {} is alive again", self.shard, addr);
        true
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    pub fn stats(&self) -> ShardStats {
        let states = self.states.read();
        let widths = self.partition.widths();
        let hosts = self
            .hosts
            .iter()
            .zip(states.iter())
            .zip(widths)
            .map(|((slot, state), arc_width)| HostStats {
                addr: slot.conn.addr().to_string(),
                score: state.score,
                alive: state.alive,
                arc_width,
            })
            .collect();
        ShardStats {
            shard: self.shard,
            hosts,
        }
    }

    /// Raw latency slots of one host
    pub fn latency_window(&self, addr: &str) -> Option<Vec<Slot>> {
        let index = self.index_of(addr)?;
        Some(self.hosts[index].window.snapshot(SampleKind::Latency))
    }
}
