//! Configuration for QuorumKV
//!
//! Centralized configuration with the proxy's production defaults.

use std::time::Duration;

use crate::error::{ProxyError, Result};

/// Main configuration for a proxy instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Quorum Configuration
    // -------------------------------------------------------------------------
    /// Number of main hosts targeted per key
    pub n: usize,

    /// Successful writes required
    pub w: usize,

    /// Error-free reads required
    pub r: usize,

    // -------------------------------------------------------------------------
    // Backend Connection Configuration
    // -------------------------------------------------------------------------
    /// Capacity of each host's free connection list
    pub max_free_conns_per_host: usize,

    /// Dial timeout (milliseconds)
    pub connect_timeout_ms: u64,

    /// Silence window after a failed dial (milliseconds)
    pub dial_fail_silence_ms: u64,

    /// Exchange deadline for get/getm/delete (milliseconds)
    pub read_timeout_ms: u64,

    /// Exchange deadline for set (milliseconds)
    pub write_timeout_ms: u64,

    /// Deadline for the health-check ping (milliseconds)
    pub liveness_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Scoring Configuration
    // -------------------------------------------------------------------------
    /// Seconds of latency history used for scoring
    pub response_time_seconds: usize,

    /// Seconds of error history used for dead detection
    pub error_seconds: usize,

    /// Hard errors within `error_seconds` above which a host is dead
    pub max_connect_errors: u64,

    /// Score gap (microseconds) that triggers a rebalance step
    pub score_deviation: f64,

    /// Score floor (microseconds)
    pub response_time_min: f64,

    /// Values at or above this size do not report latency
    pub item_size_stats: usize,

    /// Slots older than this are overwritten instead of accumulated
    pub window_stale_secs: u64,

    // -------------------------------------------------------------------------
    // Partition Configuration
    // -------------------------------------------------------------------------
    /// Size of each shard's internal ring
    pub ring_size: u32,

    /// No arc shrinks below this width through rebalancing
    pub min_arc_width: u32,

    /// Ring units moved per rebalance step
    pub rebalance_step: u32,

    // -------------------------------------------------------------------------
    // Background Loop Configuration
    // -------------------------------------------------------------------------
    pub health_check_interval_ms: u64,

    pub rebalance_interval_ms: u64,

    /// Bounded capacity of the feedback channel
    pub feedback_queue_size: usize,

    /// Delay before a replaced router is closed (milliseconds)
    pub reload_grace_ms: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address of the proxy front end
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            n: 3,
            w: 2,
            r: 1,
            max_free_conns_per_host: 20,
            connect_timeout_ms: 300,
            dial_fail_silence_ms: 5000,
            read_timeout_ms: 2000,
            write_timeout_ms: 2000,
            liveness_timeout_ms: 300,
            response_time_seconds: 10,
            error_seconds: 10,
            max_connect_errors: 10,
            score_deviation: 10_000.0, // 10 ms
            response_time_min: 4_000.0, // 4 ms
            item_size_stats: 4096,
            window_stale_secs: 30,
            ring_size: 100,
            min_arc_width: 5,
            rebalance_step: 1,
            health_check_interval_ms: 5000,
            rebalance_interval_ms: 5000,
            feedback_queue_size: 1024,
            reload_grace_ms: 5000,
            listen_addr: "0.0.0.0:7905".to_string(),
            max_connections: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the invariants the router and client rely on
    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(ProxyError::Config("N must be at least 1".to_string()));
        }
        if self.w == 0 || self.w > self.n {
            return Err(ProxyError::Config(format!(
                "W must be within 1..={}, got {}",
                self.n, self.w
            )));
        }
        if self.r == 0 || self.r > self.n {
            return Err(ProxyError::Config(format!(
                "R must be within 1..={}, got {}",
                self.n, self.r
            )));
        }
        if self.window_stale_secs == 0 || self.window_stale_secs >= 60 {
            return Err(ProxyError::Config(format!(
                "window_stale_secs must be within 1..=59, got {}",
                self.window_stale_secs
            )));
        }
        if self.response_time_seconds == 0 || self.response_time_seconds > 60 {
            return Err(ProxyError::Config(format!(
                "response_time_seconds must be within 1..=60, got {}",
                self.response_time_seconds
            )));
        }
        if self.error_seconds == 0 || self.error_seconds > 60 {
            return Err(ProxyError::Config(format!(
                "error_seconds must be within 1..=60, got {}",
                self.error_seconds
            )));
        }
        if self.ring_size == 0 {
            return Err(ProxyError::Config("ring_size must be positive".to_string()));
        }
        if self.feedback_queue_size == 0 {
            return Err(ProxyError::Config(
                "feedback_queue_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn dial_fail_silence(&self) -> Duration {
        Duration::from_millis(self.dial_fail_silence_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn reload_grace(&self) -> Duration {
        Duration::from_millis(self.reload_grace_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set N, W and R together
    pub fn quorum(mut self, n: usize, w: usize, r: usize) -> Self {
        self.config.n = n;
        self.config.w = w;
        self.config.r = r;
        self
    }

    /// Set the free-list capacity per host
    pub fn max_free_conns_per_host(mut self, count: usize) -> Self {
        self.config.max_free_conns_per_host = count;
        self
    }

    /// Set the dial timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the silence window after a failed dial (in milliseconds)
    pub fn dial_fail_silence_ms(mut self, ms: u64) -> Self {
        self.config.dial_fail_silence_ms = ms;
        self
    }

    /// Set the read deadline (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write deadline (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the liveness ping deadline (in milliseconds)
    pub fn liveness_timeout_ms(mut self, ms: u64) -> Self {
        self.config.liveness_timeout_ms = ms;
        self
    }

    pub fn response_time_seconds(mut self, secs: usize) -> Self {
        self.config.response_time_seconds = secs;
        self
    }

    pub fn error_seconds(mut self, secs: usize) -> Self {
        self.config.error_seconds = secs;
        self
    }

    pub fn max_connect_errors(mut self, count: u64) -> Self {
        self.config.max_connect_errors = count;
        self
    }

    pub fn score_deviation(mut self, micros: f64) -> Self {
        self.config.score_deviation = micros;
        self
    }

    pub fn response_time_min(mut self, micros: f64) -> Self {
        self.config.response_time_min = micros;
        self
    }

    pub fn item_size_stats(mut self, size: usize) -> Self {
        self.config.item_size_stats = size;
        self
    }

    pub fn window_stale_secs(mut self, secs: u64) -> Self {
        self.config.window_stale_secs = secs;
        self
    }

    /// Set the partition ring geometry
    pub fn partition(mut self, ring_size: u32, min_arc_width: u32, rebalance_step: u32) -> Self {
        self.config.ring_size = ring_size;
        self.config.min_arc_width = min_arc_width;
        self.config.rebalance_step = rebalance_step;
        self
    }

    pub fn health_check_interval_ms(mut self, ms: u64) -> Self {
        self.config.health_check_interval_ms = ms;
        self
    }

    pub fn rebalance_interval_ms(mut self, ms: u64) -> Self {
        self.config.rebalance_interval_ms = ms;
        self
    }

    pub fn feedback_queue_size(mut self, size: usize) -> Self {
        self.config.feedback_queue_size = size;
        self
    }

    pub fn reload_grace_ms(mut self, ms: u64) -> Self {
        self.config.reload_grace_ms = ms;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
