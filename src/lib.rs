//! # QuorumKV
//!
//! A routing proxy in front of a sharded key-value cluster with:
//! - Fixed power-of-two sharding by key hash
//! - N/W/R quorum reads and writes per key
//! - Latency-driven ownership inside each shard
//! - Dead-host detection with automatic revival
//! - Hot reload of the shard table
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TCP Front End (Server)                      │
//! │                  (one thread per client)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    QuorumClient                              │
//! │           (get / getm / set / delete with N/W/R)             │
//! └──────────┬──────────────────────────────────▲───────────────┘
//!            │ hosts_for(key)                   │ feedback
//! ┌──────────▼──────────────────────────────────┴───────────────┐
//! │                 Router (via RouterHandle)                    │
//! │   shard_of → BucketGroup → Partition owner → ordered hosts   │
//! │   feedback worker · health checker · rebalancer              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!                       ▼
//!              ┌─────────────────┐
//!              │ HostConnection  │  pooled, deadline-bound
//!              │   (per backend) │  exchanges
//!              └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod window;
pub mod partition;
pub mod host;
pub mod route;
pub mod quorum;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{ProxyError, Result};
pub use config::Config;
pub use host::HostConnection;
pub use partition::Partition;
pub use quorum::QuorumClient;
pub use route::{Router, RouterHandle, Scheduler, ShardTable};
pub use window::TimeWindow;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of QuorumKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
