//! Route Module
//!
//! Everything that decides where a key goes.
//!
//! ## Components
//! - `ShardTable`: static address → shard/role assignment
//! - `BucketGroup`: one shard's hosts, scores, liveness and partition
//! - `Router`: key → shard → ordered hosts, plus the feedback worker and the
//!   health/rebalance loops
//! - `RouterHandle`: atomically swappable current router

mod bucket;
mod feedback;
mod handle;
mod router;
mod table;

pub use bucket::{BucketGroup, HostState, HostStats, ShardStats};
pub use feedback::{ErrorClass, Feedback, Signal};
pub use handle::RouterHandle;
pub use router::{fnv1a, HashMethod, Router, RouterStats, Scheduler};
pub use table::{Role, ShardTable};
