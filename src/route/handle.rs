//! Router Handle
//!
//! Hot-swappable holder of the current router. Requests clone the current
//! `Arc<Router>` and keep using it for the rest of the request; a reload
//! publishes a new router and closes the old one after a grace period.

use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;

use crate::config::Config;
use crate::error::Result;

use super::router::{Router, Scheduler};
use super::table::ShardTable;

pub struct RouterHandle {
    current: RwLock<Arc<Router>>,
    config: Config,
}

impl RouterHandle {
    /// Build the first router for `table`
    pub fn new(table: &ShardTable, config: Config) -> Result<Self> {
        let router = Router::new(table, &config)?;
        Ok(Self {
            current: RwLock::new(Arc::new(router)),
            config,
        })
    }

    /// The router serving new requests
    pub fn load(&self) -> Arc<Router> {
        Arc::clone(&self.current.read())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replace the router with one built from `table`
    ///
    /// The new router is fully built before it is published; on error the
    /// current one stays in place. The old router keeps serving requests that
    /// already hold it until the grace period ends.
    pub fn reload(&self, table: &ShardTable) -> Result<()> {
        let fresh = Arc::new(Router::new(table, &self.config)?);
        let old = std::mem::replace(&mut *self.current.write(), fresh);

        let grace = self.config.reload_grace();
        let drained = thread::Builder::new()
            .name("router-drain".to_string())
            .spawn(move || {
                thread::sleep(grace);
                old.close();
            });
        if let Err(e) = drained {
            // The old router is dropped (and closed) with the failed closure
            tracing::warn!("Could not schedule close of the old router: {}", e);
        }

        tracing::info!(
            "Router reloaded: {} shards, old router closes in {:?}",
            table.shard_count(),
            grace
        );
        Ok(())
    }

    /// Close the current router
    pub fn close(&self) {
        self.current.read().close();
    }
}
