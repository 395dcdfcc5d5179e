//! Shard assignment table
//!
//! Maps each backend address to the shards it serves, as a primary or as a
//! backup replica.

use std::collections::BTreeMap;

use crate::error::{ProxyError, Result};

/// How an address serves a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Backup,
}

/// Static shard-to-host assignment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShardTable {
    shard_count: usize,
    servers: BTreeMap<String, BTreeMap<usize, Role>>,
}

impl ShardTable {
    /// Create an empty table for `shard_count` shards
    pub fn new(shard_count: usize) -> Self {
        Self {
            shard_count,
            servers: BTreeMap::new(),
        }
    }

    /// Every address serves every shard as a primary
    pub fn uniform<S: AsRef<str>>(addrs: &[S], shard_count: usize) -> Result<Self> {
        let mut table = Self::new(shard_count);
        for addr in addrs {
            for shard in 0..shard_count {
                table.assign(addr.as_ref(), shard, Role::Primary)?;
            }
        }
        Ok(table)
    }

    /// Record that `addr` serves `shard` with `role`
    pub fn assign(&mut self, addr: &str, shard: usize, role: Role) -> Result<()> {
        if shard >= self.shard_count {
            return Err(ProxyError::Config(format!(
                "{} serves shard {} but there are only {} shards",
                addr, shard, self.shard_count
            )));
        }
        self.servers
            .entry(addr.to_string())
            .or_default()
            .insert(shard, role);
        Ok(())
    }

    /// Parse one `addr=shard,shard,...` route entry
    ///
    /// Shard numbers are hexadecimal; a leading `-` marks a backup.
    pub fn parse_route(&mut self, entry: &str) -> Result<()> {
        let (addr, shards) = entry
            .split_once('=')
            .ok_or_else(|| ProxyError::Config(format!("route entry without '=': {}", entry)))?;
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(ProxyError::Config(format!("route entry without address: {}", entry)));
        }

        for token in shards.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (role, digits) = match token.strip_prefix('-') {
                Some(rest) => (Role::Backup, rest),
                None => (Role::Primary, token),
            };
            let shard = usize::from_str_radix(digits, 16).map_err(|_| {
                ProxyError::Config(format!("bad shard number {:?} for {}", token, addr))
            })?;
            self.assign(addr, shard, role)?;
        }
        Ok(())
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// All known addresses, sorted
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    fn with_role(&self, shard: usize, role: Role) -> Vec<&str> {
        self.servers
            .iter()
            .filter(|(_, shards)| shards.get(&shard) == Some(&role))
            .map(|(addr, _)| addr.as_str())
            .collect()
    }

    /// Primary addresses of a shard, sorted
    pub fn primaries(&self, shard: usize) -> Vec<&str> {
        self.with_role(shard, Role::Primary)
    }

    /// Backup addresses of a shard, sorted
    pub fn backups(&self, shard: usize) -> Vec<&str> {
        self.with_role(shard, Role::Backup)
    }

    /// Check the invariants routing depends on
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(ProxyError::Config(format!(
                "shard count must be a power of two, got {}",
                self.shard_count
            )));
        }
        if let Some(shard) = (0..self.shard_count).find(|&s| self.primaries(s).is_empty()) {
            return Err(ProxyError::Config(format!(
                "shard {:x} has no primary host",
                shard
            )));
        }
        Ok(())
    }
}
