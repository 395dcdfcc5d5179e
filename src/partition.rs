//! Partition
//!
//! Splits a shard's internal ring `[0, ring_size)` into one contiguous arc
//! per replica slot. Arc `i` starts where arc `i - 1` ends, walking
//! clockwise from the origin; the widths always sum to `ring_size`.
//!
//! ## Mutation
//! - `rebalance` moves a bounded amount of ring space from one arc to a
//!   ring-adjacent arc. Collapsed (zero-width) arcs are skipped when deciding
//!   adjacency.
//! - `remove` collapses an arc, folding half of its space onto each live
//!   ring-neighbor.
//!
//! ## Concurrency
//! All mutating operations take the write lock; `owner_of` takes the read
//! lock.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use parking_lot::RwLock;

use crate::error::{ProxyError, Result};

/// Default minimum width an arc keeps through rebalancing
pub const MIN_ARC_WIDTH: u32 = 5;

#[derive(Debug, Clone)]
struct Ring {
    size: u32,
    /// Ring position where arc 0 starts
    origin: u32,
    widths: Vec<u32>,
    /// Relative end offset of every non-empty arc -> replica index
    ends: BTreeMap<u32, usize>,
}

impl Ring {
    fn new(size: u32, replicas: usize) -> Self {
        let share = size / replicas as u32;
        let mut widths = vec![share; replicas];
        // The last arc absorbs the rounding remainder
        widths[replicas - 1] = size - share * (replicas as u32 - 1);

        let mut ring = Self {
            size,
            origin: 0,
            widths,
            ends: BTreeMap::new(),
        };
        ring.reindex();
        ring
    }

    fn reindex(&mut self) {
        self.ends.clear();
        let mut end = 0u32;
        for (index, &width) in self.widths.iter().enumerate() {
            end += width;
            if width > 0 {
                self.ends.insert(end, index);
            }
        }
    }

    fn owner_of_point(&self, point: u32) -> usize {
        let relative = ((point % self.size) + self.size - self.origin) % self.size;
        self.ends
            .range((Excluded(relative), Unbounded))
            .next()
            .map(|(_, &index)| index)
            .unwrap_or(0)
    }

    fn offsets(&self) -> Vec<u32> {
        let mut start = self.origin;
        self.widths
            .iter()
            .map(|&width| {
                let offset = start;
                start = (start + width) % self.size;
                offset
            })
            .collect()
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.widths.len()
    }

    fn prev(&self, index: usize) -> usize {
        (index + self.widths.len() - 1) % self.widths.len()
    }

    /// First non-empty arc clockwise of `index`
    fn live_successor(&self, index: usize) -> Option<usize> {
        let mut j = self.next(index);
        while j != index {
            if self.widths[j] > 0 {
                return Some(j);
            }
            j = self.next(j);
        }
        None
    }

    /// First non-empty arc counter-clockwise of `index`
    fn live_predecessor(&self, index: usize) -> Option<usize> {
        let mut j = self.prev(index);
        while j != index {
            if self.widths[j] > 0 {
                return Some(j);
            }
            j = self.prev(j);
        }
        None
    }

    /// True if walking clockwise from `from` reaches `to` across empty arcs only
    fn clockwise_adjacent(&self, from: usize, to: usize) -> bool {
        let mut j = self.next(from);
        while j != to {
            if self.widths[j] > 0 || j == from {
                return false;
            }
            j = self.next(j);
        }
        true
    }

    fn counter_clockwise_adjacent(&self, from: usize, to: usize) -> bool {
        let mut j = self.prev(from);
        while j != to {
            if self.widths[j] > 0 || j == from {
                return false;
            }
            j = self.prev(j);
        }
        true
    }

    /// Give the tail of `from` to the next arc clockwise, `to`.
    ///
    /// Every arc strictly between them must be empty.
    fn shift_tail(&mut self, from: usize, to: usize, amount: u32) {
        self.widths[from] -= amount;
        self.widths[to] += amount;
        // Arc starts from `from + 1` through `to` move back by `amount`
        let mut j = self.next(from);
        loop {
            if j == 0 {
                self.origin = (self.origin + self.size - amount % self.size) % self.size;
            }
            if j == to {
                break;
            }
            j = self.next(j);
        }
    }

    /// Give the head of `from` to the previous arc counter-clockwise, `to`.
    ///
    /// Every arc strictly between them must be empty.
    fn shift_head(&mut self, from: usize, to: usize, amount: u32) {
        self.widths[from] -= amount;
        self.widths[to] += amount;
        // Arc starts from `to + 1` through `from` move forward by `amount`
        let mut j = self.next(to);
        loop {
            if j == 0 {
                self.origin = (self.origin + amount) % self.size;
            }
            if j == from {
                break;
            }
            j = self.next(j);
        }
    }
}

/// Ownership map of one shard's ring over its replica slots
#[derive(Debug)]
pub struct Partition {
    ring: RwLock<Ring>,
    min_width: u32,
}

impl Partition {
    /// Create a partition with evenly sized arcs
    ///
    /// Arc `i` starts at `(ring_size / replicas) * i`.
    pub fn new(ring_size: u32, replicas: usize) -> Result<Self> {
        if replicas == 0 {
            return Err(ProxyError::Config(
                "partition needs at least one replica".to_string(),
            ));
        }
        if (ring_size as usize) < replicas {
            return Err(ProxyError::Config(format!(
                "ring size {} is smaller than replica count {}",
                ring_size, replicas
            )));
        }

        Ok(Self {
            ring: RwLock::new(Ring::new(ring_size, replicas)),
            min_width: MIN_ARC_WIDTH,
        })
    }

    /// Override the minimum arc width kept by `rebalance`
    pub fn with_min_width(mut self, min_width: u32) -> Self {
        self.min_width = min_width;
        self
    }

    /// Ring position of a key
    pub fn point_of(&self, key: &str) -> u32 {
        crc32fast::hash(key.as_bytes()) % self.ring_size()
    }

    /// Replica slot owning `key`
    pub fn owner_of(&self, key: &str) -> usize {
        let point = crc32fast::hash(key.as_bytes());
        self.ring.read().owner_of_point(point)
    }

    /// Replica slot owning a ring position
    pub fn owner_of_point(&self, point: u32) -> usize {
        self.ring.read().owner_of_point(point)
    }

    /// Move up to `step` ring units from arc `from` to arc `to`
    ///
    /// `from` never shrinks below the minimum width. When the two arcs are not
    /// ring-adjacent, `from` shrinks toward its live neighbor on the shorter
    /// side facing `to`. Returns the number of units moved.
    pub fn rebalance(&self, from: usize, to: usize, step: u32) -> u32 {
        let mut ring = self.ring.write();
        let replicas = ring.widths.len();
        if from >= replicas || to >= replicas || from == to {
            return 0;
        }

        let amount = step.min(ring.widths[from].saturating_sub(self.min_width));
        if amount == 0 {
            return 0;
        }

        if ring.clockwise_adjacent(from, to) {
            ring.shift_tail(from, to, amount);
        } else if ring.counter_clockwise_adjacent(from, to) {
            ring.shift_head(from, to, amount);
        } else {
            let successor = ring.live_successor(from);
            let predecessor = ring.live_predecessor(from);
            let clockwise_hops = (to + replicas - from) % replicas;
            let counter_hops = (from + replicas - to) % replicas;
            match (successor, predecessor) {
                (Some(next), _) if clockwise_hops <= counter_hops => {
                    ring.shift_tail(from, next, amount)
                }
                (_, Some(prev)) => ring.shift_head(from, prev, amount),
                (Some(next), None) => ring.shift_tail(from, next, amount),
                (None, None) => return 0,
            }
        }

        ring.reindex();
        amount
    }

    /// Collapse arc `index`, folding its space onto its live neighbors
    ///
    /// Returns false when the arc is already empty, out of range, or is the
    /// last non-empty arc (the ring always keeps one owner).
    pub fn remove(&self, index: usize) -> bool {
        let mut ring = self.ring.write();
        if index >= ring.widths.len() || ring.widths[index] == 0 {
            return false;
        }

        let (next, prev) = match (ring.live_successor(index), ring.live_predecessor(index)) {
            (Some(next), Some(prev)) => (next, prev),
            _ => return false,
        };

        let width = ring.widths[index];
        if next == prev {
            ring.shift_tail(index, next, width);
        } else {
            let tail = width / 2;
            ring.shift_tail(index, next, tail);
            ring.shift_head(index, prev, width - tail);
        }

        ring.reindex();
        true
    }

    /// Current arc widths, indexed by replica slot
    pub fn widths(&self) -> Vec<u32> {
        self.ring.read().widths.clone()
    }

    /// Current arc start offsets, indexed by replica slot
    pub fn offsets(&self) -> Vec<u32> {
        self.ring.read().offsets()
    }

    pub fn width_of(&self, index: usize) -> u32 {
        self.ring.read().widths.get(index).copied().unwrap_or(0)
    }

    pub fn replicas(&self) -> usize {
        self.ring.read().widths.len()
    }

    pub fn ring_size(&self) -> u32 {
        self.ring.read().size
    }

    pub fn min_width(&self) -> u32 {
        self.min_width
    }
}
