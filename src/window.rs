//! Time Window
//!
//! Per-second latency and error aggregates over the last minute.
//!
//! ## Layout
//! Each kind of sample owns a circular array of 60 slots, one per
//! second-of-minute. A slot is `{timestamp, count, sum}`; writing into a slot
//! whose timestamp is older than the staleness interval starts it over, so a
//! slot never mixes samples from two different minutes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

/// Number of slots (one per second of a minute)
pub const WINDOW_SLOTS: usize = 60;

/// Which series a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Latency,
    Error,
}

/// One second of aggregated samples
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Slot {
    /// Unix milliseconds of the last write (0 = never written)
    pub timestamp_ms: u64,
    pub count: u64,
    pub sum: f64,
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Sum counts and values over a slice of slots
pub fn totals(slots: &[Slot]) -> (u64, f64) {
    slots
        .iter()
        .fold((0, 0.0), |(count, sum), slot| (count + slot.count, sum + slot.sum))
}

fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sliding one-minute window of latency and error samples for one host
pub struct TimeWindow {
    latency: RwLock<[Slot; WINDOW_SLOTS]>,
    errors: RwLock<[Slot; WINDOW_SLOTS]>,
    stale_ms: u64,
}

impl TimeWindow {
    /// Create an empty window
    ///
    /// `stale_after` should stay under one minute, otherwise a slot can be
    /// accumulated across a wrap of the second hand.
    pub fn new(stale_after: Duration) -> Self {
        Self {
            latency: RwLock::new([Slot::default(); WINDOW_SLOTS]),
            errors: RwLock::new([Slot::default(); WINDOW_SLOTS]),
            stale_ms: stale_after.as_millis() as u64,
        }
    }

    fn series(&self, kind: SampleKind) -> &RwLock<[Slot; WINDOW_SLOTS]> {
        match kind {
            SampleKind::Latency => &self.latency,
            SampleKind::Error => &self.errors,
        }
    }

    /// Add one sample taken at `at`
    pub fn record(&self, kind: SampleKind, at: SystemTime, value: f64) {
        let at_ms = unix_millis(at);
        let index = ((at_ms / 1000) % WINDOW_SLOTS as u64) as usize;

        let mut slots = self.series(kind).write();
        let slot = &mut slots[index];
        if at_ms.saturating_sub(slot.timestamp_ms) > self.stale_ms {
            slot.count = 0;
            slot.sum = 0.0;
        }
        slot.count += 1;
        slot.sum += value;
        slot.timestamp_ms = slot.timestamp_ms.max(at_ms);
    }

    /// Slots covering the last `seconds` seconds up to now, oldest first
    pub fn query(&self, kind: SampleKind, seconds: usize) -> Vec<Slot> {
        self.query_at(kind, seconds, SystemTime::now())
    }

    /// Slots covering the last `seconds` seconds ending at `now`, oldest first
    ///
    /// The current second is included. A slot last written in a different
    /// second than the one it stands for is returned empty.
    pub fn query_at(&self, kind: SampleKind, seconds: usize, now: SystemTime) -> Vec<Slot> {
        let seconds = seconds.clamp(1, WINDOW_SLOTS) as u64;
        let now_secs = unix_millis(now) / 1000;

        let slots = self.series(kind).read();
        (0..seconds)
            .rev()
            .map(|back| {
                let second = now_secs.saturating_sub(back);
                let slot = slots[(second % WINDOW_SLOTS as u64) as usize];
                if slot.count > 0 && slot.timestamp_ms / 1000 == second {
                    slot
                } else {
                    Slot::default()
                }
            })
            .collect()
    }

    /// Raw copy of every slot of one series, in slot order
    pub fn snapshot(&self, kind: SampleKind) -> Vec<Slot> {
        self.series(kind).read().to_vec()
    }

    /// Forget all samples
    pub fn clear(&self) {
        *self.latency.write() = [Slot::default(); WINDOW_SLOTS];
        *self.errors.write() = [Slot::default(); WINDOW_SLOTS];
    }
}
