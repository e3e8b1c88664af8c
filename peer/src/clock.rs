//! Time sources for the tick loop.
//!
//! The coordinator needs two notions of time: a monotonic clock for timers,
//! cooldowns and rate windows, and a wall clock to agree with other peers on
//! when a synchronized restart fires. Both are read through [`Clock`] so tests
//! can drive time by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin. Never goes backwards.
    fn monotonic_ms(&self) -> u64;

    /// Milliseconds since the Unix epoch. Only comparable across peers up to
    /// their clock skew.
    fn epoch_ms(&self) -> u64;
}

/// Real time.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Hand-driven clock for deterministic tests.
///
/// Monotonic and wall time advance together; `epoch_offset_ms` models a peer
/// whose wall clock is skewed relative to another sharing the same elapsed time.
#[derive(Debug)]
pub struct ManualClock {
    elapsed_ms: AtomicU64,
    epoch_base_ms: u64,
}

/// Arbitrary but realistic epoch used as the wall-clock origin in tests.
pub const MANUAL_EPOCH_BASE_MS: u64 = 1_700_000_000_000;

impl ManualClock {
    pub fn new() -> Self {
        Self::with_epoch_base(MANUAL_EPOCH_BASE_MS)
    }

    pub fn with_epoch_base(epoch_base_ms: u64) -> Self {
        Self {
            elapsed_ms: AtomicU64::new(0),
            epoch_base_ms,
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn monotonic_ms(&self) -> u64 {
        self.elapsed_ms.load(Ordering::SeqCst)
    }

    fn epoch_ms(&self) -> u64 {
        self.epoch_base_ms + self.elapsed_ms.load(Ordering::SeqCst)
    }
}
