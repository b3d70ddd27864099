// Interrupt Latency Benchmark
//
// Measures how long maskable interrupts stay disabled between an `irq_lock`
// that masks them and the `irq_unlock` that re-enables them. The worst case
// is the interrupt latency the kernel adds on top of the hardware.
//
// Compiled in with the `int-latency-benchmark` feature; otherwise `start`
// and `stop` are empty and vanish after inlining.
//
// Implementation details:
// - Timestamps are TSC cycles from `arch::timestamp`
// - `locked_at == 0` means "not measuring"; a zero timestamp is bumped to 1
// - `calibrate` measures the cost of the hooks themselves so `report` can
//   subtract it

use crate::arch;
use crate::log_info;
use core::sync::atomic::{AtomicU64, Ordering};

const LOG_ORIGIN: &str = "latency";
const CALIBRATION_ROUNDS: u64 = 16;

pub struct LatencyStats {
    locked_at: AtomicU64,
    max: AtomicU64,
    min: AtomicU64,
    total: AtomicU64,
    samples: AtomicU64,
    overhead: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub max: u64,
    pub min: u64,
    pub average: u64,
    pub samples: u64,
    pub overhead: u64,
}

impl LatencyStats {
    pub const fn new() -> Self {
        Self {
            locked_at: AtomicU64::new(0),
            max: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            total: AtomicU64::new(0),
            samples: AtomicU64::new(0),
            overhead: AtomicU64::new(0),
        }
    }

    pub fn start(&self, now: u64) {
        let _ = self
            .locked_at
            .compare_exchange(0, now.max(1), Ordering::Relaxed, Ordering::Relaxed);
    }

    pub fn stop(&self, now: u64) {
        let locked_at = self.locked_at.swap(0, Ordering::Relaxed);
        if locked_at == 0 {
            return;
        }

        let delta = now.saturating_sub(locked_at);
        self.max.fetch_max(delta, Ordering::Relaxed);
        self.min.fetch_min(delta, Ordering::Relaxed);
        self.total.fetch_add(delta, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_overhead(&self, cycles: u64) {
        self.overhead.store(cycles, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.locked_at.store(0, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let samples = self.samples.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);

        LatencySnapshot {
            max: self.max.load(Ordering::Relaxed),
            min: if samples == 0 { 0 } else { self.min.load(Ordering::Relaxed) },
            average: if samples == 0 { 0 } else { total / samples },
            samples,
            overhead: self.overhead.load(Ordering::Relaxed),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

static INT_LATENCY: LatencyStats = LatencyStats::new();

#[cfg(feature = "int-latency-benchmark")]
#[inline(always)]
pub fn start() {
    INT_LATENCY.start(arch::timestamp());
}

#[cfg(feature = "int-latency-benchmark")]
#[inline(always)]
pub fn stop() {
    INT_LATENCY.stop(arch::timestamp());
}

#[cfg(not(feature = "int-latency-benchmark"))]
#[inline(always)]
pub fn start() {}

#[cfg(not(feature = "int-latency-benchmark"))]
#[inline(always)]
pub fn stop() {}

/// Measure the cost of an empty start/stop pair and clear the statistics.
pub fn calibrate() {
    let scratch = LatencyStats::new();
    let begin = arch::timestamp();
    for _ in 0..CALIBRATION_ROUNDS {
        scratch.start(arch::timestamp());
        scratch.stop(arch::timestamp());
    }
    let cycles = arch::timestamp().saturating_sub(begin) / CALIBRATION_ROUNDS;

    INT_LATENCY.reset();
    INT_LATENCY.set_overhead(cycles);
}

pub fn snapshot() -> LatencySnapshot {
    INT_LATENCY.snapshot()
}

impl LatencySnapshot {
    /// The same figures with the measured hook cost taken out.
    pub fn without_overhead(&self) -> Self {
        Self {
            max: self.max.saturating_sub(self.overhead),
            min: self.min.saturating_sub(self.overhead),
            average: self.average.saturating_sub(self.overhead),
            ..*self
        }
    }
}

/// Log the masked-time statistics gathered since the last calibration.
pub fn report() {
    let stats = snapshot();
    if stats.samples == 0 {
        log_info!(LOG_ORIGIN, "no masked sections measured");
        return;
    }

    let adjusted = stats.without_overhead();
    log_info!(
        LOG_ORIGIN,
        "interrupts masked: max={} min={} avg={} cycles over {} sections (hook overhead {})",
        adjusted.max,
        adjusted.min,
        adjusted.average,
        adjusted.samples,
        adjusted.overhead
    );
}
