//! Progress tracking shared between the session and the strategies
//!
//! One tracker per export job. The worker side advances a work counter and
//! phase; observers poll an immutable snapshot. Cancellation rides on the
//! same handle: a shared atomic checked by the strategies at every loop
//! iteration and backpressure wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

/// ETA is withheld until at least this much progress has accrued.
const ETA_MIN_FRACTION: f64 = 0.01;

/// Coarse phase of an export, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPhase {
    Preparing,
    Exporting,
    Finalizing,
    Done,
}

/// Point-in-time view of an export's progress.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub phase: ExportPhase,
    /// Fraction complete in 0..=1.
    pub fraction: f64,
    pub elapsed_seconds: f64,
    /// Linear extrapolation from elapsed/fraction; absent below 1% progress.
    pub eta_seconds: Option<f64>,
}

struct Inner {
    phase: ExportPhase,
    completed: u64,
    total: Option<u64>,
    started: Instant,
}

/// Thread-safe progress state with cooperative cancellation.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<Mutex<Inner>>,
    cancelled: Arc<AtomicBool>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                phase: ExportPhase::Preparing,
                completed: 0,
                total: None,
                started: Instant::now(),
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_phase(&self, phase: ExportPhase) {
        let mut inner = self.inner.lock().unwrap();
        inner.phase = phase;
    }

    /// Declare how many work units the export comprises.
    pub fn set_total(&self, total: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.total = Some(total.max(1));
    }

    /// Record absolute progress in work units.
    pub fn advance(&self, completed: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.completed = completed;
    }

    /// Mark the export finished; fraction reads 1.0 from here on.
    pub fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.phase = ExportPhase::Done;
        if let Some(total) = inner.total {
            inner.completed = total;
        }
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fraction complete in 0..=1; 0 while the total is unknown.
    pub fn fraction(&self) -> f64 {
        let inner = self.inner.lock().unwrap();
        Self::fraction_of(&inner)
    }

    pub fn elapsed(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        inner.started.elapsed()
    }

    /// Estimated time remaining, linearly extrapolated once progress
    /// passes 1%.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let inner = self.inner.lock().unwrap();
        Self::eta_of(&inner)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.inner.lock().unwrap();
        ProgressSnapshot {
            phase: inner.phase,
            fraction: Self::fraction_of(&inner),
            elapsed_seconds: inner.started.elapsed().as_secs_f64(),
            eta_seconds: Self::eta_of(&inner).map(|d| d.as_secs_f64()),
        }
    }

    fn fraction_of(inner: &Inner) -> f64 {
        if inner.phase == ExportPhase::Done {
            return 1.0;
        }
        match inner.total {
            Some(total) => (inner.completed as f64 / total as f64).clamp(0.0, 1.0),
            None => 0.0,
        }
    }

    fn eta_of(inner: &Inner) -> Option<Duration> {
        let fraction = Self::fraction_of(inner);
        if fraction <= ETA_MIN_FRACTION || fraction >= 1.0 {
            return None;
        }
        let elapsed = inner.started.elapsed().as_secs_f64();
        Some(Duration::from_secs_f64(elapsed * (1.0 - fraction) / fraction))
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
