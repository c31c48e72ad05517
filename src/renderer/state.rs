use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::config;

/// Overlay flags the render thread reads without taking the simulation lock.
/// Values may be a frame stale.
#[derive(Debug)]
pub struct OverlayState {
    paused: AtomicBool,
    loading: AtomicBool,
    busy_wait: AtomicBool,
    // f64 stored as raw bits
    desired_slowdown: AtomicU64,
    measured_slowdown: AtomicU64,
    misalign_threshold: f64,
    // Never locked while the simulation lock is held.
    load_error: Mutex<Option<String>>,
}

/// Shown while running when measured pacing strays from the requested one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PacingWarning {
    pub desired: f64,
    pub measured: f64,
}

impl PacingWarning {
    /// Percent of real time actually achieved.
    pub fn measured_percent(&self) -> f64 {
        100.0 / self.measured
    }
}

impl Default for OverlayState {
    fn default() -> Self {
        Self::new(config::MISALIGN_THRESHOLD)
    }
}

impl OverlayState {
    pub fn new(misalign_threshold: f64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            loading: AtomicBool::new(false),
            busy_wait: AtomicBool::new(false),
            desired_slowdown: AtomicU64::new(config::DEFAULT_SLOWDOWN.to_bits()),
            measured_slowdown: AtomicU64::new(config::DEFAULT_SLOWDOWN.to_bits()),
            misalign_threshold,
            load_error: Mutex::new(None),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::Relaxed);
    }

    pub fn busy_wait(&self) -> bool {
        self.busy_wait.load(Ordering::Relaxed)
    }

    pub fn set_busy_wait(&self, on: bool) {
        self.busy_wait.store(on, Ordering::Relaxed);
    }

    pub fn desired_slowdown(&self) -> f64 {
        f64::from_bits(self.desired_slowdown.load(Ordering::Relaxed))
    }

    pub fn set_desired_slowdown(&self, slowdown: f64) {
        self.desired_slowdown.store(slowdown.to_bits(), Ordering::Relaxed);
    }

    pub fn measured_slowdown(&self) -> f64 {
        f64::from_bits(self.measured_slowdown.load(Ordering::Relaxed))
    }

    pub fn set_measured_slowdown(&self, slowdown: f64) {
        self.measured_slowdown.store(slowdown.to_bits(), Ordering::Relaxed);
    }

    pub fn load_error(&self) -> Option<String> {
        self.load_error.lock().clone()
    }

    pub fn set_load_error(&self, message: String) {
        *self.load_error.lock() = Some(message);
    }

    pub fn clear_load_error(&self) {
        self.load_error.lock().take();
    }

    /// `Some` while running and `|measured / desired - 1|` exceeds the
    /// misalignment threshold.
    pub fn pacing_warning(&self) -> Option<PacingWarning> {
        if self.is_paused() {
            return None;
        }
        let desired = self.desired_slowdown();
        let measured = self.measured_slowdown();
        if !(desired > 0.0 && measured.is_finite()) {
            return None;
        }
        if (measured / desired - 1.0).abs() > self.misalign_threshold {
            Some(PacingWarning { desired, measured })
        } else {
            None
        }
    }
}
