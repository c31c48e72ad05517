// Centralized configuration for pacing, history and rendering parameters

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

// ====================
// Pacing Parameters
// ====================
/// Wall-clock seconds per simulated second. 1.0 runs in real time.
pub const DEFAULT_SLOWDOWN: f64 = 1.0;
/// Largest tolerated gap (in simulated seconds) between scaled wall time and
/// simulated time before the scheduler abandons its pacing debt and resyncs.
pub const MISALIGN_THRESHOLD: f64 = 0.1;
/// Fraction of one render period a single catch-up burst may hold the lock.
pub const REFRESH_FRACTION: f64 = 0.7;
/// Sleep between scheduler iterations when busy-wait is off.
pub const IDLE_SLEEP_MS: u64 = 1;

/// Discrete speed presets, in percent of real time.
pub const PERCENT_REAL_TIME: [f64; 31] = [
    100.0, 80.0, 66.0, 50.0, 40.0, 33.0, 25.0, 20.0, 16.0, 13.0, 10.0, 8.0, 6.6, 5.0, 4.0, 3.3,
    2.5, 2.0, 1.6, 1.3, 1.0, 0.8, 0.66, 0.5, 0.4, 0.33, 0.25, 0.2, 0.16, 0.13, 0.1,
];

// ====================
// History Parameters
// ====================
/// Upper bound on the bytes held by the history ring.
pub const HISTORY_BYTE_BUDGET: usize = 100_000_000;
/// Upper bound on the number of history entries regardless of entry size.
pub const HISTORY_MAX_ENTRIES: usize = 2000;

// ====================
// Render Parameters
// ====================
pub const RENDER_FPS: u32 = 60;

// ====================
// Threading
// ====================
pub const MIN_THREADS: usize = 3; // Minimum number of rayon workers
pub const THREADS_LEAVE_FREE: usize = 2; // Logical cores left for the simulation and render threads

/// Convert a speed preset (percent of real time) into a slowdown factor.
pub fn slowdown_for_percent(percent: f64) -> f64 {
    100.0 / percent
}

/// Next faster preset than `slowdown`, if any.
pub fn faster_preset(slowdown: f64) -> Option<f64> {
    let percent = 100.0 / slowdown;
    PERCENT_REAL_TIME
        .iter()
        .rev()
        .copied()
        .find(|p| *p > percent * (1.0 + 1e-9))
        .map(slowdown_for_percent)
}

/// Next slower preset than `slowdown`, if any.
pub fn slower_preset(slowdown: f64) -> Option<f64> {
    let percent = 100.0 / slowdown;
    PERCENT_REAL_TIME
        .iter()
        .copied()
        .find(|p| *p < percent * (1.0 - 1e-9))
        .map(slowdown_for_percent)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub slowdown: f64,
    /// Spin-yield between iterations instead of sleeping.
    pub busy_wait: bool,
    pub misalign_threshold: f64,
    pub refresh_fraction: f64,
    pub idle_sleep_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            slowdown: DEFAULT_SLOWDOWN,
            busy_wait: false,
            misalign_threshold: MISALIGN_THRESHOLD,
            refresh_fraction: REFRESH_FRACTION,
            idle_sleep_ms: IDLE_SLEEP_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub byte_budget: usize,
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            byte_budget: HISTORY_BYTE_BUDGET,
            max_entries: HISTORY_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub fps: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { fps: RENDER_FPS }
    }
}

/// Runtime configuration, loadable from a TOML file with `[pacing]`,
/// `[history]` and `[render]` sections. Missing keys fall back to the
/// constants above.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub pacing: PacingConfig,
    pub history: HistoryConfig,
    pub render: RenderConfig,
}

impl SimConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pacing = &self.pacing;
        if !(pacing.slowdown.is_finite() && pacing.slowdown > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "pacing.slowdown must be positive, got {}",
                pacing.slowdown
            )));
        }
        if !(pacing.misalign_threshold.is_finite() && pacing.misalign_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "pacing.misalign_threshold must be positive, got {}",
                pacing.misalign_threshold
            )));
        }
        if !(pacing.refresh_fraction > 0.0 && pacing.refresh_fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "pacing.refresh_fraction must be in (0, 1], got {}",
                pacing.refresh_fraction
            )));
        }
        if self.history.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "history.max_entries must be at least 1".into(),
            ));
        }
        if self.render.fps == 0 {
            return Err(ConfigError::Invalid("render.fps must be at least 1".into()));
        }
        Ok(())
    }

    /// Longest wall time, in seconds, one catch-up burst may run.
    pub fn refresh_budget(&self) -> f64 {
        self.pacing.refresh_fraction / f64::from(self.render.fps)
    }
}
