//! Command-line interface
//!
//! Flags given here override the matching keys of the config file.
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::SimConfig;
use crate::error::ConfigError;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "realtime_sim",
    version,
    about = "Real-time particle simulation with pause, scrub and speed control"
)]
pub struct Cli {
    /// Model file to load at startup
    pub model: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Wall seconds per simulated second (2.0 = half speed)
    #[arg(long)]
    pub slowdown: Option<f64>,

    /// Yield instead of sleeping between scheduler iterations
    #[arg(long)]
    pub busy_wait: bool,

    /// Render frame rate
    #[arg(long)]
    pub fps: Option<u32>,

    /// Exit after this many wall seconds instead of waiting for `quit`
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Write the history ring to this file on exit
    #[arg(long)]
    pub dump_history: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("--duration must be a positive number of seconds, got {0}")]
    InvalidDuration(f64),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Cli {
    pub fn validate(&self) -> Result<(), CliError> {
        if let Some(duration) = self.duration {
            if !(duration.is_finite() && duration > 0.0) {
                return Err(CliError::InvalidDuration(duration));
            }
        }
        Ok(())
    }

    /// Load the config file (or defaults) and apply flag overrides.
    pub fn resolve_config(&self) -> Result<SimConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => SimConfig::load_from_file(path)?,
            None => SimConfig::default(),
        };
        if let Some(slowdown) = self.slowdown {
            config.pacing.slowdown = slowdown;
        }
        if self.busy_wait {
            config.pacing.busy_wait = true;
        }
        if let Some(fps) = self.fps {
            config.render.fps = fps;
        }
        config.validate()?;
        Ok(config)
    }
}
