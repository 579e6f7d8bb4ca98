//! Configuration for the cmix-ap mixer
//!
//! Bootstrap settings come from a TOML file located by
//! `cmix_common::config::resolve_config_path` (CLI → `CMIX_CONFIG` →
//! platform config dir). Every field has a built-in default, so an empty or
//! missing file gives a working configuration.
//!
//! ```toml
//! [audio]
//! sample_rate = 48000
//! channels = 2
//! device = "pulse"
//!
//! [engine]
//! min_playable_queue_bytes = 96000
//! underrun_debounce_checks = 3
//!
//! [logging]
//! level = "debug"
//! ```

use crate::audio::types::{AudioSpec, SampleFormat};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Output stream settings
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// Output device name (None = system default)
    #[serde(default)]
    pub device: Option<String>,

    /// Frames rendered per callback period
    #[serde(default = "default_period_frames")]
    pub period_frames: u32,

    /// Capacity of the device-side playout buffer in frames
    #[serde(default = "default_playout_frames")]
    pub playout_frames: usize,
}

/// Engine behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Master volume at startup (linear)
    #[serde(default = "default_initial_volume")]
    pub initial_volume: f32,

    /// Queued bytes below which playback is not sustainable
    ///
    /// Default: 0.25 s of 44.1kHz stereo f32.
    #[serde(default = "default_min_playable_queue_bytes")]
    pub min_playable_queue_bytes: usize,

    /// Consecutive below-threshold checks before an underrun is signalled
    #[serde(default = "default_underrun_debounce_checks")]
    pub underrun_debounce_checks: u32,

    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Resume automatically once queues recover after an underrun pause
    #[serde(default)]
    pub auto_resume: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_channels() -> u16 {
    2
}

fn default_period_frames() -> u32 {
    512
}

fn default_playout_frames() -> usize {
    2048
}

fn default_initial_volume() -> f32 {
    1.0
}

fn default_min_playable_queue_bytes() -> usize {
    88_200
}

fn default_underrun_debounce_checks() -> u32 {
    1
}

fn default_flush_timeout_ms() -> u64 {
    500
}

fn default_drain_timeout_ms() -> u64 {
    2000
}

fn default_event_channel_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            device: None,
            period_frames: default_period_frames(),
            playout_frames: default_playout_frames(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_volume: default_initial_volume(),
            min_playable_queue_bytes: default_min_playable_queue_bytes(),
            underrun_debounce_checks: default_underrun_debounce_checks(),
            flush_timeout_ms: default_flush_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            auto_resume: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TomlConfig {
    /// Load from `path`, falling back to defaults when there is no file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = cmix_common::config::load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.spec()?;
        if self.audio.period_frames == 0 {
            return Err(Error::Config("audio.period_frames must be greater than zero".to_string()));
        }
        if self.engine.event_channel_capacity == 0 {
            return Err(Error::Config(
                "engine.event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.engine.initial_volume.is_nan() || self.engine.initial_volume < 0.0 {
            return Err(Error::Config(format!(
                "engine.initial_volume must be >= 0 (got {})",
                self.engine.initial_volume
            )));
        }
        Ok(())
    }
}

impl AudioConfig {
    pub fn spec(&self) -> Result<AudioSpec> {
        AudioSpec::new(SampleFormat::F32Le, self.sample_rate, self.channels)
    }
}

impl EngineConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
