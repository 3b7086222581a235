//! Run configuration.
//!
//! [`SimOptions`] mirrors the option surface of the testing harness: loop
//! pacing, simulation length, logger channels, and the smoothing-filter
//! windows. Options load from YAML or JSON files (auto-detected by
//! extension) or are built programmatically.
//!
//! # Configuration file structure
//!
//! ```yaml
//! loop-delay: 100
//! simulation-length: 7000000
//! log-buttons: true
//! log-7seg: true
//! 7seg-demuxer-window: 15000
//! 7seg-aggregator-window: 30000
//! one-latch-loop: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::types::LogTime;

/// Errors that can occur while loading or validating options.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

fn default_loop_delay() -> LogTime {
    100
}

fn default_leds_demuxer_window() -> LogTime {
    10_000
}

fn default_leds_aggregator_window() -> LogTime {
    50_000
}

fn default_seg_demuxer_window() -> LogTime {
    15_000
}

fn default_seg_aggregator_window() -> LogTime {
    30_000
}

/// Options of a simulation run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SimOptions {
    /// Clock increment after every `loop` invocation, in µs.
    #[serde(default = "default_loop_delay")]
    pub loop_delay: LogTime,

    /// Hard upper bound on simulation time, in µs.
    ///
    /// Overrides the end time loaded from a stimulus file; required when no
    /// stimulus file is given.
    #[serde(default)]
    pub simulation_length: Option<LogTime>,

    /// Log button edges as channels `b1`, `b2`, `b3`.
    #[serde(default)]
    pub log_buttons: bool,

    /// Log LED bank states as channel `leds`.
    #[serde(default)]
    pub log_leds: bool,

    /// Log 7-segment display states as channel `7seg`.
    #[serde(default, rename = "log-7seg")]
    pub log_seg: bool,

    /// Log injected serial payloads as channel `serial`.
    #[serde(default)]
    pub log_serial: bool,

    /// Bypass the LED smoothing filters; the sink observes raw events.
    #[serde(default)]
    pub raw_leds: bool,

    /// Bypass the 7-segment smoothing filters.
    #[serde(default, rename = "raw-7seg")]
    pub raw_seg: bool,

    /// Demultiplexer window for the LED channel, in µs.
    #[serde(default = "default_leds_demuxer_window")]
    pub leds_demuxer_window: LogTime,

    /// Aggregator window for the LED channel, in µs.
    #[serde(default = "default_leds_aggregator_window")]
    pub leds_aggregator_window: LogTime,

    /// Demultiplexer window for the 7-segment channel, in µs.
    #[serde(default = "default_seg_demuxer_window", rename = "7seg-demuxer-window")]
    pub seg_demuxer_window: LogTime,

    /// Aggregator window for the 7-segment channel, in µs.
    #[serde(
        default = "default_seg_aggregator_window",
        rename = "7seg-aggregator-window"
    )]
    pub seg_aggregator_window: LogTime,

    /// Keep the `delay`/`delay_microseconds` API calls enabled.
    ///
    /// Off by default: busy-wait timing is the classic way to fail the
    /// exercises this harness was built for.
    #[serde(default)]
    pub enable_delay: bool,

    /// Audit that each `loop` latches the display at most once.
    #[serde(default)]
    pub one_latch_loop: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            loop_delay: default_loop_delay(),
            simulation_length: None,
            log_buttons: false,
            log_leds: false,
            log_seg: false,
            log_serial: false,
            raw_leds: false,
            raw_seg: false,
            leds_demuxer_window: default_leds_demuxer_window(),
            leds_aggregator_window: default_leds_aggregator_window(),
            seg_demuxer_window: default_seg_demuxer_window(),
            seg_aggregator_window: default_seg_aggregator_window(),
            enable_delay: false,
            one_latch_loop: false,
        }
    }
}

impl SimOptions {
    /// Creates the default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads options from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let options: SimOptions = serde_yaml::from_str(yaml)?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let options: SimOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Loads options from a file, auto-detecting the format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let content = std::fs::read_to_string(path)?;

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the option values.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.loop_delay == 0 {
            return Err(ConfigError::Validation(
                "loop-delay must be at least 1 µs".to_string(),
            ));
        }
        for (name, window) in [
            ("leds-demuxer-window", self.leds_demuxer_window),
            ("leds-aggregator-window", self.leds_aggregator_window),
            ("7seg-demuxer-window", self.seg_demuxer_window),
            ("7seg-aggregator-window", self.seg_aggregator_window),
        ] {
            if window == 0 {
                return Err(ConfigError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.raw_leds && !self.log_leds {
            warn!("raw-leds has no effect without log-leds");
        }
        if self.raw_seg && !self.log_seg {
            warn!("raw-7seg has no effect without log-7seg");
        }
        Ok(())
    }

    /// Serializes the options to YAML.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}
