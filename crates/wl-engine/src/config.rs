//! Engine configuration, loadable from TOML.
//!
//! Every field has a default, so an empty document is a valid config:
//!
//! ```toml
//! sample_rate = 48000
//! tracker_mode = "fast_tracker_linear"
//! channel_count = 8
//! default_stages = ["volume", "panning", "low_pass"]
//! stereo_separation = "full"
//! ```

use serde::Deserialize;
use thiserror::Error;

use crate::chain::StageSet;
use crate::pitch::TrackerMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid engine config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("sample_rate must be non-zero")]
    ZeroSampleRate,
}

/// How far apart Amiga channel pairs are panned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StereoSeparation {
    /// Everything centred
    None,
    #[default]
    Balanced,
    /// Hard left/right, as on the Amiga
    Full,
}

impl StereoSeparation {
    /// Pan magnitude applied to each channel.
    pub fn amount(self) -> f32 {
        match self {
            StereoSeparation::None => 0.0,
            StereoSeparation::Balanced => 0.5,
            StereoSeparation::Full => 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Device sample rate in Hz
    pub sample_rate: u32,
    pub tracker_mode: TrackerMode,
    /// Channels created at init
    pub channel_count: usize,
    /// Stages enabled on new filter chains
    pub default_stages: StageSet,
    /// Render in stereo. Mono contexts skip per-note panning.
    pub stereo_panning: bool,
    pub stereo_separation: StereoSeparation,
    /// Write sample loops out into one-shot buffers
    pub unroll_loops: bool,
    /// Tempo used for envelope timing
    pub bpm: f32,
    /// Amiga LED filter on the master bus
    pub amiga_filter: bool,
    pub master_volume: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            tracker_mode: TrackerMode::default(),
            channel_count: 4,
            default_stages: StageSet::default(),
            stereo_panning: true,
            stereo_separation: StereoSeparation::default(),
            unroll_loops: false,
            bpm: 125.0,
            amiga_filter: false,
            master_volume: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        if config.sample_rate == 0 {
            return Err(ConfigError::ZeroSampleRate);
        }
        Ok(config)
    }
}
