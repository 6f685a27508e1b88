use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Color, PartyError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub detector: DetectorConfig,
    pub party: PartyConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Parses a JSON document. Missing sections and fields fall back to
    /// their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values the audio graph or the detector cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.detector.validate()?;
        self.party.validate()
    }
}

/// Configuration specific to the audio graph and its analyser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Media reference handed to the host when the player is created.
    pub source: String,
    pub looping: bool,
    /// FFT window length. The analyser exposes `fft_size / 2` bins, fixed
    /// for the lifetime of the graph.
    pub fft_size: usize,
    /// Time-averaging constant applied between successive analyser reads.
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
}

impl AudioConfig {
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || !(32..=32_768).contains(&self.fft_size) {
            return Err(PartyError::InvalidConfig(format!(
                "fft_size must be a power of two between 32 and 32768, got {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(PartyError::InvalidConfig(format!(
                "smoothing must lie in [0, 1], got {}",
                self.smoothing
            )));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(PartyError::InvalidConfig(format!(
                "min_decibels ({}) must be below max_decibels ({})",
                self.min_decibels, self.max_decibels
            )));
        }
        Ok(())
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source: "moichammoi.wav".to_string(),
            looping: true,
            fft_size: 512,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

/// Sensitivity knobs of the beat detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Required rise of the bass average over the tracked volume.
    pub threshold: f32,
    /// Bass averages at or below this value never count as beats.
    pub minimum_floor: f32,
    pub cooldown_ms: u64,
    /// The bass band is the lowest `1 / bass_divisor` of the bins.
    pub bass_divisor: usize,
}

impl DetectorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.bass_divisor == 0 {
            return Err(PartyError::InvalidConfig(
                "bass_divisor must be at least 1".to_string(),
            ));
        }
        if !self.threshold.is_finite() || !self.minimum_floor.is_finite() {
            return Err(PartyError::InvalidConfig(
                "threshold and minimum_floor must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            minimum_floor: 30.0,
            cooldown_ms: 150,
            bass_divisor: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyConfig {
    pub initial_background: String,
    /// Target cadence of the real-time frame source.
    pub frame_rate: f32,
}

impl PartyConfig {
    pub fn initial_background(&self) -> Result<Color> {
        self.initial_background.parse()
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.frame_rate)
    }

    fn validate(&self) -> Result<()> {
        self.initial_background()?;
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(PartyError::InvalidConfig(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        Ok(())
    }
}

impl Default for PartyConfig {
    fn default() -> Self {
        Self {
            initial_background: "#FFFFFF".to_string(),
            frame_rate: 60.0,
        }
    }
}
