//! Engine configuration: sample rate, block size and the clamping ranges the
//! components enforce.
//!
//! Every field has a default, so a config file only needs to name what it
//! changes:
//!
//! ```json
//! { "sampleRate": 48000, "tempoMax": 240 }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Frames rendered between clock advances.
    pub block_size: usize,
    /// Lowest accepted tempo in BPM.
    pub tempo_min: f64,
    /// Highest accepted tempo in BPM.
    pub tempo_max: f64,
    /// Tempo used when a pattern does not carry one.
    pub default_tempo: f64,
    pub volume_min_db: f64,
    pub volume_max_db: f64,
    /// Shelf EQ gains are clamped to `±eq_range_db`.
    pub eq_range_db: f64,
    /// Corner frequency of the layer low shelf.
    pub low_shelf_hz: f64,
    /// Corner frequency of the layer high shelf.
    pub high_shelf_hz: f64,
    /// Capacity of the audio → UI step event queue.
    pub step_event_capacity: usize,
    /// FFT size of the master analyser (power of two).
    pub analyser_size: usize,
    /// Meter smoothing factor in [0, 1).
    pub meter_smoothing: f64,
    /// Retrigger period of `drum` sources.
    pub drum_retrigger_secs: f64,
    /// Release/re-attack period of `bass` sources.
    pub bass_retrigger_secs: f64,
    /// Longest delay line the effects chain allocates.
    pub max_delay_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sample_rate: 44_100,
            block_size: 128,
            tempo_min: 60.0,
            tempo_max: 200.0,
            default_tempo: 120.0,
            volume_min_db: -60.0,
            volume_max_db: 6.0,
            eq_range_db: 12.0,
            low_shelf_hz: 300.0,
            high_shelf_hz: 3000.0,
            step_event_capacity: 64,
            analyser_size: 256,
            meter_smoothing: 0.8,
            drum_retrigger_secs: 0.6,
            bass_retrigger_secs: 2.0,
            max_delay_secs: 1.0,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sampleRate must be > 0".into()));
        }
        if self.block_size == 0 {
            return Err(EngineError::InvalidConfig("blockSize must be > 0".into()));
        }
        if !(self.tempo_min > 0.0 && self.tempo_min <= self.tempo_max) {
            return Err(EngineError::InvalidConfig(format!(
                "tempo range {}..{} is empty or non-positive",
                self.tempo_min, self.tempo_max
            )));
        }
        if self.volume_min_db > self.volume_max_db {
            return Err(EngineError::InvalidConfig(format!(
                "volume range {}..{} is inverted",
                self.volume_min_db, self.volume_max_db
            )));
        }
        if !self.analyser_size.is_power_of_two() || self.analyser_size < 32 {
            return Err(EngineError::InvalidConfig(format!(
                "analyserSize {} must be a power of two >= 32",
                self.analyser_size
            )));
        }
        if !(0.0..1.0).contains(&self.meter_smoothing) {
            return Err(EngineError::InvalidConfig(format!(
                "meterSmoothing {} must be in [0, 1)",
                self.meter_smoothing
            )));
        }
        if self.step_event_capacity == 0 {
            return Err(EngineError::InvalidConfig("stepEventCapacity must be > 0".into()));
        }
        if self.drum_retrigger_secs <= 0.0 || self.bass_retrigger_secs <= 0.0 {
            return Err(EngineError::InvalidConfig("retrigger periods must be > 0".into()));
        }
        if self.max_delay_secs < 1.0 {
            return Err(EngineError::InvalidConfig(format!(
                "maxDelaySecs {} is shorter than the longest delay time (1s)",
                self.max_delay_secs
            )));
        }
        Ok(())
    }

    pub fn clamp_tempo(&self, bpm: f64) -> f64 {
        crate::gain::clamp(bpm, self.tempo_min, self.tempo_max)
    }

    pub fn clamp_volume(&self, db: f64) -> f64 {
        crate::gain::clamp(db, self.volume_min_db, self.volume_max_db)
    }

    pub fn clamp_eq(&self, db: f64) -> f64 {
        crate::gain::clamp(db, -self.eq_range_db, self.eq_range_db)
    }

    pub fn sample_rate_f64(&self) -> f64 {
        self.sample_rate as f64
    }
}
