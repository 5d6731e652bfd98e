//! Drum pattern data. Everything here is a plain value: cloning a pattern
//! copies every track and step.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::gain::clamp_unit;

/// One slot of the step grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrumStep {
    pub active: bool,
    /// Intensity in [0, 1].
    pub velocity: f64,
}

impl Default for DrumStep {
    fn default() -> Self {
        DrumStep {
            active: false,
            velocity: 0.8,
        }
    }
}

impl DrumStep {
    pub fn on(velocity: f64) -> Self {
        DrumStep {
            active: true,
            velocity: clamp_unit(velocity),
        }
    }
}

/// Grid length. Serialized as the number itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum StepCount {
    #[default]
    Sixteen,
    ThirtyTwo,
}

impl StepCount {
    pub fn len(self) -> usize {
        match self {
            StepCount::Sixteen => 16,
            StepCount::ThirtyTwo => 32,
        }
    }
}

impl TryFrom<usize> for StepCount {
    type Error = EngineError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            16 => Ok(StepCount::Sixteen),
            32 => Ok(StepCount::ThirtyTwo),
            other => Err(EngineError::InvalidConfig(format!(
                "step count must be 16 or 32, got {other}"
            ))),
        }
    }
}

impl From<StepCount> for usize {
    fn from(count: StepCount) -> usize {
        count.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrumTrack {
    pub id: String,
    pub name: String,
    /// URI handed to the sample loader.
    pub sample_ref: String,
    pub steps: Vec<DrumStep>,
}

impl DrumTrack {
    /// A track of inactive steps.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        sample_ref: impl Into<String>,
        step_count: StepCount,
    ) -> Self {
        DrumTrack {
            id: id.into(),
            name: name.into(),
            sample_ref: sample_ref.into(),
            steps: vec![DrumStep::default(); step_count.len()],
        }
    }

    /// Activate `steps` at `velocity`.
    pub fn with_hits(mut self, steps: &[usize], velocity: f64) -> Self {
        for &i in steps {
            if let Some(step) = self.steps.get_mut(i) {
                *step = DrumStep::on(velocity);
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrumPattern {
    pub name: String,
    /// Beats per minute.
    pub tempo: f64,
    /// In [0, 1].
    #[serde(default)]
    pub swing: f64,
    #[serde(default)]
    pub step_count: StepCount,
    pub tracks: Vec<DrumTrack>,
}

impl Default for DrumPattern {
    fn default() -> Self {
        DrumPattern {
            name: "Untitled".into(),
            tempo: 120.0,
            swing: 0.0,
            step_count: StepCount::Sixteen,
            tracks: Vec::new(),
        }
    }
}

impl DrumPattern {
    pub fn new(name: impl Into<String>, tempo: f64, step_count: StepCount) -> Self {
        DrumPattern {
            name: name.into(),
            tempo,
            step_count,
            ..Default::default()
        }
    }

    pub fn with_track(mut self, track: DrumTrack) -> Self {
        self.tracks.push(track);
        self
    }

    /// Track ids must be unique: load failures are reported by id.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (i, track) in self.tracks.iter().enumerate() {
            if self.tracks[..i].iter().any(|t| t.id == track.id) {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate track id {:?} in pattern {:?}",
                    track.id, self.name
                )));
            }
        }
        Ok(())
    }

    /// Clamp tempo, swing and velocities, and fit every track to
    /// `step_count` steps.
    pub fn normalized(mut self, config: &EngineConfig) -> Self {
        self.tempo = config.clamp_tempo(self.tempo);
        self.swing = clamp_unit(self.swing);
        let len = self.step_count.len();
        for track in &mut self.tracks {
            track.steps.resize(len, DrumStep::default());
            for step in &mut track.steps {
                step.velocity = clamp_unit(step.velocity);
            }
        }
        self
    }
}

/// The sequencer's complete external state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrumSequencerParams {
    pub pattern: DrumPattern,
    pub current_step: usize,
    pub is_playing: bool,
    pub selected_track: usize,
    /// Master volume in dB.
    pub volume: f64,
}

/// Playhead notification, stamped with the context time of the step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvent {
    pub time: f64,
    pub step: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_step_is_inert() {
        let step = DrumStep::default();
        assert!(!step.active);
        assert_eq!(step.velocity, 0.8);
    }

    #[test]
    fn step_count_serializes_as_a_number() {
        assert_eq!(serde_json::to_string(&StepCount::ThirtyTwo).unwrap(), "32");
        let count: StepCount = serde_json::from_str("16").unwrap();
        assert_eq!(count, StepCount::Sixteen);
        assert!(serde_json::from_str::<StepCount>("12").is_err());
    }

    #[test]
    fn pattern_parses_from_challenge_json() {
        let json = r#"{
            "name": "Basic Rock",
            "tempo": 110,
            "stepCount": 16,
            "tracks": [
                {"id": "kick", "name": "Kick", "sampleRef": "/samples/kick.wav",
                 "steps": [{"active": true, "velocity": 1.0}, {"active": false}]}
            ]
        }"#;
        let pattern: DrumPattern = serde_json::from_str(json).unwrap();
        assert_eq!(pattern.swing, 0.0);
        assert_eq!(pattern.tracks[0].sample_ref, "/samples/kick.wav");
        assert_eq!(pattern.tracks[0].steps[1].velocity, 0.8);

        let pattern = pattern.normalized(&EngineConfig::default());
        assert_eq!(pattern.tracks[0].steps.len(), 16);
    }

    #[test]
    fn normalizing_clamps_everything() {
        let mut pattern = DrumPattern::new("p", 999.0, StepCount::Sixteen)
            .with_track(DrumTrack::new("k", "Kick", "k.wav", StepCount::ThirtyTwo));
        pattern.swing = 3.0;
        pattern.tracks[0].steps[0].velocity = 7.0;
        let pattern = pattern.normalized(&EngineConfig::default());
        assert_eq!(pattern.tempo, 200.0);
        assert_eq!(pattern.swing, 1.0);
        assert_eq!(pattern.tracks[0].steps.len(), 16);
        assert_eq!(pattern.tracks[0].steps[0].velocity, 1.0);
    }

    #[test]
    fn clones_do_not_alias() {
        let a = DrumPattern::default().with_track(DrumTrack::new("k", "Kick", "k.wav", StepCount::Sixteen));
        let mut b = a.clone();
        b.tracks[0].steps[3].active = true;
        assert!(!a.tracks[0].steps[3].active);
    }

    #[test]
    fn duplicate_track_ids_are_rejected() {
        let pattern = DrumPattern::default()
            .with_track(DrumTrack::new("kick", "Kick", "a.wav", StepCount::Sixteen))
            .with_track(DrumTrack::new("snare", "Snare", "b.wav", StepCount::Sixteen));
        assert!(pattern.validate().is_ok());

        let pattern = pattern.with_track(DrumTrack::new("kick", "Kick 2", "c.wav", StepCount::Sixteen));
        let err = pattern.validate().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(ref msg) if msg.contains("\"kick\"")));
    }

    #[test]
    fn hits_out_of_range_are_ignored() {
        let track = DrumTrack::new("k", "Kick", "k.wav", StepCount::Sixteen).with_hits(&[0, 8, 40], 0.95);
        let active: Vec<usize> = (0..16).filter(|&i| track.steps[i].active).collect();
        assert_eq!(active, vec![0, 8]);
    }
}
