//! Playable sound sources built from declarative configs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::{TaskFn, TaskId, Tick};
use crate::context::AudioContext;
use crate::dsp::envelope::Envelope;
use crate::dsp::noise::{Noise, NoiseColor};
use crate::dsp::oscillator::{Waveform, transpose};
use crate::dsp::voice::{DrumVoice, SynthVoice};
use crate::error::{EngineError, Result};
use crate::gain::db_to_gain;
use crate::graph::{NodeEvent, NodeId, NodeKind};

/// Semitones from the pad root to its upper note.
const PAD_INTERVAL: f64 = 7.0;
/// Detune of the pad's upper note, in cents.
const PAD_DETUNE: f64 = 8.0;

/// Source description as it appears in challenge data:
///
/// ```json
/// { "type": "tone", "frequency": 220, "waveform": "sawtooth" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Waveform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<NoiseColor>,
    /// Output level in dB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl SourceConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        SourceConfig {
            kind: kind.into(),
            frequency: None,
            waveform: None,
            color: None,
            volume: None,
        }
    }

    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = Some(waveform);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Tone,
    Noise,
    Drum,
    Bass,
    Pad,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Tone => "tone",
            SourceKind::Noise => "noise",
            SourceKind::Drum => "drum",
            SourceKind::Bass => "bass",
            SourceKind::Pad => "pad",
        }
    }
}

impl FromStr for SourceKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tone" => Ok(SourceKind::Tone),
            "noise" => Ok(SourceKind::Noise),
            "drum" => Ok(SourceKind::Drum),
            "bass" => Ok(SourceKind::Bass),
            "pad" => Ok(SourceKind::Pad),
            other => Err(EngineError::UnsupportedSource(other.to_string())),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sound generator living in a context's graph.
pub trait AudioSource: Send {
    fn kind(&self) -> SourceKind;
    /// Node carrying the source's signal.
    fn output(&self) -> NodeId;
    fn connect(&mut self, destination: NodeId) -> Result<()>;
    fn disconnect(&mut self);
    fn start(&mut self);
    fn stop(&mut self);
    /// Stop and release every node. Safe to call more than once.
    fn dispose(&mut self);
    fn is_running(&self) -> bool;
}

pub struct AudioSourceFactory {
    ctx: AudioContext,
}

impl AudioSourceFactory {
    pub fn new(ctx: AudioContext) -> Self {
        AudioSourceFactory { ctx }
    }

    /// Build the source `config` describes. Unknown types fail with
    /// [`EngineError::UnsupportedSource`].
    pub fn create(&self, config: &SourceConfig) -> Result<Box<dyn AudioSource>> {
        let kind: SourceKind = config.kind.parse()?;
        let engine = self.ctx.config();
        let sr = engine.sample_rate_f64();

        let (voice, retrigger) = match kind {
            SourceKind::Tone => {
                let voice = SynthVoice::new(Envelope::with_adsr(sr, 0.005, 0.0, 1.0, 0.05)).with_partial(
                    config.waveform.unwrap_or_default(),
                    config.frequency.unwrap_or(440.0),
                    0.0,
                    1.0,
                    sr,
                );
                (NodeKind::Synth(voice), None)
            }
            SourceKind::Noise => {
                let noise = Noise::new(config.color.unwrap_or_default());
                (NodeKind::noise(noise), None)
            }
            SourceKind::Drum => {
                let drum = DrumVoice::new(config.frequency.unwrap_or(55.0), sr);
                let retrigger = Retrigger::Hit {
                    period: engine.drum_retrigger_secs,
                };
                (NodeKind::Drum(drum), Some(retrigger))
            }
            SourceKind::Bass => {
                let release = 0.3;
                let voice = SynthVoice::new(Envelope::with_adsr(sr, 0.01, 0.2, 0.8, release)).with_partial(
                    config.waveform.unwrap_or(Waveform::Sawtooth),
                    config.frequency.unwrap_or(55.0),
                    0.0,
                    0.8,
                    sr,
                );
                let retrigger = Retrigger::Reattack {
                    period: engine.bass_retrigger_secs,
                    gap: release,
                };
                (NodeKind::Synth(voice), Some(retrigger))
            }
            SourceKind::Pad => {
                let root = config.frequency.unwrap_or(220.0);
                let waveform = config.waveform.unwrap_or(Waveform::Triangle);
                let voice = SynthVoice::new(Envelope::with_adsr(sr, 1.5, 0.5, 0.8, 2.0))
                    .with_partial(waveform, root, 0.0, 0.5, sr)
                    .with_partial(waveform, transpose(root, PAD_INTERVAL), PAD_DETUNE, 0.5, sr);
                (NodeKind::Synth(voice), None)
            }
        };

        let gain = db_to_gain(config.volume.unwrap_or(0.0));
        let (voice, output) = self.ctx.with_graph(|g| {
            let voice = g.add(voice);
            let output = g.add(NodeKind::gain(gain));
            g.connect(voice, output).map(|_| (voice, output))
        })?;
        log::debug!("created {kind} source");

        Ok(Box::new(GraphSource {
            ctx: self.ctx.clone(),
            kind,
            voice,
            output,
            retrigger,
            task: None,
            running: false,
            disposed: false,
        }))
    }
}

/// Self-retriggering behaviour, driven by a free clock task.
#[derive(Debug, Clone, Copy)]
enum Retrigger {
    /// Fire a new hit every `period` seconds.
    Hit { period: f64 },
    /// Release every `period` seconds and re-attack `gap` seconds later.
    Reattack { period: f64, gap: f64 },
}

impl Retrigger {
    fn period(self) -> f64 {
        match self {
            Retrigger::Hit { period } | Retrigger::Reattack { period, .. } => period,
        }
    }

    fn task(self, voice: NodeId) -> TaskFn {
        Box::new(move |tick: &mut Tick<'_>| match self {
            Retrigger::Hit { .. } => {
                tick.graph.schedule(voice, tick.time, NodeEvent::Trigger);
            }
            Retrigger::Reattack { gap, .. } => {
                tick.graph.schedule(voice, tick.time, NodeEvent::Release);
                tick.graph.schedule(voice, tick.time + gap, NodeEvent::Trigger);
            }
        })
    }
}

struct GraphSource {
    ctx: AudioContext,
    kind: SourceKind,
    voice: NodeId,
    output: NodeId,
    retrigger: Option<Retrigger>,
    task: Option<TaskId>,
    running: bool,
    disposed: bool,
}

impl AudioSource for GraphSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn output(&self) -> NodeId {
        self.output
    }

    fn connect(&mut self, destination: NodeId) -> Result<()> {
        let output = self.output;
        self.ctx.with_graph(|g| g.connect(output, destination))
    }

    fn disconnect(&mut self) {
        let output = self.output;
        self.ctx.with_graph(|g| g.disconnect(output));
    }

    fn start(&mut self) {
        if self.disposed || self.running {
            return;
        }
        let voice = self.voice;
        let now = self.ctx.current_time();
        self.ctx.with_graph(|g| g.schedule(voice, now, NodeEvent::Start));
        if let Some(retrigger) = self.retrigger {
            let id = self
                .ctx
                .with_clock(|c| c.schedule_free(now + retrigger.period(), retrigger.period(), retrigger.task(voice)));
            self.task = Some(id);
        }
        self.running = true;
        log::debug!("{} source started at {now:.3}s", self.kind);
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Some(id) = self.task.take() {
            self.ctx.with_clock(|c| c.clear(id));
        }
        let voice = self.voice;
        let now = self.ctx.current_time();
        self.ctx.with_graph(|g| {
            g.cancel_events(voice);
            g.schedule(voice, now, NodeEvent::Stop);
        });
        self.running = false;
        log::debug!("{} source stopped at {now:.3}s", self.kind);
    }

    fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.stop();
        let (voice, output) = (self.voice, self.output);
        self.ctx.with_graph(|g| {
            g.remove(voice);
            g.remove(output);
        });
        self.disposed = true;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dsp::Frame;

    fn setup() -> (AudioContext, AudioSourceFactory) {
        let ctx = AudioContext::new(EngineConfig::default()).unwrap();
        let factory = AudioSourceFactory::new(ctx.clone());
        (ctx, factory)
    }

    fn loudest(frames: &[Frame]) -> f32 {
        frames.iter().map(|f| f.peak()).fold(0.0, f32::max)
    }

    #[test]
    fn unknown_type_is_rejected() {
        let (ctx, factory) = setup();
        let err = factory.create(&SourceConfig::new("theremin")).err();
        assert!(matches!(err, Some(EngineError::UnsupportedSource(t)) if t == "theremin"));
        assert_eq!(ctx.node_count(), 1);
    }

    #[test]
    fn every_kind_builds() {
        let (ctx, factory) = setup();
        for kind in ["tone", "noise", "drum", "bass", "pad"] {
            let source = factory.create(&SourceConfig::new(kind)).unwrap();
            assert_eq!(source.kind().as_str(), kind);
        }
        assert_eq!(ctx.node_count(), 1 + 5 * 2);
    }

    #[test]
    fn config_parses_from_json() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"type":"noise","color":"brown","volume":-6}"#).unwrap();
        assert_eq!(config.kind, "noise");
        assert_eq!(config.color, Some(NoiseColor::Brown));
        assert_eq!(config.volume, Some(-6.0));
        assert_eq!(config.frequency, None);
    }

    #[test]
    fn tone_sounds_until_stopped() {
        let (ctx, factory) = setup();
        let mut tone = factory.create(&SourceConfig::new("tone").with_frequency(220.0)).unwrap();
        tone.connect(ctx.destination()).unwrap();
        assert_eq!(loudest(&ctx.render(1024)), 0.0);

        tone.start();
        assert!(tone.is_running());
        assert!(loudest(&ctx.render(4410)) > 0.5);

        tone.stop();
        ctx.render(4410);
        assert_eq!(loudest(&ctx.render(1024)), 0.0);
    }

    #[test]
    fn disconnected_source_is_silent() {
        let (ctx, factory) = setup();
        let mut noise = factory.create(&SourceConfig::new("noise")).unwrap();
        noise.connect(ctx.destination()).unwrap();
        noise.start();
        assert!(loudest(&ctx.render(1024)) > 0.0);
        noise.disconnect();
        assert_eq!(loudest(&ctx.render(1024)), 0.0);
    }

    #[test]
    fn drum_retriggers_until_stopped() {
        let (ctx, factory) = setup();
        let mut drum = factory.create(&SourceConfig::new("drum")).unwrap();
        drum.connect(ctx.destination()).unwrap();
        drum.start();
        assert_eq!(ctx.with_clock(|c| c.task_count()), 1);

        ctx.render_seconds(0.5);
        // The first hit has died away before the 0.6 s retrigger.
        assert_eq!(loudest(&ctx.render_seconds(0.05)), 0.0);
        assert!(loudest(&ctx.render_seconds(0.1)) > 0.1);

        drum.stop();
        assert_eq!(ctx.with_clock(|c| c.task_count()), 0);
        ctx.render_seconds(2.0);
        assert_eq!(loudest(&ctx.render_seconds(1.0)), 0.0);
    }

    #[test]
    fn bass_schedules_release_and_reattack() {
        let (ctx, factory) = setup();
        let mut bass = factory.create(&SourceConfig::new("bass")).unwrap();
        bass.connect(ctx.destination()).unwrap();
        bass.start();
        ctx.render_seconds(2.1);
        // Release at 2.0 s is applied, the re-attack at 2.3 s is pending.
        let voice = ctx.with_graph(|g| g.inputs(bass.output()).to_vec());
        assert_eq!(ctx.with_graph(|g| g.pending_events(voice[0])), 1);
        bass.stop();
        assert_eq!(ctx.with_graph(|g| g.pending_events(voice[0])), 1);
    }

    #[test]
    fn dispose_is_idempotent_and_releases_nodes() {
        let (ctx, factory) = setup();
        let before = ctx.node_count();
        let mut pad = factory.create(&SourceConfig::new("pad")).unwrap();
        pad.connect(ctx.destination()).unwrap();
        pad.start();
        assert_eq!(ctx.node_count(), before + 2);
        pad.dispose();
        pad.dispose();
        assert_eq!(ctx.node_count(), before);
        assert!(!pad.is_running());
        pad.start();
        assert!(!pad.is_running());
    }
}
