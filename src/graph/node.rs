//! Node kinds and their per-sample processing.

use std::sync::Arc;

use crate::dsp::chorus::Chorus;
use crate::dsp::delay::Delay;
use crate::dsp::distortion::Distortion;
use crate::dsp::filter::StereoFilter;
use crate::dsp::meter::{Analyser, Meter};
use crate::dsp::mixer::{Panner, soft_clip};
use crate::dsp::noise::Noise;
use crate::dsp::sampler::{Player, SampleBuffer};
use crate::dsp::voice::{DrumVoice, SynthVoice};
use crate::dsp::Frame;

/// Opaque handle to a node in a [`Graph`](super::Graph). Handles of removed
/// nodes go stale and are ignored by every graph operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// An instruction applied to a node at an exact sample time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeEvent {
    /// Begin sounding. Voices attack, noise runs, players and drums fire.
    Start,
    /// Stop sounding. Voices enter their release.
    Stop,
    /// Retrigger a one-shot.
    Trigger,
    /// Release a sustained voice without stopping it for good.
    Release,
    /// Set a gain node's linear gain.
    SetGain(f64),
}

pub enum NodeKind {
    /// Summing point with a linear gain.
    Gain { gain: f64 },
    Filter(StereoFilter),
    Panner(Panner),
    Meter(Meter),
    Analyser(Analyser),
    Synth(SynthVoice),
    Noise { noise: Noise, running: bool },
    Drum(DrumVoice),
    Player(Player),
    Delay(Delay),
    Chorus(Chorus),
    Reverb(Box<crate::dsp::reverb::Reverb>),
    Distortion(Distortion),
    /// The context output. Sums its inputs through the soft clipper.
    Destination,
}

impl NodeKind {
    pub fn gain(gain: f64) -> Self {
        NodeKind::Gain { gain }
    }

    pub fn noise(noise: Noise) -> Self {
        NodeKind::Noise {
            noise,
            running: false,
        }
    }

    pub fn player(buffer: Arc<SampleBuffer>, sample_rate: f64) -> Self {
        NodeKind::Player(Player::new(buffer, sample_rate))
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Gain { .. } => "gain",
            NodeKind::Filter(_) => "filter",
            NodeKind::Panner(_) => "panner",
            NodeKind::Meter(_) => "meter",
            NodeKind::Analyser(_) => "analyser",
            NodeKind::Synth(_) => "synth",
            NodeKind::Noise { .. } => "noise",
            NodeKind::Drum(_) => "drum",
            NodeKind::Player(_) => "player",
            NodeKind::Delay(_) => "delay",
            NodeKind::Chorus(_) => "chorus",
            NodeKind::Reverb(_) => "reverb",
            NodeKind::Distortion(_) => "distortion",
            NodeKind::Destination => "destination",
        }
    }

    /// Taps are rendered every block even when nothing reads their output.
    pub fn is_tap(&self) -> bool {
        matches!(self, NodeKind::Meter(_) | NodeKind::Analyser(_))
    }

    pub(crate) fn apply(&mut self, event: NodeEvent) {
        match (self, event) {
            (NodeKind::Gain { gain }, NodeEvent::SetGain(value)) => *gain = value.max(0.0),
            (NodeKind::Synth(voice), NodeEvent::Start | NodeEvent::Trigger) => voice.note_on(),
            (NodeKind::Synth(voice), NodeEvent::Stop | NodeEvent::Release) => voice.note_off(),
            (NodeKind::Noise { running, .. }, NodeEvent::Start) => *running = true,
            (NodeKind::Noise { running, .. }, NodeEvent::Stop) => *running = false,
            (NodeKind::Drum(drum), NodeEvent::Start | NodeEvent::Trigger) => drum.trigger(),
            (NodeKind::Drum(drum), NodeEvent::Stop) => drum.kill(),
            (NodeKind::Player(player), NodeEvent::Start | NodeEvent::Trigger) => player.trigger(),
            (NodeKind::Player(player), NodeEvent::Stop) => player.stop(),
            (kind, event) => log::trace!("{} node ignores {:?}", kind.name(), event),
        }
    }

    /// Produce one output frame from the summed input frame.
    #[inline]
    pub(crate) fn process(&mut self, input: Frame) -> Frame {
        match self {
            NodeKind::Gain { gain } => input * *gain as f32,
            NodeKind::Filter(filter) => filter.process(input),
            NodeKind::Panner(panner) => panner.process(input),
            NodeKind::Meter(meter) => meter.process(input),
            NodeKind::Analyser(analyser) => analyser.process(input),
            NodeKind::Synth(voice) => Frame::mono(voice.next_sample() as f32),
            NodeKind::Noise { noise, running } => {
                if *running {
                    Frame::mono(noise.next_sample() as f32)
                } else {
                    Frame::SILENT
                }
            }
            NodeKind::Drum(drum) => Frame::mono(drum.next_sample() as f32),
            NodeKind::Player(player) => player.next_frame(),
            NodeKind::Delay(delay) => delay.process(input),
            NodeKind::Chorus(chorus) => chorus.process(input),
            NodeKind::Reverb(reverb) => reverb.process(input),
            NodeKind::Distortion(distortion) => distortion.process(input),
            NodeKind::Destination => soft_clip(input),
        }
    }

    /// Block boundary bookkeeping.
    pub(crate) fn end_block(&mut self) {
        if let NodeKind::Meter(meter) = self {
            meter.end_block();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::noise::NoiseColor;

    #[test]
    fn gain_scales_input() {
        let mut kind = NodeKind::gain(0.5);
        assert_eq!(kind.process(Frame::mono(1.0)), Frame::mono(0.5));
        kind.apply(NodeEvent::SetGain(2.0));
        assert_eq!(kind.process(Frame::mono(1.0)), Frame::mono(2.0));
    }

    #[test]
    fn negative_gain_is_floored() {
        let mut kind = NodeKind::gain(1.0);
        kind.apply(NodeEvent::SetGain(-3.0));
        assert_eq!(kind.process(Frame::mono(1.0)), Frame::SILENT);
    }

    #[test]
    fn noise_runs_between_start_and_stop() {
        let mut kind = NodeKind::noise(Noise::with_seed(NoiseColor::White, 7));
        assert_eq!(kind.process(Frame::SILENT), Frame::SILENT);
        kind.apply(NodeEvent::Start);
        let loud = (0..64).any(|_| kind.process(Frame::SILENT).peak() > 0.0);
        assert!(loud);
        kind.apply(NodeEvent::Stop);
        assert_eq!(kind.process(Frame::SILENT), Frame::SILENT);
    }

    #[test]
    fn unrelated_events_are_ignored() {
        let mut kind = NodeKind::gain(0.25);
        kind.apply(NodeEvent::Trigger);
        assert_eq!(kind.process(Frame::mono(1.0)), Frame::mono(0.25));
    }

    #[test]
    fn only_meters_and_analysers_are_taps() {
        assert!(NodeKind::Meter(Meter::new(0.8)).is_tap());
        assert!(NodeKind::Analyser(Analyser::new(256, 44100)).is_tap());
        assert!(!NodeKind::gain(1.0).is_tap());
        assert!(!NodeKind::Destination.is_tap());
    }
}
