//! Send-style effects chain: distortion, delay, chorus and reverb in series.
//!
//! Every stage has the same shape:
//!
//! ```text
//! in ──┬── dry (1 - mix) ───────────────┬── merge ── next stage
//!      └── effect (wet = 1) ── wet (mix) ┘
//! ```
//!
//! The effect nodes always run fully wet; the stage faders are the only
//! dry/wet control.

use serde::{Deserialize, Serialize};

use crate::context::AudioContext;
use crate::dsp::chorus::Chorus;
use crate::dsp::delay::Delay;
use crate::dsp::distortion::Distortion;
use crate::dsp::reverb::Reverb;
use crate::error::Result;
use crate::gain::{clamp, clamp_unit};
use crate::graph::{Graph, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistortionParams {
    pub amount: f64,
    pub mix: f64,
}

impl Default for DistortionParams {
    fn default() -> Self {
        DistortionParams { amount: 0.4, mix: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayParams {
    /// Seconds, in [0.01, 1].
    pub time: f64,
    /// In [0, 0.9].
    pub feedback: f64,
    pub mix: f64,
}

impl Default for DelayParams {
    fn default() -> Self {
        DelayParams {
            time: 0.25,
            feedback: 0.3,
            mix: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParams {
    /// Seconds, in [0.1, 10].
    pub decay: f64,
    pub mix: f64,
}

impl Default for ReverbParams {
    fn default() -> Self {
        ReverbParams { decay: 1.5, mix: 0.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusParams {
    /// Hz, in [0.1, 10].
    pub rate: f64,
    pub depth: f64,
    pub mix: f64,
}

impl Default for ChorusParams {
    fn default() -> Self {
        ChorusParams {
            rate: 1.5,
            depth: 0.5,
            mix: 0.0,
        }
    }
}

/// Snapshot of every effect parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsParams {
    pub distortion: DistortionParams,
    pub delay: DelayParams,
    pub reverb: ReverbParams,
    pub chorus: ChorusParams,
}

impl EffectsParams {
    /// Bring every field into its documented range.
    pub fn clamped(self) -> Self {
        EffectsParams {
            distortion: DistortionParams {
                amount: clamp_unit(self.distortion.amount),
                mix: clamp_unit(self.distortion.mix),
            },
            delay: DelayParams {
                time: clamp(self.delay.time, 0.01, 1.0),
                feedback: clamp(self.delay.feedback, 0.0, 0.9),
                mix: clamp_unit(self.delay.mix),
            },
            reverb: ReverbParams {
                decay: clamp(self.reverb.decay, 0.1, 10.0),
                mix: clamp_unit(self.reverb.mix),
            },
            chorus: ChorusParams {
                rate: clamp(self.chorus.rate, 0.1, 10.0),
                depth: clamp_unit(self.chorus.depth),
                mix: clamp_unit(self.chorus.mix),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistortionUpdate {
    pub amount: Option<f64>,
    pub mix: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DelayUpdate {
    pub time: Option<f64>,
    pub feedback: Option<f64>,
    pub mix: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReverbUpdate {
    pub decay: Option<f64>,
    pub mix: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChorusUpdate {
    pub rate: Option<f64>,
    pub depth: Option<f64>,
    pub mix: Option<f64>,
}

/// Partial update of any subset of stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectsParamsUpdate {
    pub distortion: Option<DistortionUpdate>,
    pub delay: Option<DelayUpdate>,
    pub reverb: Option<ReverbUpdate>,
    pub chorus: Option<ChorusUpdate>,
}

/// Node handles of one dry/wet stage.
#[derive(Debug, Clone, Copy)]
struct Stage {
    dry: NodeId,
    effect: NodeId,
    wet: NodeId,
    merge: NodeId,
}

impl Stage {
    fn build(graph: &mut Graph, input: NodeId, effect: NodeKind, mix: f64) -> Result<Self> {
        let stage = Stage {
            dry: graph.add(NodeKind::gain(1.0 - mix)),
            effect: graph.add(effect),
            wet: graph.add(NodeKind::gain(mix)),
            merge: graph.add(NodeKind::gain(1.0)),
        };
        graph.connect(input, stage.dry)?;
        graph.connect(input, stage.effect)?;
        graph.connect(stage.effect, stage.wet)?;
        graph.connect(stage.dry, stage.merge)?;
        graph.connect(stage.wet, stage.merge)?;
        Ok(stage)
    }

    fn set_mix(&self, graph: &mut Graph, mix: f64) {
        if let Some(NodeKind::Gain { gain }) = graph.kind_mut(self.dry) {
            *gain = 1.0 - mix;
        }
        if let Some(NodeKind::Gain { gain }) = graph.kind_mut(self.wet) {
            *gain = mix;
        }
    }

    fn nodes(&self) -> [NodeId; 4] {
        [self.dry, self.effect, self.wet, self.merge]
    }
}

pub struct EffectsChain {
    ctx: AudioContext,
    input: NodeId,
    distortion: Stage,
    delay: Stage,
    chorus: Stage,
    reverb: Stage,
    params: EffectsParams,
    disposed: bool,
}

impl EffectsChain {
    /// Build the chain with `params` (clamped) applied.
    pub fn new(ctx: AudioContext, params: EffectsParams) -> Result<Self> {
        let params = params.clamped();
        let config = ctx.config();
        let sr = config.sample_rate_f64();

        let mut distortion = Distortion::new(params.distortion.amount);
        distortion.wet = 1.0;
        let mut delay = Delay::with_params(sr, config.max_delay_secs, params.delay.time, params.delay.feedback);
        delay.wet = 1.0;
        let mut chorus = Chorus::with_params(sr, params.chorus.rate, params.chorus.depth);
        chorus.wet = 1.0;
        let mut reverb = Reverb::with_decay(sr, params.reverb.decay);
        reverb.wet = 1.0;

        let (input, stages) = ctx.with_graph(|g| -> Result<_> {
            let input = g.add(NodeKind::gain(1.0));
            let d = Stage::build(g, input, NodeKind::Distortion(distortion), params.distortion.mix)?;
            let e = Stage::build(g, d.merge, NodeKind::Delay(delay), params.delay.mix)?;
            let c = Stage::build(g, e.merge, NodeKind::Chorus(chorus), params.chorus.mix)?;
            let r = Stage::build(g, c.merge, NodeKind::Reverb(Box::new(reverb)), params.reverb.mix)?;
            Ok((input, [d, e, c, r]))
        })?;
        let [distortion, delay, chorus, reverb] = stages;
        log::debug!("effects chain built");

        Ok(EffectsChain {
            ctx,
            input,
            distortion,
            delay,
            chorus,
            reverb,
            params,
            disposed: false,
        })
    }

    /// Node to feed the chain from.
    pub fn input(&self) -> NodeId {
        self.input
    }

    /// Last merge point of the chain.
    pub fn output(&self) -> NodeId {
        self.reverb.merge
    }

    pub fn params(&self) -> EffectsParams {
        self.params
    }

    pub fn connect(&self, destination: NodeId) -> Result<()> {
        let output = self.output();
        self.ctx.with_graph(|g| g.connect(output, destination))
    }

    pub fn disconnect(&self) {
        let output = self.output();
        self.ctx.with_graph(|g| g.disconnect(output));
    }

    pub fn set_distortion(&mut self, update: DistortionUpdate) {
        let p = &mut self.params.distortion;
        if let Some(amount) = update.amount {
            p.amount = clamp_unit(amount);
        }
        if let Some(mix) = update.mix {
            p.mix = clamp_unit(mix);
        }
        let p = *p;
        let stage = self.distortion;
        self.ctx.with_graph(|g| {
            if let Some(NodeKind::Distortion(d)) = g.kind_mut(stage.effect) {
                d.set_amount(p.amount);
            }
            stage.set_mix(g, p.mix);
        });
    }

    pub fn set_delay(&mut self, update: DelayUpdate) {
        let p = &mut self.params.delay;
        if let Some(time) = update.time {
            p.time = clamp(time, 0.01, 1.0);
        }
        if let Some(feedback) = update.feedback {
            p.feedback = clamp(feedback, 0.0, 0.9);
        }
        if let Some(mix) = update.mix {
            p.mix = clamp_unit(mix);
        }
        let p = *p;
        let stage = self.delay;
        self.ctx.with_graph(|g| {
            if let Some(NodeKind::Delay(d)) = g.kind_mut(stage.effect) {
                d.set_delay_time(p.time);
                d.set_feedback(p.feedback);
            }
            stage.set_mix(g, p.mix);
        });
    }

    pub fn set_reverb(&mut self, update: ReverbUpdate) {
        let p = &mut self.params.reverb;
        if let Some(decay) = update.decay {
            p.decay = clamp(decay, 0.1, 10.0);
        }
        if let Some(mix) = update.mix {
            p.mix = clamp_unit(mix);
        }
        let p = *p;
        let stage = self.reverb;
        self.ctx.with_graph(|g| {
            if let Some(NodeKind::Reverb(r)) = g.kind_mut(stage.effect) {
                r.set_decay(p.decay);
            }
            stage.set_mix(g, p.mix);
        });
    }

    pub fn set_chorus(&mut self, update: ChorusUpdate) {
        let p = &mut self.params.chorus;
        if let Some(rate) = update.rate {
            p.rate = clamp(rate, 0.1, 10.0);
        }
        if let Some(depth) = update.depth {
            p.depth = clamp_unit(depth);
        }
        if let Some(mix) = update.mix {
            p.mix = clamp_unit(mix);
        }
        let p = *p;
        let stage = self.chorus;
        self.ctx.with_graph(|g| {
            if let Some(NodeKind::Chorus(c)) = g.kind_mut(stage.effect) {
                c.set_rate(p.rate);
                c.set_depth(p.depth);
            }
            stage.set_mix(g, p.mix);
        });
    }

    /// Apply every stage present in `update`.
    pub fn set_params(&mut self, update: EffectsParamsUpdate) {
        if let Some(u) = update.distortion {
            self.set_distortion(u);
        }
        if let Some(u) = update.delay {
            self.set_delay(u);
        }
        if let Some(u) = update.reverb {
            self.set_reverb(u);
        }
        if let Some(u) = update.chorus {
            self.set_chorus(u);
        }
    }

    /// Release every node. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let mut nodes = vec![self.input];
        for stage in [self.distortion, self.delay, self.chorus, self.reverb] {
            nodes.extend(stage.nodes());
        }
        self.ctx.with_graph(|g| {
            for id in nodes {
                g.remove(id);
            }
        });
        self.disposed = true;
        log::debug!("effects chain disposed");
    }
}
