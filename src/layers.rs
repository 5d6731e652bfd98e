//! Multi-layer production mixer.
//!
//! Each layer is a channel strip
//! `source → low shelf → high shelf → panner → gain → meter` summed onto a
//! master bus. The master bus feeds its own meter and a spectrum analyser,
//! then whatever destination the caller connects.
//!
//! A layer is audible when it is not muted and either no layer is soloed or
//! it is soloed itself. Audibility is recomputed for every layer on each
//! mute or solo change; while playing, sources are started and stopped to
//! match and the strip gain of an inaudible layer is zeroed at once.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::dsp::filter::{BiquadFilter, FilterType, StereoFilter};
use crate::dsp::meter::{Analyser, Meter};
use crate::dsp::mixer::Panner;
use crate::error::Result;
use crate::gain::{clamp, db_to_gain, gain_to_db};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::source::{AudioSource, AudioSourceFactory, SourceConfig};

/// Initial settings for one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerConfig {
    pub id: String,
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub volume: f64,
    #[serde(default)]
    pub pan: f64,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub solo: bool,
    #[serde(default)]
    pub eq_low: f64,
    #[serde(default)]
    pub eq_high: f64,
}

impl LayerConfig {
    /// A centred layer at 0 dB with flat EQ.
    pub fn new(id: impl Into<String>, name: impl Into<String>, source: SourceConfig) -> Self {
        LayerConfig {
            id: id.into(),
            name: name.into(),
            source,
            volume: 0.0,
            pan: 0.0,
            muted: false,
            solo: false,
            eq_low: 0.0,
            eq_high: 0.0,
        }
    }
}

/// Observable state of one layer. Volume and EQ are in dB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerState {
    pub id: String,
    pub name: String,
    pub volume: f64,
    pub pan: f64,
    pub muted: bool,
    pub solo: bool,
    pub eq_low: f64,
    pub eq_high: f64,
}

impl LayerState {
    fn from_config(config: &LayerConfig, engine: &EngineConfig) -> Self {
        LayerState {
            id: config.id.clone(),
            name: config.name.clone(),
            volume: engine.clamp_volume(config.volume),
            pan: clamp(config.pan, -1.0, 1.0),
            muted: config.muted,
            solo: config.solo,
            eq_low: engine.clamp_eq(config.eq_low),
            eq_high: engine.clamp_eq(config.eq_high),
        }
    }
}

/// Graph handles of one strip.
struct LayerNodes {
    source: Box<dyn AudioSource>,
    low: NodeId,
    high: NodeId,
    panner: NodeId,
    gain: NodeId,
    meter: NodeId,
}

impl LayerNodes {
    fn build(
        graph: &mut Graph,
        source: Box<dyn AudioSource>,
        config: &EngineConfig,
        bus: NodeId,
    ) -> Result<Self> {
        let sr = config.sample_rate_f64();
        let shelf = |kind, hz| NodeKind::Filter(StereoFilter::new(BiquadFilter::shelf(kind, hz, 0.0, sr)));
        let nodes = LayerNodes {
            low: graph.add(shelf(FilterType::LowShelf, config.low_shelf_hz)),
            high: graph.add(shelf(FilterType::HighShelf, config.high_shelf_hz)),
            panner: graph.add(NodeKind::Panner(Panner::new(0.0))),
            gain: graph.add(NodeKind::gain(1.0)),
            meter: graph.add(NodeKind::Meter(Meter::new(config.meter_smoothing))),
            source,
        };
        graph.connect(nodes.source.output(), nodes.low)?;
        graph.connect(nodes.low, nodes.high)?;
        graph.connect(nodes.high, nodes.panner)?;
        graph.connect(nodes.panner, nodes.gain)?;
        graph.connect(nodes.gain, nodes.meter)?;
        graph.connect(nodes.meter, bus)?;
        Ok(nodes)
    }

    fn strip(&self) -> [NodeId; 5] {
        [self.low, self.high, self.panner, self.gain, self.meter]
    }

    /// Push `state` into the strip's nodes.
    fn apply(&self, graph: &mut Graph, state: &LayerState, audible: bool) {
        if let Some(NodeKind::Filter(f)) = graph.kind_mut(self.low) {
            f.set_gain_db(state.eq_low);
        }
        if let Some(NodeKind::Filter(f)) = graph.kind_mut(self.high) {
            f.set_gain_db(state.eq_high);
        }
        if let Some(NodeKind::Panner(p)) = graph.kind_mut(self.panner) {
            p.set_pan(state.pan);
        }
        if let Some(NodeKind::Gain { gain }) = graph.kind_mut(self.gain) {
            *gain = if audible { db_to_gain(state.volume) } else { 0.0 };
        }
    }
}

pub struct LayerMixer {
    ctx: AudioContext,
    config: EngineConfig,
    states: Vec<LayerState>,
    layers: Vec<LayerNodes>,
    bus: NodeId,
    master_meter: NodeId,
    analyser: NodeId,
    destination: Option<NodeId>,
    playing: bool,
    disposed: bool,
}

impl LayerMixer {
    /// Build one strip per config. If any source cannot be created, the
    /// ones already built are disposed and the error is returned.
    pub fn new(ctx: AudioContext, configs: &[LayerConfig]) -> Result<Self> {
        let config = ctx.config();
        let factory = AudioSourceFactory::new(ctx.clone());

        let mut sources = Vec::with_capacity(configs.len());
        for layer in configs {
            match factory.create(&layer.source) {
                Ok(source) => sources.push(source),
                Err(e) => {
                    for mut source in sources {
                        source.dispose();
                    }
                    return Err(e);
                }
            }
        }

        let (bus, master_meter, analyser, layers) = ctx.with_graph(|g| -> Result<_> {
            let bus = g.add(NodeKind::gain(1.0));
            let master_meter = g.add(NodeKind::Meter(Meter::new(config.meter_smoothing)));
            let analyser = g.add(NodeKind::Analyser(Analyser::new(config.analyser_size, config.sample_rate)));
            g.connect(bus, master_meter)?;
            g.connect(bus, analyser)?;
            let layers = sources
                .into_iter()
                .map(|source| LayerNodes::build(g, source, &config, bus))
                .collect::<Result<Vec<_>>>()?;
            Ok((bus, master_meter, analyser, layers))
        })?;

        let states = configs.iter().map(|c| LayerState::from_config(c, &config)).collect();
        let mut mixer = LayerMixer {
            ctx,
            config,
            states,
            layers,
            bus,
            master_meter,
            analyser,
            destination: None,
            playing: false,
            disposed: false,
        };
        mixer.refresh();
        log::debug!("layer mixer built with {} layers", mixer.layers.len());
        Ok(mixer)
    }

    /// Route the master bus into `destination`.
    pub fn connect(&mut self, destination: NodeId) -> Result<()> {
        let bus = self.bus;
        self.ctx.with_graph(|g| g.connect(bus, destination))?;
        self.destination = Some(destination);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(destination) = self.destination.take() {
            let bus = self.bus;
            self.ctx.with_graph(|g| g.disconnect_from(bus, destination));
        }
    }

    /// Start every audible source.
    pub fn start(&mut self) {
        if self.disposed {
            return;
        }
        self.playing = true;
        self.refresh();
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.refresh();
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn states(&self) -> Vec<LayerState> {
        self.states.clone()
    }

    pub fn state(&self, id: &str) -> Option<LayerState> {
        self.states.iter().find(|s| s.id == id).cloned()
    }

    /// Whether layer `id` currently produces sound, given every layer's
    /// mute and solo flags.
    pub fn is_audible(&self, id: &str) -> Option<bool> {
        self.index_of(id).map(|i| self.audible(i))
    }

    pub fn set_volume(&mut self, id: &str, db: f64) {
        let db = self.config.clamp_volume(db);
        self.update(id, |s| s.volume = db);
    }

    pub fn set_pan(&mut self, id: &str, pan: f64) {
        self.update(id, |s| s.pan = clamp(pan, -1.0, 1.0));
    }

    pub fn set_muted(&mut self, id: &str, muted: bool) {
        self.update(id, |s| s.muted = muted);
    }

    pub fn set_solo(&mut self, id: &str, solo: bool) {
        self.update(id, |s| s.solo = solo);
    }

    pub fn set_eq_low(&mut self, id: &str, db: f64) {
        let db = self.config.clamp_eq(db);
        self.update(id, |s| s.eq_low = db);
    }

    pub fn set_eq_high(&mut self, id: &str, db: f64) {
        let db = self.config.clamp_eq(db);
        self.update(id, |s| s.eq_high = db);
    }

    /// Post-gain level of layer `id` in dB.
    pub fn layer_level(&self, id: &str) -> Option<f64> {
        let meter = self.layers.get(self.index_of(id)?)?.meter;
        self.meter_db(meter)
    }

    /// Master bus level in dB.
    pub fn master_level(&self) -> f64 {
        self.meter_db(self.master_meter).unwrap_or(f64::NEG_INFINITY)
    }

    /// Magnitude spectrum of the master bus in dB per bin.
    pub fn spectrum(&self) -> Vec<f32> {
        let analyser = self.analyser;
        self.ctx.with_graph(|g| match g.kind(analyser) {
            Some(NodeKind::Analyser(a)) => a.spectrum_db(),
            _ => Vec::new(),
        })
    }

    /// Restore volume, pan, mute and EQ from `configs` and clear every solo
    /// flag. Layers not named in `configs` only lose their solo.
    pub fn reset(&mut self, configs: &[LayerConfig]) {
        for state in &mut self.states {
            state.solo = false;
            if let Some(c) = configs.iter().find(|c| c.id == state.id) {
                let restored = LayerState::from_config(c, &self.config);
                *state = LayerState {
                    id: state.id.clone(),
                    name: state.name.clone(),
                    solo: false,
                    ..restored
                };
            }
        }
        self.refresh();
    }

    /// Stop every source and release every node. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.playing = false;
        let mut nodes = vec![self.bus, self.master_meter, self.analyser];
        for layer in &mut self.layers {
            layer.source.dispose();
            nodes.extend(layer.strip());
        }
        self.ctx.with_graph(|g| {
            for id in nodes {
                g.remove(id);
            }
        });
        self.destination = None;
        self.disposed = true;
        log::debug!("layer mixer disposed");
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.states.iter().position(|s| s.id == id)
    }

    fn audible(&self, index: usize) -> bool {
        let any_solo = self.states.iter().any(|s| s.solo);
        let state = &self.states[index];
        !state.muted && (!any_solo || state.solo)
    }

    fn update(&mut self, id: &str, change: impl FnOnce(&mut LayerState)) {
        let Some(index) = self.index_of(id) else {
            log::warn!("no layer with id '{id}'");
            return;
        };
        change(&mut self.states[index]);
        self.refresh();
    }

    /// Recompute audibility of every layer, push state into the strips and
    /// start or stop sources to match.
    fn refresh(&mut self) {
        if self.disposed {
            return;
        }
        let audible: Vec<bool> = (0..self.states.len()).map(|i| self.audible(i)).collect();

        let (layers, states) = (&self.layers, &self.states);
        self.ctx.with_graph(|g| {
            for ((layer, state), &audible) in layers.iter().zip(states).zip(&audible) {
                layer.apply(g, state, audible);
            }
        });

        for (layer, &audible) in self.layers.iter_mut().zip(&audible) {
            let should_run = self.playing && audible;
            if should_run && !layer.source.is_running() {
                layer.source.start();
            } else if !should_run && layer.source.is_running() {
                layer.source.stop();
            }
        }
    }

    fn meter_db(&self, meter: NodeId) -> Option<f64> {
        self.ctx.with_graph(|g| match g.kind(meter) {
            Some(NodeKind::Meter(m)) => Some(gain_to_db(m.level())),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(id: &str, kind: &str) -> LayerConfig {
        LayerConfig::new(id, id.to_uppercase(), SourceConfig::new(kind))
    }

    fn mixer(configs: &[LayerConfig]) -> (AudioContext, LayerMixer) {
        let ctx = AudioContext::new(EngineConfig::default()).unwrap();
        let mut mixer = LayerMixer::new(ctx.clone(), configs).unwrap();
        mixer.connect(ctx.destination()).unwrap();
        (ctx, mixer)
    }

    fn running(mixer: &LayerMixer) -> Vec<bool> {
        mixer.layers.iter().map(|l| l.source.is_running()).collect()
    }

    #[test]
    fn solo_silences_everyone_else() {
        let mut c = layer("c", "noise");
        c.muted = true;
        let mut b = layer("b", "tone");
        b.solo = true;
        let (_ctx, mut mixer) = mixer(&[layer("a", "tone"), b, c]);
        mixer.start();
        assert_eq!(mixer.is_audible("a"), Some(false));
        assert_eq!(mixer.is_audible("b"), Some(true));
        assert_eq!(mixer.is_audible("c"), Some(false));
        assert_eq!(running(&mixer), vec![false, true, false]);
    }

    #[test]
    fn without_solo_only_unmuted_layers_sound() {
        let mut c = layer("c", "noise");
        c.muted = true;
        let (_ctx, mut mixer) = mixer(&[layer("a", "tone"), layer("b", "tone"), c]);
        mixer.start();
        assert_eq!(running(&mixer), vec![true, true, false]);
    }

    #[test]
    fn solo_changes_while_playing_start_and_stop_sources() {
        let (_ctx, mut mixer) = mixer(&[layer("a", "tone"), layer("b", "pad")]);
        mixer.start();
        mixer.set_solo("b", true);
        assert_eq!(running(&mixer), vec![false, true]);
        mixer.set_solo("b", false);
        assert_eq!(running(&mixer), vec![true, true]);
        mixer.set_muted("a", true);
        assert_eq!(running(&mixer), vec![false, true]);
    }

    #[test]
    fn nothing_runs_until_started() {
        let (_ctx, mut mixer) = mixer(&[layer("a", "tone")]);
        mixer.set_solo("a", true);
        assert_eq!(running(&mixer), vec![false]);
        mixer.start();
        mixer.stop();
        assert_eq!(running(&mixer), vec![false]);
    }

    #[test]
    fn setters_clamp_and_reach_the_graph() {
        let (ctx, mut mixer) = mixer(&[layer("a", "tone")]);
        mixer.set_volume("a", 20.0);
        mixer.set_pan("a", -4.0);
        mixer.set_eq_low("a", -30.0);
        mixer.set_eq_high("a", 7.5);
        let state = mixer.state("a").unwrap();
        assert_eq!((state.volume, state.pan, state.eq_low, state.eq_high), (6.0, -1.0, -12.0, 7.5));

        let strip = &mixer.layers[0];
        ctx.with_graph(|g| {
            match g.kind(strip.gain) {
                Some(NodeKind::Gain { gain }) => assert!((gain - db_to_gain(6.0)).abs() < 1e-12),
                _ => panic!("gain node missing"),
            }
            match g.kind(strip.high) {
                Some(NodeKind::Filter(f)) => assert_eq!(f.gain_db(), 7.5),
                _ => panic!("high shelf missing"),
            }
        });
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let (_ctx, mut mixer) = mixer(&[layer("a", "tone")]);
        mixer.set_volume("zz", -3.0);
        assert_eq!(mixer.state("zz"), None);
        assert_eq!(mixer.layer_level("zz"), None);
        assert_eq!(mixer.state("a").unwrap().volume, 0.0);
    }

    #[test]
    fn reset_restores_configs_and_clears_solo() {
        let configs = [layer("a", "tone"), layer("b", "tone")];
        let (_ctx, mut mixer) = mixer(&configs);
        mixer.set_volume("a", -20.0);
        mixer.set_muted("a", true);
        mixer.set_solo("b", true);
        mixer.reset(&configs);
        let states = mixer.states();
        assert!(states.iter().all(|s| !s.solo && !s.muted && s.volume == 0.0));
    }

    #[test]
    fn meters_follow_the_signal() {
        let (ctx, mut mixer) = mixer(&[layer("a", "tone"), layer("b", "tone")]);
        mixer.start();
        ctx.render_seconds(0.2);
        assert!(mixer.layer_level("a").unwrap() > -10.0);
        assert!(mixer.master_level() > -10.0);

        mixer.set_muted("a", true);
        ctx.render_seconds(1.0);
        assert!(mixer.layer_level("a").unwrap() < -60.0);
        assert!(mixer.layer_level("b").unwrap() > -10.0);
    }

    #[test]
    fn spectrum_has_a_bin_per_frequency() {
        let (ctx, mut mixer) = mixer(&[layer("a", "tone")]);
        mixer.start();
        ctx.render_seconds(0.1);
        assert!(mixer.spectrum().len() >= 128);
    }

    #[test]
    fn unsupported_source_builds_nothing() {
        let ctx = AudioContext::new(EngineConfig::default()).unwrap();
        let result = LayerMixer::new(ctx.clone(), &[layer("a", "tone"), layer("b", "kazoo")]);
        assert!(result.is_err());
        assert_eq!(ctx.node_count(), 1);
    }

    #[test]
    fn dispose_is_idempotent() {
        let ctx = AudioContext::new(EngineConfig::default()).unwrap();
        let mut mixer = LayerMixer::new(ctx.clone(), &[layer("a", "tone"), layer("b", "drum")]).unwrap();
        mixer.connect(ctx.destination()).unwrap();
        mixer.start();
        // bus, master meter, analyser, then five strip nodes and two source
        // nodes per layer.
        assert_eq!(ctx.node_count(), 1 + 3 + 2 * 7);
        mixer.dispose();
        mixer.dispose();
        assert_eq!(ctx.node_count(), 1);
        assert_eq!(ctx.with_clock(|c| c.task_count()), 0);
    }

    #[test]
    fn disconnect_keeps_the_taps() {
        let (ctx, mut mixer) = mixer(&[layer("a", "tone")]);
        mixer.start();
        mixer.disconnect();
        let out = ctx.render_seconds(0.1);
        assert!(out.iter().all(|f| f.peak() == 0.0));
        assert!(mixer.master_level() > -10.0);
    }

    #[test]
    fn layer_config_parses_from_json() {
        let json = r#"{"id":"kick","name":"Kick","source":{"type":"drum"},"eqLow":3}"#;
        let config: LayerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.eq_low, 3.0);
        assert_eq!(config.volume, 0.0);
        assert!(!config.muted);
    }
}
