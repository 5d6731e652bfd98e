//! The audio context: one clock, one graph, advanced together by rendering.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::dsp::Frame;
use crate::error::Result;
use crate::graph::{Graph, NodeId};

struct ContextInner {
    clock: Clock,
    graph: Graph,
    config: EngineConfig,
    /// Frames rendered so far.
    frame: u64,
}

/// Shared handle to a clock and the graph it drives. Cloning is cheap and
/// every clone refers to the same context; components receive one in their
/// constructor.
///
/// Lock order: code holding a component's own state lock must never call
/// back into the context.
#[derive(Clone)]
pub struct AudioContext {
    inner: Arc<Mutex<ContextInner>>,
}

impl AudioContext {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let inner = ContextInner {
            clock: Clock::new(config.default_tempo),
            graph: Graph::new(),
            config,
            frame: 0,
        };
        Ok(AudioContext {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    pub fn config(&self) -> EngineConfig {
        self.inner.lock().config.clone()
    }

    pub fn sample_rate(&self) -> f64 {
        self.inner.lock().config.sample_rate_f64()
    }

    /// Context time in seconds.
    pub fn current_time(&self) -> f64 {
        self.inner.lock().clock.now()
    }

    pub fn destination(&self) -> NodeId {
        self.inner.lock().graph.destination()
    }

    /// Live graph nodes, the destination included.
    pub fn node_count(&self) -> usize {
        self.inner.lock().graph.len()
    }

    pub fn with_graph<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        f(&mut self.inner.lock().graph)
    }

    pub fn with_clock<R>(&self, f: impl FnOnce(&mut Clock) -> R) -> R {
        f(&mut self.inner.lock().clock)
    }

    /// Render `frames` stereo frames. Clock tasks due inside each block run
    /// before the block is processed.
    pub fn render(&self, frames: usize) -> Vec<Frame> {
        let mut inner = self.inner.lock();
        let ContextInner {
            clock,
            graph,
            config,
            frame,
        } = &mut *inner;
        let sample_rate = config.sample_rate_f64();
        let block_size = config.block_size.max(1);

        let mut out = Vec::with_capacity(frames);
        while out.len() < frames {
            let n = block_size.min(frames - out.len());
            let start = *frame as f64 / sample_rate;
            let end = (*frame + n as u64) as f64 / sample_rate;

            clock.run_due(end, graph);
            out.extend_from_slice(graph.render(n, start, sample_rate));

            *frame += n as u64;
            clock.advance_to(end);
        }
        out
    }

    /// Render `seconds` of audio.
    pub fn render_seconds(&self, seconds: f64) -> Vec<Frame> {
        let frames = (seconds.max(0.0) * self.sample_rate()).round() as usize;
        self.render(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Subdivision, Tick};
    use crate::dsp::oscillator::Waveform;
    use crate::dsp::envelope::Envelope;
    use crate::dsp::voice::SynthVoice;
    use crate::graph::{NodeEvent, NodeKind};

    fn ctx() -> AudioContext {
        AudioContext::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn render_advances_time() {
        let ctx = ctx();
        assert_eq!(ctx.current_time(), 0.0);
        let out = ctx.render(44100);
        assert_eq!(out.len(), 44100);
        assert!((ctx.current_time() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn partial_blocks_are_rendered() {
        let ctx = ctx();
        assert_eq!(ctx.render(300).len(), 300);
        assert!((ctx.current_time() - 300.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(AudioContext::new(config).is_err());
    }

    #[test]
    fn clones_share_state() {
        let a = ctx();
        let b = a.clone();
        a.with_graph(|g| g.add(NodeKind::gain(1.0)));
        assert_eq!(b.node_count(), 2);
    }

    #[test]
    fn transport_task_starts_a_voice_mid_block() {
        let ctx = ctx();
        let sr = ctx.sample_rate();
        let voice = ctx.with_graph(|g| {
            let synth = SynthVoice::new(Envelope::with_adsr(sr, 0.0, 0.0, 1.0, 0.0))
                .with_partial(Waveform::Square, 100.0, 0.0, 0.5, sr);
            let id = g.add(NodeKind::Synth(synth));
            let dest = g.destination();
            g.connect(id, dest).unwrap();
            id
        });
        ctx.with_clock(|c| {
            c.set_bpm(200.0);
            c.schedule_repeat(
                Subdivision::Bar,
                Box::new(move |tick: &mut Tick<'_>| {
                    if tick.index == 1 {
                        tick.graph.schedule(voice, tick.time, NodeEvent::Start);
                    }
                }),
            );
            c.start();
        });

        // Bar 1 starts at 1.2 s, which is frame 52920.
        let out = ctx.render(53000);
        assert!(out[..52920].iter().all(|f| *f == Frame::SILENT));
        assert!(out[52920..].iter().any(|f| f.peak() > 0.1));
    }
}
