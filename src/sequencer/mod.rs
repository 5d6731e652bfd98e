//! Drum step sequencer.
//!
//! The sequencer owns one sample player and one volume node per track, all
//! summed into a master volume node. A transport task on the context clock
//! fires once per sixteenth: it advances the playhead, queues a
//! [`StepEvent`] for the UI and, for every active step, sets the track
//! volume from the step velocity and triggers the sample at the exact tick
//! time.
//!
//! Step events cross from the audio side to the UI side through a bounded
//! channel; [`StepSequencer::poll_step_events`] delivers the ones that are
//! due to the registered callback.
//!
//! Locking: the tick task runs with the context locked and then takes the
//! sequencer state lock. Methods here never hold the state lock while
//! calling into the context.

mod pattern;

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

pub use pattern::{DrumPattern, DrumSequencerParams, DrumStep, DrumTrack, StepCount, StepEvent};

use crate::clock::{Subdivision, TaskFn, TaskId, Tick, TransportState};
use crate::config::EngineConfig;
use crate::context::AudioContext;
use crate::error::{EngineError, Result};
use crate::gain::{clamp_unit, db_to_gain, velocity_to_db};
use crate::graph::{NodeEvent, NodeId, NodeKind};
use crate::loader::{LoadRequest, SampleLoader, load_all};

pub type StepCallback = Box<dyn FnMut(usize) + Send>;

/// Graph handles of one track.
#[derive(Debug, Clone, Copy)]
struct TrackVoice {
    player: NodeId,
    volume: NodeId,
}

/// State shared with the tick task.
struct SequencerState {
    pattern: DrumPattern,
    current_step: usize,
    voices: Vec<TrackVoice>,
    events: Sender<StepEvent>,
    /// Set while the step event queue is full, so an unread queue warns once.
    overflowing: bool,
    /// (track, step) of every trigger, in firing order.
    #[cfg(test)]
    fired: Vec<(usize, usize)>,
}

pub struct StepSequencer {
    ctx: AudioContext,
    config: EngineConfig,
    loader: Arc<dyn SampleLoader>,
    state: Arc<Mutex<SequencerState>>,
    events: Receiver<StepEvent>,
    pending: VecDeque<StepEvent>,
    on_step: Option<StepCallback>,
    master: NodeId,
    task: Option<TaskId>,
    selected_track: usize,
    volume: f64,
    loaded: bool,
    playing: bool,
    disposed: bool,
}

impl StepSequencer {
    /// Create a sequencer for `pattern`, routed to the context destination.
    /// Nothing is loaded until [`start`](Self::start). Fails if two tracks
    /// share an id.
    pub fn new(ctx: AudioContext, loader: Arc<dyn SampleLoader>, pattern: &DrumPattern) -> Result<Self> {
        pattern.validate()?;
        let config = ctx.config();
        let pattern = pattern.clone().normalized(&config);
        let (tx, rx) = bounded(config.step_event_capacity);

        let master = ctx.with_graph(|g| {
            let master = g.add(NodeKind::gain(1.0));
            let dest = g.destination();
            g.connect(master, dest).map(|_| master)
        })?;

        let state = SequencerState {
            pattern,
            current_step: 0,
            voices: Vec::new(),
            events: tx,
            overflowing: false,
            #[cfg(test)]
            fired: Vec::new(),
        };
        Ok(StepSequencer {
            ctx,
            config,
            loader,
            state: Arc::new(Mutex::new(state)),
            events: rx,
            pending: VecDeque::new(),
            on_step: None,
            master,
            task: None,
            selected_track: 0,
            volume: 0.0,
            loaded: false,
            playing: false,
            disposed: false,
        })
    }

    /// Load every track's sample, build the step sequence and configure the
    /// clock. Does nothing once loaded.
    pub async fn start(&mut self) -> Result<()> {
        if self.disposed {
            log::warn!("start() on a disposed sequencer");
            return Ok(());
        }
        if self.loaded {
            return Ok(());
        }
        self.load_samples().await?;
        self.build_sequence();
        self.apply_transport();
        self.loaded = true;
        log::debug!("sequencer loaded");
        Ok(())
    }

    pub fn play(&mut self) {
        if !self.loaded || self.disposed {
            log::warn!("play() before samples are loaded is ignored");
            return;
        }
        self.ctx.with_clock(|c| c.start());
        self.playing = true;
    }

    /// Halt without moving the playhead.
    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.ctx.with_clock(|c| c.pause());
        self.playing = false;
    }

    /// Halt, rewind to step 0 and tell the step callback so.
    pub fn stop(&mut self) {
        self.ctx.with_clock(|c| c.stop());
        self.playing = false;
        self.state.lock().current_step = 0;
        while self.events.try_recv().is_ok() {}
        self.pending.clear();
        if let Some(callback) = self.on_step.as_mut() {
            callback(0);
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current_step(&self) -> usize {
        self.state.lock().current_step
    }

    /// Tempo is a property of the shared clock: every component on this
    /// context follows it.
    pub fn set_tempo(&mut self, bpm: f64) {
        let bpm = self.config.clamp_tempo(bpm);
        self.state.lock().pattern.tempo = bpm;
        self.ctx.with_clock(|c| c.set_bpm(bpm));
    }

    pub fn set_swing(&mut self, swing: f64) {
        let swing = clamp_unit(swing);
        self.state.lock().pattern.swing = swing;
        self.ctx.with_clock(|c| c.set_swing(swing));
    }

    pub fn toggle_step(&mut self, track: usize, step: usize) {
        self.with_step(track, step, |s| s.active = !s.active);
    }

    pub fn set_step_active(&mut self, track: usize, step: usize, active: bool) {
        self.with_step(track, step, |s| s.active = active);
    }

    pub fn set_step_velocity(&mut self, track: usize, step: usize, velocity: f64) {
        let velocity = clamp_unit(velocity);
        self.with_step(track, step, |s| s.velocity = velocity);
    }

    /// Deactivate every step of `track`, keeping velocities.
    pub fn clear_track(&mut self, track: usize) {
        if let Some(t) = self.state.lock().pattern.tracks.get_mut(track) {
            t.steps.iter_mut().for_each(|s| s.active = false);
        }
    }

    pub fn clear_all(&mut self) {
        for t in &mut self.state.lock().pattern.tracks {
            t.steps.iter_mut().for_each(|s| s.active = false);
        }
    }

    /// Replace the whole pattern. The transport is rewound to step 0 (paused
    /// included), the new pattern's tempo and swing go to the clock, samples
    /// are reloaded if the sequencer was started, and playback resumes if it
    /// was running. A pattern with duplicate track ids is rejected and the
    /// current one kept.
    pub async fn set_pattern(&mut self, pattern: &DrumPattern) -> Result<()> {
        pattern.validate()?;
        let was_playing = self.playing;
        let transport = self.ctx.with_clock(|c| c.state());
        if was_playing || transport != TransportState::Stopped {
            self.stop();
        }
        let pattern = pattern.clone().normalized(&self.config);
        let tracks = pattern.tracks.len();
        {
            let mut state = self.state.lock();
            state.pattern = pattern;
            state.current_step = 0;
        }
        if self.selected_track >= tracks {
            self.selected_track = 0;
        }
        self.apply_transport();

        if self.loaded {
            if let Err(e) = self.load_samples().await {
                self.loaded = false;
                self.clear_sequence();
                return Err(e);
            }
        }
        if was_playing {
            self.play();
        }
        Ok(())
    }

    /// A deep copy of the current pattern.
    pub fn pattern(&self) -> DrumPattern {
        self.state.lock().pattern.clone()
    }

    pub fn params(&self) -> DrumSequencerParams {
        let state = self.state.lock();
        DrumSequencerParams {
            pattern: state.pattern.clone(),
            current_step: state.current_step,
            is_playing: self.playing,
            selected_track: self.selected_track,
            volume: self.volume,
        }
    }

    pub fn on_step_change(&mut self, callback: impl FnMut(usize) + Send + 'static) {
        self.on_step = Some(Box::new(callback));
    }

    pub fn off_step_change(&mut self) {
        self.on_step = None;
    }

    /// Deliver every queued step event whose time has come. Call at UI
    /// cadence; returns how many were delivered.
    pub fn poll_step_events(&mut self) -> usize {
        self.pending.extend(self.events.try_iter());
        let now = self.ctx.current_time();
        let mut delivered = 0;
        while self.pending.front().is_some_and(|e| e.time <= now) {
            if let Some(event) = self.pending.pop_front() {
                if let Some(callback) = self.on_step.as_mut() {
                    callback(event.step);
                }
                delivered += 1;
            }
        }
        delivered
    }

    /// Out-of-range indices are ignored.
    pub fn set_selected_track(&mut self, track: usize) {
        if track < self.state.lock().pattern.tracks.len() {
            self.selected_track = track;
        }
    }

    pub fn selected_track(&self) -> usize {
        self.selected_track
    }

    /// Master volume in dB, clamped to the configured range.
    pub fn set_volume(&mut self, db: f64) {
        self.volume = self.config.clamp_volume(db);
        let (master, gain) = (self.master, db_to_gain(self.volume));
        self.ctx.with_graph(|graph| {
            if let Some(NodeKind::Gain { gain: current }) = graph.kind_mut(master) {
                *current = gain;
            }
        });
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Node all tracks are summed into.
    pub fn output(&self) -> NodeId {
        self.master
    }

    /// Cancel the step sequence and release every node. Safe to call more
    /// than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if self.playing {
            self.ctx.with_clock(|c| c.stop());
            self.playing = false;
        }
        self.clear_sequence();
        self.dispose_voices();
        let master = self.master;
        self.ctx.with_graph(|g| g.remove(master));
        self.on_step = None;
        self.pending.clear();
        self.loaded = false;
        self.disposed = true;
        log::debug!("sequencer disposed");
    }

    /// Load every track sample and rebuild the players. Old players are
    /// released before new ones are created; on failure none are left.
    async fn load_samples(&mut self) -> Result<()> {
        let requests: Vec<LoadRequest> = self
            .state
            .lock()
            .pattern
            .tracks
            .iter()
            .map(|t| LoadRequest {
                track_id: t.id.clone(),
                uri: t.sample_ref.clone(),
            })
            .collect();
        log::debug!("loading {} samples", requests.len());
        let loaded = load_all(Arc::clone(&self.loader), &requests).await;

        self.dispose_voices();
        let buffers = loaded.map_err(|failures| {
            log::error!("{} sample(s) failed to load", failures.len());
            EngineError::SampleLoad { failures }
        })?;

        let (sr, master) = (self.ctx.sample_rate(), self.master);
        let voices = self.ctx.with_graph(|g| -> Result<Vec<TrackVoice>> {
            buffers
                .into_iter()
                .map(|buffer| {
                    let voice = TrackVoice {
                        player: g.add(NodeKind::player(buffer, sr)),
                        volume: g.add(NodeKind::gain(1.0)),
                    };
                    g.connect(voice.player, voice.volume)?;
                    g.connect(voice.volume, master)?;
                    Ok(voice)
                })
                .collect()
        })?;
        self.state.lock().voices = voices;
        Ok(())
    }

    fn dispose_voices(&mut self) {
        let voices = std::mem::take(&mut self.state.lock().voices);
        if voices.is_empty() {
            return;
        }
        self.ctx.with_graph(|g| {
            for voice in voices {
                g.remove(voice.player);
                g.remove(voice.volume);
            }
        });
    }

    fn build_sequence(&mut self) {
        self.clear_sequence();
        let task = step_task(Arc::clone(&self.state));
        self.task = Some(self.ctx.with_clock(|c| c.schedule_repeat(Subdivision::Sixteenth, task)));
    }

    fn clear_sequence(&mut self) {
        if let Some(id) = self.task.take() {
            self.ctx.with_clock(|c| c.clear(id));
        }
    }

    fn apply_transport(&self) {
        let (tempo, swing) = {
            let state = self.state.lock();
            (state.pattern.tempo, state.pattern.swing)
        };
        self.ctx.with_clock(|c| {
            c.set_bpm(tempo);
            c.set_swing(swing);
        });
    }

    fn with_step(&mut self, track: usize, step: usize, f: impl FnOnce(&mut DrumStep)) {
        let mut state = self.state.lock();
        match state.pattern.tracks.get_mut(track).and_then(|t| t.steps.get_mut(step)) {
            Some(s) => f(s),
            None => log::debug!("ignoring edit of missing step {track}:{step}"),
        }
    }
}

/// The per-sixteenth task.
fn step_task(state: Arc<Mutex<SequencerState>>) -> TaskFn {
    Box::new(move |tick: &mut Tick<'_>| {
        let mut guard = state.lock();
        let st = &mut *guard;
        let steps = st.pattern.step_count.len() as u64;
        let step = (tick.index % steps) as usize;
        st.current_step = step;
        match st.events.try_send(StepEvent { time: tick.time, step }) {
            Ok(()) if st.overflowing => {
                st.overflowing = false;
                log::debug!("step event queue drained");
            }
            Ok(()) => {}
            Err(_) if st.overflowing => log::trace!("step event queue full, dropping step {step}"),
            Err(_) => {
                st.overflowing = true;
                log::warn!("step event queue full, dropping step events until it is polled");
            }
        }

        for (track_index, (track, voice)) in st.pattern.tracks.iter().zip(&st.voices).enumerate() {
            let Some(s) = track.steps.get(step) else {
                continue;
            };
            if !s.active {
                continue;
            }
            if s.velocity <= 0.0 {
                log::trace!("track {track_index} step {step} has zero velocity");
                continue;
            }
            let gain = db_to_gain(velocity_to_db(s.velocity));
            tick.graph.schedule(voice.volume, tick.time, NodeEvent::SetGain(gain));
            tick.graph.schedule(voice.player, tick.time, NodeEvent::Trigger);
            log::trace!("track {track_index} step {step} at {:.4}s", tick.time);
            #[cfg(test)]
            st.fired.push((track_index, step));
        }
    })
}
