//! Audio core for a music-practice studio.
//!
//! Three tools share one [`AudioContext`]: a drum [`StepSequencer`], a
//! multi-layer [`LayerMixer`] with solo/mute, and a reusable send-style
//! [`EffectsChain`]. The context owns the transport [`clock::Clock`] and the
//! signal [`graph::Graph`]; nothing moves until the host pulls audio with
//! [`AudioContext::render`].

pub mod clock;
pub mod config;
pub mod context;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod gain;
pub mod graph;
pub mod layers;
pub mod loader;
pub mod sequencer;
pub mod source;

pub use config::EngineConfig;
pub use context::AudioContext;
pub use effects::{EffectsChain, EffectsParams, EffectsParamsUpdate};
pub use error::{EngineError, LoadError, LoadFailure, Result};
pub use layers::{LayerConfig, LayerMixer, LayerState};
pub use loader::{MemoryLoader, SampleLoader, WavFileLoader};
pub use sequencer::{DrumPattern, DrumSequencerParams, DrumStep, DrumTrack, StepCount, StepSequencer};
pub use source::{AudioSource, AudioSourceFactory, SourceConfig, SourceKind};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
