//! DSP building blocks: pure Rust synthesis and processing.
//!
//! Everything here is block-agnostic and processes one frame at a time; the
//! signal graph (`crate::graph`) decides when and in which order each unit
//! runs.

pub mod chorus;
pub mod delay;
pub mod distortion;
pub mod envelope;
pub mod filter;
pub mod meter;
pub mod mixer;
pub mod noise;
pub mod oscillator;
pub mod renderer;
pub mod reverb;
pub mod sampler;
pub mod voice;

use std::ops::{Add, AddAssign, Mul};

/// One stereo sample pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frame {
    pub left: f32,
    pub right: f32,
}

impl Frame {
    pub const SILENT: Frame = Frame { left: 0.0, right: 0.0 };

    pub fn new(left: f32, right: f32) -> Self {
        Frame { left, right }
    }

    /// Same value on both channels.
    pub fn mono(value: f32) -> Self {
        Frame { left: value, right: value }
    }

    /// Average of the two channels.
    pub fn to_mono(self) -> f32 {
        (self.left + self.right) * 0.5
    }

    /// Larger of the two channel magnitudes.
    pub fn peak(self) -> f32 {
        self.left.abs().max(self.right.abs())
    }
}

impl Add for Frame {
    type Output = Frame;
    fn add(self, rhs: Frame) -> Frame {
        Frame::new(self.left + rhs.left, self.right + rhs.right)
    }
}

impl AddAssign for Frame {
    fn add_assign(&mut self, rhs: Frame) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}

impl Mul<f32> for Frame {
    type Output = Frame;
    fn mul(self, rhs: f32) -> Frame {
        Frame::new(self.left * rhs, self.right * rhs)
    }
}
