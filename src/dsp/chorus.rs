//! Chorus effect: stereo modulated delay for thickening sound.
//!
//! An LFO sweeps a short delay line; the left and right LFOs run a quarter
//! cycle apart for stereo spread.

use std::f64::consts::PI;

use super::Frame;

/// Centre of the modulated delay.
const BASE_DELAY: f64 = 0.0035;
/// Modulation excursion at `depth = 1`.
const MAX_EXCURSION: f64 = 0.003;

/// A stereo chorus with rate (Hz) and normalised depth in [0, 1].
#[derive(Debug, Clone)]
pub struct Chorus {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
    phase_l: f64,
    phase_r: f64,

    rate: f64,
    depth: f64,
    /// Internal dry/wet (0.0 = fully dry, 1.0 = fully wet).
    pub wet: f64,
}

impl Chorus {
    pub fn new(sample_rate: f64) -> Self {
        let buffer_size = (sample_rate * (BASE_DELAY + MAX_EXCURSION) * 2.0) as usize + 4;
        Self {
            buffer_l: vec![0.0; buffer_size],
            buffer_r: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            phase_l: 0.0,
            phase_r: 0.25,
            rate: 1.5,
            depth: 0.7,
            wet: 1.0,
        }
    }

    pub fn with_params(sample_rate: f64, rate: f64, depth: f64) -> Self {
        let mut c = Self::new(sample_rate);
        c.set_rate(rate);
        c.set_depth(depth);
        c
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// LFO rate in Hz, clamped to [0.1, 10].
    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate.clamp(0.1, 10.0);
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }

    pub fn set_depth(&mut self, depth: f64) {
        self.depth = depth.clamp(0.0, 1.0);
    }

    /// Read with fractional (linear interpolation) delay.
    #[inline]
    fn read_interpolated(buffer: &[f32], write_pos: usize, delay_samples: f64) -> f32 {
        let buffer_len = buffer.len();
        let delay_int = delay_samples as usize;
        let frac = (delay_samples - delay_int as f64) as f32;

        let read_pos_0 = (write_pos + buffer_len - delay_int) % buffer_len;
        let read_pos_1 = (read_pos_0 + buffer_len - 1) % buffer_len;

        let s0 = buffer[read_pos_0];
        let s1 = buffer[read_pos_1];
        s0 + frac * (s1 - s0)
    }

    #[inline]
    pub fn process(&mut self, input: Frame) -> Frame {
        let buffer_len = self.buffer_l.len();

        self.buffer_l[self.write_pos] = input.left;
        self.buffer_r[self.write_pos] = input.right;

        let excursion = self.depth * MAX_EXCURSION;
        let lfo_l = (2.0 * PI * self.phase_l).sin();
        let lfo_r = (2.0 * PI * self.phase_r).sin();

        let max_delay = (buffer_len - 2) as f64;
        let delay_l = ((BASE_DELAY + excursion * lfo_l) * self.sample_rate).clamp(1.0, max_delay);
        let delay_r = ((BASE_DELAY + excursion * lfo_r) * self.sample_rate).clamp(1.0, max_delay);

        let wet_l = Self::read_interpolated(&self.buffer_l, self.write_pos, delay_l);
        let wet_r = Self::read_interpolated(&self.buffer_r, self.write_pos, delay_r);

        self.write_pos = (self.write_pos + 1) % buffer_len;

        let phase_inc = self.rate / self.sample_rate;
        self.phase_l = (self.phase_l + phase_inc) % 1.0;
        self.phase_r = (self.phase_r + phase_inc) % 1.0;

        let wet = self.wet as f32;
        Frame::new(
            input.left * (1.0 - wet) + wet_l * wet,
            input.right * (1.0 - wet) + wet_r * wet,
        )
    }

    pub fn clear(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
        self.phase_l = 0.0;
        self.phase_r = 0.25;
    }
}
