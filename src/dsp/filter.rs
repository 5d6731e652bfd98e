//! Biquad filter matching WebAudio BiquadFilterNode coefficients.

use std::f64::consts::PI;

use super::Frame;

/// Filter type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterType {
    Lowpass,
    Highpass,
    /// Boost/cut below `frequency` by `gain_db`.
    LowShelf,
    /// Boost/cut above `frequency` by `gain_db`.
    HighShelf,
}

/// A biquad IIR filter (2nd order).
///
/// Implements the standard Direct Form II Transposed structure.
/// Coefficient formulas from the Audio EQ Cookbook (Robert Bristow-Johnson).
#[derive(Debug, Clone)]
pub struct BiquadFilter {
    pub filter_type: FilterType,
    frequency: f64,
    q: f64,
    /// Only used by the shelves.
    gain_db: f64,

    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,

    z1: f64,
    z2: f64,

    sample_rate: f64,
    dirty: bool,
}

impl BiquadFilter {
    pub fn new(filter_type: FilterType, sample_rate: f64) -> Self {
        let mut f = BiquadFilter {
            filter_type,
            frequency: 1000.0,
            q: 0.707, // Butterworth
            gain_db: 0.0,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
            sample_rate,
            dirty: true,
        };
        f.update_coefficients();
        f
    }

    /// A shelf at `frequency` with an initial gain.
    pub fn shelf(filter_type: FilterType, frequency: f64, gain_db: f64, sample_rate: f64) -> Self {
        let mut f = Self::new(filter_type, sample_rate);
        f.frequency = frequency;
        f.gain_db = gain_db;
        f.update_coefficients();
        f
    }

    /// Recompute filter coefficients from current parameters.
    pub fn update_coefficients(&mut self) {
        let w0 = 2.0 * PI * self.frequency.min(self.sample_rate * 0.49) / self.sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();

        let (b0, b1, b2, a0, a1, a2) = match self.filter_type {
            FilterType::Lowpass => {
                let alpha = sin_w0 / (2.0 * self.q);
                let b1 = 1.0 - cos_w0;
                let b0 = b1 / 2.0;
                (b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::Highpass => {
                let alpha = sin_w0 / (2.0 * self.q);
                let b0 = (1.0 + cos_w0) / 2.0;
                let b1 = -(1.0 + cos_w0);
                (b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
            }
            FilterType::LowShelf | FilterType::HighShelf => {
                // Shelf slope S = 1.
                let a = 10.0_f64.powf(self.gain_db / 40.0);
                let alpha = sin_w0 / 2.0 * std::f64::consts::SQRT_2;
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                if self.filter_type == FilterType::LowShelf {
                    (
                        a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                        2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                        a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                        (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                        -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                        (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                    )
                } else {
                    (
                        a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                        -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                        a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                        (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                        2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                        (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                    )
                }
            }
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
        self.dirty = false;
    }

    /// Process a single sample through the filter.
    pub fn process(&mut self, input: f64) -> f64 {
        if self.dirty {
            self.update_coefficients();
        }

        let output = self.b0 * input + self.z1;
        self.z1 = self.b1 * input - self.a1 * output + self.z2;
        self.z2 = self.b2 * input - self.a2 * output;
        output
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn set_frequency(&mut self, freq: f64) {
        self.frequency = freq;
        self.dirty = true;
    }

    pub fn set_q(&mut self, q: f64) {
        self.q = q;
        self.dirty = true;
    }

    pub fn gain_db(&self) -> f64 {
        self.gain_db
    }

    /// Shelf gain in dB, applied as-is.
    pub fn set_gain_db(&mut self, gain_db: f64) {
        self.gain_db = gain_db;
        self.dirty = true;
    }
}

/// A pair of identical biquads, one per channel.
#[derive(Debug, Clone)]
pub struct StereoFilter {
    left: BiquadFilter,
    right: BiquadFilter,
}

impl StereoFilter {
    pub fn new(filter: BiquadFilter) -> Self {
        StereoFilter {
            left: filter.clone(),
            right: filter,
        }
    }

    pub fn process(&mut self, input: Frame) -> Frame {
        Frame::new(
            self.left.process(input.left as f64) as f32,
            self.right.process(input.right as f64) as f32,
        )
    }

    pub fn gain_db(&self) -> f64 {
        self.left.gain_db()
    }

    pub fn set_gain_db(&mut self, gain_db: f64) {
        self.left.set_gain_db(gain_db);
        self.right.set_gain_db(gain_db);
    }

    pub fn set_frequency(&mut self, freq: f64) {
        self.left.set_frequency(freq);
        self.right.set_frequency(freq);
    }
}
