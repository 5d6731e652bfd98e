//! Schroeder/Freeverb-style algorithmic reverb.
//!
//! Parallel damped comb filters feed series allpass filters. Unlike the
//! classic room-size control, the comb feedback is derived from a decay time
//! so the tail falls by 60 dB after `decay` seconds.

/// A comb filter delay line with damped feedback.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    feedback: f32,
    damp1: f32,
    damp2: f32,
    filterstore: f32,
}

impl CombFilter {
    fn new(size: usize, damp: f32) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.8,
            damp1: damp,
            damp2: 1.0 - damp,
            filterstore: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filterstore = output * self.damp2 + self.filterstore * self.damp1;
        self.buffer[self.index] = input + self.filterstore * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filterstore = 0.0;
    }
}

/// An allpass filter delay line.
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let bufout = self.buffer[self.index];
        let output = bufout - input;
        self.buffer[self.index] = input + bufout * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

// Tuning constants (scaled for 44100 Hz sample rate)
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const DAMPING: f32 = 0.3;
const INPUT_GAIN: f32 = 0.015;
const MAX_FEEDBACK: f64 = 0.98;

/// A stereo algorithmic reverb with a decay-time control.
#[derive(Debug, Clone)]
pub struct Reverb {
    comb_l: Vec<CombFilter>,
    comb_r: Vec<CombFilter>,
    allpass_l: Vec<AllpassFilter>,
    allpass_r: Vec<AllpassFilter>,
    sample_rate: f64,
    decay: f64,
    /// Internal dry/wet (0.0 = fully dry, 1.0 = fully wet).
    pub wet: f64,
}

impl Reverb {
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let sized = |t: usize, spread: usize| ((t as f64) * scale) as usize + spread;

        let mut reverb = Self {
            comb_l: COMB_TUNING.iter().map(|&t| CombFilter::new(sized(t, 0), DAMPING)).collect(),
            comb_r: COMB_TUNING
                .iter()
                .map(|&t| CombFilter::new(sized(t, STEREO_SPREAD), DAMPING))
                .collect(),
            allpass_l: ALLPASS_TUNING.iter().map(|&t| AllpassFilter::new(sized(t, 0))).collect(),
            allpass_r: ALLPASS_TUNING
                .iter()
                .map(|&t| AllpassFilter::new(sized(t, STEREO_SPREAD)))
                .collect(),
            sample_rate,
            decay: 1.5,
            wet: 1.0,
        };
        reverb.update_feedback();
        reverb
    }

    pub fn with_decay(sample_rate: f64, decay: f64) -> Self {
        let mut r = Self::new(sample_rate);
        r.set_decay(decay);
        r
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// Decay (RT60) in seconds, clamped to [0.1, 10].
    pub fn set_decay(&mut self, decay: f64) {
        self.decay = decay.clamp(0.1, 10.0);
        self.update_feedback();
    }

    /// Per-comb feedback `g = 10^(-3·len / (decay·sr))`.
    fn update_feedback(&mut self) {
        let decay_samples = self.decay * self.sample_rate;
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            let g = 10.0_f64.powf(-3.0 * comb.len() as f64 / decay_samples);
            comb.feedback = g.min(MAX_FEEDBACK) as f32;
        }
    }

    #[inline]
    pub fn process(&mut self, input: super::Frame) -> super::Frame {
        let mono = (input.left + input.right) * INPUT_GAIN;

        let mut out_l: f32 = self.comb_l.iter_mut().map(|c| c.process(mono)).sum();
        let mut out_r: f32 = self.comb_r.iter_mut().map(|c| c.process(mono)).sum();

        for allpass in &mut self.allpass_l {
            out_l = allpass.process(out_l);
        }
        for allpass in &mut self.allpass_r {
            out_r = allpass.process(out_r);
        }

        let wet = self.wet as f32;
        super::Frame::new(
            input.left * (1.0 - wet) + out_l * wet,
            input.right * (1.0 - wet) + out_r * wet,
        )
    }

    pub fn clear(&mut self) {
        self.comb_l.iter_mut().chain(self.comb_r.iter_mut()).for_each(CombFilter::clear);
        self.allpass_l
            .iter_mut()
            .chain(self.allpass_r.iter_mut())
            .for_each(AllpassFilter::clear);
    }
}
