//! Level metering and spectrum analysis. Both are pass-through taps: audio
//! leaves them unchanged.

use std::collections::VecDeque;

use spectrum_analyzer::scaling::divide_by_N_sqrt;
use spectrum_analyzer::windows::hann_window;
use spectrum_analyzer::{FrequencyLimit, samples_fft_to_spectrum};

use super::Frame;
use crate::gain::gain_to_db;

/// Smoothed RMS level meter.
#[derive(Debug, Clone)]
pub struct Meter {
    smoothing: f64,
    sum_squares: f64,
    count: usize,
    level: f64,
}

impl Meter {
    pub fn new(smoothing: f64) -> Self {
        Meter {
            smoothing: smoothing.clamp(0.0, 0.999),
            sum_squares: 0.0,
            count: 0,
            level: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: Frame) -> Frame {
        let m = input.to_mono() as f64;
        self.sum_squares += m * m;
        self.count += 1;
        input
    }

    /// Fold the samples seen since the last call into the smoothed level.
    /// Called once per render block.
    pub fn end_block(&mut self) {
        if self.count == 0 {
            return;
        }
        let rms = (self.sum_squares / self.count as f64).sqrt();
        self.level = (self.level * self.smoothing).max(rms);
        self.sum_squares = 0.0;
        self.count = 0;
    }

    /// Linear level.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// Level in dB, `-inf` for silence.
    pub fn level_db(&self) -> f64 {
        gain_to_db(self.level)
    }
}

/// Keeps the most recent `size` mono samples for FFT analysis.
#[derive(Debug, Clone)]
pub struct Analyser {
    size: usize,
    sample_rate: u32,
    history: VecDeque<f32>,
}

impl Analyser {
    /// `size` must be a power of two.
    pub fn new(size: usize, sample_rate: u32) -> Self {
        Analyser {
            size,
            sample_rate,
            history: std::iter::repeat_n(0.0, size).collect(),
        }
    }

    #[inline]
    pub fn process(&mut self, input: Frame) -> Frame {
        if self.history.len() == self.size {
            self.history.pop_front();
        }
        self.history.push_back(input.to_mono());
        input
    }

    /// Magnitude spectrum of the recent signal, in dB per bin.
    pub fn spectrum_db(&self) -> Vec<f32> {
        let samples: Vec<f32> = self.history.iter().copied().collect();
        let windowed = hann_window(&samples);
        match samples_fft_to_spectrum(
            &windowed,
            self.sample_rate,
            FrequencyLimit::All,
            Some(&divide_by_N_sqrt),
        ) {
            Ok(spectrum) => spectrum
                .data()
                .iter()
                .map(|(_, magnitude)| gain_to_db(magnitude.val() as f64) as f32)
                .collect(),
            Err(e) => {
                log::warn!("spectrum analysis failed: {e:?}");
                vec![f32::NEG_INFINITY; self.size / 2 + 1]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_meter_reads_minus_infinity() {
        let mut meter = Meter::new(0.8);
        for _ in 0..128 {
            meter.process(Frame::SILENT);
        }
        meter.end_block();
        assert_eq!(meter.level_db(), f64::NEG_INFINITY);
    }

    #[test]
    fn full_scale_dc_reads_zero_db() {
        let mut meter = Meter::new(0.8);
        for _ in 0..128 {
            meter.process(Frame::mono(1.0));
        }
        meter.end_block();
        assert!(meter.level_db().abs() < 1e-9);
    }

    #[test]
    fn level_falls_smoothly_after_signal_stops() {
        let mut meter = Meter::new(0.5);
        for _ in 0..128 {
            meter.process(Frame::mono(1.0));
        }
        meter.end_block();
        for _ in 0..128 {
            meter.process(Frame::SILENT);
        }
        meter.end_block();
        assert!((meter.level() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn meter_passes_audio_through() {
        let mut meter = Meter::new(0.8);
        assert_eq!(meter.process(Frame::new(0.2, 0.4)), Frame::new(0.2, 0.4));
    }

    #[test]
    fn sine_peaks_in_its_bin() {
        let size = 256;
        let sample_rate = 44100;
        let mut analyser = Analyser::new(size, sample_rate);
        // Bin 16 is exactly 16 * 44100 / 256 Hz.
        let freq = 16.0 * sample_rate as f32 / size as f32;
        for i in 0..size {
            let t = i as f32 / sample_rate as f32;
            analyser.process(Frame::mono((2.0 * std::f32::consts::PI * freq * t).sin()));
        }
        let spectrum = analyser.spectrum_db();
        assert!(spectrum.len() >= size / 2, "only {} bins", spectrum.len());
        let loudest = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(loudest, Some(16));
    }
}
