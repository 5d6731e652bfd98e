//! Stereo delay line with feedback.

use super::Frame;

/// A stereo feedback delay.
///
/// The buffer holds up to `max_delay_seconds` of audio; the delay time can
/// change at any moment without reallocating.
#[derive(Debug, Clone)]
pub struct Delay {
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
    sample_rate: f64,
    max_delay_seconds: f64,

    delay_time: f64,
    feedback: f64,
    /// Internal dry/wet (0.0 = fully dry, 1.0 = fully wet).
    pub wet: f64,
}

impl Delay {
    pub fn new(sample_rate: f64, max_delay_seconds: f64) -> Self {
        let buffer_size = (sample_rate * max_delay_seconds) as usize + 1;
        Self {
            buffer_l: vec![0.0; buffer_size],
            buffer_r: vec![0.0; buffer_size],
            write_pos: 0,
            sample_rate,
            max_delay_seconds,
            delay_time: 0.25,
            feedback: 0.3,
            wet: 1.0,
        }
    }

    pub fn with_params(sample_rate: f64, max_delay_seconds: f64, delay_time: f64, feedback: f64) -> Self {
        let mut d = Self::new(sample_rate, max_delay_seconds);
        d.set_delay_time(delay_time);
        d.set_feedback(feedback);
        d
    }

    pub fn delay_time(&self) -> f64 {
        self.delay_time
    }

    pub fn set_delay_time(&mut self, seconds: f64) {
        self.delay_time = seconds.clamp(0.0, self.max_delay_seconds);
    }

    pub fn feedback(&self) -> f64 {
        self.feedback
    }

    /// Feedback is kept below 1 so the loop always decays.
    pub fn set_feedback(&mut self, feedback: f64) {
        self.feedback = feedback.clamp(0.0, 0.99);
    }

    #[inline]
    pub fn process(&mut self, input: Frame) -> Frame {
        let buffer_len = self.buffer_l.len();
        let delay_samples = ((self.delay_time * self.sample_rate) as usize).clamp(1, buffer_len - 1);

        let read_pos = (self.write_pos + buffer_len - delay_samples) % buffer_len;
        let delayed_l = self.buffer_l[read_pos];
        let delayed_r = self.buffer_r[read_pos];

        let feedback = self.feedback as f32;
        self.buffer_l[self.write_pos] = input.left + delayed_l * feedback;
        self.buffer_r[self.write_pos] = input.right + delayed_r * feedback;
        self.write_pos = (self.write_pos + 1) % buffer_len;

        let wet = self.wet as f32;
        Frame::new(
            input.left * (1.0 - wet) + delayed_l * wet,
            input.right * (1.0 - wet) + delayed_r * wet,
        )
    }

    pub fn clear(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_wet_output_is_silent_until_the_echo() {
        let sample_rate = 44100.0;
        let delay_time = 0.01; // 441 samples
        let mut delay = Delay::with_params(sample_rate, 1.0, delay_time, 0.0);

        delay.process(Frame::mono(1.0));
        let delay_samples = (delay_time * sample_rate) as usize;
        for _ in 1..delay_samples {
            let out = delay.process(Frame::SILENT);
            assert!(out.left.abs() < 1e-6);
        }

        let out = delay.process(Frame::SILENT);
        assert!((out.left - 1.0).abs() < 1e-6);
        assert!((out.right - 1.0).abs() < 1e-6);
    }

    #[test]
    fn feedback_attenuates_each_repeat() {
        let sample_rate = 1000.0;
        let mut delay = Delay::with_params(sample_rate, 1.0, 0.01, 0.5);

        delay.process(Frame::mono(1.0));
        for _ in 1..10 {
            delay.process(Frame::SILENT);
        }
        let first = delay.process(Frame::SILENT);
        assert!((first.left - 1.0).abs() < 1e-6);

        for _ in 1..10 {
            delay.process(Frame::SILENT);
        }
        let second = delay.process(Frame::SILENT);
        assert!((second.left - 0.5).abs() < 1e-6);
    }

    #[test]
    fn dry_setting_passes_input() {
        let mut delay = Delay::new(44100.0, 1.0);
        delay.wet = 0.0;
        let out = delay.process(Frame::new(0.5, -0.5));
        assert_eq!(out, Frame::new(0.5, -0.5));
    }

    #[test]
    fn parameters_are_clamped() {
        let mut delay = Delay::new(44100.0, 1.0);
        delay.set_delay_time(5.0);
        delay.set_feedback(3.0);
        assert_eq!(delay.delay_time(), 1.0);
        assert_eq!(delay.feedback(), 0.99);
        // Longest delay must still produce finite output.
        for _ in 0..100 {
            assert!(delay.process(Frame::mono(0.1)).left.is_finite());
        }
    }
}
