//! Sample playback.
//!
//! A [`SampleBuffer`] holds decoded mono audio; a [`Player`] reads it at the
//! engine rate, resampling with linear interpolation when the buffer was
//! recorded at a different rate.

use std::sync::Arc;

use super::Frame;

/// A decoded sample held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Mono samples in [-1, 1].
    pub data: Vec<f32>,
    /// Native sample rate of the audio.
    pub sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(data: Vec<f32>, sample_rate: u32) -> Self {
        SampleBuffer { data, sample_rate }
    }

    /// Create from 16-bit signed PCM data.
    pub fn from_i16(pcm: &[i16], sample_rate: u32) -> Self {
        let data = pcm.iter().map(|&s| s as f32 / 32768.0).collect();
        SampleBuffer { data, sample_rate }
    }

    /// Create from interleaved frames, averaging the channels.
    pub fn from_interleaved(samples: &[f32], channels: usize, sample_rate: u32) -> Self {
        let channels = channels.max(1);
        let data = samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        SampleBuffer { data, sample_rate }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Length in seconds at the native rate.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.data.len() as f64 / self.sample_rate as f64
    }

    /// Read a sample with linear interpolation at a fractional position.
    pub fn read_interpolated(&self, position: f64) -> f32 {
        if self.data.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position as usize;
        if idx >= self.data.len() - 1 {
            return self.data.get(idx).copied().unwrap_or(0.0);
        }

        let frac = (position - idx as f64) as f32;
        self.data[idx] * (1.0 - frac) + self.data[idx + 1] * frac
    }
}

/// One-shot player for a shared sample buffer. Triggering while playing
/// restarts from the top.
#[derive(Debug, Clone)]
pub struct Player {
    buffer: Arc<SampleBuffer>,
    /// Buffer samples advanced per output sample.
    step: f64,
    position: f64,
    playing: bool,
}

impl Player {
    pub fn new(buffer: Arc<SampleBuffer>, sample_rate: f64) -> Self {
        let step = if sample_rate > 0.0 {
            buffer.sample_rate as f64 / sample_rate
        } else {
            1.0
        };
        Player {
            buffer,
            step,
            position: 0.0,
            playing: false,
        }
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    pub fn trigger(&mut self) {
        self.position = 0.0;
        self.playing = !self.buffer.is_empty();
    }

    pub fn stop(&mut self) {
        self.playing = false;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    #[inline]
    pub fn next_frame(&mut self) -> Frame {
        if !self.playing {
            return Frame::SILENT;
        }
        let s = self.buffer.read_interpolated(self.position);
        self.position += self.step;
        if self.position >= self.buffer.len() as f64 {
            self.playing = false;
        }
        Frame::mono(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize, sample_rate: u32) -> Arc<SampleBuffer> {
        let data = (0..len).map(|i| i as f32 / len as f32).collect();
        Arc::new(SampleBuffer::new(data, sample_rate))
    }

    #[test]
    fn interpolates_between_samples() {
        let buf = SampleBuffer::new(vec![0.0, 1.0], 44100);
        assert!((buf.read_interpolated(0.25) - 0.25).abs() < 1e-6);
        assert_eq!(buf.read_interpolated(5.0), 0.0);
        assert_eq!(buf.read_interpolated(-1.0), 0.0);
    }

    #[test]
    fn i16_conversion_is_normalised() {
        let buf = SampleBuffer::from_i16(&[i16::MIN, 0, 16384], 8000);
        assert_eq!(buf.data, vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn interleaved_stereo_is_mixed_down() {
        let buf = SampleBuffer::from_interleaved(&[1.0, 0.0, 0.5, 0.5], 2, 44100);
        assert_eq!(buf.data, vec![0.5, 0.5]);
    }

    #[test]
    fn player_is_silent_until_triggered() {
        let mut player = Player::new(ramp(100, 44100), 44100.0);
        assert_eq!(player.next_frame(), Frame::SILENT);
        player.trigger();
        player.next_frame();
        assert!(player.next_frame().left > 0.0);
    }

    #[test]
    fn player_stops_at_end_of_buffer() {
        let mut player = Player::new(ramp(10, 44100), 44100.0);
        player.trigger();
        for _ in 0..10 {
            player.next_frame();
        }
        assert!(!player.is_playing());
    }

    #[test]
    fn retrigger_restarts_from_top() {
        let mut player = Player::new(ramp(100, 44100), 44100.0);
        player.trigger();
        for _ in 0..50 {
            player.next_frame();
        }
        player.trigger();
        assert_eq!(player.next_frame().left, 0.0);
    }

    #[test]
    fn half_rate_buffer_plays_twice_as_long() {
        let mut player = Player::new(ramp(100, 22050), 44100.0);
        player.trigger();
        let mut frames = 0;
        while player.is_playing() {
            player.next_frame();
            frames += 1;
        }
        assert_eq!(frames, 200);
    }
}
