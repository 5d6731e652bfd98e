//! Mixing primitives: input summing, stereo panning and the output clipper.

use std::f32::consts::FRAC_PI_2;

use super::Frame;

/// Sum `source` into `dest`, frame by frame.
pub fn accumulate(dest: &mut [Frame], source: &[Frame]) {
    for (d, s) in dest.iter_mut().zip(source) {
        *d += *s;
    }
}

/// Stereo panner with the WebAudio `StereoPannerNode` law: at centre both
/// channels pass untouched; moving off-centre folds the far channel into the
/// near one with equal-power gains.
#[derive(Debug, Clone, Copy, Default)]
pub struct Panner {
    pan: f32,
}

impl Panner {
    pub fn new(pan: f64) -> Self {
        let mut p = Panner::default();
        p.set_pan(pan);
        p
    }

    pub fn pan(&self) -> f64 {
        self.pan as f64
    }

    /// Position in [-1, 1]; -1 is hard left.
    pub fn set_pan(&mut self, pan: f64) {
        self.pan = crate::gain::clamp(pan, -1.0, 1.0) as f32;
    }

    #[inline]
    pub fn process(&self, input: Frame) -> Frame {
        let x = if self.pan <= 0.0 { self.pan + 1.0 } else { self.pan };
        let gain_l = (x * FRAC_PI_2).cos();
        let gain_r = (x * FRAC_PI_2).sin();
        if self.pan <= 0.0 {
            Frame::new(input.left + input.right * gain_l, input.right * gain_r)
        } else {
            Frame::new(input.left * gain_l, input.right + input.left * gain_r)
        }
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
pub fn soft_clip(frame: Frame) -> Frame {
    Frame::new(frame.left.tanh(), frame.right.tanh())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_frames() {
        let mut bus = vec![Frame::SILENT; 3];
        accumulate(&mut bus, &[Frame::mono(0.5), Frame::mono(1.0)]);
        accumulate(&mut bus, &[Frame::mono(0.3)]);
        assert!((bus[0].left - 0.8).abs() < 1e-6);
        assert!((bus[1].right - 1.0).abs() < 1e-6);
        assert_eq!(bus[2], Frame::SILENT);
    }

    #[test]
    fn centre_pan_is_transparent() {
        let p = Panner::new(0.0);
        let out = p.process(Frame::new(0.3, -0.7));
        assert!((out.left - 0.3).abs() < 1e-6);
        assert!((out.right + 0.7).abs() < 1e-6);
    }

    #[test]
    fn hard_pans_move_everything_to_one_side() {
        let left = Panner::new(-1.0).process(Frame::mono(0.5));
        assert!((left.left - 1.0).abs() < 1e-6);
        assert!(left.right.abs() < 1e-6);

        let right = Panner::new(1.0).process(Frame::mono(0.5));
        assert!(right.left.abs() < 1e-6);
        assert!((right.right - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pan_is_clamped() {
        assert_eq!(Panner::new(3.0).pan(), 1.0);
        assert_eq!(Panner::new(-3.0).pan(), -1.0);
    }

    #[test]
    fn soft_clip_prevents_overflow() {
        let out = soft_clip(Frame::mono(100.0));
        assert!(out.left.abs() <= 1.0, "Soft clip should keep output <= 1.0, got {}", out.left);
    }
}
