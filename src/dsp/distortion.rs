//! Waveshaping distortion.

use super::Frame;

/// Drive applied at `amount = 1`.
const MAX_DRIVE: f32 = 50.0;

/// Rational tanh approximation, accurate enough for saturation curves.
#[inline(always)]
fn fast_tanh(x: f32) -> f32 {
    let x = x.clamp(-3.0, 3.0);
    let x2 = x * x;
    x * (27.0 + x2) / (27.0 + 9.0 * x2)
}

/// Soft saturation whose drive grows with `amount` ∈ [0, 1]. The curve is
/// normalised so full-scale input stays at full scale.
#[derive(Debug, Clone)]
pub struct Distortion {
    amount: f64,
    drive: f32,
    normalise: f32,
    /// Internal dry/wet (0.0 = fully dry, 1.0 = fully wet).
    pub wet: f64,
}

impl Distortion {
    pub fn new(amount: f64) -> Self {
        let mut d = Distortion {
            amount: 0.0,
            drive: 1.0,
            normalise: 1.0,
            wet: 1.0,
        };
        d.set_amount(amount);
        d
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn set_amount(&mut self, amount: f64) {
        self.amount = amount.clamp(0.0, 1.0);
        self.drive = 1.0 + self.amount as f32 * MAX_DRIVE;
        self.normalise = 1.0 / fast_tanh(self.drive);
    }

    #[inline]
    fn shape(&self, x: f32) -> f32 {
        fast_tanh(x * self.drive) * self.normalise
    }

    #[inline]
    pub fn process(&mut self, input: Frame) -> Frame {
        let wet = self.wet as f32;
        Frame::new(
            input.left * (1.0 - wet) + self.shape(input.left) * wet,
            input.right * (1.0 - wet) + self.shape(input.right) * wet,
        )
    }
}
