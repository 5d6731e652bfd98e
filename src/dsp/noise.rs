//! Coloured noise generators.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseColor {
    White,
    #[default]
    Pink,
    Brown,
}

/// A noise source. Pink uses Paul Kellet's refined filter; brown is leaky
/// integrated white noise.
#[derive(Debug, Clone)]
pub struct Noise {
    pub color: NoiseColor,
    rng: StdRng,
    pink: [f64; 7],
    brown: f64,
}

impl Noise {
    pub fn new(color: NoiseColor) -> Self {
        Self::with_seed(color, 0x5EED_0F_A0D10)
    }

    /// Deterministic generator, for reproducible renders.
    pub fn with_seed(color: NoiseColor, seed: u64) -> Self {
        Noise {
            color,
            rng: StdRng::seed_from_u64(seed),
            pink: [0.0; 7],
            brown: 0.0,
        }
    }

    pub fn next_sample(&mut self) -> f64 {
        let white: f64 = self.rng.gen_range(-1.0..1.0);
        match self.color {
            NoiseColor::White => white,
            NoiseColor::Pink => {
                let b = &mut self.pink;
                b[0] = 0.99886 * b[0] + white * 0.0555179;
                b[1] = 0.99332 * b[1] + white * 0.0750759;
                b[2] = 0.96900 * b[2] + white * 0.1538520;
                b[3] = 0.86650 * b[3] + white * 0.3104856;
                b[4] = 0.55000 * b[4] + white * 0.5329522;
                b[5] = -0.7616 * b[5] - white * 0.0168980;
                let pink = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362;
                b[6] = white * 0.115926;
                pink * 0.11
            }
            NoiseColor::Brown => {
                self.brown = (self.brown + 0.02 * white) / 1.02;
                self.brown * 3.5
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms(noise: &mut Noise, n: usize) -> f64 {
        let sum: f64 = (0..n).map(|_| noise.next_sample().powi(2)).sum();
        (sum / n as f64).sqrt()
    }

    #[test]
    fn every_colour_is_audible_and_bounded() {
        for color in [NoiseColor::White, NoiseColor::Pink, NoiseColor::Brown] {
            let mut noise = Noise::new(color);
            let level = rms(&mut noise, 44100);
            assert!(level > 0.01, "{color:?} too quiet: {level}");
            for _ in 0..44100 {
                let s = noise.next_sample();
                assert!(s.abs() < 2.0, "{color:?} out of range: {s}");
            }
        }
    }

    #[test]
    fn same_seed_same_signal() {
        let mut a = Noise::with_seed(NoiseColor::Pink, 7);
        let mut b = Noise::with_seed(NoiseColor::Pink, 7);
        for _ in 0..256 {
            assert_eq!(a.next_sample(), b.next_sample());
        }
    }

    #[test]
    fn default_colour_is_pink() {
        assert_eq!(NoiseColor::default(), NoiseColor::Pink);
    }
}
