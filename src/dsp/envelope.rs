//! ADSR Envelope generator.

/// Envelope stages.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// ADSR Envelope with linear attack/decay/release curves.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Attack time in seconds.
    pub attack: f64,
    /// Decay time in seconds.
    pub decay: f64,
    /// Sustain level [0, 1].
    pub sustain: f64,
    /// Release time in seconds.
    pub release: f64,

    stage: Stage,
    level: f64,
    sample_rate: f64,
    stage_samples: usize,
    stage_counter: usize,
    /// Level at the start of the current stage, so retriggers and releases
    /// never jump.
    start_level: f64,
}

impl Envelope {
    pub fn new(sample_rate: f64) -> Self {
        Self::with_adsr(sample_rate, 0.01, 0.1, 0.7, 0.3)
    }

    pub fn with_adsr(sample_rate: f64, attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Envelope {
            attack,
            decay,
            sustain: sustain.clamp(0.0, 1.0),
            release,
            stage: Stage::Idle,
            level: 0.0,
            sample_rate,
            stage_samples: 0,
            stage_counter: 0,
            start_level: 0.0,
        }
    }

    /// Note on. Retriggering starts the attack from the current level.
    pub fn gate_on(&mut self) {
        self.stage = Stage::Attack;
        self.stage_samples = (self.attack * self.sample_rate) as usize;
        self.stage_counter = 0;
        self.start_level = self.level;
    }

    /// Note off.
    pub fn gate_off(&mut self) {
        if self.stage == Stage::Idle {
            return;
        }
        self.stage = Stage::Release;
        self.stage_samples = (self.release * self.sample_rate) as usize;
        self.stage_counter = 0;
        self.start_level = self.level;
    }

    /// Drop straight to silence.
    pub fn kill(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
    }

    /// Generate the next envelope sample [0, 1].
    pub fn next_sample(&mut self) -> f64 {
        match self.stage {
            Stage::Idle => {
                self.level = 0.0;
            }
            Stage::Attack => {
                if self.advance() {
                    self.level = 1.0;
                    self.enter(Stage::Decay, self.decay);
                } else {
                    self.level = self.start_level + (1.0 - self.start_level) * self.progress();
                }
            }
            Stage::Decay => {
                if self.advance() {
                    self.level = self.sustain;
                    self.stage = Stage::Sustain;
                } else {
                    self.level = 1.0 - (1.0 - self.sustain) * self.progress();
                }
            }
            Stage::Sustain => {
                self.level = self.sustain;
            }
            Stage::Release => {
                if self.advance() {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                } else {
                    self.level = self.start_level * (1.0 - self.progress());
                }
            }
        }
        self.level
    }

    /// Current output level.
    pub fn level(&self) -> f64 {
        self.level
    }

    /// True once the envelope is idle (never started, or fully released).
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Idle
    }

    /// Count one sample into the current stage; true when the stage is over.
    fn advance(&mut self) -> bool {
        if self.stage_counter >= self.stage_samples {
            return true;
        }
        self.stage_counter += 1;
        false
    }

    fn progress(&self) -> f64 {
        self.stage_counter as f64 / self.stage_samples.max(1) as f64
    }

    fn enter(&mut self, stage: Stage, seconds: f64) {
        self.stage = stage;
        self.stage_samples = (seconds * self.sample_rate) as usize;
        self.stage_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let env = Envelope::new(44100.0);
        assert!(env.is_finished());
    }

    #[test]
    fn attack_reaches_one() {
        let mut env = Envelope::with_adsr(44100.0, 0.01, 0.1, 0.7, 0.3);
        env.gate_on();
        let max_level = (0..500).map(|_| env.next_sample()).fold(0.0, f64::max);
        assert!((max_level - 1.0).abs() < 0.01, "Attack should reach ~1.0, got {max_level}");
    }

    #[test]
    fn sustain_holds() {
        let mut env = Envelope::with_adsr(44100.0, 0.001, 0.001, 0.6, 0.3);
        env.gate_on();
        for _ in 0..500 {
            env.next_sample();
        }
        let s = env.next_sample();
        assert!((s - 0.6).abs() < 0.01, "Should sustain at 0.6, got {s}");
    }

    #[test]
    fn release_to_zero() {
        let mut env = Envelope::with_adsr(44100.0, 0.001, 0.001, 0.7, 0.01);
        env.gate_on();
        for _ in 0..500 {
            env.next_sample();
        }
        env.gate_off();
        for _ in 0..1000 {
            env.next_sample();
        }
        assert!(env.is_finished(), "Should be finished after release");
        assert!(env.level().abs() < 0.001);
    }

    #[test]
    fn retrigger_does_not_jump_to_zero() {
        let mut env = Envelope::with_adsr(44100.0, 0.01, 0.01, 0.5, 0.5);
        env.gate_on();
        for _ in 0..2000 {
            env.next_sample();
        }
        env.gate_off();
        for _ in 0..100 {
            env.next_sample();
        }
        let before = env.level();
        env.gate_on();
        let after = env.next_sample();
        assert!(after >= before - 1e-9, "retrigger dropped from {before} to {after}");
    }

    #[test]
    fn full_cycle_range() {
        let mut env = Envelope::with_adsr(44100.0, 0.01, 0.05, 0.5, 0.1);
        env.gate_on();
        for _ in 0..10000 {
            let s = env.next_sample();
            assert!((0.0..=1.0).contains(&s), "Envelope out of range: {s}");
        }
        env.gate_off();
        for _ in 0..10000 {
            let s = env.next_sample();
            assert!((0.0..=1.0).contains(&s), "Envelope out of range after release: {s}");
        }
        assert!(env.is_finished());
    }
}
