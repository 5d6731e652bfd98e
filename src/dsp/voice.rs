//! Voices: oscillators shaped by an envelope.

use super::envelope::Envelope;
use super::oscillator::{Oscillator, Waveform};

/// One or more oscillators sharing an ADSR envelope. A single partial makes a
/// plain tone; several make a chord.
#[derive(Debug, Clone)]
pub struct SynthVoice {
    partials: Vec<(Oscillator, f64)>,
    pub envelope: Envelope,
}

impl SynthVoice {
    pub fn new(envelope: Envelope) -> Self {
        SynthVoice {
            partials: Vec::new(),
            envelope,
        }
    }

    /// Add an oscillator at `level`, detuned by `detune` cents.
    pub fn with_partial(
        mut self,
        waveform: Waveform,
        frequency: f64,
        detune: f64,
        level: f64,
        sample_rate: f64,
    ) -> Self {
        let mut osc = Oscillator::with_frequency(waveform, frequency, sample_rate);
        osc.detune = detune;
        self.partials.push((osc, level));
        self
    }

    pub fn partials(&self) -> usize {
        self.partials.len()
    }

    /// Start (or restart) the attack.
    pub fn note_on(&mut self) {
        if self.envelope.is_finished() {
            for (osc, _) in &mut self.partials {
                osc.reset();
            }
        }
        self.envelope.gate_on();
    }

    pub fn note_off(&mut self) {
        self.envelope.gate_off();
    }

    pub fn kill(&mut self) {
        self.envelope.kill();
    }

    pub fn next_sample(&mut self) -> f64 {
        if self.envelope.is_finished() {
            return 0.0;
        }
        let env = self.envelope.next_sample();
        let sum: f64 = self
            .partials
            .iter_mut()
            .map(|(osc, level)| osc.next_sample() * *level)
            .sum();
        sum * env
    }

    pub fn is_finished(&self) -> bool {
        self.envelope.is_finished()
    }
}

/// Synthesised drum hit: a sine body whose pitch drops from a multiple of the
/// base frequency, with an exponential amplitude decay.
#[derive(Debug, Clone)]
pub struct DrumVoice {
    osc: Oscillator,
    base_frequency: f64,
    sample_rate: f64,
    /// Seconds for the pitch to fall most of the way to the base.
    pitch_decay: f64,
    /// Starting pitch as a multiple of the base.
    pitch_sweep: f64,
    /// Seconds for the amplitude to fall by 60 dB.
    amp_decay: f64,
    elapsed: f64,
    active: bool,
}

impl DrumVoice {
    pub fn new(base_frequency: f64, sample_rate: f64) -> Self {
        DrumVoice {
            osc: Oscillator::with_frequency(Waveform::Sine, base_frequency, sample_rate),
            base_frequency,
            sample_rate,
            pitch_decay: 0.05,
            pitch_sweep: 4.0,
            amp_decay: 0.4,
            elapsed: 0.0,
            active: false,
        }
    }

    pub fn trigger(&mut self) {
        self.osc.reset();
        self.elapsed = 0.0;
        self.active = true;
    }

    pub fn kill(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn next_sample(&mut self) -> f64 {
        if !self.active {
            return 0.0;
        }
        let t = self.elapsed;
        let sweep = 1.0 + (self.pitch_sweep - 1.0) * (-t / self.pitch_decay).exp();
        self.osc.frequency = self.base_frequency * sweep;
        // -60 dB after amp_decay seconds.
        let amp = (-6.907755 * t / self.amp_decay).exp();

        self.elapsed += 1.0 / self.sample_rate;
        if t >= self.amp_decay {
            self.active = false;
        }
        self.osc.next_sample() * amp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 44100.0;

    fn tone() -> SynthVoice {
        SynthVoice::new(Envelope::with_adsr(SR, 0.001, 0.001, 0.5, 0.01))
            .with_partial(Waveform::Sine, 440.0, 0.0, 1.0, SR)
    }

    #[test]
    fn voice_is_silent_before_note_on() {
        let mut v = tone();
        assert_eq!(v.next_sample(), 0.0);
    }

    #[test]
    fn voice_produces_sound() {
        let mut v = tone();
        v.note_on();
        let has_nonzero = (0..4410).any(|_| v.next_sample().abs() > 0.001);
        assert!(has_nonzero, "Voice should produce non-zero output");
    }

    #[test]
    fn voice_silent_after_release() {
        let mut v = tone();
        v.note_on();
        for _ in 0..500 {
            v.next_sample();
        }
        v.note_off();
        for _ in 0..2000 {
            v.next_sample();
        }
        assert!(v.is_finished(), "Voice should be finished after release");
        assert_eq!(v.next_sample(), 0.0);
    }

    #[test]
    fn chord_stays_in_range() {
        let mut v = SynthVoice::new(Envelope::with_adsr(SR, 0.001, 0.1, 1.0, 0.1))
            .with_partial(Waveform::Sawtooth, 220.0, 0.0, 0.5, SR)
            .with_partial(Waveform::Sawtooth, 330.0, 7.0, 0.5, SR);
        assert_eq!(v.partials(), 2);
        v.note_on();
        for _ in 0..44100 {
            let s = v.next_sample();
            assert!(s.abs() <= 1.05, "chord output out of range: {s}");
        }
    }

    #[test]
    fn drum_hit_decays_to_silence() {
        let mut drum = DrumVoice::new(55.0, SR);
        drum.trigger();
        let early: f64 = (0..441).map(|_| drum.next_sample().abs()).fold(0.0, f64::max);
        assert!(early > 0.1, "drum body too quiet: {early}");
        for _ in 0..SR as usize {
            drum.next_sample();
        }
        assert!(!drum.is_active());
        assert_eq!(drum.next_sample(), 0.0);
    }

    #[test]
    fn drum_retrigger_restarts_the_hit() {
        let mut drum = DrumVoice::new(55.0, SR);
        drum.trigger();
        for _ in 0..10000 {
            drum.next_sample();
        }
        drum.trigger();
        assert!(drum.is_active());
        let peak: f64 = (0..441).map(|_| drum.next_sample().abs()).fold(0.0, f64::max);
        assert!(peak > 0.1);
    }
}
