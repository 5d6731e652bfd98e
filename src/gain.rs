//! dB ↔ linear gain conversions and clamping shared by every component.

/// Clamp `value` into `[min, max]`. NaN maps to `min`.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.clamp(min, max)
}

/// Clamp into the unit range `[0, 1]`.
pub fn clamp_unit(value: f64) -> f64 {
    clamp(value, 0.0, 1.0)
}

/// Convert decibels to linear amplitude: `10^(dB/20)`.
///
/// `-inf` maps to exactly 0.
pub fn db_to_gain(db: f64) -> f64 {
    if db == f64::NEG_INFINITY {
        0.0
    } else {
        10.0_f64.powf(db / 20.0)
    }
}

/// Convert linear amplitude to decibels. Silence maps to `-inf`.
pub fn gain_to_db(gain: f64) -> f64 {
    if gain <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * gain.log10()
    }
}

/// Step velocity to playback gain in dB: `20·log10(v)`, `-inf` for `v <= 0`.
pub fn velocity_to_db(velocity: f64) -> f64 {
    gain_to_db(clamp_unit(velocity))
}
