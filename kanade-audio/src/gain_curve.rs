//! Perceptual mapping between linear UI volume and physical gain.
//!
//! Loudness is perceived roughly logarithmically, so a slider that drives the gain directly feels
//! like it does nothing in its upper half. Squaring the slider value makes it feel linear.

fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Converts a linear volume in `[0, 1]` into a physical gain.
///
/// Out-of-range values are clamped, NaN and infinities map to silence.
pub fn to_gain(volume: f32) -> f32 {
    let volume = clamp_unit(volume);
    volume * volume
}

/// The inverse of [`to_gain`] on `[0, 1]`.
pub fn to_volume(gain: f32) -> f32 {
    clamp_unit(gain).sqrt()
}
