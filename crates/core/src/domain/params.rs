//! Parameter constraints and unit conversions
//!
//! All parameters are clamped to these ranges to prevent
//! invalid states and ensure numerical stability.

/// Audible range used for every frequency control (Hz)
pub const MIN_FREQUENCY: f32 = 20.0;
pub const MAX_FREQUENCY: f32 = 20000.0;

/// Stable Q range for every filter built by the components
pub const Q_MIN: f32 = 0.1;
pub const Q_MAX: f32 = 30.0;

/// Band carving width range (octaves)
pub const BANDWIDTH_MIN: f32 = 0.1;
pub const BANDWIDTH_MAX: f32 = 10.0;

/// Peaking filter gain range (dB)
pub const GAIN_DB_MIN: f32 = -40.0;
pub const GAIN_DB_MAX: f32 = 40.0;

/// Equalizer make-up volume range (dB)
pub const VOLUME_DB_MIN: f32 = -60.0;
pub const VOLUME_DB_MAX: f32 = 24.0;

/// Floor for exponential ramp targets (0.001 of full scale)
pub const RAMP_FLOOR: f32 = 0.001;

/// Longest accepted ramp (seconds)
pub const RAMP_MAX_SECS: f64 = 10.0;

/// Frames rendered per block on the render path
pub const BLOCK_SIZE: usize = 128;

/// Convert decibels to a linear amplitude factor
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert a linear amplitude factor to decibels
///
/// Non-positive amplitudes map to -120 dB.
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    if gain <= 0.0 {
        -120.0
    } else {
        20.0 * gain.log10()
    }
}

/// Clamp a frequency into the audible range; NaN maps to the lower bound
#[inline]
pub fn clamp_frequency(hz: f32) -> f32 {
    if hz.is_nan() {
        MIN_FREQUENCY
    } else {
        hz.clamp(MIN_FREQUENCY, MAX_FREQUENCY)
    }
}

/// Clamp a Q factor into the stable range; NaN maps to the lower bound
#[inline]
pub fn clamp_q(q: f32) -> f32 {
    if q.is_nan() {
        Q_MIN
    } else {
        q.clamp(Q_MIN, Q_MAX)
    }
}

/// Clamp a bandwidth into [0.1, 10] octaves; NaN maps to the lower bound
#[inline]
pub fn clamp_bandwidth(octaves: f32) -> f32 {
    if octaves.is_nan() {
        BANDWIDTH_MIN
    } else {
        octaves.clamp(BANDWIDTH_MIN, BANDWIDTH_MAX)
    }
}

/// Clamp a peaking gain into the supported range
#[inline]
pub fn clamp_gain_db(db: f32) -> f32 {
    db.clamp(GAIN_DB_MIN, GAIN_DB_MAX)
}

/// Clamp a make-up volume so its linear gain stays finite
#[inline]
pub fn clamp_volume_db(db: f32) -> f32 {
    db.clamp(VOLUME_DB_MIN, VOLUME_DB_MAX)
}
