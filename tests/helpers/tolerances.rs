//! Tolerance constants for audio testing.
//!
//! Different operations require different precision levels.

/// Floating point rounding errors (for passthrough, summing constants).
/// Use for operations that should be mathematically exact.
pub const FLOAT_EPSILON: f32 = 1e-6;

/// Level tolerance after sample-rate conversion.
/// The windowed-sinc filter ripples slightly in the passband.
pub const RESAMPLE_EPSILON: f32 = 0.02;

/// Silence threshold (~-80dB).
/// Values below this are considered silent.
pub const SILENCE_THRESHOLD: f32 = 0.0001;
