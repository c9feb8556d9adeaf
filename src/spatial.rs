pub mod math;
pub mod raytracing;

/// Tolerance used when comparing floating point distances during raycasting.
pub const FLOAT_ERROR_TOLERANCE: f32 = 0.00001;
