//! # Constants and type definitions for planetcal
//!
//! This module centralizes the **numeric defaults**, **sentinel pixel values**, and **common type
//! aliases** shared by the kernel-management and calibration halves of the crate.
//!
//! ## Overview
//!
//! - Padding and interpolation defaults used when building kernel segments
//! - The fixed, ordered list of label keywords that reference kernel files
//! - Special pixel sentinels (8-byte flavour) and their validity threshold
//! - Default solver tolerances for the drift fit
//!
//! # See also
//! ------------
//! * [`crate::spice::kernel_catalog`] – consumer of [`KERNEL_KEYWORDS`].
//! * [`crate::calibration::filters`] – consumer of the special pixel values.

// -------------------------------------------------------------------------------------------------
// Kernel segments
// -------------------------------------------------------------------------------------------------

/// Default time offset (seconds) of the padding records added at each end of a segment.
pub const DEFAULT_PAD_EPSILON: f64 = 3.0e-3;

/// Default maximum Lagrange/Hermite interpolation degree for SPK segments.
pub const DEFAULT_SPK_DEGREE: usize = 7;

/// Kernel types furnished while a segment is being built.
pub const SEGMENT_KERNEL_TYPES: &str = "CK,FK,SCLK,LSK,IAK";

/// Ordered label keywords (inside the `Kernels` group) that may reference kernel files.
pub const KERNEL_KEYWORDS: [&str; 11] = [
    "InstrumentPosition",
    "Frame",
    "InstrumentPointing",
    "TargetPosition",
    "TargetAttitudeShape",
    "Instrument",
    "InstrumentAddendum",
    "LeapSecond",
    "SpacecraftClock",
    "ShapeModel",
    "Extras",
];

/// Inline keyword value meaning "the list lives in an attached table".
pub const TABLE_SENTINEL: &str = "TABLE";

/// Frame id of J2000, the frame every cached position table is recorded in.
pub const J2000_FRAME_ID: i32 = 1;

// -------------------------------------------------------------------------------------------------
// Special pixels
// -------------------------------------------------------------------------------------------------

/// Null pixel.
pub const NULL8: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFB);
/// Low representation saturation.
pub const LOW_REPR_SAT8: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFC);
/// Low instrument saturation.
pub const LOW_INSTR_SAT8: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFD);
/// High instrument saturation.
pub const HIGH_INSTR_SAT8: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFE);
/// High representation saturation.
pub const HIGH_REPR_SAT8: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFF);
/// Every value strictly below this threshold is a special pixel.
pub const VALID_MIN8: f64 = f64::from_bits(0xFFEF_FFFF_FFFF_FFFA);

// -------------------------------------------------------------------------------------------------
// Drift fit
// -------------------------------------------------------------------------------------------------

/// Default absolute convergence tolerance on parameter steps.
pub const DEFAULT_ABS_ERROR: f64 = 1.0e-4;
/// Default relative convergence tolerance on parameter steps.
pub const DEFAULT_REL_ERROR: f64 = 1.0e-4;
/// Default iteration cap for the Levenberg-Marquardt driver.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Number of parameters of the exponential drift model `a0 + a1·t + a2·exp(a3·t)`.
pub const DRIFT_PARAMETERS: usize = 4;
