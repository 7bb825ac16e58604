use thiserror::Error;

use crate::spice::kernel_pool::PoolError;

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unable to resolve frame transform from {from} to {to} at ET {et}")]
    FrameResolution { from: String, to: String, et: f64 },

    #[error("Format error: {0}")]
    Format(String),

    #[error("Dimension mismatch for {name}: expected {expected} values, found {actual}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Error during the nom parsing: {0}")]
    NomParsing(String),

    #[error("Kernel pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Unable to perform file operation: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid time string: {0}")]
    InvalidTime(String),
}

impl PartialEq for CalibrationError {
    fn eq(&self, other: &Self) -> bool {
        use CalibrationError::*;
        match (self, other) {
            (Configuration(a), Configuration(b)) => a == b,
            (
                FrameResolution {
                    from: fa,
                    to: ta,
                    et: ea,
                },
                FrameResolution {
                    from: fb,
                    to: tb,
                    et: eb,
                },
            ) => fa == fb && ta == tb && ea == eb,
            (Format(a), Format(b)) => a == b,
            (
                DimensionMismatch {
                    name: na,
                    expected: xa,
                    actual: aa,
                },
                DimensionMismatch {
                    name: nb,
                    expected: xb,
                    actual: ab,
                },
            ) => na == nb && xa == xb && aa == ab,
            (NomParsing(a), NomParsing(b)) => a == b,
            (Pool(a), Pool(b)) => a == b,
            (InvalidTime(a), InvalidTime(b)) => a == b,

            // foreign errors only compare by variant
            (Io(_), Io(_)) => true,
            (Csv(_), Csv(_)) => true,
            (Json(_), Json(_)) => true,

            _ => false,
        }
    }
}
