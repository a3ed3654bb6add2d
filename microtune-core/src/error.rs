//! Error types for the tuner core.
//!
//! Only configuration-time problems are errors. Everything on the per-frame
//! estimation path degrades to low-confidence output instead.

use thiserror::Error;

/// Errors surfaced to the caller when configuring the tuner.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TunerError {
    /// The tuning table has no entries.
    #[error("Tuning table is empty")]
    EmptyTuningTable,

    /// A degree appears more than once in the tuning table.
    #[error("Duplicate scale degree {0} in tuning table")]
    DuplicateDegree(i32),

    /// A cents value is outside 0..=12000 or not finite.
    #[error("Degree {degree} has invalid cents value {cents} (expected 0..=12000)")]
    CentsOutOfRange { degree: i32, cents: f32 },

    /// The reference frequency is not a positive, finite number.
    #[error("Invalid pitch standard: {0} Hz")]
    DegenerateStandard(f32),

    /// The pitch standard refers to a degree the table does not define.
    #[error("Pitch standard degree {0} is not in the tuning table")]
    UnknownDegree(i32),

    /// A configuration value is inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for tuner configuration operations.
pub type TunerResult<T> = Result<T, TunerError>;
