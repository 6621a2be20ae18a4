use thiserror::Error;

/// Failures surfaced by the enrollment and verification engine.
///
/// A probe that clears no threshold is not an error; see
/// [`crate::matcher::MatchOutcome::Unrecognized`].
#[derive(Debug, Error)]
pub enum FaceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no face detected in any submitted photo")]
    NoFaceDetected,

    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cosine distance is undefined for a zero-norm vector")]
    ZeroNorm,

    #[error("embedding contains a NaN or infinite component")]
    NonFinite,

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl FaceError {
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Self::StorageFailure(err.to_string())
    }

    /// Stable machine-readable name, used by the caller-facing outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NoFaceDetected => "no_face_detected",
            Self::IdentityNotFound(_) => "identity_not_found",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::ZeroNorm => "zero_norm",
            Self::NonFinite => "non_finite",
            Self::StorageFailure(_) => "storage_failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, FaceError>;
