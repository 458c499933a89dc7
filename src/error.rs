use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("index {index} out of range for buffer of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("topology mismatch: neutral mesh has {neutral} vertices, blendshape has {blendshape}")]
    TopologyMismatch { neutral: usize, blendshape: usize },

    #[error("feature set mismatch: {neutral} neutral features vs {current} current features")]
    FeatureSetMismatch { neutral: usize, current: usize },

    #[error("feature set mismatch: neutral and current features differ in AU/side at position {position}")]
    FeatureOrderMismatch { position: usize },

    #[error("invalid threshold range: max ({max}) must be greater than min ({min})")]
    InvalidThresholdRange { min: f32, max: f32 },

    #[error("mesh write-back failed: {0}")]
    WriteBackFailed(String),

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("failed to load mesh from {path}: {message}")]
    MeshLoad { path: PathBuf, message: String },

    #[error("missing input: {0}")]
    MissingInput(&'static str),
}

impl Error {
    /// True for the structural mismatch between neutral and current feature sets.
    pub fn is_feature_set_mismatch(&self) -> bool {
        matches!(
            self,
            Error::FeatureSetMismatch { .. } | Error::FeatureOrderMismatch { .. }
        )
    }

    /// True when a frame cannot be compared against the neutral baseline:
    /// its features do not line up, or it is too short for the landmark subset.
    pub fn is_unusable_frame(&self) -> bool {
        self.is_feature_set_mismatch() || matches!(self, Error::IndexOutOfRange { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
