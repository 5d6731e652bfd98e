use std::fmt;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unsupported audio source type '{0}'")]
    UnsupportedSource(String),

    #[error("Failed to load samples for {} track(s): {}", .failures.len(), FailureList(.failures))]
    SampleLoad { failures: Vec<LoadFailure> },

    #[error("Invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("Unknown or released node {0}")]
    StaleNode(String),

    #[error("Failed to encode WAV: {0}")]
    Encode(#[from] hound::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a single sample failed to load.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LoadError {
    #[error("Sample not found: {0}")]
    NotFound(String),
    #[error("Failed to read sample: {0}")]
    Io(String),
    #[error("Failed to decode sample: {0}")]
    Decode(String),
    #[error("Sample is empty: {0}")]
    Empty(String),
}

/// A failed load, tied back to the track that requested it.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFailure {
    pub track_id: String,
    pub uri: String,
    pub error: LoadError,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track '{}' ({}): {}", self.track_id, self.uri, self.error)
    }
}

struct FailureList<'a>(&'a [LoadFailure]);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl EngineError {
    /// Track ids named by a [`EngineError::SampleLoad`], empty otherwise.
    pub fn failed_tracks(&self) -> Vec<&str> {
        match self {
            EngineError::SampleLoad { failures } => {
                failures.iter().map(|f| f.track_id.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}
