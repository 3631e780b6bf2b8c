//! Error types for the argdoc training pipeline.

use thiserror::Error;

/// Main error type for pipeline and training operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TrainError {
    /// Requested embedding dimension has no backing pretrained file.
    #[error("no pretrained embedding file for dimension {dim} (looked for '{path}')")]
    MissingEmbeddingFile { dim: usize, path: String },

    /// A character outside the fixed name alphabet was seen during encoding.
    #[error("character {ch:?} is outside the name alphabet")]
    VocabularyKey { ch: char },

    /// Decode received an index with no reverse mapping. Programmer error.
    #[error("index {index} has no vocabulary entry (vocabulary size {len})")]
    IndexLookup { index: u32, len: usize },

    /// I/O failures with path context.
    #[error("IO error at '{path}': {message}")]
    Io { message: String, path: String },

    /// Checkpoint save/load/backup failures.
    #[error("checkpoint error at '{path}': {message}")]
    Checkpoint { message: String, path: String },

    /// Configuration validation failures.
    #[error("configuration error: {0}")]
    Config(String),

    /// Record or embedding-file parse failures.
    #[error("data loading error: {0}")]
    DataLoading(String),

    /// Failures inside the model collaborator. Fatal, never retried.
    #[error("model error: {0}")]
    Model(String),

    /// Tensor construction or conversion failures.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Cooperative cancellation observed at a step boundary. The final
    /// checkpoint has already been written when this is returned.
    #[error("training interrupted at step {step}")]
    Interrupted { step: usize },
}

/// Result alias used throughout the crate.
pub type TrainResult<T> = std::result::Result<T, TrainError>;

impl From<std::io::Error> for TrainError {
    fn from(err: std::io::Error) -> Self {
        TrainError::Io {
            message: err.to_string(),
            path: String::new(),
        }
    }
}

/// Adds path context to I/O results.
pub trait IoResultExt<T> {
    fn with_path<P: AsRef<std::path::Path>>(self, path: P) -> TrainResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path<P: AsRef<std::path::Path>>(self, path: P) -> TrainResult<T> {
        self.map_err(|e| TrainError::Io {
            message: e.to_string(),
            path: path.as_ref().display().to_string(),
        })
    }
}

pub fn checkpoint_error<P: AsRef<std::path::Path>>(
    message: impl Into<String>,
    path: P,
) -> TrainError {
    TrainError::Checkpoint {
        message: message.into(),
        path: path.as_ref().display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_with_path() {
        let result: std::io::Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "file not found",
        ));
        let train_result: TrainResult<()> = result.with_path("/tmp/missing.txt");
        match train_result {
            Err(TrainError::Io { path, .. }) => assert_eq!(path, "/tmp/missing.txt"),
            _ => panic!("expected IO error with path"),
        }
    }

    #[test]
    fn test_display_messages() {
        let err = TrainError::MissingEmbeddingFile {
            dim: 42,
            path: "glove.6B.42d.txt".to_string(),
        };
        assert!(err.to_string().contains("dimension 42"));

        let err = TrainError::VocabularyKey { ch: '£' };
        assert!(err.to_string().contains("outside the name alphabet"));

        let err = TrainError::IndexLookup { index: 900, len: 71 };
        assert!(err.to_string().contains("900"));
    }
}
