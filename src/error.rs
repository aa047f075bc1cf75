//! Error types for dataset preparation and toolkit orchestration
//!
//! Every variant carries the path, command or exit code needed to locate the
//! failing unit without re-running the stage.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the preparation pipeline and the toolkit façade
#[derive(Debug, Error)]
pub enum PrepError {
    /// File-system operation failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Annotation JSON could not be parsed
    #[error("malformed annotation {path}: {source}")]
    MalformedAnnotation {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Image could not be decoded or encoded
    #[error("image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// An image has no matching annotation, or the reverse
    #[error("document {basename} is incomplete: {missing} does not exist")]
    MissingPair { basename: String, missing: PathBuf },

    /// Split ratio outside the open interval (0, 1)
    #[error("split ratio must be strictly between 0 and 1, got {0}")]
    InvalidRatio(f64),

    /// Validation split already holds files
    #[error("dataset already partitioned: {0} is not empty")]
    AlreadyPartitioned(PathBuf),

    /// A pair move failed half-way and could not be rolled back
    #[error("document {basename} straddles splits: {source}; rollback failed: {rollback}")]
    TornPair {
        basename: String,
        #[source]
        source: std::io::Error,
        rollback: std::io::Error,
    },

    /// Recognition index line without a tab separator
    #[error("{path}:{line}: expected `<image path>\\t<label>`")]
    MalformedIndexLine { path: PathBuf, line: usize },

    /// Training configuration YAML could not be read or written
    #[error("invalid training config {path}: {source}")]
    TrainingConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Required credential is not set in the environment
    #[error("{0} environment variable not set")]
    MissingCredential(&'static str),

    /// Configuration value is unusable
    #[error("configuration error: {0}")]
    Config(String),

    /// External process could not be started
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// External process exited unsuccessfully
    #[error("`{command}` failed with {}", describe_exit(*.code))]
    ProcessFailed { command: String, code: Option<i32> },

    /// External process exceeded its time budget and was killed
    #[error("`{command}` timed out after {secs}s")]
    ProcessTimeout { command: String, secs: u64 },

    /// Export finished but the inference marker is still missing
    #[error("export of {model_dir} finished without producing {marker}")]
    ExportIncomplete { model_dir: PathBuf, marker: &'static str },
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "termination by signal".to_string(),
    }
}

/// Result alias used across the crate
pub type PrepResult<T> = Result<T, PrepError>;

/// Attach a path to `std::io::Error` results
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> PrepResult<T>;
}

impl<T> IoResultExt<T> for Result<T, std::io::Error> {
    fn with_path(self, path: impl Into<PathBuf>) -> PrepResult<T> {
        self.map_err(|source| PrepError::Io {
            path: path.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_failed_message() {
        let err = PrepError::ProcessFailed {
            command: "python train.py".to_string(),
            code: Some(2),
        };
        assert_eq!(err.to_string(), "`python train.py` failed with exit code 2");

        let err = PrepError::ProcessFailed {
            command: "python train.py".to_string(),
            code: None,
        };
        assert!(err.to_string().ends_with("termination by signal"));
    }

    #[test]
    fn test_with_path_wraps_io_error() {
        let result: Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        let err = result.with_path("/tmp/missing.json").unwrap_err();
        assert!(matches!(err, PrepError::Io { .. }));
        assert!(err.to_string().contains("/tmp/missing.json"));
    }
}
