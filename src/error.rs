//! Error types for the brandmark-triage crate.

use std::path::PathBuf;

/// Stage-level failures.
///
/// Per-asset problems never surface here; they are counted in the stage's
/// outcome tally instead. An `Error` means a stage could not start or its
/// bookkeeping could not be written.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The URL list file does not exist.
    #[error("URL list not found: {}", .0.display())]
    MissingUrlFile(PathBuf),

    /// A directory a stage reads from does not exist.
    #[error("required directory missing: {}", .0.display())]
    MissingDirectory(PathBuf),

    /// A redaction threshold outside `[0, 1]` (or NaN) was supplied.
    #[error("threshold {0} is outside [0, 1]")]
    InvalidThreshold(f32),

    /// The run-state or tuning file could not be (de)serialized.
    #[error("malformed JSON: {0}")]
    StateFormat(#[from] serde_json::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// A worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let missing = Error::MissingUrlFile(PathBuf::from("input/qc.txt"));
        assert!(missing.to_string().contains("input/qc.txt"));

        let threshold = Error::InvalidThreshold(1.5);
        assert!(threshold.to_string().contains("1.5"));
    }
}
