#![forbid(unsafe_code)]

//! Error types shared by the walker, the orchestrator and the tool wrappers.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-level failures. Only `ServiceInit` is meant to end the process;
/// `FetchFailed` ends the current walk and is kept in the run report.
#[derive(Error, Debug)]
pub enum Error {
    #[error("metadata service could not be initialized: {0}")]
    ServiceInit(String),

    #[error("fetching {what} failed: {message}")]
    FetchFailed { what: String, message: String },

    #[error("creating {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a single video did not reach its final stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("metadata fetch failed: {0}")]
    FetchFailed(String),

    #[error("video status unavailable (deleted or blocked)")]
    Unavailable,

    #[error("video is private")]
    PrivateVideo,

    #[error("extraction failed: {message}")]
    ExtractionFailed { message: String, stderr: String },

    #[error("no extracted file named {stem:?}.* in {}", dir.display())]
    FileNotFound { dir: PathBuf, stem: String },

    #[error("tagging failed: {message}")]
    TaggingFailed { message: String, stderr: String },

    #[error("could not remove pre-tag copy {}: {message}", path.display())]
    CleanupFailed { path: PathBuf, message: String },
}

impl ErrorKind {
    /// Stderr captured from the external process, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ExtractionFailed { stderr, .. } | Self::TaggingFailed { stderr, .. }
                if !stderr.is_empty() =>
            {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }
}

/// Failure of one external process invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ToolFailure {
    pub message: String,
    pub stderr: String,
}

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stderr: String::new(),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_only_for_process_failures() {
        let extraction = ErrorKind::ExtractionFailed {
            message: "exit status 1".into(),
            stderr: "ERROR: Video unavailable".into(),
        };
        assert_eq!(extraction.stderr(), Some("ERROR: Video unavailable"));
        assert_eq!(ErrorKind::PrivateVideo.stderr(), None);

        let quiet = ErrorKind::TaggingFailed {
            message: "exit status 1".into(),
            stderr: String::new(),
        };
        assert_eq!(quiet.stderr(), None);
    }

    #[test]
    fn file_not_found_mentions_stem_and_dir() {
        let err = ErrorKind::FileNotFound {
            dir: PathBuf::from("/tmp/songs"),
            stem: "Daft Punk - One More Time".into(),
        };
        let text = err.to_string();
        assert!(text.contains("\"Daft Punk - One More Time\".*"));
        assert!(text.contains("/tmp/songs"));
    }
}
