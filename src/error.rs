use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FeedError {
    #[error("invalid page range: {0}")]
    InvalidPageRange(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("collection request for page {page} failed: {message}")]
    FetchHttp { page: u32, message: String },

    #[error("collection API returned status {status} for page {page}: {message}")]
    FetchStatus {
        page: u32,
        status: u16,
        message: String,
    },

    #[error("malformed collection response for page {page}: {message}")]
    FetchParse { page: u32, message: String },

    #[error("cache storage error: {0}")]
    StoreIo(String),

    #[error("cache snapshot is corrupt: {0}")]
    StoreCorrupt(String),

    #[error("no cached snapshot exists")]
    SnapshotMissing,

    #[error("cache generation changed (expected {expected}, found {actual})")]
    GenerationMismatch { expected: u64, actual: u64 },
}

impl FeedError {
    pub fn is_fetch(&self) -> bool {
        matches!(
            self,
            FeedError::FetchHttp { .. } | FeedError::FetchStatus { .. } | FeedError::FetchParse { .. }
        )
    }

    pub fn is_store(&self) -> bool {
        matches!(
            self,
            FeedError::StoreIo(_)
                | FeedError::StoreCorrupt(_)
                | FeedError::SnapshotMissing
                | FeedError::GenerationMismatch { .. }
        )
    }

    /// Page that failed, for fetch errors.
    pub fn page(&self) -> Option<u32> {
        match self {
            FeedError::FetchHttp { page, .. }
            | FeedError::FetchStatus { page, .. }
            | FeedError::FetchParse { page, .. } => Some(*page),
            _ => None,
        }
    }
}
