use stratus_core::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Invalid token: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to obtain an upload token: {0}")]
    TokenSource(ApiError),

    #[error("Failed to check for missing assets after {attempts} attempts: {source}")]
    CheckMissing { attempts: u32, source: ApiError },

    #[error(
        "Upload of bucket {bucket} ({files} files) failed after {attempts} attempts: {source}. \
         Assets already uploaded have been saved, the next attempt resumes from there."
    )]
    BucketFailed {
        bucket: usize,
        files: usize,
        attempts: u32,
        source: ApiError,
    },

    #[error("Upload task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, UploadError>;
