use crate::constants::AUTH_EXPIRED_CODE;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ignore pattern: {0}")]
    IgnorePattern(String),

    #[error(
        "Maximum number of assets exceeded: up to {limit} assets are supported, but found {count} files in \"{}\"",
        directory.display()
    )]
    TooManyAssets {
        directory: PathBuf,
        limit: usize,
        count: usize,
    },

    #[error(
        "Asset too large: {} is {size} bytes, but assets may be at most {limit} bytes",
        path.display()
    )]
    AssetTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Hashing task failed: {0}")]
    Task(String),
}

/// Failure reported by one of the remote asset service calls.
///
/// `code` carries the service's numeric error code when the failure came from
/// the service itself, `None` for transport failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: Option<u32>,
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "API error {code}: {}", self.message),
            None => write!(f, "API error: {}", self.message),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: u32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        self.code == Some(AUTH_EXPIRED_CODE)
    }
}
