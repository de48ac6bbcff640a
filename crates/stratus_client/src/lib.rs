//! # Stratus Client
//!
//! Bulk upload of an asset directory to the remote asset service.
//!
//! The [`Uploader`] hashes every file, asks the service which hashes it is
//! missing, packs those files into size-bounded buckets and uploads up to
//! [`BULK_UPLOAD_CONCURRENCY`](stratus_core::constants::BULK_UPLOAD_CONCURRENCY)
//! buckets at a time, retrying with backoff and refreshing the upload token
//! when it expires.
//!
//! ## Usage
//!
//! ```no_run
//! use stratus_client::{HttpAssetsApi, UploadOptions, Uploader};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let api = HttpAssetsApi::new("https://api.example.com/client/v4/accounts/abc");
//! let tokens = api.token_source("api-token");
//! let mapping = Uploader::new(api, tokens)
//!     .upload(UploadOptions::new("./public").ignore(["*.map"]))
//!     .await?;
//! println!("{} assets deployed", mapping.len());
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod error;
pub mod http;
pub mod token;
pub mod upload;

pub use bucket::{BucketLimits, UploadBucket, pack_buckets};
pub use error::{Result, TokenError, UploadError};
pub use http::HttpAssetsApi;
pub use token::{Lease, TokenBroker, TokenSource, is_jwt_expired};
pub use upload::{RetryPolicy, UploadOptions, Uploader};
