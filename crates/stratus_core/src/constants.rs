//! Limits and layout constants shared with the remote asset service and the
//! dev-mode request handler. Changing any of these breaks interop.

/// Maximum number of files in one deployment.
pub const MAX_ASSET_COUNT: usize = 20_000;

/// Maximum size of a single file, 25 MiB.
pub const MAX_ASSET_SIZE: u64 = 25 * 1024 * 1024;

/// Upper bound on the summed file size of one upload bucket, 40 MiB.
pub const MAX_BUCKET_SIZE: u64 = 40 * 1024 * 1024;

/// Upper bound on the number of files in one upload bucket.
pub const MAX_BUCKET_FILE_COUNT: usize = 2_000;

/// Number of buckets uploaded in parallel.
pub const BULK_UPLOAD_CONCURRENCY: usize = 3;

pub const MAX_UPLOAD_ATTEMPTS: u32 = 5;
pub const MAX_CHECK_MISSING_ATTEMPTS: u32 = 5;

/// Error code the asset service returns when the upload JWT has expired.
pub const AUTH_EXPIRED_CODE: u32 = 8_000_013;

/// Stored hashes are digests truncated to 128 bits.
pub const HASH_SIZE: usize = 16;

// Dev manifest binary layout.
pub const HEADER_SIZE: usize = 20;
pub const PATH_HASH_SIZE: usize = HASH_SIZE;
pub const CONTENT_HASH_SIZE: usize = HASH_SIZE;
pub const TAIL_SIZE: usize = 8;
pub const PATH_HASH_OFFSET: usize = 0;
pub const CONTENT_HASH_OFFSET: usize = PATH_HASH_SIZE;
pub const ENTRY_SIZE: usize = PATH_HASH_SIZE + CONTENT_HASH_SIZE + TAIL_SIZE;

/// Value of header byte 0 for a manifest produced in local dev mode.
pub const DEV_MODE_FLAG: u8 = 1;
