use crate::bucket::{BucketLimits, UploadBucket, pack_buckets};
use crate::error::{Result, UploadError};
use crate::token::{TokenBroker, TokenSource, is_jwt_expired};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stratus_core::prelude::*;
use stratus_fs::FileCollector;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;
pub type CompleteFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct UploadOptions {
    pub directory: PathBuf,
    /// Extra ignore globs, applied on top of the default ignore list.
    pub ignore: Vec<String>,
    /// Upload everything, without asking the service what it already has.
    pub skip_caching: bool,
    pub on_progress: Option<ProgressFn>,
    pub on_upload_complete: Option<CompleteFn>,
}

impl UploadOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Default::default()
        }
    }

    pub fn ignore<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn skip_caching(mut self, skip: bool) -> Self {
        self.skip_caching = skip;
        self
    }

    pub fn on_progress(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_upload_complete(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_upload_complete = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOptions")
            .field("directory", &self.directory)
            .field("ignore", &self.ignore)
            .field("skip_caching", &self.skip_caching)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry; doubles with every further failure.
    pub base_delay: Duration,
    pub max_upload_attempts: u32,
    pub max_check_missing_attempts: u32,
    /// Delay before the single upsert retry.
    pub upsert_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_upload_attempts: MAX_UPLOAD_ATTEMPTS,
            max_check_missing_attempts: MAX_CHECK_MISSING_ATTEMPTS,
            upsert_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th failed call: 1x, 2x, 4x ... `base_delay`.
    pub fn backoff(&self, failures: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(failures.saturating_sub(1))
    }
}

enum Failure {
    Exhausted { attempts: u32, source: ApiError },
    Fatal(UploadError),
}

impl Failure {
    fn into_error(self, exhausted: impl FnOnce(u32, ApiError) -> UploadError) -> UploadError {
        match self {
            Self::Exhausted { attempts, source } => exhausted(attempts, source),
            Self::Fatal(e) => e,
        }
    }
}

/// Calls `op` with the current token until it succeeds or `max_attempts`
/// calls have failed. Between attempts the token is refreshed if the service
/// reported it expired or its own `exp` claim has passed.
async fn retrying<T, F, Fut>(
    broker: &TokenBroker,
    max_attempts: u32,
    delay: impl Fn(u32) -> Duration,
    mut op: F,
) -> std::result::Result<T, Failure>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = std::result::Result<T, ApiError>>,
{
    let mut lease = broker.current().await;
    let mut attempt = 1;
    loop {
        let error = match op(lease.token.clone()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if attempt >= max_attempts {
            return Err(Failure::Exhausted {
                attempts: attempt,
                source: error,
            });
        }

        debug!("Attempt {attempt} failed: {error}, retrying");
        tokio::time::sleep(delay(attempt)).await;

        let expired = is_jwt_expired(&lease.token)
            .map_err(|e| Failure::Fatal(UploadError::Token(e)))?;
        if error.is_auth_expired() || expired {
            lease = broker
                .refresh(&lease)
                .await
                .map_err(|e| Failure::Fatal(UploadError::TokenSource(e)))?;
        }
        attempt += 1;
    }
}

/// Deploys a directory of assets to the remote asset service.
///
/// Only files the service reports as missing are sent; a re-run after a
/// failed deployment therefore resumes where the previous one stopped.
pub struct Uploader<A: AssetsApi, H: HashProvider = Blake3Hasher> {
    api: A,
    tokens: TokenSource,
    hasher: H,
    retry: RetryPolicy,
    buckets: BucketLimits,
}

impl<A: AssetsApi> Uploader<A> {
    pub fn new(api: A, tokens: TokenSource) -> Self {
        Self {
            api,
            tokens,
            hasher: Blake3Hasher,
            retry: RetryPolicy::default(),
            buckets: BucketLimits::default(),
        }
    }
}

impl<A: AssetsApi, H: HashProvider> Uploader<A, H> {
    pub fn hasher<H2: HashProvider>(self, hasher: H2) -> Uploader<A, H2> {
        Uploader {
            api: self.api,
            tokens: self.tokens,
            hasher,
            retry: self.retry,
            buckets: self.buckets,
        }
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn bucket_limits(mut self, limits: BucketLimits) -> Self {
        self.buckets = limits;
        self
    }

    /// Uploads `options.directory` and returns the served path to content
    /// hash mapping of every file in it.
    ///
    /// Either every missing file was stored or an error is returned; buckets
    /// that finished before another one failed stay stored remotely.
    #[instrument(skip_all, fields(dir = %options.directory.display()))]
    pub async fn upload(&self, options: UploadOptions) -> Result<HashMap<String, AssetHash>> {
        let files = FileCollector::new(self.hasher.clone())
            .ignore(&options.ignore)?
            .collect(&options.directory)
            .await?;
        let total = files.len();
        info!("Hashed {total} files");

        let broker = Arc::new(
            TokenBroker::new(self.tokens.clone())
                .await
                .map_err(UploadError::TokenSource)?,
        );

        let hashes: Vec<AssetHash> = files
            .values()
            .map(|f| f.hash)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let missing: HashSet<AssetHash> = if options.skip_caching {
            hashes.iter().copied().collect()
        } else {
            self.check_missing(&broker, &hashes).await?.into_iter().collect()
        };

        let mut seen = HashSet::new();
        let to_upload: Vec<FileEntry> = files
            .values()
            .filter(|f| missing.contains(&f.hash) && seen.insert(f.hash))
            .cloned()
            .collect();

        let done = Arc::new(AtomicUsize::new(total - to_upload.len()));
        if let Some(progress) = &options.on_progress {
            progress(done.load(Ordering::SeqCst), total);
        }

        let buckets = pack_buckets(to_upload, self.buckets);
        info!(
            "Uploading {} files in {} buckets",
            buckets.iter().map(|b| b.files.len()).sum::<usize>(),
            buckets.len()
        );

        let permits = Arc::new(Semaphore::new(BULK_UPLOAD_CONCURRENCY));
        let mut queue = JoinSet::new();
        for (index, bucket) in buckets.into_iter().enumerate() {
            let api = self.api.clone();
            let broker = broker.clone();
            let permits = permits.clone();
            let done = done.clone();
            let progress = options.on_progress.clone();
            let retry = self.retry;
            queue.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| UploadError::Task(e.to_string()))?;
                let count = upload_bucket(api, &broker, retry, index, bucket).await?;
                let now = done.fetch_add(count, Ordering::SeqCst) + count;
                if let Some(progress) = progress {
                    progress(now, total);
                }
                Ok::<_, UploadError>(())
            });
        }

        let mut first_error = None;
        while let Some(joined) = queue.join_next().await {
            let result = joined.map_err(|e| UploadError::Task(e.to_string()));
            if let Err(e) | Ok(Err(e)) = result {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        if let Some(complete) = &options.on_upload_complete {
            complete();
        }

        self.upsert(&broker, &hashes).await;

        Ok(files
            .values()
            .map(|f| (f.served_path(), f.hash))
            .collect())
    }

    async fn check_missing(
        &self,
        broker: &TokenBroker,
        hashes: &[AssetHash],
    ) -> Result<Vec<AssetHash>> {
        let retry = self.retry;
        let missing = retrying(
            broker,
            retry.max_check_missing_attempts,
            |n| retry.backoff(n),
            |token| {
                let api = self.api.clone();
                async move { api.check_missing(&token, hashes).await }
            },
        )
        .await
        .map_err(|f| {
            f.into_error(|attempts, source| UploadError::CheckMissing { attempts, source })
        })?;
        debug!("{} of {} hashes missing", missing.len(), hashes.len());
        Ok(missing)
    }

    async fn upsert(&self, broker: &TokenBroker, hashes: &[AssetHash]) {
        let retry = self.retry;
        let result = retrying(
            broker,
            2,
            |_| retry.upsert_delay,
            |token| {
                let api = self.api.clone();
                async move { api.upsert_hashes(&token, hashes).await }
            },
        )
        .await;

        match result {
            Ok(()) => debug!("Upserted {} hashes", hashes.len()),
            Err(Failure::Exhausted { source, .. }) => warn!(
                "Failed to update asset hashes: {source}. The deployment succeeded, \
                 but the next one may upload files again."
            ),
            Err(Failure::Fatal(e)) => warn!("Failed to update asset hashes: {e}"),
        }
    }
}

#[instrument(skip_all, fields(bucket = index, files = bucket.files.len()))]
async fn upload_bucket<A: AssetsApi>(
    api: A,
    broker: &TokenBroker,
    retry: RetryPolicy,
    index: usize,
    bucket: UploadBucket,
) -> Result<usize> {
    let payload = try_join_all(bucket.files.iter().map(|file| async move {
        let bytes = tokio::fs::read(&file.absolute_path).await?;
        Ok::<_, std::io::Error>(PayloadFile {
            key: file.hash,
            value: STANDARD.encode(bytes),
            metadata: PayloadMetadata {
                content_type: file.content_type.clone(),
            },
            base64: true,
        })
    }))
    .await?;

    retrying(
        broker,
        retry.max_upload_attempts,
        |n| retry.backoff(n),
        |token| {
            let api = api.clone();
            let payload = payload.clone();
            async move { api.upload_payload(&token, payload).await }
        },
    )
    .await
    .map_err(|f| {
        f.into_error(|attempts, source| UploadError::BucketFailed {
            bucket: index,
            files: bucket.files.len(),
            attempts,
            source,
        })
    })?;

    debug!("Bucket uploaded");
    Ok(bucket.files.len())
}
