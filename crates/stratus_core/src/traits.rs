use crate::error::ApiError;
use crate::hash::AssetHash;
use serde::Serialize;

/// The remote asset service, as seen by the upload pipeline.
///
/// Wire formats are up to the implementation; the pipeline only relies on
/// [`ApiError::is_auth_expired`] to decide when to refresh its token.
pub trait AssetsApi: Send + Sync + 'static + Clone {
    /// Returns the subset of `hashes` the service does not store yet.
    fn check_missing(
        &self,
        token: &str,
        hashes: &[AssetHash],
    ) -> impl Future<Output = Result<Vec<AssetHash>, ApiError>> + Send;

    fn upload_payload(
        &self,
        token: &str,
        files: Vec<PayloadFile>,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Marks `hashes` as belonging to the current deployment so the next
    /// `check_missing` can skip them.
    fn upsert_hashes(
        &self,
        token: &str,
        hashes: &[AssetHash],
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// One file of an upload payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadFile {
    pub key: AssetHash,
    /// Base64 of the file bytes.
    pub value: String,
    pub metadata: PayloadMetadata,
    pub base64: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    pub content_type: String,
}
