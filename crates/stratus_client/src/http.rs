use crate::token::TokenSource;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stratus_core::prelude::*;
use tracing::debug;

/// [`AssetsApi`] over HTTP, speaking the `{success, errors, result}`
/// envelope of the asset service.
#[derive(Clone)]
pub struct HttpAssetsApi {
    base_url: String,
    client: Client,
}

#[derive(Serialize)]
struct HashesRequest<'a> {
    hashes: &'a [AssetHash],
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<EnvelopeError>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct EnvelopeError {
    code: Option<u32>,
    message: String,
}

#[derive(Deserialize)]
struct UploadToken {
    jwt: String,
}

impl HttpAssetsApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        token: &str,
    ) -> Result<Option<T>, ApiError> {
        let response = builder
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .map_err(|e| ApiError::new(format!("Network error: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::new(format!("Network error: {e}")))?;
        decode(status, &body)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
        body: &B,
    ) -> Result<Option<T>, ApiError> {
        debug!("POST /{path}");
        self.send(self.client.post(self.url(path)).json(body), token)
            .await
    }

    /// Exchanges an account API token for a short-lived upload JWT.
    pub async fn fetch_upload_token(&self, api_token: &str) -> Result<String, ApiError> {
        debug!("GET /pages/upload-token");
        let token: Option<UploadToken> = self
            .send(self.client.get(self.url("pages/upload-token")), api_token)
            .await?;
        Ok(required(token)?.jwt)
    }

    /// A [`TokenSource`] that fetches a fresh upload JWT on every refresh.
    pub fn token_source(&self, api_token: impl Into<String>) -> TokenSource {
        let api = self.clone();
        let api_token = api_token.into();
        TokenSource::refresh(move || {
            let api = api.clone();
            let api_token = api_token.clone();
            async move { api.fetch_upload_token(&api_token).await }
        })
    }
}

fn required<T>(result: Option<T>) -> Result<T, ApiError> {
    result.ok_or_else(|| ApiError::new("Response has no result"))
}

/// Unwraps the response envelope. `Ok(None)` is a successful call without a
/// result body.
fn decode<T: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<Option<T>, ApiError> {
    let envelope: Envelope<T> = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) if status.is_success() => {
            return Err(ApiError::new(format!("Invalid response: {e}")));
        }
        Err(_) => {
            let text = String::from_utf8_lossy(body);
            return Err(ApiError::new(format!("Server returned {status}: {text}")));
        }
    };

    if !envelope.success || !status.is_success() {
        return Err(match envelope.errors.into_iter().next() {
            Some(EnvelopeError {
                code: Some(code),
                message,
            }) => ApiError::with_code(code, message),
            Some(EnvelopeError {
                code: None,
                message,
            }) => ApiError::new(message),
            None => ApiError::new(format!("Server returned {status}")),
        });
    }

    Ok(envelope.result)
}

impl AssetsApi for HttpAssetsApi {
    async fn check_missing(
        &self,
        token: &str,
        hashes: &[AssetHash],
    ) -> Result<Vec<AssetHash>, ApiError> {
        let missing = self
            .post("pages/assets/check-missing", token, &HashesRequest { hashes })
            .await?;
        required(missing)
    }

    async fn upload_payload(&self, token: &str, files: Vec<PayloadFile>) -> Result<(), ApiError> {
        let _: Option<serde_json::Value> = self.post("pages/assets/upload", token, &files).await?;
        Ok(())
    }

    async fn upsert_hashes(&self, token: &str, hashes: &[AssetHash]) -> Result<(), ApiError> {
        let _: Option<serde_json::Value> = self
            .post("pages/assets/upsert-hashes", token, &HashesRequest { hashes })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_result() {
        let body = br#"{"success":true,"errors":[],"result":["2cf24dba5fb0a30e26e83b2ac5b9e29e"]}"#;
        let hashes: Vec<AssetHash> = decode(StatusCode::OK, body).unwrap().unwrap();
        assert_eq!(hashes[0].to_hex(), "2cf24dba5fb0a30e26e83b2ac5b9e29e");
    }

    #[test]
    fn keeps_error_code() {
        let body = br#"{"success":false,"errors":[{"code":8000013,"message":"expired"}],"result":null}"#;
        let err = decode::<serde_json::Value>(StatusCode::UNAUTHORIZED, body).unwrap_err();
        assert!(err.is_auth_expired());
        assert_eq!(err.message, "expired");
    }

    #[test]
    fn non_json_error_body() {
        let err = decode::<serde_json::Value>(StatusCode::BAD_GATEWAY, b"<html>").unwrap_err();
        assert_eq!(err.code, None);
        assert!(err.message.contains("502"));
    }

    #[test]
    fn null_result_is_success_without_body() {
        let body = br#"{"success":true,"errors":[],"result":null}"#;
        assert!(decode::<Vec<AssetHash>>(StatusCode::OK, body).unwrap().is_none());
        assert!(required::<Vec<AssetHash>>(None).is_err());
    }

    #[test]
    fn request_body_shape() {
        let hashes = [AssetHash::from_bytes([0xab; 16])];
        let json = serde_json::to_value(HashesRequest { hashes: &hashes }).unwrap();
        assert_eq!(json["hashes"][0], "abababababababababababababababab");
    }
}
