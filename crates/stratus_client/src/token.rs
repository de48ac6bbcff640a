use crate::error::TokenError;
use base64::Engine;
use base64::alphabet::URL_SAFE;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::sync::Arc;
use stratus_core::prelude::*;
use tokio::sync::Mutex;
use tracing::debug;

/// JWT segments are base64url; tolerate both padded and unpadded input.
const JWT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<String, ApiError>> + Send + Sync>;

/// Where upload tokens come from.
#[derive(Clone)]
pub enum TokenSource {
    /// A token supplied up front. "Refreshing" hands back the same token.
    Fixed(String),
    Refresh(RefreshFn),
}

impl TokenSource {
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::Fixed(token.into())
    }

    pub fn refresh<F, Fut>(fetch: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ApiError>> + Send + 'static,
    {
        Self::Refresh(Arc::new(move || Box::pin(fetch())))
    }

    pub async fn fetch(&self) -> Result<String, ApiError> {
        match self {
            Self::Fixed(token) => Ok(token.clone()),
            Self::Refresh(fetch) => fetch().await,
        }
    }
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(_) => f.write_str("TokenSource::Fixed(..)"),
            Self::Refresh(_) => f.write_str("TokenSource::Refresh(..)"),
        }
    }
}

/// A token together with the generation it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub token: String,
    generation: u64,
}

struct TokenState {
    token: String,
    generation: u64,
}

/// Shares one upload token between concurrent bucket uploads.
///
/// Any task may ask for a refresh, but only the first request per generation
/// reaches the [`TokenSource`]; tasks that saw the same stale token get the
/// refreshed one.
pub struct TokenBroker {
    source: TokenSource,
    state: Mutex<TokenState>,
}

impl TokenBroker {
    pub async fn new(source: TokenSource) -> Result<Self, ApiError> {
        let token = source.fetch().await?;
        Ok(Self {
            source,
            state: Mutex::new(TokenState {
                token,
                generation: 0,
            }),
        })
    }

    pub async fn current(&self) -> Lease {
        let state = self.state.lock().await;
        Lease {
            token: state.token.clone(),
            generation: state.generation,
        }
    }

    /// Replaces the token `stale` was read from, unless another task already
    /// did.
    pub async fn refresh(&self, stale: &Lease) -> Result<Lease, ApiError> {
        let mut state = self.state.lock().await;
        if state.generation == stale.generation {
            debug!("Refreshing upload token (generation {})", state.generation);
            state.token = self.source.fetch().await?;
            state.generation += 1;
        }
        Ok(Lease {
            token: state.token.clone(),
            generation: state.generation,
        })
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<f64>,
}

/// Decodes the claims segment of a JWT and compares `exp` to the current
/// time. Tokens without `exp` never expire. A token that cannot be decoded is
/// an error, never treated as valid or expired.
pub fn is_jwt_expired(token: &str) -> Result<bool, TokenError> {
    let segment = token
        .split('.')
        .nth(1)
        .ok_or_else(|| TokenError::Malformed("missing claims segment".into()))?;
    let bytes = JWT_ENGINE
        .decode(segment)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    let claims: Claims =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::Malformed(e.to_string()))?;

    let now = chrono::Utc::now().timestamp() as f64;
    Ok(claims.exp.is_some_and(|exp| exp <= now))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn jwt_expiring_at(exp: i64) -> String {
        let claims = URL_SAFE_NO_PAD.encode(format!("{{\"sub\":\"deploy\",\"exp\":{exp}}}"));
        format!("eyJhbGciOiJIUzI1NiJ9.{claims}.signature")
    }

    pub(crate) fn fresh_jwt() -> String {
        jwt_expiring_at(chrono::Utc::now().timestamp() + 3600)
    }

    #[test]
    fn detects_expired_and_fresh_tokens() {
        assert!(is_jwt_expired(&jwt_expiring_at(1_000)).unwrap());
        assert!(!is_jwt_expired(&fresh_jwt()).unwrap());
    }

    #[test]
    fn accepts_padded_claims() {
        let claims = base64::engine::general_purpose::URL_SAFE.encode("{\"exp\":10}");
        assert!(is_jwt_expired(&format!("h.{claims}.s")).unwrap());
    }

    #[test]
    fn malformed_tokens_are_errors() {
        for token in ["no-dots", "a.!!!.c", "a.bm90IGpzb24.c"] {
            assert!(
                matches!(is_jwt_expired(token), Err(TokenError::Malformed(_))),
                "{token}"
            );
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_of_one_generation_fetch_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let source = TokenSource::refresh(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                Ok(format!("token-{n}"))
            }
        });

        let broker = Arc::new(TokenBroker::new(source).await.unwrap());
        let stale = broker.current().await;
        assert_eq!(stale.token, "token-0");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let broker = broker.clone();
                let stale = stale.clone();
                tokio::spawn(async move { broker.refresh(&stale).await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().token, "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fixed_source_refreshes_to_itself() {
        let broker = TokenBroker::new(TokenSource::fixed("abc")).await.unwrap();
        let lease = broker.current().await;
        let refreshed = broker.refresh(&lease).await.unwrap();
        assert_eq!(refreshed.token, "abc");
    }
}
