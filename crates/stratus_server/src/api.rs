use crate::rules::{HeaderRule, RedirectRule};
use crate::state::DevState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use stratus_fs::encode::{decode_path, encode_served_path};
use stratus_fs::{ReverseMapEntry, path_hash};
use tracing::{debug, error};
use url::Url;

pub struct ServeError(anyhow::Error);

impl<E> From<E> for ServeError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<std::io::Error>() {
            Some(e) if e.kind() == std::io::ErrorKind::NotFound => not_found(),
            _ => {
                error!("Failed to serve request: {:#}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal Server Error: {}", self.0),
                )
                    .into_response()
            }
        }
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// Every path: redirect rules first, then the dev manifest lookup.
pub async fn serve_asset(
    State(state): State<Arc<DevState>>,
    request: Request,
) -> Result<Response, ServeError> {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return Ok((StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET, HEAD")]).into_response());
    }

    let url = request_url(&request)?;
    let mut pathname = url.path().to_string();

    let redirect = state
        .redirects
        .matches(&url, |rule, replacements| rule.resolve(replacements))
        .into_iter()
        .next();
    if let Some(rule) = redirect {
        if !rule.is_rewrite() {
            return redirect_to(&rule);
        }
        debug!("Rewriting {pathname} to {}", rule.to);
        pathname = rewrite_path(&rule.to);
    }

    let Some(entry) = resolve(&state, &decode_path(&pathname)) else {
        return Ok(not_found());
    };
    let bytes = tokio::fs::read(&entry.file_path).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&entry.content_type)?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
    let rules = state
        .headers
        .matches(&url, |rule, replacements| rule.resolve(replacements));
    apply_header_rules(&mut headers, &rules);

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(bytes)
    };
    Ok((headers, body).into_response())
}

fn request_url(request: &Request) -> Result<Url, url::ParseError> {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(|a| a.as_str()))
        .unwrap_or("localhost");
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    Url::parse(&format!("http://{host}{path}"))
}

fn redirect_to(rule: &RedirectRule) -> Result<Response, ServeError> {
    let status = StatusCode::from_u16(rule.status)
        .ok()
        .filter(StatusCode::is_redirection)
        .unwrap_or(StatusCode::FOUND);
    debug!("Redirecting to {} ({status})", rule.to);
    Ok(Response::builder()
        .status(status)
        .header(header::LOCATION, rule.to.as_str())
        .body(Body::empty())?)
}

/// The path part of a rewrite target; query and fragment are dropped.
fn rewrite_path(to: &str) -> String {
    match Url::parse(to) {
        Ok(url) => url.path().to_string(),
        Err(_) => to.split(['?', '#']).next().unwrap_or(to).to_string(),
    }
}

fn candidates(path: &str) -> Vec<String> {
    let mut candidates = vec![path.to_string()];
    if path.ends_with('/') {
        candidates.push(format!("{path}index.html"));
    }
    candidates.push(format!("{path}.html"));
    candidates.push(format!("{}/index.html", path.trim_end_matches('/')));
    candidates
}

fn resolve<'a>(state: &'a DevState, path: &str) -> Option<&'a ReverseMapEntry> {
    candidates(path).iter().find_map(|candidate| {
        let served = encode_served_path(candidate);
        let content = state.manifest.lookup(&path_hash(&served))?;
        debug!("{served} -> {content}");
        state.reverse_map.resolve(&content)
    })
}

/// `set` replaces a header the first time a rule sets it and appends on
/// every later rule; `unset` removes it.
fn apply_header_rules(headers: &mut HeaderMap, rules: &[HeaderRule]) {
    let mut set_by_rules = HashSet::new();
    for rule in rules {
        for name in &rule.unset {
            if let Ok(name) = HeaderName::try_from(name.as_str()) {
                headers.remove(&name);
                set_by_rules.remove(&name);
            }
        }
        for (name, value) in &rule.set {
            let (Ok(header_name), Ok(header_value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) else {
                debug!("Skipping invalid header {name}: {value}");
                continue;
            };
            if set_by_rules.insert(header_name.clone()) {
                headers.insert(header_name, header_value);
            } else {
                headers.append(header_name, header_value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_order() {
        assert_eq!(
            candidates("/docs"),
            vec!["/docs", "/docs.html", "/docs/index.html"]
        );
        assert_eq!(
            candidates("/docs/"),
            vec!["/docs/", "/docs/index.html", "/docs/.html", "/docs/index.html"]
        );
    }

    #[test]
    fn rewrite_keeps_only_the_path() {
        assert_eq!(rewrite_path("/index.html?x=1"), "/index.html");
        assert_eq!(rewrite_path("https://other.dev/a/b#top"), "/a/b");
    }

    #[test]
    fn header_rules_replace_then_append() {
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("ALLOW"));
        headers.insert("server", HeaderValue::from_static("stratus"));
        let rules = vec![
            HeaderRule::default().set("X-Frame-Options", "DENY"),
            HeaderRule::default()
                .set("X-Frame-Options", "SAMEORIGIN")
                .unset("Server"),
        ];

        apply_header_rules(&mut headers, &rules);

        let values: Vec<_> = headers.get_all("x-frame-options").iter().collect();
        assert_eq!(values, vec!["DENY", "SAMEORIGIN"]);
        assert!(headers.get("server").is_none());
    }
}
