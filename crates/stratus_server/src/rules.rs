use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use stratus_rules::{Replacements, replacer};
use tracing::debug;
use url::Url;

/// Redirect rules read from the asset directory.
pub const REDIRECTS_FILE: &str = "_redirects";
/// Header rules read from the asset directory.
pub const HEADERS_FILE: &str = "_headers";

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Where a redirect rule sends matching requests.
///
/// A `status` of 200 rewrites the request path instead of redirecting.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RedirectRule {
    pub to: String,
    #[serde(default = "default_status")]
    pub status: u16,
}

fn default_status() -> u16 {
    302
}

impl RedirectRule {
    pub fn new(to: impl Into<String>, status: u16) -> Self {
        Self {
            to: to.into(),
            status,
        }
    }

    pub fn is_rewrite(&self) -> bool {
        self.status == 200
    }

    pub(crate) fn resolve(&self, replacements: &Replacements) -> Self {
        Self {
            to: replacer(&self.to, replacements),
            status: self.status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HeaderRule {
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    #[serde(default)]
    pub unset: Vec<String>,
}

impl HeaderRule {
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set.insert(name.into(), value.into());
        self
    }

    pub fn unset(mut self, name: impl Into<String>) -> Self {
        self.unset.push(name.into());
        self
    }

    pub(crate) fn resolve(&self, replacements: &Replacements) -> Self {
        Self {
            set: self
                .set
                .iter()
                .map(|(name, value)| (name.clone(), replacer(value, replacements)))
                .collect(),
            unset: self.unset.clone(),
        }
    }
}

/// Redirect and header rules as loaded from a JSON rules file:
///
/// ```json
/// {
///   "redirects": { "/old/*": { "to": "/new/:splat", "status": 301 } },
///   "headers": { "/*": { "set": { "X-Frame-Options": "DENY" } } }
/// }
/// ```
///
/// Rules keep the order they are written in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesConfig {
    pub redirects: Vec<(String, RedirectRule)>,
    pub headers: Vec<(String, HeaderRule)>,
}

#[derive(Deserialize)]
struct RawRules {
    #[serde(default)]
    redirects: Map<String, Value>,
    #[serde(default)]
    headers: Map<String, Value>,
}

impl RulesConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: RawRules = serde_json::from_str(json)?;
        Ok(Self {
            redirects: ordered(raw.redirects)?,
            headers: ordered(raw.headers)?,
        })
    }

    /// Parses a `_redirects` file: one `from to [status]` rule per line.
    ///
    /// `from` must be a relative path. A missing or non-numeric status means
    /// 302; lines with any status other than 301, 302, 303, 307 or 308 are
    /// dropped, as are lines with the wrong number of tokens.
    pub fn from_redirects_file(contents: &str) -> Self {
        let mut redirects = Vec::new();
        for line in rule_lines(contents) {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let rule = match tokens[..] {
                [from, to] => redirect_rule(from, to, None),
                [from, to, status] => redirect_rule(from, to, Some(status)),
                _ => None,
            };
            match rule {
                Some((from, rule)) => insert_rule(&mut redirects, from, rule),
                None => debug!("Skipping invalid redirect: {line}"),
            }
        }
        Self {
            redirects,
            headers: Vec::new(),
        }
    }

    /// Parses a `_headers` file. A line starting with `/` or `scheme://`
    /// opens a block for that path; `Name: value` lines below it add headers.
    /// Names are lowercased and repeated names are joined with `, `.
    pub fn from_headers_file(contents: &str) -> Self {
        let mut headers = Vec::new();
        let mut current: Option<(String, BTreeMap<String, String>)> = None;

        for line in rule_lines(contents) {
            if opens_block(line) {
                if let Some(path) = validate_url(line, false, false) {
                    flush_block(&mut headers, current.take());
                    current = Some((path, BTreeMap::new()));
                    continue;
                }
            }

            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let name = name.trim().to_lowercase();
            let Some((_, set)) = current.as_mut().filter(|_| !name.is_empty()) else {
                continue;
            };
            let value = value.trim();
            set.entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        flush_block(&mut headers, current);

        Self {
            redirects: Vec::new(),
            headers,
        }
    }

    /// Reads `_redirects` and `_headers` from `dir`. Missing files contribute
    /// no rules.
    pub async fn from_dir(dir: &Path) -> std::io::Result<Self> {
        let redirects = read_optional(&dir.join(REDIRECTS_FILE)).await?;
        let headers = read_optional(&dir.join(HEADERS_FILE)).await?;
        Ok(Self {
            redirects: redirects
                .map(|contents| Self::from_redirects_file(&contents).redirects)
                .unwrap_or_default(),
            headers: headers
                .map(|contents| Self::from_headers_file(&contents).headers)
                .unwrap_or_default(),
        })
    }
}

async fn read_optional(path: &Path) -> std::io::Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn rule_lines(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// A later rule for the same pattern replaces the earlier one in place.
fn insert_rule<T>(rules: &mut Vec<(String, T)>, pattern: String, rule: T) {
    match rules.iter_mut().find(|(existing, _)| *existing == pattern) {
        Some(slot) => slot.1 = rule,
        None => rules.push((pattern, rule)),
    }
}

fn redirect_rule(from: &str, to: &str, status: Option<&str>) -> Option<(String, RedirectRule)> {
    let from = validate_url(from, true, false)?;
    let to = validate_url(to, false, true)?;
    let status = status
        .and_then(|status| status.parse::<u16>().ok())
        .unwrap_or(302);
    if !REDIRECT_STATUSES.contains(&status) {
        return None;
    }
    Some((from, RedirectRule::new(to, status)))
}

fn opens_block(line: &str) -> bool {
    line.starts_with('/')
        || line
            .split_once("://")
            .is_some_and(|(scheme, _)| !scheme.is_empty() && !scheme.contains(char::is_whitespace))
}

fn flush_block(
    headers: &mut Vec<(String, HeaderRule)>,
    block: Option<(String, BTreeMap<String, String>)>,
) {
    if let Some((path, set)) = block.filter(|(_, set)| !set.is_empty()) {
        insert_rule(headers, path, HeaderRule { set, unset: Vec::new() });
    }
}

/// Normalizes a rule path. `https://host/path` keeps its host unless
/// `only_relative` is set, in which case it is rejected. Other tokens must be
/// absolute paths; with `only_relative` a missing leading `/` is added.
fn validate_url(token: &str, only_relative: bool, keep_query: bool) -> Option<String> {
    if let Some(rest) = token.strip_prefix("https://") {
        let rest = rest.trim_start_matches('/');
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        if !host.is_empty() {
            if only_relative {
                return None;
            }
            return Some(format!("https://{host}{}", extract_pathname(path, keep_query)?));
        }
    }

    if token.starts_with('/') {
        extract_pathname(token, keep_query)
    } else if only_relative {
        extract_pathname(&format!("/{token}"), keep_query)
    } else {
        None
    }
}

fn extract_pathname(path: &str, keep_query: bool) -> Option<String> {
    let base = Url::parse("http://localhost").ok()?;
    let url = base
        .join(&format!("/{}", path.trim_start_matches('/')))
        .ok()?;
    let mut pathname = url.path().to_string();
    if keep_query {
        if let Some(query) = url.query() {
            pathname.push('?');
            pathname.push_str(query);
        }
        if let Some(fragment) = url.fragment() {
            pathname.push('#');
            pathname.push_str(fragment);
        }
    }
    Some(pathname)
}

fn ordered<T: serde::de::DeserializeOwned>(
    map: Map<String, Value>,
) -> Result<Vec<(String, T)>, serde_json::Error> {
    map.into_iter()
        .map(|(pattern, value)| {
            Ok::<_, serde_json::Error>((pattern, serde_json::from_value(value)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rules_in_file_order() {
        let config = RulesConfig::from_json(
            r#"{
                "redirects": {
                    "/z": { "to": "/last" },
                    "/a/*": { "to": "/b/:splat", "status": 301 }
                },
                "headers": {
                    "/*": { "set": { "X-Test": "1" }, "unset": ["Server"] }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.redirects[0].0, "/z");
        assert_eq!(config.redirects[0].1, RedirectRule::new("/last", 302));
        assert_eq!(config.redirects[1].1, RedirectRule::new("/b/:splat", 301));
        assert_eq!(
            config.headers[0].1,
            HeaderRule::default().set("X-Test", "1").unset("Server")
        );
    }

    #[test]
    fn missing_sections_are_empty() {
        let config = RulesConfig::from_json("{}").unwrap();
        assert!(config.redirects.is_empty());
        assert!(config.headers.is_empty());
    }

    #[test]
    fn parses_redirects_file() {
        let config = RulesConfig::from_redirects_file(
            "# moved pages\n\
             /old/* /new/:splat 301\n\
             /blog   https://blog.example.com/?ref=site\n\
             /gone /elsewhere 404\n\
             /typo /fixed nope\n\
             https://other.dev/x /y\n\
             /too many tokens here\n\
             \n\
             contact /about 308\n",
        );

        assert_eq!(
            config.redirects,
            vec![
                ("/old/*".to_string(), RedirectRule::new("/new/:splat", 301)),
                (
                    "/blog".to_string(),
                    RedirectRule::new("https://blog.example.com/?ref=site", 302)
                ),
                ("/typo".to_string(), RedirectRule::new("/fixed", 302)),
                ("/contact".to_string(), RedirectRule::new("/about", 308)),
            ]
        );
        assert!(config.headers.is_empty());
    }

    #[test]
    fn redirect_targets_must_be_absolute() {
        let config = RulesConfig::from_redirects_file("/a relative/path\n/b /c/../d?x=1#top");
        assert_eq!(
            config.redirects,
            vec![("/b".to_string(), RedirectRule::new("/d?x=1#top", 302))]
        );
    }

    #[test]
    fn parses_headers_file() {
        let config = RulesConfig::from_headers_file(
            "# security\n\
             /*\n  \
               X-Frame-Options: DENY\n  \
               Link: </a.css>; rel=preload\n  \
               link: </b.js>; rel=preload\n\
             /empty\n\
             https://:sub.example.com/*\n  \
               X-Sub: :sub\n  \
               Refresh: 5; url=https://example.com/\n",
        );

        assert_eq!(
            config.headers,
            vec![
                (
                    "/*".to_string(),
                    HeaderRule::default()
                        .set("x-frame-options", "DENY")
                        .set("link", "</a.css>; rel=preload, </b.js>; rel=preload")
                ),
                (
                    "https://:sub.example.com/*".to_string(),
                    HeaderRule::default()
                        .set("x-sub", ":sub")
                        .set("refresh", "5; url=https://example.com/")
                ),
            ]
        );
    }

    #[test]
    fn headers_before_any_path_are_ignored() {
        let config = RulesConfig::from_headers_file("X-Orphan: 1\n/a\nX-Kept: 2\n: no-name\n");
        assert_eq!(
            config.headers,
            vec![("/a".to_string(), HeaderRule::default().set("x-kept", "2"))]
        );
    }

    #[tokio::test]
    async fn reads_rule_files_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(REDIRECTS_FILE), "/a /b").unwrap();

        let config = RulesConfig::from_dir(dir.path()).await.unwrap();
        assert_eq!(config.redirects.len(), 1);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn substitutes_captures() {
        let mut replacements = Replacements::new();
        replacements.insert("splat".into(), "x/y".into());
        let rule = HeaderRule::default().set("Link", "</:splat>; rel=preload");
        assert_eq!(rule.resolve(&replacements).set["Link"], "</x/y>; rel=preload");
    }
}
