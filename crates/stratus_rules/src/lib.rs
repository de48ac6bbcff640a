//! # Stratus Rules
//!
//! Compiles declarative `pattern -> value` rules (redirects, custom headers)
//! into a matcher evaluated per request.
//!
//! Pattern grammar:
//!
//! * `*` captures greedily and is available as `:splat` when substituting.
//! * `:name` captures one host label, path segment or query value.
//! * Patterns starting with `https://` also match the request host.
//! * A `?query` part matches the request query regardless of parameter order.
//!
//! Rules keep their declaration order. Every matching rule is returned, in
//! that order.
//!
//! ```
//! use stratus_rules::{RulesMatcher, replacer};
//! use url::Url;
//!
//! let matcher = RulesMatcher::compile([("/blog/:slug", "/posts/:slug")]);
//! let url = Url::parse("https://example.com/blog/hello").unwrap();
//! let to = matcher.matches(&url, |to, replacements| replacer(to, replacements));
//! assert_eq!(to, vec!["/posts/hello"]);
//! ```

use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;
use url::form_urlencoded;

/// Named captures of one match, `splat` included.
pub type Replacements = BTreeMap<String, String>;

const CROSS_HOST_PREFIX: &str = "https://";

const HOST_PLACEHOLDER: &str = "[^/.]+";
const PATH_PLACEHOLDER: &str = "[^/?]+";
const QUERY_PLACEHOLDER: &str = "[^&]+";

struct CompiledRule<V> {
    cross_host: bool,
    has_query: bool,
    regex: Regex,
    value: V,
}

/// An ordered set of compiled rules.
pub struct RulesMatcher<V> {
    rules: Vec<CompiledRule<V>>,
}

impl<V> Default for RulesMatcher<V> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<V> RulesMatcher<V> {
    /// Compiles `rules` in iteration order. Patterns that do not compile are
    /// dropped; the remaining rules still work.
    pub fn compile<I, K>(rules: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .filter_map(|(pattern, value)| {
                let pattern = pattern.as_ref();
                let compiled = compile_pattern(pattern);
                match Regex::new(&compiled.source) {
                    Ok(regex) => Some(CompiledRule {
                        cross_host: compiled.cross_host,
                        has_query: compiled.has_query,
                        regex,
                        value,
                    }),
                    Err(e) => {
                        debug!("Dropping invalid rule {pattern:?}: {e}");
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Returns `template(value, captures)` for every rule matching `url`, in
    /// declaration order.
    pub fn matches<T, F>(&self, url: &Url, mut template: F) -> Vec<T>
    where
        F: FnMut(&V, &Replacements) -> T,
    {
        let path = url.path();
        let host = url.host_str().unwrap_or_default();
        let query = sorted_query(url.query_pairs());

        self.rules
            .iter()
            .filter_map(|rule| {
                let mut subject = if rule.cross_host {
                    format!("{CROSS_HOST_PREFIX}{host}{path}")
                } else {
                    path.to_string()
                };
                if rule.has_query {
                    subject.push('?');
                    subject.push_str(&query);
                }

                let captures = rule.regex.captures(&subject)?;
                let replacements = rule
                    .regex
                    .capture_names()
                    .flatten()
                    .filter_map(|name| {
                        captures
                            .name(name)
                            .map(|m| (name.to_string(), m.as_str().to_string()))
                    })
                    .collect::<Replacements>();
                Some(template(&rule.value, &replacements))
            })
            .collect()
    }
}

impl<V: AsRef<str>> RulesMatcher<V> {
    /// [`matches`](Self::matches) for plain string values.
    pub fn matches_replaced(&self, url: &Url) -> Vec<String> {
        self.matches(url, |value, replacements| {
            replacer(value.as_ref(), replacements)
        })
    }
}

/// Substitutes every `:name` token in `template`.
///
/// Longer names are substituted before shorter names they start with, so
/// `:identifier` is not clobbered by a `:id` capture.
pub fn replacer(template: &str, replacements: &Replacements) -> String {
    replacements
        .iter()
        .rev()
        .fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!(":{name}"), value)
        })
}

/// Applies [`replacer`] to every string inside a JSON value.
pub fn replace_json(value: &serde_json::Value, replacements: &Replacements) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(replacer(s, replacements)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| replace_json(item, replacements))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), replace_json(v, replacements)))
                .collect(),
        ),
        other => other.clone(),
    }
}

struct CompiledPattern {
    source: String,
    cross_host: bool,
    has_query: bool,
}

fn compile_pattern(pattern: &str) -> CompiledPattern {
    let cross_host = pattern.starts_with(CROSS_HOST_PREFIX);
    let (location, query) = match pattern.split_once('?') {
        Some((location, query)) => (location, Some(query)),
        None => (pattern, None),
    };

    let mut source = String::from("^");
    if cross_host {
        let rest = &location[CROSS_HOST_PREFIX.len()..];
        let (host, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));
        source.push_str(&regex::escape(CROSS_HOST_PREFIX));
        source.push_str(&compile_segment(host, HOST_PLACEHOLDER, regex::escape));
        source.push_str(&compile_segment(path, PATH_PLACEHOLDER, regex::escape));
    } else {
        source.push_str(&compile_segment(location, PATH_PLACEHOLDER, regex::escape));
    }

    let pairs = query
        .map(|q| sorted_pairs(form_urlencoded::parse(q.as_bytes())))
        .unwrap_or_default();
    let has_query = !pairs.is_empty();
    if has_query {
        source.push_str(&regex::escape("?"));
        let compiled = pairs
            .iter()
            .map(|(key, value)| {
                format!(
                    "{}={}",
                    regex::escape(&form_encode(key)),
                    compile_segment(value, QUERY_PLACEHOLDER, |s| regex::escape(&form_encode(s)))
                )
            })
            .collect::<Vec<_>>()
            .join("&");
        source.push_str(&compiled);
    }

    source.push('$');
    CompiledPattern {
        source,
        cross_host,
        has_query,
    }
}

/// Turns `*` and `:name` tokens into capture groups, passing literal runs
/// through `literal`.
fn compile_segment(text: &str, placeholder: &str, literal: impl Fn(&str) -> String) -> String {
    let mut out = String::new();
    let mut pending = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                out.push_str(&literal(&std::mem::take(&mut pending)));
                out.push_str("(?<splat>.*)");
            }
            ':' if chars.peek().is_some_and(|next| next.is_ascii_alphabetic()) => {
                out.push_str(&literal(&std::mem::take(&mut pending)));
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&format!("(?<{name}>{placeholder})"));
            }
            _ => pending.push(c),
        }
    }
    out.push_str(&literal(&pending));
    out
}

fn form_encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn sorted_pairs<'a>(
    pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = pairs
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}

fn sorted_query(pairs: form_urlencoded::Parse<'_>) -> String {
    sorted_pairs(pairs)
        .iter()
        .map(|(k, v)| format!("{}={}", form_encode(k), form_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(&format!("https://example.com{s}")).unwrap()
    }

    #[test]
    fn returns_every_match_in_declaration_order() {
        let matcher = RulesMatcher::compile([("/foo/*", "1/:splat"), ("/foo/test/*", "2/:splat")]);
        assert_eq!(
            matcher.matches_replaced(&url("/foo/test/yes")),
            vec!["1/test/yes", "2/yes"]
        );

        let reversed =
            RulesMatcher::compile([("/foo/test/*", "2/:splat"), ("/foo/*", "1/:splat")]);
        assert_eq!(
            reversed.matches_replaced(&url("/foo/test/yes")),
            vec!["2/yes", "1/test/yes"]
        );
    }

    #[test]
    fn query_order_and_empty_values_are_irrelevant() {
        let matcher = RulesMatcher::compile([("/foo?bar&val", "5")]);
        for request in ["/foo?bar&val", "/foo?val&bar", "/foo?val=&bar="] {
            assert_eq!(matcher.matches_replaced(&url(request)), vec!["5"], "{request}");
        }
        assert!(matcher.matches_replaced(&url("/foo?bar")).is_empty());
        assert!(matcher.matches_replaced(&url("/foo")).is_empty());
    }

    #[test]
    fn query_placeholders_capture_values() {
        let matcher = RulesMatcher::compile([("/search?q=:term&page=:page", "/s/:term/:page")]);
        assert_eq!(
            matcher.matches_replaced(&url("/search?page=2&q=rust")),
            vec!["/s/rust/2"]
        );
    }

    #[test]
    fn path_only_rules_ignore_the_request_query() {
        let matcher = RulesMatcher::compile([("/foo", "hit")]);
        assert_eq!(matcher.matches_replaced(&url("/foo?utm=1")), vec!["hit"]);
    }

    #[test]
    fn placeholders_stop_at_segment_boundaries() {
        let matcher = RulesMatcher::compile([("/blog/:year/:slug", ":year-:slug")]);
        assert_eq!(
            matcher.matches_replaced(&url("/blog/2024/launch")),
            vec!["2024-launch"]
        );
        assert!(matcher.matches_replaced(&url("/blog/2024/a/b")).is_empty());
    }

    #[test]
    fn cross_host_rules_match_host_placeholders() {
        let matcher = RulesMatcher::compile([
            ("https://:sub.example.com/*", "/:sub/:splat"),
            ("https://other.com/*", "nope"),
        ]);
        let request = Url::parse("https://docs.example.com/intro").unwrap();
        assert_eq!(matcher.matches_replaced(&request), vec!["/docs/intro"]);

        let nested = Url::parse("https://a.b.example.com/intro").unwrap();
        assert!(matcher.matches_replaced(&nested).is_empty());
    }

    #[test]
    fn invalid_rules_are_dropped() {
        let matcher = RulesMatcher::compile([("/a/*/b/*", "double splat"), ("/ok", "fine")]);
        assert_eq!(matcher.len(), 1);
        assert_eq!(
            Url::parse("https://example.com/ok")
                .map(|u| matcher.matches_replaced(&u))
                .unwrap(),
            vec!["fine"]
        );
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let matcher = RulesMatcher::compile([("/file.(v1)+.js", "x")]);
        assert_eq!(matcher.matches_replaced(&url("/file.(v1)+.js")), vec!["x"]);
        assert!(matcher.matches_replaced(&url("/fileX(v1)+.js")).is_empty());
    }

    #[test]
    fn replacer_prefers_longer_names() {
        let replacements = Replacements::from([
            ("id".to_string(), "1".to_string()),
            ("identifier".to_string(), "abc".to_string()),
        ]);
        assert_eq!(replacer("/:identifier/:id", &replacements), "/abc/1");
    }

    #[test]
    fn replace_json_recurses_into_objects() {
        let matcher = RulesMatcher::compile([(
            "/assets/:name",
            serde_json::json!({"set": {"X-Asset": ":name", "Link": ["</:name.css>"]}}),
        )]);
        let out = matcher.matches(&url("/assets/app"), replace_json);
        assert_eq!(
            out,
            vec![serde_json::json!({"set": {"X-Asset": "app", "Link": ["</app.css>"]}})]
        );
    }

    #[test]
    fn empty_rules_match_nothing() {
        let matcher: RulesMatcher<&str> = RulesMatcher::compile(Vec::<(&str, &str)>::new());
        assert!(matcher.is_empty());
        assert!(matcher.matches_replaced(&url("/")).is_empty());
    }
}
