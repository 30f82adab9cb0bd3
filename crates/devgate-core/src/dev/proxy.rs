//! Proxy rules: which request paths are forwarded, and where to.
//!
//! Semantics follow the Vite `server.proxy` option:
//! - keys are path prefixes, except keys starting with `^`, which are
//!   regular expressions;
//! - rules are tried in declaration order and the first match wins;
//! - `rewrite` transforms the path (and query) before it is appended to the
//!   target's path.

use regex_lite::Regex;
use serde::Serialize;
use std::fmt::Write;
use url::Url;

/// One `.replace(pattern, replacement)` step of a path rewrite.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReplaceStep {
    /// Regex pattern. Replaces the first match, or all matches when `global`.
    Regex {
        pattern: String,
        global: bool,
        replacement: String,
        #[serde(skip)]
        regex: Regex,
    },
    /// Plain string pattern. Replaces the first occurrence.
    Literal {
        pattern: String,
        replacement: String,
    },
}

impl ReplaceStep {
    /// Build a regex step from a JS regex literal's source and flags.
    ///
    /// `replacement` uses JS syntax (`$1`, `$&`, `$$`).
    pub fn regex(source: &str, flags: &str, replacement: &str) -> Result<Self, regex_lite::Error> {
        let mut pattern = String::new();
        let inline_flags: String = flags.chars().filter(|f| matches!(f, 'i' | 'm' | 's')).collect();
        if !inline_flags.is_empty() {
            pattern.push_str(&format!("(?{inline_flags})"));
        }
        pattern.push_str(&unescape_slashes(source));

        let regex = Regex::new(&pattern)?;
        let replacement = js_replacement_to_rust(replacement, &regex);
        Ok(Self::Regex {
            regex,
            pattern: source.to_string(),
            global: flags.contains('g'),
            replacement,
        })
    }

    /// Build a plain-string step.
    pub fn literal(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self::Literal {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// Apply this step to `input`.
    #[must_use]
    pub fn apply(&self, input: &str) -> String {
        match self {
            Self::Regex {
                regex,
                global,
                replacement,
                ..
            } => {
                if *global {
                    regex.replace_all(input, replacement.as_str()).into_owned()
                } else {
                    regex.replace(input, replacement.as_str()).into_owned()
                }
            }
            Self::Literal {
                pattern,
                replacement,
            } => input.replacen(pattern.as_str(), replacement, 1),
        }
    }
}

/// `\/` is how a JS regex literal spells `/`; the regex engine wants it bare.
fn unescape_slashes(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('/') => out.push('/'),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Translate a JS replacement string (`$1`, `$&`, `$<name>`, `$$`) to the
/// regex crate's syntax (`${1}`, `${0}`, `${name}`, `$$`).
///
/// As in JS, `$0`, group numbers the pattern does not have, and `$<name>`
/// in a pattern without named groups stay literal.
fn js_replacement_to_rust(replacement: &str, regex: &Regex) -> String {
    let groups = regex.captures_len().saturating_sub(1);
    let has_named = regex.capture_names().flatten().next().is_some();
    let is_group = |n: usize| (1..=groups).contains(&n);

    let chars: Vec<char> = replacement.chars().collect();
    let mut out = String::with_capacity(replacement.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        match chars.get(i + 1).copied() {
            Some('$') => {
                out.push_str("$$");
                i += 2;
            }
            Some('&') => {
                out.push_str("${0}");
                i += 2;
            }
            Some(d) if d.is_ascii_digit() => {
                let one = d.to_digit(10).unwrap_or_default() as usize;
                let two = chars
                    .get(i + 2)
                    .and_then(|c| c.to_digit(10))
                    .map(|d2| one * 10 + d2 as usize);
                match two {
                    Some(n) if is_group(n) => {
                        let _ = write!(out, "${{{n}}}");
                        i += 3;
                    }
                    _ if is_group(one) => {
                        let _ = write!(out, "${{{one}}}");
                        i += 2;
                    }
                    _ => {
                        out.push_str("$$");
                        i += 1;
                    }
                }
            }
            Some('<') if has_named => {
                match chars[i + 2..].iter().position(|c| *c == '>') {
                    Some(len) => {
                        let name: String = chars[i + 2..i + 2 + len].iter().collect();
                        let _ = write!(out, "${{{name}}}");
                        i += len + 3;
                    }
                    None => {
                        out.push_str("$$");
                        i += 1;
                    }
                }
            }
            _ => {
                out.push_str("$$");
                i += 1;
            }
        }
    }
    out
}

/// A chain of replace steps applied to the request path before forwarding.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct PathRewrite {
    steps: Vec<ReplaceStep>,
}

impl PathRewrite {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn step(mut self, step: ReplaceStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Apply every step in order.
    #[must_use]
    pub fn apply(&self, path: &str) -> String {
        self.steps
            .iter()
            .fold(path.to_string(), |acc, step| step.apply(&acc))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[ReplaceStep] {
        &self.steps
    }
}

/// A single `server.proxy` entry.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyRule {
    /// The key as written in the config (`/api`, or `^/fallback/.*`).
    pub path_prefix: String,
    #[serde(skip)]
    pattern: Option<Regex>,
    /// Upstream base URL.
    pub target: Url,
    /// Send the target's host as the `Host` header instead of the client's.
    pub change_origin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<PathRewrite>,
    /// Extra request headers sent upstream.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl ProxyRule {
    /// Create a rule. Keys starting with `^` are compiled as regular expressions.
    pub fn new(path_prefix: impl Into<String>, target: Url) -> Result<Self, regex_lite::Error> {
        let path_prefix = path_prefix.into();
        let pattern = if path_prefix.starts_with('^') {
            Some(Regex::new(&path_prefix)?)
        } else {
            None
        };
        Ok(Self {
            path_prefix,
            pattern,
            target,
            change_origin: false,
            rewrite: None,
            headers: Vec::new(),
        })
    }

    pub fn with_change_origin(mut self, change_origin: bool) -> Self {
        self.change_origin = change_origin;
        self
    }

    pub fn with_rewrite(mut self, rewrite: PathRewrite) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whether this rule applies to a request path (with query, as received).
    #[must_use]
    pub fn matches(&self, request_uri: &str) -> bool {
        match &self.pattern {
            Some(regex) => regex.is_match(request_uri),
            None => request_uri.starts_with(self.path_prefix.as_str()),
        }
    }

    /// Upstream URL for a request path (with query).
    ///
    /// The rewrite (if any) runs on the full path-and-query. An empty result,
    /// or one starting with `?`, is anchored at `/`. The result is appended to
    /// the target's own path.
    #[must_use]
    pub fn upstream_url(&self, request_uri: &str) -> Url {
        let rewritten = match &self.rewrite {
            Some(rewrite) => rewrite.apply(request_uri),
            None => request_uri.to_string(),
        };
        let rewritten = if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{rewritten}")
        };

        let (path, query) = match rewritten.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rewritten.as_str(), None),
        };

        let mut url = self.target.clone();
        let base = self.target.path().trim_end_matches('/');
        url.set_path(&format!("{base}{path}"));
        url.set_query(query);
        url
    }

    /// `host[:port]` of the target, as sent in the `Host` header.
    #[must_use]
    pub fn upstream_host(&self) -> String {
        let host = self.target.host_str().unwrap_or_default();
        match self.target.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

/// Ordered proxy rules with unique keys.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ProxyTable {
    rules: Vec<ProxyRule>,
}

impl ProxyTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Returns `false` (and leaves the table unchanged) when a
    /// rule with the same key already exists.
    pub fn insert(&mut self, rule: ProxyRule) -> bool {
        if self.rules.iter().any(|r| r.path_prefix == rule.path_prefix) {
            return false;
        }
        self.rules.push(rule);
        true
    }

    /// First rule matching the request path.
    #[must_use]
    pub fn find(&self, request_uri: &str) -> Option<&ProxyRule> {
        self.rules.iter().find(|rule| rule.matches(request_uri))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyRule> {
        self.rules.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn reference_table() -> ProxyTable {
        let mut table = ProxyTable::new();
        table.insert(
            ProxyRule::new("/api", url("http://localhost:8081"))
                .unwrap()
                .with_change_origin(true),
        );
        table.insert(
            ProxyRule::new("/grafana", url("http://localhost:3000"))
                .unwrap()
                .with_change_origin(true)
                .with_rewrite(
                    PathRewrite::new().step(ReplaceStep::regex(r"^\/grafana", "", "").unwrap()),
                ),
        );
        table
    }

    fn forward(table: &ProxyTable, uri: &str) -> Option<String> {
        table
            .find(uri)
            .map(|rule| rule.upstream_url(uri).to_string())
    }

    #[test]
    fn test_api_path_is_preserved() {
        let table = reference_table();
        assert_eq!(
            forward(&table, "/api/users").as_deref(),
            Some("http://localhost:8081/api/users")
        );
    }

    #[test]
    fn test_grafana_prefix_is_stripped() {
        let table = reference_table();
        assert_eq!(
            forward(&table, "/grafana/d/dashboard1").as_deref(),
            Some("http://localhost:3000/d/dashboard1")
        );
    }

    #[test]
    fn test_bare_grafana_rewrites_to_root() {
        let table = reference_table();
        assert_eq!(
            forward(&table, "/grafana").as_deref(),
            Some("http://localhost:3000/")
        );
        assert_eq!(
            forward(&table, "/grafana?orgId=1").as_deref(),
            Some("http://localhost:3000/?orgId=1")
        );
    }

    #[test]
    fn test_query_string_is_preserved() {
        let table = reference_table();
        assert_eq!(
            forward(&table, "/api/telemetry?deviceId=7&limit=50").as_deref(),
            Some("http://localhost:8081/api/telemetry?deviceId=7&limit=50")
        );
        assert_eq!(
            forward(&table, "/grafana/d/abc?from=now-1h").as_deref(),
            Some("http://localhost:3000/d/abc?from=now-1h")
        );
    }

    #[test]
    fn test_unmatched_paths() {
        let table = reference_table();
        assert!(table.find("/").is_none());
        assert!(table.find("/src/main.ts").is_none());
        assert!(table.find("/ap").is_none());
    }

    #[test]
    fn test_prefix_match_is_plain_starts_with() {
        // Vite matches `/api` against `/apiary` too.
        let table = reference_table();
        assert_eq!(table.find("/apiary").unwrap().path_prefix, "/api");
    }

    #[test]
    fn test_first_match_wins() {
        let mut table = ProxyTable::new();
        table.insert(ProxyRule::new("/api/v2", url("http://localhost:9002")).unwrap());
        table.insert(ProxyRule::new("/api", url("http://localhost:9001")).unwrap());
        assert_eq!(
            forward(&table, "/api/v2/users").as_deref(),
            Some("http://localhost:9002/api/v2/users")
        );
        assert_eq!(
            forward(&table, "/api/v1/users").as_deref(),
            Some("http://localhost:9001/api/v1/users")
        );
    }

    #[test]
    fn test_duplicate_key_is_rejected() {
        let mut table = reference_table();
        let dup = ProxyRule::new("/api", url("http://localhost:9999")).unwrap();
        assert!(!table.insert(dup));
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.find("/api").unwrap().target.as_str(),
            "http://localhost:8081/"
        );
    }

    #[test]
    fn test_regex_key() {
        let rule = ProxyRule::new("^/fallback/.*", url("http://jsonplaceholder.typicode.com"))
            .unwrap()
            .with_rewrite(PathRewrite::new().step(ReplaceStep::regex(r"^\/fallback", "", "").unwrap()));
        assert!(rule.matches("/fallback/posts/1"));
        assert!(!rule.matches("/other/fallback/"));
        assert_eq!(
            rule.upstream_url("/fallback/posts/1").as_str(),
            "http://jsonplaceholder.typicode.com/posts/1"
        );
    }

    #[test]
    fn test_invalid_regex_key() {
        assert!(ProxyRule::new("^/(unclosed", url("http://localhost:1")).is_err());
    }

    #[test]
    fn test_target_base_path_is_prefixed() {
        let rule = ProxyRule::new("/api", url("http://localhost:8081/backend/")).unwrap();
        assert_eq!(
            rule.upstream_url("/api/users").as_str(),
            "http://localhost:8081/backend/api/users"
        );
    }

    #[test]
    fn test_upstream_host() {
        let rule = ProxyRule::new("/api", url("http://localhost:8081")).unwrap();
        assert_eq!(rule.upstream_host(), "localhost:8081");
        let rule = ProxyRule::new("/ext", url("https://example.com/base")).unwrap();
        assert_eq!(rule.upstream_host(), "example.com");
    }

    #[test]
    fn test_literal_replace_first_occurrence() {
        let rewrite = PathRewrite::new().step(ReplaceStep::literal("/api", ""));
        assert_eq!(rewrite.apply("/api/api/x"), "/api/x");
    }

    #[test]
    fn test_regex_flags_and_groups() {
        let step = ReplaceStep::regex(r"\/v(\d)\/", "g", "/version-$1/").unwrap();
        assert_eq!(step.apply("/v1/a/v2/b"), "/version-1/a/version-2/b");

        let step = ReplaceStep::regex("^/API", "i", "/service").unwrap();
        assert_eq!(step.apply("/api/users"), "/service/users");

        let step = ReplaceStep::regex("^/old", "", "[$&]").unwrap();
        assert_eq!(step.apply("/old/x"), "[/old]/x");
    }

    #[test]
    fn test_chained_rewrite() {
        let rewrite = PathRewrite::new()
            .step(ReplaceStep::regex(r"^\/grafana", "", "").unwrap())
            .step(ReplaceStep::literal("/d/", "/dashboards/"));
        assert_eq!(rewrite.apply("/grafana/d/abc"), "/dashboards/abc");
    }

    #[test]
    fn test_unknown_group_references_stay_literal() {
        let zero = ReplaceStep::regex(r"^\/a", "", "$0").unwrap();
        assert_eq!(zero.apply("/a/x"), "$0/x");

        let missing = ReplaceStep::regex(r"^\/a", "", "$1").unwrap();
        assert_eq!(missing.apply("/a/x"), "$1/x");

        let present = ReplaceStep::regex(r"^\/(a)", "", "/$1$1").unwrap();
        assert_eq!(present.apply("/a/x"), "/aa/x");
    }

    #[test]
    fn test_js_replacement_translation() {
        let one_group = Regex::new("/(a)").unwrap();
        assert_eq!(js_replacement_to_rust("$1x", &one_group), "${1}x");
        assert_eq!(js_replacement_to_rust("$$", &one_group), "$$");
        assert_eq!(js_replacement_to_rust("cost: $", &one_group), "cost: $$");
        // `$10` with one group is group 1 followed by `0`
        assert_eq!(js_replacement_to_rust("$10", &one_group), "${1}0");

        let named = Regex::new("/(?P<id>[0-9]+)").unwrap();
        assert_eq!(js_replacement_to_rust("$<id>", &named), "${id}");
        assert_eq!(js_replacement_to_rust("$<id>", &one_group), "$$<id>");
    }

    #[test]
    fn test_serialize_rule() {
        let table = reference_table();
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json[0]["path_prefix"], "/api");
        assert_eq!(json[0]["target"], "http://localhost:8081/");
        assert_eq!(json[0]["change_origin"], true);
        assert!(json[0].get("rewrite").is_none());
        assert_eq!(json[1]["rewrite"][0]["kind"], "regex");
        assert_eq!(json[1]["rewrite"][0]["pattern"], r"^\/grafana");
    }
}
