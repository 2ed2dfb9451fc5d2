// Path normalization and route pattern matching

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

static ABSOLUTE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").unwrap());

/// True for `http://` / `https://` URLs, which bypass base URL resolution
pub fn is_absolute_url(path: &str) -> bool {
    ABSOLUTE_URL.is_match(path)
}

/// Normalize a request path to its canonical form
///
/// - exactly one leading slash
/// - a trailing slash is appended unless the path already ends in one,
///   carries a query string or fragment, or matches one of `exceptions`
/// - absolute URLs are returned trimmed but otherwise untouched
///
/// Normalizing an already normalized path returns it unchanged.
pub fn normalize_path(path: &str, exceptions: &[RoutePattern]) -> String {
    let trimmed = path.trim();
    if is_absolute_url(trimmed) {
        return trimmed.to_string();
    }

    let mut normalized = format!("/{}", trimmed.trim_start_matches('/'));

    if normalized.ends_with('/') || normalized.contains('?') || normalized.contains('#') {
        return normalized;
    }

    if exceptions.iter().any(|p| p.matches(&normalized)) {
        return normalized;
    }

    normalized.push('/');
    normalized
}

/// Drop the query string and fragment
pub fn strip_query(path: &str) -> &str {
    match path.find(|c| c == '?' || c == '#') {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// A route matcher
///
/// Textual forms accepted by [`FromStr`]:
/// - `regex:<re>` matches with a regular expression
/// - `prefix:<path>` or `<path>*` matches by prefix, and also the prefix
///   itself without its trailing slash
/// - `exact:<path>` or `<path>` matches exactly, ignoring a trailing slash
#[derive(Clone, Debug)]
pub enum RoutePattern {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl RoutePattern {
    pub fn exact(path: &str) -> Self {
        RoutePattern::Exact(with_leading_slash(path))
    }

    pub fn prefix(path: &str) -> Self {
        RoutePattern::Prefix(with_leading_slash(path))
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(RoutePattern::Regex(Regex::new(pattern)?))
    }

    /// Match against a path; the query string is ignored
    pub fn matches(&self, path: &str) -> bool {
        let path = strip_query(path);
        match self {
            RoutePattern::Exact(expected) => {
                path.trim_end_matches('/') == expected.trim_end_matches('/')
            }
            RoutePattern::Prefix(prefix) => {
                path.starts_with(prefix.as_str())
                    || path.trim_end_matches('/') == prefix.trim_end_matches('/')
            }
            RoutePattern::Regex(re) => re.is_match(path),
        }
    }
}

impl FromStr for RoutePattern {
    type Err = regex::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(re) = s.strip_prefix("regex:") {
            return RoutePattern::regex(re);
        }
        if let Some(prefix) = s.strip_prefix("prefix:") {
            return Ok(RoutePattern::prefix(prefix));
        }
        if let Some(exact) = s.strip_prefix("exact:") {
            return Ok(RoutePattern::exact(exact));
        }
        if let Some(prefix) = s.strip_suffix('*') {
            return Ok(RoutePattern::prefix(prefix));
        }
        Ok(RoutePattern::exact(s))
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutePattern::Exact(path) => write!(f, "exact:{}", path),
            RoutePattern::Prefix(path) => write!(f, "prefix:{}", path),
            RoutePattern::Regex(re) => write!(f, "regex:{}", re.as_str()),
        }
    }
}

fn with_leading_slash(path: &str) -> String {
    format!("/{}", path.trim().trim_start_matches('/'))
}

/// Endpoints that never receive credentials and never trigger a refresh
#[derive(Clone, Debug, Default)]
pub struct NoAuthList {
    patterns: Vec<RoutePattern>,
}

impl NoAuthList {
    pub fn new(patterns: Vec<RoutePattern>) -> Self {
        Self { patterns }
    }

    /// Parse a comma-separated list of patterns
    pub fn parse(list: &str) -> Result<Self, regex::Error> {
        let patterns = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(RoutePattern::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn push(&mut self, pattern: RoutePattern) {
        self.patterns.push(pattern);
    }

    pub fn patterns(&self) -> &[RoutePattern] {
        &self.patterns
    }

    /// First matching pattern for a normalized path
    pub fn find(&self, path: &str) -> Option<&RoutePattern> {
        self.patterns.iter().find(|p| p.matches(path))
    }

    pub fn matches(&self, path: &str) -> bool {
        self.find(path).is_some()
    }
}
