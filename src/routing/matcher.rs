//! Path pattern compilation and matching.
//!
//! # Responsibilities
//! - Compile `/literal/:name` registration paths into anchored regexes
//! - Accept raw regexes verbatim (captures are not exposed as params)
//! - Report the matched prefix length and captured values in declaration order
//!
//! # Design Decisions
//! - Literal segments are escaped and matched case-insensitively
//! - A `:name` placeholder captures one or more non-slash characters
//! - Prefix matchers anchor at the start only; full matchers at both ends
//! - Patterns are compiled once at registration, never per request

use regex::Regex;
use std::sync::LazyLock;

static PARAM_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/:([^/]+)").expect("static pattern"));

/// A registration path: either a pattern string or a raw regex.
#[derive(Debug, Clone)]
pub enum PathPattern {
    /// A path such as `/users/:id`.
    Path(String),
    /// A regex used as-is.
    ///
    /// The route cursor is cut where the match ends, so a raw pattern used
    /// with `mount` should start with `^`; an unanchored one also discards
    /// whatever precedes the match.
    Raw(Regex),
}

impl From<&str> for PathPattern {
    fn from(path: &str) -> Self {
        PathPattern::Path(path.to_string())
    }
}

impl From<String> for PathPattern {
    fn from(path: String) -> Self {
        PathPattern::Path(path)
    }
}

impl From<&String> for PathPattern {
    fn from(path: &String) -> Self {
        PathPattern::Path(path.clone())
    }
}

impl From<Regex> for PathPattern {
    fn from(regex: Regex) -> Self {
        PathPattern::Raw(regex)
    }
}

/// Compiled matcher for one route layer.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    regex: Regex,
    param_names: Vec<String>,
}

/// Successful match of a matcher against a route path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch<'p> {
    /// Byte offset just past the matched text.
    pub end: usize,
    /// Captured values paired with their parameter names, in declaration order.
    pub params: Vec<(&'p str, String)>,
}

impl PathMatcher {
    /// Compile a registration pattern.
    ///
    /// `full_match` anchors the pattern at the end as well as the start; it is
    /// ignored for raw regexes, which are used unchanged.
    pub fn compile(pattern: impl Into<PathPattern>, full_match: bool) -> Self {
        match pattern.into() {
            PathPattern::Path(path) => Self::from_path(&path, full_match),
            PathPattern::Raw(regex) => Self {
                regex,
                param_names: Vec::new(),
            },
        }
    }

    /// Matcher used by global middleware: any path starting with `/`.
    ///
    /// Only the leading slash is consumed, so a router mounted this way sees
    /// the full remaining path.
    pub fn any() -> Self {
        Self {
            regex: Regex::new("^/").expect("static pattern"),
            param_names: Vec::new(),
        }
    }

    fn from_path(path: &str, full_match: bool) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };

        let mut param_names = Vec::new();
        let mut source = String::from("(?i)^");
        let mut last = 0;
        for caps in PARAM_SEGMENT.captures_iter(&path) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            source.push_str(&regex::escape(&path[last..whole.start()]));
            source.push_str("/([^/]+)");
            param_names.push(name.as_str().to_string());
            last = whole.end();
        }
        source.push_str(&regex::escape(&path[last..]));
        if full_match {
            source.push('$');
        }

        // Every piece is either escaped literal text or a fixed group.
        let regex = Regex::new(&source).expect("escaped path pattern");
        Self { regex, param_names }
    }

    /// Parameter names in declaration order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// The compiled regex.
    pub fn as_regex(&self) -> &Regex {
        &self.regex
    }

    /// Match against a route path.
    pub fn matches(&self, route_path: &str) -> Option<PathMatch<'_>> {
        let caps = self.regex.captures(route_path)?;
        let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let params = self
            .param_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
                (name.as_str(), value.to_string())
            })
            .collect();
        Some(PathMatch { end, params })
    }
}
