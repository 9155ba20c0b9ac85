//! The boundary with the (out-of-scope) HTTP transport and route matcher.
use std::collections::BTreeMap;

/// Dynamic route parameters extracted by the matcher, e.g. `:id`.
pub type Params = BTreeMap<String, String>;

/// Trailing splat segments captured by a `*` pattern.
pub type SplatValues = Vec<String>;

/// Minimal HTTP-shaped request. The real transport owns the full request;
/// loaders only ever need the method, the path, and a few headers.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub path: String,
    headers: BTreeMap<String, String>,
}

impl Request {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// One matched route segment. Segments are ordered outermost (layout) first,
/// innermost (leaf) last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// The pattern as registered, e.g. `/posts/:id`.
    pub original_pattern: String,
    /// The matcher's canonical form; the root layout normalizes to `""`.
    pub normalized_pattern: String,
}

impl RouteMatch {
    pub fn new(original: impl Into<String>, normalized: impl Into<String>) -> Self {
        Self {
            original_pattern: original.into(),
            normalized_pattern: normalized.into(),
        }
    }
}

/// Ordered list of matched nested segments for one request, produced by the
/// external matcher and consumed read-only by the loader orchestrator.
#[derive(Debug, Clone, Default)]
pub struct MatchList {
    pub matches: Vec<RouteMatch>,
    pub params: Params,
    pub splat_values: SplatValues,
}

/// The routing algorithm itself lives outside this crate; anything that can
/// turn a request into an ordered [`MatchList`] (or decline with `None` for
/// a 404) plugs in here.
pub trait Matcher {
    fn find_matches(&self, req: &Request) -> Option<MatchList>;
}
