/// File path → route pattern parsing and specificity ordering
///
/// All functions are pure: same input → same output, no side effects.
use std::cmp::Ordering;

use super::pattern::{classify_segment, parse_pattern_segment, PatternSegmentType};

/// Result of parsing a route file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPattern {
    /// URL pattern like `/blog/:slug`
    pub pattern: String,
    /// Parameter names in order of appearance (wildcard included)
    pub params: Vec<String>,
    /// Whether the pattern ends in a zero-or-more wildcard
    pub has_wildcard: bool,
}

/// Fold accumulator for [`parse_pattern`]
#[derive(Default)]
struct ParseState {
    pattern: String,
    params: Vec<String>,
    has_wildcard: bool,
}

impl ParseState {
    fn with_static_segment(mut self, segment: String) -> Self {
        self.pattern.push('/');
        self.pattern.push_str(&segment);
        self
    }

    fn with_param(mut self, name: String) -> Self {
        self.pattern.push_str("/:");
        self.pattern.push_str(&name);
        self.params.push(name);
        self
    }

    fn with_wildcard(mut self, name: String) -> Self {
        self.pattern.push_str("/*");
        self.pattern.push_str(&name);
        self.params.push(name);
        self.has_wildcard = true;
        self
    }

    fn finalize(self) -> ParsedPattern {
        ParsedPattern {
            pattern: if self.pattern.is_empty() {
                "/".to_string()
            } else {
                self.pattern
            },
            params: self.params,
            has_wildcard: self.has_wildcard,
        }
    }
}

/// Segments that contribute nothing to the URL
fn should_skip_segment(segment: &str) -> bool {
    segment.is_empty() || segment == "index" || segment == "_layout"
}

fn process_segment(state: ParseState, segment: &str) -> ParseState {
    if should_skip_segment(segment) {
        return state;
    }

    match classify_segment(segment) {
        PatternSegmentType::Static(text) => state.with_static_segment(text),
        PatternSegmentType::Param(name) => state.with_param(name),
        PatternSegmentType::Wildcard(name) => state.with_wildcard(name),
    }
}

/// Strips the final extension from the last path component
///
/// ```
/// use tessera_router::route::parser::strip_extension;
///
/// assert_eq!(strip_extension("blog/$slug.tsx"), "blog/$slug");
/// assert_eq!(strip_extension("v1.2/index.js"), "v1.2/index");
/// assert_eq!(strip_extension("README"), "README");
/// ```
pub fn strip_extension(path: &str) -> &str {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(0) | None => path,
        Some(dot) => &path[..name_start + dot],
    }
}

/// Parses a root-relative route file path into its URL pattern
///
/// The extension is stripped, `$name` becomes `:name`, `$name*` becomes
/// `*name`, and `index` / `_layout` segments are dropped.
///
/// # Examples
///
/// ```
/// use tessera_router::route::parser::parse_pattern;
///
/// assert_eq!(parse_pattern("index.tsx").pattern, "/");
/// assert_eq!(parse_pattern("about.tsx").pattern, "/about");
///
/// let parsed = parse_pattern("blog/$slug.tsx");
/// assert_eq!(parsed.pattern, "/blog/:slug");
/// assert_eq!(parsed.params, vec!["slug"]);
///
/// let parsed = parse_pattern("docs/$path*.tsx");
/// assert_eq!(parsed.pattern, "/docs/*path");
/// assert!(parsed.has_wildcard);
///
/// assert_eq!(parse_pattern("blog/_layout.tsx").pattern, "/blog");
/// ```
pub fn parse_pattern(relative_path: &str) -> ParsedPattern {
    let normalized = relative_path.replace('\\', "/");
    strip_extension(&normalized)
        .split('/')
        .fold(ParseState::default(), process_segment)
        .finalize()
}

/// Splits a compiled pattern into typed segments
pub fn pattern_segments(pattern: &str) -> Vec<PatternSegmentType> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(parse_pattern_segment)
        .collect()
}

/// Orders two compiled patterns by specificity
///
/// Segments are compared position by position: static before parameter
/// before wildcard. When one pattern is a prefix of the other the shorter
/// one sorts first, so `/docs` precedes `/docs/*path`. Remaining ties fall
/// back to the pattern text so the order never depends on discovery order.
///
/// ```
/// use std::cmp::Ordering;
/// use tessera_router::route::parser::compare_specificity;
///
/// assert_eq!(compare_specificity("/blog/new", "/blog/:slug"), Ordering::Less);
/// assert_eq!(compare_specificity("/blog/:slug", "/*rest"), Ordering::Less);
/// assert_eq!(compare_specificity("/docs", "/docs/*path"), Ordering::Less);
/// ```
pub fn compare_specificity(a: &str, b: &str) -> Ordering {
    let left = pattern_segments(a);
    let right = pattern_segments(b);

    left.iter()
        .zip(right.iter())
        .map(|(l, r)| l.rank().cmp(&r.rank()))
        .find(|ord| ord.is_ne())
        .unwrap_or_else(|| left.len().cmp(&right.len()))
        .then_with(|| a.cmp(b))
}
