/// Pattern matching against request URLs
use crate::path::{normalize_path, split_url};
use crate::query::merge_query;
use crate::Params;

use super::parser::pattern_segments;
use super::pattern::PatternSegmentType;

/// Walks pattern and path segments together
fn match_segments(
    pattern: &[PatternSegmentType],
    path: &[&str],
    mut params: Params,
) -> Option<Params> {
    match pattern.split_first() {
        None => path.is_empty().then_some(params),
        Some((PatternSegmentType::Wildcard(name), _)) => {
            params.insert(name.clone(), path.join("/"));
            Some(params)
        }
        Some((segment, rest_pattern)) => {
            let (head, rest_path) = path.split_first()?;
            match segment {
                PatternSegmentType::Static(text) if text == head => {}
                PatternSegmentType::Param(name) => {
                    let value = urlencoding::decode(head)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| head.to_string());
                    params.insert(name.clone(), value);
                }
                _ => return None,
            }
            match_segments(rest_pattern, rest_path, params)
        }
    }
}

/// Matches only the path portion of `path` against `pattern`
pub fn match_path(pattern: &str, path: &str) -> Option<Params> {
    let normalized = normalize_path(path);
    let segments = pattern_segments(pattern);
    let path_segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    match_segments(&segments, &path_segments, Params::new())
}

/// Matches a URL (path plus optional query) against a compiled pattern
///
/// Path parameters are bound first; query parameters then fill in any key
/// the pattern did not bind. A wildcard binds the remaining segments joined
/// by `/`, which may be empty.
///
/// # Examples
///
/// ```
/// use tessera_router::route::matcher::match_pattern;
///
/// let (matched, params) = match_pattern("/blog/:id", "/blog/42?ref=email&id=7");
/// assert!(matched);
/// assert_eq!(params["id"], "42");
/// assert_eq!(params["ref"], "email");
///
/// let (matched, params) = match_pattern("/docs/*path", "/docs");
/// assert!(matched);
/// assert_eq!(params["path"], "");
///
/// let (matched, _) = match_pattern("/about", "/contact");
/// assert!(!matched);
/// ```
pub fn match_pattern(pattern: &str, url: &str) -> (bool, Params) {
    let (path, query) = split_url(url);
    match match_path(pattern, path) {
        Some(mut params) => {
            if let Some(query) = query {
                merge_query(&mut params, query);
            }
            (true, params)
        }
        None => (false, Params::new()),
    }
}
