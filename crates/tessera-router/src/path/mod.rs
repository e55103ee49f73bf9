/// URL path validation and normalization
///
/// All functions here are pure: same input, same output.

use std::borrow::Cow;

pub mod hierarchy;
pub use hierarchy::PathHierarchy;

/// Checks whether a URL path is already in canonical form
///
/// # Rules
///
/// - Must start with `/`
/// - Must not contain `//` or `\`
/// - Must not end with `/` (except root `/`)
///
/// # Examples
///
/// ```
/// use tessera_router::path::is_valid_path;
///
/// assert!(is_valid_path("/"));
/// assert!(is_valid_path("/blog/42"));
///
/// assert!(!is_valid_path(""));
/// assert!(!is_valid_path("blog"));
/// assert!(!is_valid_path("/blog/"));
/// assert!(!is_valid_path("/blog//42"));
/// ```
pub fn is_valid_path(path: &str) -> bool {
    if path.is_empty() || !path.starts_with('/') {
        return false;
    }

    if path.contains("//") || path.contains('\\') {
        return false;
    }

    path == "/" || !path.ends_with('/')
}

/// Normalizes a URL path to canonical form
///
/// Returns `Cow::Borrowed` when the input is already canonical.
///
/// ```
/// use tessera_router::path::normalize_path;
///
/// assert_eq!(normalize_path("/blog/"), "/blog");
/// assert_eq!(normalize_path("\\blog\\42"), "/blog/42");
/// assert_eq!(normalize_path("/blog//42"), "/blog/42");
/// assert_eq!(normalize_path(""), "/");
/// ```
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    if is_valid_path(path) {
        return Cow::Borrowed(path);
    }

    let normalized = path
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if normalized.is_empty() {
        Cow::Borrowed("/")
    } else {
        Cow::Owned(format!("/{}", normalized))
    }
}

/// Splits a request target into its path and optional query string
///
/// A fragment (`#...`) is dropped.
pub fn split_url(url: &str) -> (&str, Option<&str>) {
    let url = url.split_once('#').map_or(url, |(before, _)| before);
    match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    }
}
