/// Route discovery from a directory tree
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::{assign_parents, sort_routes, Route, RouteKind};

/// Extensions of modules whose default export must be a page
pub const PAGE_EXTENSIONS: [&str; 2] = ["jsx", "tsx"];

/// Script extensions whose kind depends on their exports
pub const SCRIPT_EXTENSIONS: [&str; 4] = ["js", "mjs", "ts", "mts"];

/// Stem of layout files
pub const LAYOUT_STEM: &str = "_layout";

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("routes directory not found: {0}")]
    MissingRoot(PathBuf),

    #[error("failed to read {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Discovery settings
#[derive(Debug, Clone)]
pub struct DiscoverOptions {
    /// Top-level directory whose files are always served as-is
    pub static_prefix: String,
}

impl Default for DiscoverOptions {
    fn default() -> Self {
        Self {
            static_prefix: "static".to_string(),
        }
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Classifies a root-relative file path
///
/// Rules, first match wins: `_layout.*` → layout, under the static prefix →
/// static, `.jsx`/`.tsx` → page, plain scripts → deferred, anything else →
/// static.
///
/// ```
/// use tessera_router::discover::classify_file;
/// use tessera_router::RouteKind;
///
/// assert_eq!(classify_file("blog/_layout.js", "static"), RouteKind::Layout);
/// assert_eq!(classify_file("static/app.js", "static"), RouteKind::Static);
/// assert_eq!(classify_file("about.tsx", "static"), RouteKind::page());
/// assert_eq!(classify_file("api/users.ts", "static"), RouteKind::PageOrHandler);
/// assert_eq!(classify_file("robots.txt", "static"), RouteKind::Static);
/// ```
pub fn classify_file(relative_path: &str, static_prefix: &str) -> RouteKind {
    let path = Path::new(relative_path);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let extension = path.extension().and_then(|s| s.to_str()).unwrap_or_default();
    let prefix = static_prefix.trim_matches('/');

    let under_static = !prefix.is_empty()
        && relative_path
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('/'));

    if stem == LAYOUT_STEM {
        RouteKind::Layout
    } else if under_static {
        RouteKind::Static
    } else if PAGE_EXTENSIONS.contains(&extension) {
        RouteKind::page()
    } else if SCRIPT_EXTENSIONS.contains(&extension) {
        RouteKind::PageOrHandler
    } else {
        RouteKind::Static
    }
}

/// Root-relative path with forward slashes
fn relative_path(root: &Path, file: &Path) -> Option<String> {
    let rel = file.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();
    Some(parts.join("/"))
}

/// Walks `root` and returns one route per regular file
///
/// Hidden files and directories are skipped. The result is sorted by
/// specificity and carries each route's layout chain.
pub fn discover_routes(root: &Path, options: &DiscoverOptions) -> Result<Vec<Route>, DiscoverError> {
    if !root.is_dir() {
        return Err(DiscoverError::MissingRoot(root.to_path_buf()));
    }

    let mut routes = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|source| DiscoverError::Walk {
            path: source.path().unwrap_or(root).to_path_buf(),
            source,
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(rel) = relative_path(root, entry.path()) else {
            continue;
        };

        let kind = classify_file(&rel, &options.static_prefix);
        let route = Route::from_relative_path(entry.path(), &rel, kind);
        debug!(route = %route.id, pattern = %route.pattern, file = %rel, "discovered route");
        routes.push(route);
    }

    assign_parents(&mut routes);
    sort_routes(&mut routes);
    Ok(routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_root() {
        let err = discover_routes(Path::new("/definitely/not/here"), &DiscoverOptions::default())
            .unwrap_err();
        assert!(matches!(err, DiscoverError::MissingRoot(_)));
    }

    #[test]
    fn test_hidden_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.tsx"), "").unwrap();
        fs::write(dir.path().join(".secret.ts"), "").unwrap();
        fs::create_dir(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join(".cache/page.tsx"), "").unwrap();

        let routes = discover_routes(dir.path(), &DiscoverOptions::default()).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].relative_path, "index.tsx");
    }

    #[test]
    fn test_static_prefix_requires_directory_boundary() {
        assert_eq!(classify_file("statics.ts", "static"), RouteKind::PageOrHandler);
        assert_eq!(classify_file("static/_layout.js", "static"), RouteKind::Layout);
    }
}
