//! # Tessera Router
//!
//! File-system route discovery and URL matching:
//! - Static routes (`about.tsx` → `/about`)
//! - Named parameters (`blog/$slug.tsx` → `/blog/:slug`)
//! - Zero-or-more wildcards (`docs/$path*.tsx` → `/docs/*path`)
//! - Nested layouts (`_layout.tsx` wraps every route below its directory)
//! - Static passthrough files under a reserved prefix
//!
//! Routes are classified once, at discovery/inspection time, into a
//! [`RouteKind`] and sorted by specificity, so an explicit route is never
//! shadowed by a dynamic one regardless of the order files were found in.
//!
//! ## Example
//!
//! ```
//! use tessera_router::{Route, RouteKind, Router};
//!
//! let router = Router::new()
//!     .with_route(Route::from_relative_path("routes/blog/$slug.tsx", "blog/$slug.tsx", RouteKind::page()))
//!     .with_route(Route::from_relative_path("routes/blog/featured.tsx", "blog/featured.tsx", RouteKind::page()));
//!
//! let resolved = router.resolve("/blog/featured").unwrap();
//! assert_eq!(resolved.route.pattern, "/blog/featured");
//!
//! let resolved = router.resolve("/blog/42?ref=email").unwrap();
//! assert_eq!(resolved.params["slug"], "42");
//! assert_eq!(resolved.params["ref"], "email");
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Module Declarations
// ============================================================================

pub mod discover;
pub mod path;
pub mod query;
pub mod route;

pub use discover::{discover_routes, DiscoverError, DiscoverOptions};
pub use path::{is_valid_path, normalize_path, PathHierarchy};
pub use route::matcher::match_pattern;
pub use route::parser::{compare_specificity, parse_pattern, ParsedPattern};
pub use route::pattern::{classify_segment, PatternSegmentType};

/// Bound route parameters (path parameters plus merged query parameters)
pub type Params = HashMap<String, String>;

/// Length of a route id in hex characters
pub const ROUTE_ID_LEN: usize = 10;

// ============================================================================
// Core Types
// ============================================================================

/// Exports of a page module that the runtime cares about
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageExports {
    /// Module exports `loader`
    pub loader: bool,
    /// Module exports `getMetadata`
    pub get_metadata: bool,
}

/// HTTP methods exported by a handler module
///
/// `del` stands in for `DELETE` since `delete` is reserved in the source
/// language. `all` handles any method without a dedicated export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTable {
    pub get: bool,
    pub post: bool,
    pub put: bool,
    pub patch: bool,
    pub del: bool,
    pub head: bool,
    pub options: bool,
    pub all: bool,
}

impl MethodTable {
    /// Export names recognized as method handlers
    pub const EXPORT_NAMES: [&'static str; 8] =
        ["get", "post", "put", "patch", "del", "head", "options", "all"];

    /// Builds a table from a module's export names, ignoring unrelated exports
    ///
    /// ```
    /// use tessera_router::MethodTable;
    ///
    /// let table = MethodTable::from_exports(["get", "del", "helper"]);
    /// assert!(table.get && table.del);
    /// assert!(!table.post);
    /// ```
    pub fn from_exports<I, S>(exports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        exports
            .into_iter()
            .fold(Self::default(), |mut table, name| {
                match name.as_ref() {
                    "get" => table.get = true,
                    "post" => table.post = true,
                    "put" => table.put = true,
                    "patch" => table.patch = true,
                    "del" => table.del = true,
                    "head" => table.head = true,
                    "options" => table.options = true,
                    "all" => table.all = true,
                    _ => {}
                }
                table
            })
    }

    /// Export name handling an HTTP method, falling back to `all`
    ///
    /// ```
    /// use tessera_router::MethodTable;
    ///
    /// let table = MethodTable::from_exports(["get", "all"]);
    /// assert_eq!(table.handler_for("GET"), Some("get"));
    /// assert_eq!(table.handler_for("DELETE"), Some("all"));
    /// ```
    pub fn handler_for(&self, method: &str) -> Option<&'static str> {
        let dedicated = match method.to_ascii_uppercase().as_str() {
            "GET" if self.get => Some("get"),
            "POST" if self.post => Some("post"),
            "PUT" if self.put => Some("put"),
            "PATCH" if self.patch => Some("patch"),
            "DELETE" if self.del => Some("del"),
            "HEAD" if self.head => Some("head"),
            "OPTIONS" if self.options => Some("options"),
            _ => None,
        };
        dedicated.or(if self.all { Some("all") } else { None })
    }

    /// Exported handler names, in [`EXPORT_NAMES`](Self::EXPORT_NAMES) order
    pub fn exported(&self) -> Vec<&'static str> {
        let flags = [
            self.get,
            self.post,
            self.put,
            self.patch,
            self.del,
            self.head,
            self.options,
            self.all,
        ];
        Self::EXPORT_NAMES
            .iter()
            .zip(flags)
            .filter_map(|(name, set)| set.then_some(*name))
            .collect()
    }

    /// Whether no method is exported at all
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// What a route file is, fixed once at inspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RouteKind {
    /// Wraps the render output of every route below its directory
    Layout,
    /// Renderable page (default export)
    Page(PageExports),
    /// HTTP handler exporting method functions
    Handler(MethodTable),
    /// File served as-is
    Static,
    /// Script module whose kind depends on its exports
    PageOrHandler,
}

impl RouteKind {
    /// A page with no optional exports
    pub fn page() -> Self {
        RouteKind::Page(PageExports::default())
    }

    pub fn is_layout(&self) -> bool {
        matches!(self, RouteKind::Layout)
    }

    pub fn is_page(&self) -> bool {
        matches!(self, RouteKind::Page(_))
    }

    pub fn is_static(&self) -> bool {
        matches!(self, RouteKind::Static)
    }

    /// Whether the route is backed by a script module
    pub fn is_script(&self) -> bool {
        !self.is_static()
    }
}

/// One addressable unit of the application, derived from one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Stable id derived from the relative path
    pub id: String,
    pub kind: RouteKind,
    /// URL pattern like `/blog/:slug`
    pub pattern: String,
    /// Parameter names bound by the pattern
    pub params: Vec<String>,
    /// Absolute source path
    pub file: PathBuf,
    /// Root-relative path with forward slashes
    pub relative_path: String,
    /// Enclosing layout ids, outermost first
    pub parents: Vec<String>,
}

/// Derives the stable id of a route file
///
/// First [`ROUTE_ID_LEN`] hex characters of the SHA-256 of the root-relative
/// path. Backslashes are normalized first so the id is platform independent.
///
/// ```
/// use tessera_router::route_id;
///
/// assert_eq!(route_id("blog/$slug.tsx").len(), 10);
/// assert_eq!(route_id("blog/$slug.tsx"), route_id("blog\\$slug.tsx"));
/// assert_ne!(route_id("blog/$slug.tsx"), route_id("blog/index.tsx"));
/// ```
pub fn route_id(relative_path: &str) -> String {
    let digest = Sha256::digest(relative_path.replace('\\', "/").as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(ROUTE_ID_LEN);
    id
}

impl Route {
    /// Creates a route from its file location and kind
    ///
    /// Static routes keep the literal path (extension included) as their
    /// pattern; every other kind derives it with [`parse_pattern`].
    pub fn from_relative_path(
        file: impl Into<PathBuf>,
        relative_path: &str,
        kind: RouteKind,
    ) -> Self {
        let relative_path = relative_path.replace('\\', "/");
        let (pattern, params) = if kind.is_static() {
            (format!("/{}", relative_path.trim_start_matches('/')), Vec::new())
        } else {
            let parsed = parse_pattern(&relative_path);
            (parsed.pattern, parsed.params)
        };

        Route {
            id: route_id(&relative_path),
            kind,
            pattern,
            params,
            file: file.into(),
            relative_path,
            parents: Vec::new(),
        }
    }

    /// Sets the enclosing layout chain (outermost first)
    pub fn with_parents(mut self, parents: Vec<String>) -> Self {
        self.parents = parents;
        self
    }

    /// URL directory owning this route file, e.g. `/blog` for `blog/$slug.tsx`
    pub fn directory(&self) -> String {
        match self.relative_path.rsplit_once('/') {
            Some((dir, _)) => format!("/{}", dir),
            None => "/".to_string(),
        }
    }

    /// Matches a URL against this route's pattern
    pub fn matches(&self, url: &str) -> Option<Params> {
        match match_pattern(&self.pattern, url) {
            (true, params) => Some(params),
            (false, _) => None,
        }
    }

    /// Substitutes parameters back into the pattern
    ///
    /// Returns `None` when a named parameter is missing. A missing or empty
    /// wildcard produces no segment.
    ///
    /// ```
    /// use tessera_router::{Params, Route, RouteKind};
    ///
    /// let route = Route::from_relative_path("r/docs/$path*.tsx", "docs/$path*.tsx", RouteKind::page());
    /// let mut params = Params::new();
    /// params.insert("path".to_string(), "guide/intro".to_string());
    /// assert_eq!(route.generate_url(&params).unwrap(), "/docs/guide/intro");
    /// ```
    pub fn generate_url(&self, params: &Params) -> Option<String> {
        let segments: Option<Vec<String>> = route::parser::pattern_segments(&self.pattern)
            .into_iter()
            .map(|segment| match segment {
                PatternSegmentType::Static(text) => Some(text),
                PatternSegmentType::Param(name) => params
                    .get(&name)
                    .map(|v| urlencoding::encode(v).into_owned()),
                PatternSegmentType::Wildcard(name) => {
                    Some(params.get(&name).cloned().unwrap_or_default())
                }
            })
            .collect();

        segments.map(|segs| {
            let filtered: Vec<String> = segs.into_iter().filter(|s| !s.is_empty()).collect();
            if filtered.is_empty() {
                "/".to_string()
            } else {
                format!("/{}", filtered.join("/"))
            }
        })
    }
}

// ============================================================================
// Router
// ============================================================================

/// Outcome of resolving a URL
#[derive(Debug, Clone)]
pub struct ResolvedRoute<'a> {
    /// The matched route
    pub route: &'a Route,
    /// Path parameters merged with query parameters
    pub params: Params,
    /// Layout chain, outermost first
    pub layouts: Vec<&'a Route>,
}

impl<'a> ResolvedRoute<'a> {
    /// Nests render output inside the layout chain
    ///
    /// `render` is called innermost layout first so the outermost layout
    /// ends up outside everything else.
    ///
    /// ```
    /// use tessera_router::{Route, RouteKind, Router};
    ///
    /// let router = Router::new()
    ///     .with_route(Route::from_relative_path("r/_layout.js", "_layout.js", RouteKind::Layout))
    ///     .with_route(Route::from_relative_path("r/about.js", "about.js", RouteKind::page()))
    ///     .with_resolved_parents();
    ///
    /// let resolved = router.resolve("/about").unwrap();
    /// let html = resolved.wrap("<p>about</p>".to_string(), |_layout, inner| {
    ///     format!("<main>{}</main>", inner)
    /// });
    /// assert_eq!(html, "<main><p>about</p></main>");
    /// ```
    pub fn wrap<T>(&self, inner: T, mut render: impl FnMut(&Route, T) -> T) -> T {
        self.layouts
            .iter()
            .rev()
            .fold(inner, |acc, layout| render(layout, acc))
    }
}

/// Sorts routes by pattern specificity, then by id
pub fn sort_routes(routes: &mut [Route]) {
    routes.sort_by(|a, b| compare_specificity(&a.pattern, &b.pattern).then_with(|| a.id.cmp(&b.id)));
}

/// Computes each route's enclosing layout chain from the layouts present
///
/// A layout's own chain only includes layouts of strictly enclosing
/// directories.
pub fn assign_parents(routes: &mut [Route]) {
    let layouts: HashMap<String, String> = routes
        .iter()
        .filter(|r| r.kind.is_layout())
        .map(|r| (r.directory(), r.id.clone()))
        .collect();

    for route in routes.iter_mut() {
        let dir = route.directory();
        let skip = usize::from(route.kind.is_layout());
        let mut parents: Vec<String> = PathHierarchy::new(&dir)
            .skip(skip)
            .filter_map(|d| layouts.get(d).cloned())
            .collect();
        parents.reverse();
        route.parents = parents;
    }
}

/// Ordered route table with URL resolution
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
    by_id: HashMap<String, usize>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a router from an arbitrary list, sorting it by specificity
    pub fn from_routes(routes: Vec<Route>) -> Self {
        Router::new().with_routes(routes)
    }

    /// Adds a route (builder style)
    pub fn with_route(mut self, route: Route) -> Self {
        self.add_route(route);
        self
    }

    /// Adds several routes (builder style)
    pub fn with_routes<I>(mut self, routes: I) -> Self
    where
        I: IntoIterator<Item = Route>,
    {
        self.routes.extend(routes);
        self.reindex();
        self
    }

    /// Recomputes every route's layout chain from the layouts in the table
    pub fn with_resolved_parents(mut self) -> Self {
        assign_parents(&mut self.routes);
        self
    }

    /// Adds a route, replacing any route with the same id
    pub fn add_route(&mut self, route: Route) {
        self.routes.retain(|r| r.id != route.id);
        self.routes.push(route);
        self.reindex();
    }

    fn reindex(&mut self) {
        sort_routes(&mut self.routes);
        self.by_id = self
            .routes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
    }

    /// Routes in matching order
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Looks a route up by id
    pub fn get(&self, id: &str) -> Option<&Route> {
        self.by_id.get(id).and_then(|&i| self.routes.get(i))
    }

    /// Resolves a URL to the first matching non-layout route
    ///
    /// The URL is normalized first, so `/blog//42/` resolves like `/blog/42`.
    pub fn resolve(&self, url: &str) -> Option<ResolvedRoute<'_>> {
        self.routes
            .iter()
            .filter(|route| !route.kind.is_layout())
            .find_map(|route| {
                route.matches(url).map(|params| ResolvedRoute {
                    route,
                    params,
                    layouts: route.parents.iter().filter_map(|id| self.get(id)).collect(),
                })
            })
    }
}
