/// Route inspection: discovery plus export analysis
///
/// Every script route is parsed once here; its [`RouteKind`] is fixed for
/// the rest of the cycle.
use std::path::Path;

use tessera_router::{discover_routes, DiscoverOptions, MethodTable, PageExports, Route, RouteKind};
use tessera_transform::{analyze_module, CompileError, ModuleInfo};
use tracing::{debug, info};

use crate::{BuildError, BuildFailure, Config};

/// Resolves a route's kind from its module's exports
///
/// Guessed pages must have a default export; deferred scripts become pages
/// when they have one and handlers otherwise.
pub fn resolve_kind(route: &Route, info: &ModuleInfo) -> Result<RouteKind, BuildError> {
    let page_exports = || PageExports {
        loader: info.exports("loader"),
        get_metadata: info.exports("getMetadata"),
    };

    match &route.kind {
        RouteKind::Page(_) if !info.has_default_export() => Err(BuildError::MissingDefaultExport {
            file: route.file.clone(),
        }),
        RouteKind::Page(_) => Ok(RouteKind::Page(page_exports())),
        RouteKind::PageOrHandler if info.has_default_export() => Ok(RouteKind::Page(page_exports())),
        RouteKind::PageOrHandler => Ok(RouteKind::Handler(MethodTable::from_exports(&info.exports))),
        other => Ok(other.clone()),
    }
}

/// Discovers and inspects every route under the configured routes directory
///
/// All syntax errors are collected before failing so one cycle reports
/// every broken file.
pub async fn inspect_routes(root: &Path, config: &Config) -> Result<Vec<Route>, BuildFailure> {
    let routes_dir = config.routes_dir(root);
    let options = DiscoverOptions {
        static_prefix: config.routing.static_prefix.clone(),
    };
    let mut routes = discover_routes(&routes_dir, &options).map_err(BuildError::from)?;

    let mut errors: Vec<CompileError> = Vec::new();
    for route in routes.iter_mut().filter(|r| r.kind.is_script()) {
        let source = tokio::fs::read_to_string(&route.file)
            .await
            .map_err(|e| BuildError::io(&route.file, e))?;

        match analyze_module(&source, &route.file, &[]) {
            Ok(module) => {
                route.kind = resolve_kind(route, &module)?;
                debug!(route = %route.id, pattern = %route.pattern, kind = ?route.kind, "inspected route");
            }
            Err(err) => errors.push(err),
        }
    }

    if !errors.is_empty() {
        return Err(BuildFailure::Compile(errors));
    }

    info!(count = routes.len(), "inspected routes");
    Ok(routes)
}
