//! Generated modules
//!
//! Everything here is plain JavaScript text. Project files are imported
//! through root-relative specifiers (`/routes/index.jsx`) which the
//! toolchain resolves against the project root; runtime packages are bare
//! specifiers taken from the configuration.

use std::path::Path;

use serde_json::json;
use tessera_router::{Route, RouteKind};
use tessera_transform::{relative_to, FunctionRegistry};

use crate::toolchain::VIRTUAL_PREFIX;
use crate::{Config, Manifest};

// ============================================================================
// Names
// ============================================================================

pub const ROUTES_FILE: &str = "routes.js";
pub const REGISTRY_FILE: &str = "registry.js";

/// Entry name of the client bootstrap bundle
pub const BOOTSTRAP_ENTRY: &str = "bootstrap";
/// Entry name of the server bundle
pub const CONTROLLER_ENTRY: &str = "controller";

pub fn bootstrap_id() -> String {
    format!("{}bootstrap", VIRTUAL_PREFIX)
}

pub fn controller_id() -> String {
    format!("{}controller", VIRTUAL_PREFIX)
}

/// Virtual id of a page's hydration shim
pub fn page_shim_id(route_id: &str) -> String {
    format!("{}page/{}", VIRTUAL_PREFIX, route_id)
}

/// Root-relative import specifier of a project file
pub fn root_specifier(root: &Path, file: &Path) -> String {
    format!("/{}", relative_to(root, file))
}

fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn module_binding(route_id: &str) -> String {
    format!("route_{}", route_id)
}

// ============================================================================
// Route table
// ============================================================================

/// Source of `routes.js`: the route table imported by the server controller
///
/// Every script route's module is imported; static routes carry their
/// root-relative file instead.
pub fn routes_module(root: &Path, routes: &[Route]) -> String {
    let mut out = String::new();
    for route in routes.iter().filter(|r| r.kind.is_script()) {
        out.push_str(&format!(
            "import * as {} from {};\n",
            module_binding(&route.id),
            quote(&root_specifier(root, &route.file))
        ));
    }
    out.push_str("\nexport default [\n");

    for route in routes {
        let mut fields = vec![
            format!("id: {}", quote(&route.id)),
            format!("type: {}", quote(kind_name(&route.kind))),
            format!("pattern: {}", quote(&route.pattern)),
            format!("params: {}", json!(route.params)),
            format!("parents: {}", json!(route.parents)),
        ];
        match &route.kind {
            RouteKind::Static => {
                fields.push(format!("file: {}", quote(&root_specifier(root, &route.file))));
            }
            RouteKind::Page(exports) => {
                fields.push(format!("module: {}", module_binding(&route.id)));
                fields.push(format!("loader: {}", exports.loader));
                fields.push(format!("getMetadata: {}", exports.get_metadata));
            }
            RouteKind::Handler(methods) => {
                fields.push(format!("module: {}", module_binding(&route.id)));
                fields.push(format!("methods: {}", json!(methods.exported())));
            }
            RouteKind::Layout | RouteKind::PageOrHandler => {
                fields.push(format!("module: {}", module_binding(&route.id)));
            }
        }
        out.push_str(&format!("  {{ {} }},\n", fields.join(", ")));
    }

    out.push_str("];\n");
    out
}

fn kind_name(kind: &RouteKind) -> &'static str {
    match kind {
        RouteKind::Layout => "layout",
        RouteKind::Page(_) => "page",
        RouteKind::Handler(_) => "handler",
        RouteKind::Static => "static",
        RouteKind::PageOrHandler => "pageOrHandler",
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Source of `registry.js`: function id → implementation
pub fn registry_module(root: &Path, registry: &FunctionRegistry) -> String {
    let mut imports = String::new();
    let mut table = String::from("export default {\n");

    for (i, (id, entry)) in registry.iter().enumerate() {
        let alias = format!("f{}", i);
        imports.push_str(&format!(
            "import {{ {} as {} }} from {};\n",
            entry.name,
            alias,
            quote(&root_specifier(root, &entry.file))
        ));
        table.push_str(&format!("  {}: {},\n", quote(id), alias));
    }
    table.push_str("};\n");

    if imports.is_empty() {
        table
    } else {
        format!("{}\n{}", imports, table)
    }
}

// ============================================================================
// Client shims
// ============================================================================

/// Hydration shim for one page: imports its layout chain and the page
///
/// `layouts` is the page's parent chain, outermost first.
pub fn page_shim(root: &Path, client_runtime: &str, page: &Route, layouts: &[&Route]) -> String {
    let mut out = format!("import {{ hydrate }} from {};\n", quote(client_runtime));
    let mut names = Vec::new();
    for (i, layout) in layouts.iter().enumerate() {
        let name = format!("layout{}", i);
        out.push_str(&format!(
            "import * as {} from {};\n",
            name,
            quote(&root_specifier(root, &layout.file))
        ));
        names.push(name);
    }
    out.push_str(&format!(
        "import * as page from {};\n",
        quote(&root_specifier(root, &page.file))
    ));
    out.push_str(&format!(
        "\nhydrate({{ routeId: {}, layouts: [{}], page }});\n",
        quote(&page.id),
        names.join(", ")
    ));
    out
}

/// Client bootstrap: the page route table without any module code
pub fn bootstrap_module(client_runtime: &str, routes: &[Route]) -> String {
    let pages: Vec<_> = routes
        .iter()
        .filter(|r| r.kind.is_page())
        .map(|r| json!({ "id": r.id, "pattern": r.pattern, "parents": r.parents }))
        .collect();
    format!(
        "import {{ bootstrap }} from {};\n\nbootstrap({{ routes: {} }});\n",
        quote(client_runtime),
        serde_json::Value::Array(pages)
    )
}

// ============================================================================
// Server controller
// ============================================================================

/// Server entry: wires routes, registry, middleware and the manifest together
pub fn controller_module(root: &Path, config: &Config, manifest: &Manifest) -> String {
    let out_dir = config.out_dir(root);
    let mut out = format!(
        "import {{ createController }} from {};\n",
        quote(&config.build.server_runtime)
    );
    out.push_str(&format!(
        "import routes from {};\n",
        quote(&root_specifier(root, &out_dir.join(ROUTES_FILE)))
    ));
    out.push_str(&format!(
        "import registry from {};\n",
        quote(&root_specifier(root, &out_dir.join(REGISTRY_FILE)))
    ));

    let mut middleware = Vec::new();
    for (i, module) in config.build.middleware.iter().enumerate() {
        let name = format!("middleware{}", i);
        out.push_str(&format!(
            "import * as {} from {};\n",
            name,
            quote(&format!("/{}", module.trim_start_matches("./").trim_start_matches('/')))
        ));
        middleware.push(name);
    }

    let manifest_json = serde_json::to_string(manifest).unwrap_or_else(|_| "{}".to_string());
    let cookies = json!({
        "path": config.cookies.path,
        "httpOnly": config.cookies.http_only,
        "secure": config.cookies.secure,
        "sameSite": config.cookies.same_site,
    });
    out.push_str(&format!(
        "\nexport default createController({{\n  routes,\n  registry,\n  middleware: [{}],\n  manifest: {},\n  cookies: {},\n  production: {},\n}});\n",
        middleware.join(", "),
        manifest_json,
        cookies,
        config.server.production
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tessera_router::{MethodTable, PageExports, Router};
    use tessera_transform::RegistryEntry;

    fn route(rel: &str, kind: RouteKind) -> Route {
        Route::from_relative_path(PathBuf::from("/app/routes").join(rel), rel, kind)
    }

    fn routes() -> Vec<Route> {
        Router::from_routes(vec![
            route("_layout.jsx", RouteKind::Layout),
            route(
                "blog/$id.jsx",
                RouteKind::Page(PageExports {
                    loader: true,
                    get_metadata: false,
                }),
            ),
            route(
                "api/users.js",
                RouteKind::Handler(MethodTable {
                    get: true,
                    ..Default::default()
                }),
            ),
            route("static/logo.svg", RouteKind::Static),
        ])
        .with_resolved_parents()
        .routes()
        .to_vec()
    }

    #[test]
    fn test_routes_module_imports_script_routes() {
        let code = routes_module(Path::new("/app"), &routes());
        assert!(code.contains("from \"/routes/blog/$id.jsx\";"));
        assert!(code.contains("from \"/routes/_layout.jsx\";"));
        assert!(!code.contains("from \"/routes/static/logo.svg\""));
        assert!(code.contains("file: \"/routes/static/logo.svg\""));
        assert!(code.contains("methods: [\"get\"]"));
        assert!(code.contains("pattern: \"/blog/:id\""));

        let lines: Vec<&str> = code.lines().collect();
        assert!(lines.iter().filter(|l| l.starts_with("import ")).all(|l| l.ends_with("\";")));
        assert!(lines.iter().filter(|l| l.starts_with("  {")).all(|l| l.ends_with("},")));
        assert!(code.ends_with("\n];\n"));
    }

    #[test]
    fn test_registry_module() {
        let mut registry = FunctionRegistry::new();
        registry
            .insert(
                "fn_a".to_string(),
                RegistryEntry {
                    file: PathBuf::from("/app/lib/users.ts"),
                    name: "default".to_string(),
                },
            )
            .unwrap();
        assert_eq!(
            registry_module(Path::new("/app"), &registry),
            "import { default as f0 } from \"/lib/users.ts\";\n\nexport default {\n  \"fn_a\": f0,\n};\n"
        );
        assert_eq!(
            registry_module(Path::new("/app"), &FunctionRegistry::new()),
            "export default {\n};\n"
        );
    }

    #[test]
    fn test_page_shim_orders_layouts_outermost_first() {
        let routes = routes();
        let router = Router::from_routes(routes.clone());
        let page = routes.iter().find(|r| r.kind.is_page()).unwrap();
        let layouts: Vec<&Route> = page.parents.iter().filter_map(|id| router.get(id)).collect();

        let code = page_shim(Path::new("/app"), "tessera/client", page, &layouts);
        assert!(code.starts_with("import { hydrate } from \"tessera/client\";\n"));
        assert!(code.contains("import * as layout0 from \"/routes/_layout.jsx\";"));
        assert!(code.contains(&format!("hydrate({{ routeId: \"{}\", layouts: [layout0], page }});", page.id)));
    }

    #[test]
    fn test_controller_embeds_manifest() {
        let mut config = Config::default();
        config.build.middleware = vec!["./middleware/auth.js".to_string()];
        let manifest = Manifest {
            page_files: BTreeMap::from([("abc".to_string(), "/_tessera/abc-1234.js".to_string())]),
            bootstrap_file: "/_tessera/bootstrap-5678.js".to_string(),
        };

        let code = controller_module(Path::new("/app"), &config, &manifest);
        assert!(code.contains("import routes from \"/.tessera/routes.js\";"));
        assert!(code.contains("import registry from \"/.tessera/registry.js\";"));
        assert!(code.contains("import * as middleware0 from \"/middleware/auth.js\";"));
        assert!(code.contains("\"bootstrapFile\":\"/_tessera/bootstrap-5678.js\""));
        assert!(code.contains("\"httpOnly\":true"));
    }

    #[test]
    fn test_bootstrap_lists_pages_only() {
        let code = bootstrap_module("tessera/client", &routes());
        assert!(code.contains("\"pattern\":\"/blog/:id\""));
        assert!(!code.contains("/api/users"));
    }
}
