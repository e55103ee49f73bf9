//! Integration tests for tessera-build
//!
//! Each test lays out a small project in a temp directory and runs real
//! build cycles against it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tessera_build::toolchain::{BuildContext, BuildOutput, ContextOptions, Inputs};
use tessera_build::*;
use tessera_router::route_id;
use tessera_transform::function_id;

const INDEX: &str = r#"import { useLoader } from "tessera/client";
import { getPosts } from "../lib/posts.js";

export default function Home() {
  const posts = useLoader(getPosts);
  return posts.length;
}
"#;

const POST: &str = r#"import { db } from "../../lib/db.js";

async function loadPost(id) {
  return db.get(id);
}

export default function Post({ params }) {
  return useLoader(loadPost, params.id);
}
"#;

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        let project = Project {
            dir: tempfile::tempdir().unwrap(),
        };
        project.write("tessera.toml", "[project]\nname = \"blog\"\n");
        project.write("routes/_layout.jsx", "export default function Layout({ children }) {\n  return children;\n}\n");
        project.write("routes/index.jsx", INDEX);
        project.write("routes/blog/$id.jsx", POST);
        project.write("routes/api/health.js", "export function get() {\n  return \"ok\";\n}\n");
        project.write("routes/static/robots.txt", "User-agent: *\n");
        project.write("lib/posts.js", "import { db } from \"./db.js\";\n\nexport async function getPosts() {\n  return db.all();\n}\n");
        project.write("lib/db.js", "export const db = { all() { return []; }, get(id) { return id; } };\n");
        project
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap()
    }

    /// Path of a hashed asset from its manifest URL
    fn asset(&self, url: &str) -> PathBuf {
        self.path(".tessera/public").join(url.trim_start_matches("/_tessera/"))
    }
}

// ============================================================================
// End-to-end cycle
// ============================================================================

#[tokio::test]
async fn test_full_build_writes_every_artifact() {
    let project = Project::new();
    let orchestrator = Orchestrator::new(project.root());
    let manifest = orchestrator.build().await.unwrap();

    let index_id = route_id("index.jsx");
    let post_id = route_id("blog/$id.jsx");
    assert_eq!(manifest.page_files.len(), 2);
    assert!(manifest.page_files[&index_id].starts_with(&format!("/_tessera/{}-", index_id)));
    assert!(manifest.bootstrap_file.starts_with("/_tessera/bootstrap-"));
    for url in manifest.page_files.values().chain([&manifest.bootstrap_file]) {
        assert!(project.asset(url).is_file(), "missing asset {}", url);
    }

    let on_disk: Manifest = serde_json::from_str(&project.read(".tessera/manifest.json")).unwrap();
    assert_eq!(on_disk, manifest);

    let routes = project.read(".tessera/routes.js");
    assert!(routes.contains("from \"/routes/blog/$id.jsx\";"));
    assert!(routes.contains("type: \"handler\""));
    assert!(routes.contains("methods: [\"get\"]"));
    assert!(routes.contains(&format!("id: \"{}\"", post_id)));

    let get_posts = function_id("fn_", "lib/posts.js", "getPosts");
    let load_post = function_id("fn_", "routes/blog/$id.jsx", "loadPost");
    let registry = project.read(".tessera/registry.js");
    assert!(registry.contains("getPosts as f"));
    assert!(registry.contains("loadPost as f"));
    assert!(registry.contains(&format!("\"{}\":", get_posts)));
    assert!(registry.contains(&format!("\"{}\":", load_post)));
    assert_eq!(orchestrator.registry().lock().unwrap().len(), 2);

    assert!(project.path(".tessera/server/controller.js").is_file());
    let server_post = project.read(".tessera/server/_m/routes/blog/$id.jsx.js");
    assert!(server_post.contains("async function loadPost(id)"));
    assert!(server_post.contains("export { loadPost };"));
}

#[tokio::test]
async fn test_client_bundle_never_contains_server_functions() {
    let project = Project::new();
    Orchestrator::new(project.root()).build().await.unwrap();

    let index = project.read(".tessera/public/_m/routes/index.jsx.js");
    assert!(index.contains(&function_id("fn_", "lib/posts.js", "getPosts")));
    assert!(!index.contains("getPosts"));
    assert!(!index.contains("lib/posts"));

    let post = project.read(".tessera/public/_m/routes/blog/$id.jsx.js");
    assert!(!post.contains("async function loadPost"));
    assert!(!post.contains("db.get"));

    assert!(!project.path(".tessera/public/_m/lib/posts.js").exists());
    assert!(!project.path(".tessera/public/_m/lib/db.js").exists());
}

#[tokio::test]
async fn test_client_bundle_never_contains_exported_server_functions() {
    let project = Project::new();
    project.write(
        "routes/blog/$id.jsx",
        r#"import { db } from "../../lib/db.js";

export async function getPost(id) {
  return db.get(id);
}

async function loadComments(id) {
  return db.all(id);
}

export const savePost = async (post) => db.put(post);

export default function Post({ params }) {
  const post = useLoader(getPost, params.id);
  const comments = useLoader(loadComments, params.id);
  const save = useAction(savePost);
  return [post, comments, save];
}
"#,
    );
    let orchestrator = Orchestrator::new(project.root());
    orchestrator.build().await.unwrap();

    let post = project.read(".tessera/public/_m/routes/blog/$id.jsx.js");
    for leaked in ["getPost", "loadComments", "savePost", "db.get", "db.all", "db.put", "lib/db"] {
        assert!(!post.contains(leaked), "server code `{}` in client bundle", leaked);
    }
    for name in ["getPost", "loadComments", "savePost"] {
        assert!(post.contains(&function_id("fn_", "routes/blog/$id.jsx", name)));
    }
    assert!(!project.path(".tessera/public/_m/lib/db.js").exists());

    assert_eq!(orchestrator.registry().lock().unwrap().len(), 4);
    let server_post = project.read(".tessera/server/_m/routes/blog/$id.jsx.js");
    assert!(server_post.contains("export async function getPost(id)"));
    assert!(server_post.contains("export { loadComments };"));
    let registry = project.read(".tessera/registry.js");
    for name in ["getPost as f", "loadComments as f", "savePost as f"] {
        assert!(registry.contains(name), "registry missing {}", name);
    }
}

#[tokio::test]
async fn test_rebuilds_only_change_affected_assets() {
    let project = Project::new();
    let orchestrator = Orchestrator::new(project.root());
    let first = orchestrator.build().await.unwrap();

    let second = orchestrator.build().await.unwrap();
    assert_eq!(second, first);

    // Server-only code is not part of any client graph
    project.write("lib/db.js", "export const db = { all() { return [1]; }, get(id) { return id; } };\n");
    let third = orchestrator.build().await.unwrap();
    assert_eq!(third, first);

    let index_id = route_id("index.jsx");
    project.write("routes/index.jsx", &INDEX.replace("posts.length", "posts.length + 1"));
    let fourth = orchestrator.build().await.unwrap();
    assert_ne!(fourth.page_files[&index_id], first.page_files[&index_id]);
    assert_eq!(
        fourth.page_files[&route_id("blog/$id.jsx")],
        first.page_files[&route_id("blog/$id.jsx")]
    );
    assert!(!project.asset(&first.page_files[&index_id]).exists());
    assert!(project.asset(&fourth.page_files[&index_id]).exists());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_missing_config_fails_and_returns_to_idle() {
    let project = Project::new();
    fs::remove_file(project.path("tessera.toml")).unwrap();

    let orchestrator = Orchestrator::new(project.root());
    let phase = orchestrator.phase();
    let err = orchestrator.build().await.unwrap_err();
    assert!(matches!(err, BuildFailure::Build(BuildError::MissingConfig(_))));
    assert_eq!(*phase.borrow(), Phase::Idle);
}

#[tokio::test]
async fn test_compile_error_then_recovery() {
    let project = Project::new();
    project.write("lib/posts.js", "export const = 1;\n");
    let orchestrator = Orchestrator::new(project.root());

    match orchestrator.build().await.unwrap_err() {
        BuildFailure::Compile(errors) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].file, project.path("lib/posts.js"));
            assert_eq!(errors[0].line, 1);
        }
        other => panic!("expected compile failure, got {}", other),
    }

    project.write("lib/posts.js", "export async function getPosts() {\n  return [];\n}\n");
    orchestrator.build().await.unwrap();
}

#[tokio::test]
async fn test_guessed_page_without_default_export_stops_build() {
    let project = Project::new();
    project.write("routes/about.jsx", "export const title = \"About\";\n");
    let err = Orchestrator::new(project.root()).build().await.unwrap_err();
    assert!(matches!(
        err,
        BuildFailure::Build(BuildError::MissingDefaultExport { .. })
    ));
}

// ============================================================================
// Stage contexts and run coalescing
// ============================================================================

/// Delegates to [`ModuleToolchain`] while counting created contexts
struct CountingToolchain {
    inner: ModuleToolchain,
    contexts: Arc<AtomicUsize>,
}

#[async_trait]
impl Toolchain for CountingToolchain {
    async fn context(&self, options: ContextOptions) -> Result<Box<dyn BuildContext>, BuildError> {
        self.contexts.fetch_add(1, Ordering::SeqCst);
        self.inner.context(options).await
    }
}

#[tokio::test]
async fn test_config_change_recreates_contexts() {
    let project = Project::new();
    let contexts = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::with_toolchain(
        project.root(),
        Arc::new(CountingToolchain {
            inner: ModuleToolchain::new(),
            contexts: contexts.clone(),
        }),
    );

    orchestrator.build().await.unwrap();
    orchestrator.build().await.unwrap();
    assert_eq!(contexts.load(Ordering::SeqCst), 2);

    project.write("tessera.toml", "[build]\nexternal = [\"pg\"]\n");
    orchestrator.build().await.unwrap();
    assert_eq!(contexts.load(Ordering::SeqCst), 4);
}

/// Slow toolchain counting client rebuilds
struct SlowToolchain {
    rebuilds: Arc<AtomicUsize>,
    delay: Duration,
}

impl SlowToolchain {
    fn new(rebuilds: Arc<AtomicUsize>) -> Self {
        Self {
            rebuilds,
            delay: Duration::from_millis(50),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

struct SlowContext {
    stage: String,
    rebuilds: Arc<AtomicUsize>,
    delay: Duration,
}

#[async_trait]
impl Toolchain for SlowToolchain {
    async fn context(&self, options: ContextOptions) -> Result<Box<dyn BuildContext>, BuildError> {
        Ok(Box::new(SlowContext {
            stage: options.stage,
            rebuilds: self.rebuilds.clone(),
            delay: self.delay,
        }))
    }
}

#[async_trait]
impl BuildContext for SlowContext {
    fn update_inputs(&mut self, _inputs: Inputs) {}

    async fn rebuild(&mut self) -> Result<BuildOutput, Vec<CompileError>> {
        if self.stage == CLIENT_STAGE {
            self.rebuilds.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        Ok(BuildOutput::default())
    }

    async fn dispose(&mut self) {}
}

#[tokio::test]
async fn test_runs_during_a_build_coalesce_into_one() {
    let project = Project::new();
    let rebuilds = Arc::new(AtomicUsize::new(0));
    let orchestrator = Arc::new(Orchestrator::with_toolchain(
        project.root(),
        Arc::new(SlowToolchain::new(rebuilds.clone())),
    ));

    let mut phase = orchestrator.phase();
    let first = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run().await })
    };
    phase.wait_for(|p| *p == Phase::BundlingClient).await.unwrap();

    // Both return immediately; together they schedule a single rerun
    orchestrator.run().await;
    orchestrator.run().await;

    first.await.unwrap();
    assert_eq!(rebuilds.load(Ordering::SeqCst), 2);
    assert!(!orchestrator.gate().is_pending());
    assert_eq!(*orchestrator.phase().borrow(), Phase::Idle);
}

#[tokio::test]
async fn test_gate_stays_closed_while_any_run_is_building() {
    let gate = BuildGate::new(false);
    let (fast_project, slow_project) = (Project::new(), Project::new());
    let fast = Orchestrator::with_toolchain(
        fast_project.root(),
        Arc::new(SlowToolchain::new(Arc::new(AtomicUsize::new(0))).with_delay(Duration::from_millis(10))),
    )
    .with_gate(gate.clone());
    let slow = Arc::new(
        Orchestrator::with_toolchain(
            slow_project.root(),
            Arc::new(SlowToolchain::new(Arc::new(AtomicUsize::new(0))).with_delay(Duration::from_millis(300))),
        )
        .with_gate(gate.clone()),
    );

    let mut slow_phase = slow.phase();
    let slow_run = {
        let slow = slow.clone();
        tokio::spawn(async move { slow.run().await })
    };
    slow_phase.wait_for(|p| *p == Phase::BundlingClient).await.unwrap();

    // The fast run begins and ends inside the slow one
    fast.run().await;
    assert!(gate.is_pending());

    slow_run.await.unwrap();
    assert!(!gate.is_pending());
}

#[tokio::test]
async fn test_back_to_back_runs_leave_gate_open() {
    let project = Project::new();
    let orchestrator = Arc::new(Orchestrator::with_toolchain(
        project.root(),
        Arc::new(SlowToolchain::new(Arc::new(AtomicUsize::new(0))).with_delay(Duration::from_millis(5))),
    ));
    let gate = orchestrator.gate();

    for _ in 0..20 {
        let runs: Vec<_> = (0..3)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move { orchestrator.run().await })
            })
            .collect();
        for run in runs {
            run.await.unwrap();
        }
        assert!(!gate.is_pending());
    }
}

#[tokio::test]
async fn test_run_survives_failures() {
    let project = Project::new();
    project.write("routes/about.jsx", "export const title = 1;\n");
    let orchestrator = Orchestrator::new(project.root());

    orchestrator.run().await;
    assert!(!project.path(".tessera/manifest.json").exists());

    fs::remove_file(project.path("routes/about.jsx")).unwrap();
    orchestrator.run().await;
    assert!(project.path(".tessera/manifest.json").exists());
}

// ============================================================================
// Build gate middleware
// ============================================================================

#[tokio::test]
async fn test_gate_holds_requests_until_build_finishes() {
    use axum::{body::Body, http::Request, middleware, routing::get, Router};
    use tower::ServiceExt;

    let gate = BuildGate::new(false);
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .layer(middleware::from_fn_with_state(gate.clone(), wait_for_build));

    gate.begin();
    let request = tokio::spawn(app.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!request.is_finished());

    gate.finish();
    let response = request.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
}
