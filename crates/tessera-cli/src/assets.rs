/// Serves built client assets during development
use std::path::Path;

use axum::{middleware, Router};
use tessera_build::{wait_for_build, BuildGate};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Mount point for `public_path`, without a trailing slash
///
/// An empty result means the assets are served from the root.
fn mount_point(public_path: &str) -> String {
    let trimmed = public_path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

/// Router serving `public_dir` under `public_path`
///
/// Requests wait while a build is in progress so a page never loads a
/// half-written bundle.
pub fn router(public_dir: &Path, public_path: &str, gate: BuildGate) -> Router {
    let files = ServeDir::new(public_dir);
    let mount = mount_point(public_path);
    let router = if mount.is_empty() {
        Router::new().fallback_service(files)
    } else {
        Router::new().nest_service(&mount, files)
    };

    router
        .layer(middleware::from_fn_with_state(gate, wait_for_build))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_mount_point() {
        assert_eq!(mount_point("/_tessera/"), "/_tessera");
        assert_eq!(mount_point("assets"), "/assets");
        assert_eq!(mount_point("/"), "");
    }

    #[tokio::test]
    async fn test_serves_public_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index-abc123.js"), "export {};").unwrap();
        let app = router(dir.path(), "/_tessera/", BuildGate::new(false));

        let response = app
            .clone()
            .oneshot(Request::get("/_tessera/index-abc123.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let missing = app
            .oneshot(Request::get("/_tessera/gone.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
