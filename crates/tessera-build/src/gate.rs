/// Holds development requests while a build is running
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tokio::sync::watch;

/// Shared count of builds in progress
///
/// The gate is open only when every `begin` has been matched by a
/// `finish`, so overlapping builds keep it closed until the last one ends.
/// In production mode the gate never blocks.
#[derive(Debug, Clone)]
pub struct BuildGate {
    active: watch::Sender<usize>,
    production: bool,
}

impl BuildGate {
    pub fn new(production: bool) -> Self {
        let (active, _) = watch::channel(0);
        Self { active, production }
    }

    pub fn is_pending(&self) -> bool {
        *self.active.borrow() > 0
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    /// Marks a build as started
    pub fn begin(&self) {
        self.active.send_modify(|active| *active += 1);
    }

    /// Marks one build as finished; waiters wake when none remain
    pub fn finish(&self) {
        self.active.send_modify(|active| *active = active.saturating_sub(1));
    }

    /// Resolves once no build is pending
    pub async fn wait(&self) {
        if self.production {
            return;
        }
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting.
        let _ = rx.wait_for(|active| *active == 0).await;
    }
}

/// Axum middleware delaying requests until the current build settles
///
/// ```no_run
/// use axum::{middleware, routing::get, Router};
/// use tessera_build::{wait_for_build, BuildGate};
///
/// let gate = BuildGate::new(false);
/// let app: Router = Router::new()
///     .route("/", get(|| async { "ok" }))
///     .layer(middleware::from_fn_with_state(gate, wait_for_build));
/// ```
pub async fn wait_for_build(State(gate): State<BuildGate>, request: Request, next: Next) -> Response {
    gate.wait().await;
    next.run(request).await
}
