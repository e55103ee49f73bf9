// File: src/orchestrator.rs
// Purpose: Build cycle state machine, run coalescing and stage wiring

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tessera_router::{Route, Router};
use tessera_transform::FunctionRegistry;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::codegen::{
    bootstrap_id, bootstrap_module, controller_id, controller_module, page_shim, page_shim_id,
    registry_module, routes_module, BOOTSTRAP_ENTRY, CONTROLLER_ENTRY, REGISTRY_FILE, ROUTES_FILE,
};
use crate::hooks::run_hook;
use crate::inspect::inspect_routes;
use crate::manifest::{remove_stale_assets, write_manifest, Manifest};
use crate::plugin::RegistryPlugin;
use crate::stage::StageContexts;
use crate::supervisor::ServerSupervisor;
use crate::toolchain::{
    ContextOptions, Entry, EntryNames, Inputs, ModuleId, ModuleToolchain, Toolchain,
};
use crate::{BuildError, BuildFailure, BuildGate, Config, Overrides, Phase};

pub const CLIENT_STAGE: &str = "client";
pub const SERVER_STAGE: &str = "server";

/// Client assets, under the build directory
pub const PUBLIC_DIR: &str = "public";
/// Server bundle, under the build directory
pub const SERVER_DIR: &str = "server";

struct BuildState {
    stages: StageContexts,
    build_hook_ran: bool,
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    pending: bool,
}

/// Drives build cycles for one project
///
/// Cycles are serialized by an async mutex; [`run`](Self::run) coalesces
/// requests arriving during a cycle into a single follow-up cycle. The
/// function registry is owned here and handed to the client stage.
pub struct Orchestrator {
    root: PathBuf,
    overrides: Overrides,
    registry: Arc<Mutex<FunctionRegistry>>,
    state: tokio::sync::Mutex<BuildState>,
    phase: watch::Sender<Phase>,
    run_state: Mutex<RunState>,
    gate: BuildGate,
    supervisor: Option<tokio::sync::Mutex<ServerSupervisor>>,
}

impl Orchestrator {
    /// Creates an orchestrator using the built-in [`ModuleToolchain`]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_toolchain(root, Arc::new(ModuleToolchain::new()))
    }

    pub fn with_toolchain(root: impl Into<PathBuf>, toolchain: Arc<dyn Toolchain>) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            root: root.into(),
            overrides: Overrides::default(),
            registry: Arc::new(Mutex::new(FunctionRegistry::new())),
            state: tokio::sync::Mutex::new(BuildState {
                stages: StageContexts::new(toolchain),
                build_hook_ran: false,
            }),
            phase,
            run_state: Mutex::new(RunState::default()),
            gate: BuildGate::new(false),
            supervisor: None,
        }
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_gate(mut self, gate: BuildGate) -> Self {
        self.gate = gate;
        self
    }

    /// Keeps a server process running after every successful cycle
    pub fn with_supervisor(mut self, supervisor: ServerSupervisor) -> Self {
        self.supervisor = Some(tokio::sync::Mutex::new(supervisor));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn gate(&self) -> BuildGate {
        self.gate.clone()
    }

    /// Observes the current phase
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn registry(&self) -> Arc<Mutex<FunctionRegistry>> {
        self.registry.clone()
    }

    fn set_phase(&self, phase: Phase) {
        debug!(phase = %phase, "entering phase");
        self.phase.send_replace(phase);
    }

    fn lock_registry(&self) -> MutexGuard<'_, FunctionRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Cycles
    // ========================================================================

    /// Runs one build cycle and returns the manifest it produced
    ///
    /// The phase is back at [`Phase::Idle`] when this returns, whatever the
    /// outcome.
    pub async fn build(&self) -> Result<Manifest, BuildFailure> {
        self.build_cycle().await.map(|(manifest, _)| manifest)
    }

    async fn build_cycle(&self) -> Result<(Manifest, Config), BuildFailure> {
        let mut state = self.state.lock().await;
        let result = self.cycle(&mut state).await;
        self.set_phase(Phase::Idle);
        result
    }

    async fn cycle(&self, state: &mut BuildState) -> Result<(Manifest, Config), BuildFailure> {
        let started = Instant::now();

        self.set_phase(Phase::ValidatingConfig);
        let config = Config::load(&self.root)?.with_overrides(&self.overrides);
        if !state.build_hook_ran {
            run_hook("build", &config.hooks.build, &self.root).await?;
            state.build_hook_ran = true;
        }
        let out_dir = config.out_dir(&self.root);

        self.set_phase(Phase::InspectingRoutes);
        let router = Router::from_routes(inspect_routes(&self.root, &config).await?);

        self.set_phase(Phase::SynthesizingRoutesModule);
        write_if_changed(&out_dir.join(ROUTES_FILE), &routes_module(&self.root, router.routes())).await?;

        self.set_phase(Phase::GeneratingClientShims);
        let client_inputs = self.client_inputs(&config, &router);

        self.set_phase(Phase::BundlingClient);
        self.lock_registry().clear();
        let client_output = state
            .stages
            .build(
                CLIENT_STAGE,
                &config.fingerprint(CLIENT_STAGE),
                || self.client_options(&config),
                client_inputs,
            )
            .await?;

        self.set_phase(Phase::ReconcilingManifest);
        let manifest = Manifest::from_output(&client_output, &config.build.public_path);
        write_manifest(&out_dir, &manifest).await?;
        remove_stale_assets(&out_dir.join(PUBLIC_DIR), &client_output).await?;

        self.set_phase(Phase::BundlingServerController);
        let registry_source = registry_module(&self.root, &self.lock_registry());
        write_if_changed(&out_dir.join(REGISTRY_FILE), &registry_source).await?;

        let mut server_inputs = Inputs::default();
        server_inputs
            .virtual_modules
            .insert(controller_id(), controller_module(&self.root, &config, &manifest));
        server_inputs.entries.push(Entry {
            name: CONTROLLER_ENTRY.to_string(),
            module: ModuleId::Virtual(controller_id()),
        });
        state
            .stages
            .build(
                SERVER_STAGE,
                &config.fingerprint(SERVER_STAGE),
                || self.server_options(&config),
                server_inputs,
            )
            .await?;

        info!(
            routes = router.routes().len(),
            pages = manifest.page_files.len(),
            functions = self.lock_registry().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build complete"
        );
        Ok((manifest, config))
    }

    fn client_inputs(&self, config: &Config, router: &Router) -> Inputs {
        let mut inputs = Inputs::default();
        let runtime = &config.build.client_runtime;

        for page in router.routes().iter().filter(|r| r.kind.is_page()) {
            let layouts: Vec<&Route> = page.parents.iter().filter_map(|id| router.get(id)).collect();
            let id = page_shim_id(&page.id);
            inputs
                .virtual_modules
                .insert(id.clone(), page_shim(&self.root, runtime, page, &layouts));
            inputs.entries.push(Entry {
                name: page.id.clone(),
                module: ModuleId::Virtual(id),
            });
        }

        inputs
            .virtual_modules
            .insert(bootstrap_id(), bootstrap_module(runtime, router.routes()));
        inputs.entries.push(Entry {
            name: BOOTSTRAP_ENTRY.to_string(),
            module: ModuleId::Virtual(bootstrap_id()),
        });
        inputs
    }

    fn client_options(&self, config: &Config) -> ContextOptions {
        ContextOptions {
            stage: CLIENT_STAGE.to_string(),
            root: self.root.clone(),
            out_dir: config.out_dir(&self.root).join(PUBLIC_DIR),
            entry_names: EntryNames::Hashed,
            external: config.build.external.clone(),
            define: config.build.define.clone(),
            minify: config.build.minify,
            plugins: vec![Arc::new(RegistryPlugin::client(
                &self.root,
                config,
                self.registry.clone(),
            ))],
        }
    }

    fn server_options(&self, config: &Config) -> ContextOptions {
        ContextOptions {
            stage: SERVER_STAGE.to_string(),
            root: self.root.clone(),
            out_dir: config.out_dir(&self.root).join(SERVER_DIR),
            entry_names: EntryNames::Plain,
            external: config.build.external.clone(),
            define: config.build.define.clone(),
            minify: config.build.minify,
            plugins: vec![Arc::new(RegistryPlugin::server(&self.root, config))],
        }
    }

    // ========================================================================
    // Coalesced runs
    // ========================================================================

    /// Builds, then keeps the server running; never fails
    ///
    /// A call arriving while a run is in progress only marks a rerun as
    /// pending and returns; the in-progress call performs exactly one more
    /// cycle after its current one.
    pub async fn run(&self) {
        {
            let mut run_state = self.lock_run_state();
            if run_state.running {
                run_state.pending = true;
                debug!("build in progress, rerun scheduled");
                return;
            }
            run_state.running = true;
            self.gate.begin();
        }

        loop {
            match self.build_cycle().await {
                Ok((_, config)) => self.ensure_server(&config).await,
                Err(failure) => {
                    error!(kind = failure.kind(), "build failed:\n{}", failure);
                }
            }

            let rerun = {
                let mut run_state = self.lock_run_state();
                if run_state.pending {
                    run_state.pending = false;
                    true
                } else {
                    // Gate transitions happen under the run-state lock
                    self.gate.finish();
                    run_state.running = false;
                    false
                }
            };
            if !rerun {
                break;
            }
        }
    }

    fn lock_run_state(&self) -> MutexGuard<'_, RunState> {
        self.run_state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn ensure_server(&self, config: &Config) {
        let Some(supervisor) = &self.supervisor else {
            return;
        };
        if let Err(err) = supervisor.lock().await.ensure_running(config).await {
            error!(kind = "build", "{}", err);
        }
    }

    /// Disposes every build context and stops the server
    pub async fn shutdown(&self) {
        self.state.lock().await.stages.dispose_all().await;
        if let Some(supervisor) = &self.supervisor {
            let grace = Config::load(&self.root)
                .map(|c| c.server.grace_period_ms)
                .unwrap_or(2000);
            supervisor.lock().await.shutdown(Duration::from_millis(grace)).await;
        }
    }
}

/// Writes a generated file unless it already has this content
async fn write_if_changed(path: &Path, contents: &str) -> Result<(), BuildError> {
    if let Ok(existing) = tokio::fs::read_to_string(path).await {
        if existing == contents {
            return Ok(());
        }
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| BuildError::io(parent, e))?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| BuildError::io(path, e))
}
