//! # Tessera Build
//!
//! The build orchestrator. One cycle:
//!
//! ```text
//! validating-config → inspecting-routes → synthesizing-routes-module →
//! generating-client-shims → bundling-client → reconciling-manifest →
//! bundling-server-controller → idle
//! ```
//!
//! Both bundles go through persistent [`toolchain::BuildContext`]s that are
//! reused across cycles while their configuration fingerprint is unchanged.
//! The client bundle fills the [`FunctionRegistry`] that the server
//! controller is generated from.
//!
//! Build directory layout (default `.tessera/`):
//!
//! ```text
//! routes.js              route table
//! registry.js            function id → implementation
//! manifest.json          hashed client asset URLs
//! public/                hashed client entries, modules under public/_m/
//! server/controller.js   server entry
//! ```
//!
//! [`FunctionRegistry`]: tessera_transform::FunctionRegistry

// ============================================================================
// Module Declarations
// ============================================================================

pub mod codegen;
pub mod config;
mod error;
mod gate;
mod hooks;
mod inspect;
mod manifest;
mod orchestrator;
mod phase;
mod plugin;
mod stage;
pub mod supervisor;
pub mod toolchain;
mod watch;

pub use config::{Config, Overrides, CONFIG_FILE};
pub use error::{BuildError, BuildFailure};
pub use gate::{wait_for_build, BuildGate};
pub use hooks::run_hook;
pub use inspect::{inspect_routes, resolve_kind};
pub use manifest::{remove_stale_assets, write_manifest, Manifest, MANIFEST_FILE};
pub use orchestrator::{Orchestrator, CLIENT_STAGE, PUBLIC_DIR, SERVER_DIR, SERVER_STAGE};
pub use phase::Phase;
pub use plugin::RegistryPlugin;
pub use stage::StageContexts;
pub use supervisor::{Launcher, ProcessLauncher, ServerSupervisor};
pub use tessera_transform::CompileError;
pub use toolchain::{ModuleToolchain, Toolchain};
pub use watch::{is_ignored, FileWatcher};
