/// Request-handling process supervision
///
/// The server is respawned only when the configured port changes; a
/// rebuilt controller is picked up by the running process itself.
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::hooks::run_hook;
use crate::{BuildError, Config};

/// Environment variable carrying the port to the server process
pub const PORT_ENV: &str = "PORT";
pub const PRODUCTION_ENV: &str = "TESSERA_PRODUCTION";
pub const BUILD_DIR_ENV: &str = "TESSERA_BUILD_DIR";

/// Everything needed to start one server process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: Vec<String>,
    pub port: u16,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

impl LaunchSpec {
    pub fn from_config(root: &Path, config: &Config) -> Self {
        Self {
            command: config.server.command.clone(),
            port: config.server.port,
            env: vec![
                (PORT_ENV.to_string(), config.server.port.to_string()),
                (PRODUCTION_ENV.to_string(), config.server.production.to_string()),
                (
                    BUILD_DIR_ENV.to_string(),
                    config.out_dir(root).to_string_lossy().into_owned(),
                ),
            ],
            cwd: root.to_path_buf(),
        }
    }
}

/// A running server process
#[async_trait]
pub trait ServerProcess: Send {
    /// Asks the process to shut down on its own
    async fn abort(&mut self);

    /// Waits for the process to exit
    async fn wait(&mut self);

    async fn kill(&mut self);
}

/// Starts server processes
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ServerProcess>, BuildError>;
}

/// Spawns the configured command as a child process
///
/// The abort signal is the closing of the child's stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLauncher;

struct ChildProcess {
    child: Child,
}

#[async_trait]
impl ServerProcess for ChildProcess {
    async fn abort(&mut self) {
        drop(self.child.stdin.take());
    }

    async fn wait(&mut self) {
        let _ = self.child.wait().await;
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(error = %e, "failed to kill server process");
        }
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ServerProcess>, BuildError> {
        let Some((program, args)) = spec.command.split_first() else {
            return Err(BuildError::Launch("server.command is empty".to_string()));
        };

        let child = Command::new(program)
            .args(args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BuildError::Launch(format!("{}: {}", spec.command.join(" "), e)))?;

        Ok(Box::new(ChildProcess { child }))
    }
}

struct Running {
    port: u16,
    process: Box<dyn ServerProcess>,
}

/// Keeps at most one server process alive
pub struct ServerSupervisor {
    root: PathBuf,
    launcher: Arc<dyn Launcher>,
    running: Option<Running>,
    start_hook_ran: bool,
}

impl ServerSupervisor {
    pub fn new(root: impl Into<PathBuf>, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            root: root.into(),
            launcher,
            running: None,
            start_hook_ran: false,
        }
    }

    /// Port of the running process, if any
    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.port)
    }

    /// Spawns the server unless one is already listening on the configured port
    ///
    /// Returns whether a process was spawned. A process on another port is
    /// aborted and given the grace period before being killed.
    pub async fn ensure_running(&mut self, config: &Config) -> Result<bool, BuildError> {
        let port = config.server.port;
        if self.port() == Some(port) {
            return Ok(false);
        }

        if !self.start_hook_ran {
            run_hook("start", &config.hooks.start, &self.root).await?;
            self.start_hook_ran = true;
        }

        if let Some(previous) = self.running.take() {
            info!(old_port = previous.port, new_port = port, "port changed, replacing server");
            stop(previous, Duration::from_millis(config.server.grace_period_ms)).await;
        }

        let spec = LaunchSpec::from_config(&self.root, config);
        let process = self.launcher.launch(&spec).await?;
        info!(port, command = %spec.command.join(" "), "server started");
        self.running = Some(Running { port, process });
        Ok(true)
    }

    /// Stops the running process, if any
    pub async fn shutdown(&mut self, grace: Duration) {
        if let Some(running) = self.running.take() {
            stop(running, grace).await;
        }
    }
}

async fn stop(mut running: Running, grace: Duration) {
    running.process.abort().await;
    if tokio::time::timeout(grace, running.process.wait()).await.is_err() {
        warn!(port = running.port, "server did not exit within grace period, killing");
        running.process.kill().await;
    }
}
