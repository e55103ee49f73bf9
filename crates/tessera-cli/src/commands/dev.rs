use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use tessera_build::{
    BuildGate, Config, FileWatcher, Orchestrator, ProcessLauncher, ServerSupervisor, PUBLIC_DIR,
};
use tracing::info;

use super::{overrides, runtime};
use crate::assets;

pub fn execute(root: PathBuf, port: Option<u16>, production: bool) -> Result<()> {
    println!("{}", "Preparing development environment...".green().bold());
    println!();

    runtime()?.block_on(run(root, port, production))
}

async fn run(root: PathBuf, port: Option<u16>, production: bool) -> Result<()> {
    let overrides = overrides(port, production);
    let config = Config::load(&root)
        .context("failed to load project configuration")?
        .with_overrides(&overrides);
    let out_dir = config.out_dir(&root);

    let gate = BuildGate::new(config.server.production);
    let supervisor = ServerSupervisor::new(&root, Arc::new(ProcessLauncher));
    let orchestrator = Arc::new(
        Orchestrator::new(&root)
            .with_overrides(overrides)
            .with_gate(gate.clone())
            .with_supervisor(supervisor),
    );

    println!("{}", "  ⚙  Running first build...".cyan());
    orchestrator.run().await;

    let _watcher = FileWatcher::start(orchestrator.clone(), out_dir.clone())
        .context("failed to watch the project directory")?;

    let app = assets::router(
        &out_dir.join(PUBLIC_DIR),
        &config.build.public_path,
        gate,
    );
    let addr = format!("127.0.0.1:{}", config.server.assets_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind asset server to {}", addr))?;

    println!();
    println!("{}", "✅ Dev server ready!".green().bold());
    println!();
    println!(
        "  {} {}",
        "App:".cyan(),
        format!("http://localhost:{}", config.server.port).bold()
    );
    println!(
        "  {} {}",
        "Assets:".cyan(),
        format!("http://{}{}", addr, config.build.public_path).bold()
    );
    println!("  {} Rebuilding on change", "🔥".yellow());
    println!();
    println!("  {} Press Ctrl+C to stop", "ℹ".cyan());
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("asset server failed")?;

    info!("shutting down");
    orchestrator.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
