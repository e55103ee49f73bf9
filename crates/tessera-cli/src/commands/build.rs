use std::path::PathBuf;

use anyhow::{bail, Result};
use colored::Colorize;
use tessera_build::Orchestrator;

use super::{overrides, runtime};

pub fn execute(root: PathBuf, production: bool) -> Result<()> {
    println!("{}", "Building project...".green().bold());
    println!();
    println!("Root: {}", root.display().to_string().cyan());
    println!("Production: {}", if production { "Yes" } else { "No" });
    println!();

    runtime()?.block_on(async {
        let orchestrator = Orchestrator::new(&root).with_overrides(overrides(None, production));
        let result = orchestrator.build().await;
        orchestrator.shutdown().await;

        match result {
            Ok(manifest) => {
                println!("{}", "✓ Build complete".green().bold());
                println!();
                for (route, file) in &manifest.page_files {
                    println!("  {} {} {}", "→".green(), route, file.dimmed());
                }
                println!("  {} bootstrap {}", "→".green(), manifest.bootstrap_file.dimmed());
                Ok(())
            }
            Err(failure) => {
                eprintln!("{}", "✗ Build failed".red().bold());
                eprintln!();
                eprintln!("{}", failure);
                bail!("build failed with {} error", failure.kind())
            }
        }
    })
}
