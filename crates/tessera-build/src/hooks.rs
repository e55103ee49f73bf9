/// One-shot lifecycle commands from `[hooks]`
use std::path::Path;

use tokio::process::Command;
use tracing::info;

use crate::BuildError;

/// Runs `command` in `cwd` and waits for it
///
/// An empty command is a no-op. A non-zero exit fails with the command's
/// stderr.
pub async fn run_hook(name: &str, command: &[String], cwd: &Path) -> Result<(), BuildError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };

    let failed = |message: String| BuildError::Hook {
        hook: name.to_string(),
        command: command.join(" "),
        message,
    };

    info!(hook = name, command = %command.join(" "), "running hook");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| failed(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(failed(format!("{} {}", output.status, stderr).trim().to_string()));
    }
    Ok(())
}
