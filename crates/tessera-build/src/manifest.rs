/// Client asset manifest
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::codegen::BOOTSTRAP_ENTRY;
use crate::toolchain::BuildOutput;
use crate::BuildError;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Hashed asset URLs of the client bundle
///
/// ```json
/// { "pageFiles": { "3f2a9c01bd": "/_tessera/3f2a9c01bd-9e8d7c6b.js" },
///   "bootstrapFile": "/_tessera/bootstrap-0a1b2c3d.js" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Route id → asset URL of the page's hydration entry
    pub page_files: BTreeMap<String, String>,
    pub bootstrap_file: String,
}

impl Manifest {
    /// Builds the manifest from the client stage output
    ///
    /// Every entry other than the bootstrap is named after its route id.
    pub fn from_output(output: &BuildOutput, public_path: &str) -> Self {
        let url = |file: &str| format!("{}{}", public_path, file);
        let mut manifest = Manifest::default();
        for (name, file) in &output.entries {
            if name == BOOTSTRAP_ENTRY {
                manifest.bootstrap_file = url(file);
            } else {
                manifest.page_files.insert(name.clone(), url(file));
            }
        }
        manifest
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Writes `manifest.json` unless the file already holds the same content
///
/// Returns whether the file was written.
pub async fn write_manifest(out_dir: &Path, manifest: &Manifest) -> Result<bool, BuildError> {
    let path = out_dir.join(MANIFEST_FILE);
    let json = manifest.to_json();

    if let Ok(existing) = tokio::fs::read_to_string(&path).await {
        if existing == json {
            debug!("manifest unchanged");
            return Ok(false);
        }
    }

    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|e| BuildError::io(out_dir, e))?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| BuildError::io(&path, e))?;
    info!(pages = manifest.page_files.len(), "wrote manifest");
    Ok(true)
}

/// Deletes top-level `.js` files of the public directory that no entry produced
///
/// Entry files are the only top-level scripts the client stage writes, so
/// anything else there is a superseded hashed entry.
pub async fn remove_stale_assets(public_dir: &Path, output: &BuildOutput) -> Result<Vec<String>, BuildError> {
    let live: HashSet<&str> = output.entries.values().map(String::as_str).collect();
    let mut removed = Vec::new();

    let mut dir = match tokio::fs::read_dir(public_dir).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(BuildError::io(public_dir, e)),
    };

    while let Some(entry) = dir.next_entry().await.map_err(|e| BuildError::io(public_dir, e))? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if !path.is_file() || !name.ends_with(".js") || live.contains(name.as_str()) {
            continue;
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| BuildError::io(&path, e))?;
        debug!(file = %name, "removed stale asset");
        removed.push(name);
    }

    removed.sort();
    Ok(removed)
}
