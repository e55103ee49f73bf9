/// Toolchain plugin running the function registry transform
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tessera_transform::{
    transform_module, CompileError, FunctionRegistry, RegistryEntry, TransformError,
    TransformOptions,
};
use tracing::debug;

use crate::toolchain::{ModuleId, Plugin};
use crate::Config;

/// Rewrites privileged hook calls in every file module of a stage
///
/// In client mode the plugin owns a handle to the orchestrator's registry
/// and prunes server-only code; the entries of each module are memoized so
/// modules reused from the toolchain cache still land in the registry at
/// `build_end`. In server mode no registry is written and local targets are
/// exported for the generated registry module.
pub struct RegistryPlugin {
    options: TransformOptions,
    registry: Option<Arc<Mutex<FunctionRegistry>>>,
    memo: Mutex<HashMap<ModuleId, Vec<(String, RegistryEntry)>>>,
}

impl RegistryPlugin {
    pub fn client(root: &Path, config: &Config, registry: Arc<Mutex<FunctionRegistry>>) -> Self {
        Self {
            options: transform_options(root, config).with_prune(true),
            registry: Some(registry),
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn server(root: &Path, config: &Config) -> Self {
        Self {
            options: transform_options(root, config).with_expose_locals(true),
            registry: None,
            memo: Mutex::new(HashMap::new()),
        }
    }
}

fn transform_options(root: &Path, config: &Config) -> TransformOptions {
    TransformOptions::new(root)
        .with_hooks(config.build.hooks.iter().cloned())
        .with_id_prefix(config.build.id_prefix.clone())
}

fn into_compile_error(file: &Path, err: TransformError) -> CompileError {
    match err {
        TransformError::Compile(e) => e,
        other => CompileError::whole_file(file, other.to_string()),
    }
}

impl Plugin for RegistryPlugin {
    fn name(&self) -> &str {
        if self.registry.is_some() {
            "tessera-registry:client"
        } else {
            "tessera-registry:server"
        }
    }

    fn transform(&self, id: &ModuleId, code: &str) -> Result<Option<String>, CompileError> {
        let ModuleId::File(file) = id else {
            return Ok(None);
        };

        let output = transform_module(code, file, &self.options, None)
            .map_err(|e| into_compile_error(file, e))?;

        if self.registry.is_some() {
            if let Ok(mut memo) = self.memo.lock() {
                memo.insert(id.clone(), output.entries.clone());
            }
        }

        if !output.changed {
            return Ok(None);
        }
        debug!(file = %file.display(), functions = output.entries.len(), "transformed module");
        Ok(Some(output.code))
    }

    fn build_end(&self, modules: &[ModuleId]) -> Result<(), CompileError> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        let memo = self
            .memo
            .lock()
            .map_err(|_| CompileError::whole_file(Path::new("<registry>"), "registry memo poisoned"))?;
        let mut registry = registry
            .lock()
            .map_err(|_| CompileError::whole_file(Path::new("<registry>"), "registry poisoned"))?;

        for id in modules {
            if let Some(entries) = memo.get(id) {
                let file = match id {
                    ModuleId::File(path) => path.as_path(),
                    ModuleId::Virtual(name) => Path::new(name),
                };
                registry
                    .extend(entries.iter().cloned())
                    .map_err(|e| into_compile_error(file, e))?;
            }
        }
        Ok(())
    }
}
