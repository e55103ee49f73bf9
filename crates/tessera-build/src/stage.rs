/// Persistent toolchain contexts, one per stage
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::toolchain::{BuildContext, BuildOutput, ContextOptions, Inputs, Toolchain};
use crate::BuildFailure;

struct StageContext {
    fingerprint: String,
    context: Box<dyn BuildContext>,
}

/// Memoizes build contexts by stage name and options fingerprint
///
/// A context survives across cycles while its fingerprint holds, so the
/// toolchain can reuse per-module work. A different fingerprint disposes it
/// and creates a fresh one.
pub struct StageContexts {
    toolchain: Arc<dyn Toolchain>,
    contexts: HashMap<String, StageContext>,
}

impl StageContexts {
    pub fn new(toolchain: Arc<dyn Toolchain>) -> Self {
        Self {
            toolchain,
            contexts: HashMap::new(),
        }
    }

    /// Feeds `inputs` to the stage's context and rebuilds it
    ///
    /// `options` is only invoked when a context has to be created.
    pub async fn build<F>(
        &mut self,
        stage: &str,
        fingerprint: &str,
        options: F,
        inputs: Inputs,
    ) -> Result<BuildOutput, BuildFailure>
    where
        F: FnOnce() -> ContextOptions,
    {
        if let Some(existing) = self.contexts.get(stage) {
            if existing.fingerprint != fingerprint {
                info!(stage, "stage options changed, recreating build context");
                if let Some(mut stale) = self.contexts.remove(stage) {
                    stale.context.dispose().await;
                }
            }
        }

        if !self.contexts.contains_key(stage) {
            let context = self.toolchain.context(options()).await?;
            self.contexts.insert(
                stage.to_string(),
                StageContext {
                    fingerprint: fingerprint.to_string(),
                    context,
                },
            );
        } else {
            debug!(stage, "reusing build context");
        }

        let Some(entry) = self.contexts.get_mut(stage) else {
            return Ok(BuildOutput::default());
        };
        entry.context.update_inputs(inputs);
        entry.context.rebuild().await.map_err(BuildFailure::Compile)
    }

    pub fn contains(&self, stage: &str) -> bool {
        self.contexts.contains_key(stage)
    }

    pub async fn dispose_all(&mut self) {
        for (_, mut stage) in self.contexts.drain() {
            stage.context.dispose().await;
        }
    }
}
