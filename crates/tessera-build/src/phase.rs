use std::fmt;

use serde::Serialize;

/// Stage of the build cycle currently executing
///
/// A cycle walks the stages in declaration order and returns to `Idle`,
/// whether it succeeds or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    ValidatingConfig,
    InspectingRoutes,
    SynthesizingRoutesModule,
    GeneratingClientShims,
    BundlingClient,
    ReconcilingManifest,
    BundlingServerController,
}

impl Phase {
    /// Stages of one cycle, in order
    pub const CYCLE: [Phase; 7] = [
        Phase::ValidatingConfig,
        Phase::InspectingRoutes,
        Phase::SynthesizingRoutesModule,
        Phase::GeneratingClientShims,
        Phase::BundlingClient,
        Phase::ReconcilingManifest,
        Phase::BundlingServerController,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::ValidatingConfig => "validating-config",
            Phase::InspectingRoutes => "inspecting-routes",
            Phase::SynthesizingRoutesModule => "synthesizing-routes-module",
            Phase::GeneratingClientShims => "generating-client-shims",
            Phase::BundlingClient => "bundling-client",
            Phase::ReconcilingManifest => "reconciling-manifest",
            Phase::BundlingServerController => "bundling-server-controller",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Phase::Idle)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
