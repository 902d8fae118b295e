//! Trial tracing layer.

use tracing::info;

use attune_core::{KeyInfo, Trial};

use crate::error::SessionError;
use crate::plugin::{Flow, Layer, PluginContext};

const KEYINFO: &[KeyInfo] = &[KeyInfo {
    key: "TRACE_PREFIX",
    default: Some("trial"),
    help: "Label attached to trial trace lines",
}];

/// Logs every trial as it clears the generate pass and again when its
/// performance comes back, without altering the flow.
pub struct TraceLayer;

impl TraceLayer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TraceLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for TraceLayer {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn keyinfo(&self) -> &'static [KeyInfo] {
        KEYINFO
    }

    fn generate(
        &mut self,
        ctx: &mut PluginContext<'_>,
        trial: &mut Trial,
    ) -> Result<Flow, SessionError> {
        let label = ctx.get("TRACE_PREFIX").unwrap_or("trial");
        info!(
            target: "attune::trace",
            label,
            id = trial.point.id,
            coords = ?trial.point.coords,
            "candidate generated"
        );
        Ok(Flow::Accept)
    }

    fn analyze(
        &mut self,
        ctx: &mut PluginContext<'_>,
        trial: &mut Trial,
    ) -> Result<Flow, SessionError> {
        let label = ctx.get("TRACE_PREFIX").unwrap_or("trial");
        info!(
            target: "attune::trace",
            label,
            id = trial.point.id,
            perf = ?trial.perf.values(),
            "performance observed"
        );
        Ok(Flow::Accept)
    }
}
