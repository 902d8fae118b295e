//! Uniform random search.

use rand::Rng;
use tracing::debug;

use attune_core::{Point, Space, Trial};

use crate::error::SessionError;
use crate::plugin::{Flow, PluginContext, Strategy};

/// Samples every dimension uniformly at random. The incumbent best is
/// the trial with the lowest summed performance seen so far.
pub struct RandomStrategy {
    sizes: Vec<usize>,
    next_id: i32,
    best: Point,
    best_perf: f64,
}

impl RandomStrategy {
    pub fn new() -> Self {
        Self {
            sizes: Vec::new(),
            next_id: 1,
            best: Point::invalid(),
            best_perf: f64::INFINITY,
        }
    }

    fn sample(&self, ctx: &mut PluginContext<'_>) -> Vec<usize> {
        self.sizes
            .iter()
            .map(|&n| ctx.rng().gen_range(0..n))
            .collect()
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for RandomStrategy {
    fn init(&mut self, _ctx: &mut PluginContext<'_>, space: &Space) -> Result<(), SessionError> {
        self.sizes = space.sizes();
        self.next_id = 1;
        self.best = Point::invalid();
        self.best_perf = f64::INFINITY;
        Ok(())
    }

    fn generate(
        &mut self,
        ctx: &mut PluginContext<'_>,
        point: &mut Point,
    ) -> Result<Flow, SessionError> {
        point.id = self.next_id;
        point.step = 0;
        point.coords = self.sample(ctx);
        self.next_id += 1;
        Ok(Flow::Accept)
    }

    fn rejected(
        &mut self,
        ctx: &mut PluginContext<'_>,
        point: &mut Point,
    ) -> Result<Flow, SessionError> {
        // Keep the id so outstanding references stay valid; resample the
        // coordinates.
        point.coords = self.sample(ctx);
        Ok(Flow::Accept)
    }

    fn analyze(&mut self, _ctx: &mut PluginContext<'_>, trial: &Trial) -> Result<(), SessionError> {
        let unified = trial.perf.unified();
        if unified < self.best_perf {
            debug!(
                target: "attune::strategy",
                id = trial.point.id,
                perf = unified,
                "new incumbent best"
            );
            self.best_perf = unified;
            self.best = trial.point.clone();
        }
        Ok(())
    }

    fn best(&self) -> Point {
        self.best.clone()
    }
}
