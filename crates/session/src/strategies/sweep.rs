//! Exhaustive row-major sweep.

use tracing::info;

use attune_core::config::keys;
use attune_core::{Point, Space, Trial};

use crate::error::SessionError;
use crate::plugin::{Flow, PluginContext, Strategy};

/// Enumerates the whole index space in row-major order (last dimension
/// fastest) and wraps around. `STRATEGY_CONVERGED` is set once the first
/// full pass completes; the point's step tag counts completed passes.
pub struct SweepStrategy {
    sizes: Vec<usize>,
    cursor: Vec<usize>,
    passes: i32,
    next_id: i32,
    best: Point,
    best_perf: f64,
}

impl SweepStrategy {
    pub fn new() -> Self {
        Self {
            sizes: Vec::new(),
            cursor: Vec::new(),
            passes: 0,
            next_id: 1,
            best: Point::invalid(),
            best_perf: f64::INFINITY,
        }
    }

    /// Advance the cursor by one, carrying right-to-left; reports a
    /// completed pass when it wraps back to the origin.
    fn advance(&mut self, ctx: &mut PluginContext<'_>) {
        for i in (0..self.cursor.len()).rev() {
            self.cursor[i] += 1;
            if self.cursor[i] < self.sizes[i] {
                return;
            }
            self.cursor[i] = 0;
        }
        self.passes += 1;
        if self.passes == 1 {
            info!(target: "attune::strategy", "sweep covered the full space");
            ctx.set(keys::STRATEGY_CONVERGED, "1");
        }
    }

    fn emit(&mut self, ctx: &mut PluginContext<'_>, point: &mut Point) {
        point.step = self.passes;
        point.coords = self.cursor.clone();
        self.advance(ctx);
    }
}

impl Default for SweepStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for SweepStrategy {
    fn init(&mut self, _ctx: &mut PluginContext<'_>, space: &Space) -> Result<(), SessionError> {
        self.sizes = space.sizes();
        self.cursor = vec![0; self.sizes.len()];
        self.passes = 0;
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
        self.next_id += 1;
        self.emit(ctx, point);
        Ok(Flow::Accept)
    }

    fn rejected(
        &mut self,
        ctx: &mut PluginContext<'_>,
        point: &mut Point,
    ) -> Result<Flow, SessionError> {
        // Move on to the next untried configuration under the same id.
        self.emit(ctx, point);
        Ok(Flow::Accept)
    }

    fn analyze(&mut self, _ctx: &mut PluginContext<'_>, trial: &Trial) -> Result<(), SessionError> {
        let unified = trial.perf.unified();
        if unified < self.best_perf {
            self.best_perf = unified;
            self.best = trial.point.clone();
        }
        Ok(())
    }

    fn best(&self) -> Point {
        self.best.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::plugin::testutil;

    #[test]
    fn enumerates_row_major_and_wraps() {
        let mut space = Space::new("s");
        space.int("a", 0, 1, 1).unwrap();
        space.int("b", 0, 2, 1).unwrap();

        let mut strategy = SweepStrategy::new();
        testutil::with_ctx(None, |ctx| {
            strategy.init(ctx, &space).unwrap();
            let mut seen = Vec::new();
            let mut point = Point::invalid();
            for _ in 0..7 {
                strategy.generate(ctx, &mut point).unwrap();
                seen.push((point.step, point.coords.clone()));
            }
            assert_eq!(
                seen,
                vec![
                    (0, vec![0, 0]),
                    (0, vec![0, 1]),
                    (0, vec![0, 2]),
                    (0, vec![1, 0]),
                    (0, vec![1, 1]),
                    (0, vec![1, 2]),
                    (1, vec![0, 0]),
                ]
            );
            assert_eq!(
                ctx.get(keys::STRATEGY_CONVERGED),
                Some("1"),
                "converged after the first full pass"
            );
        });
    }

    #[test]
    fn ids_stay_unique_across_wraps() {
        let mut space = Space::new("s");
        space.int("a", 0, 0, 1).unwrap();

        let mut strategy = SweepStrategy::new();
        testutil::with_ctx(None, |ctx| {
            strategy.init(ctx, &space).unwrap();
            let mut point = Point::invalid();
            let mut ids = Vec::new();
            for _ in 0..4 {
                strategy.generate(ctx, &mut point).unwrap();
                ids.push(point.id);
            }
            assert_eq!(ids, vec![1, 2, 3, 4]);
        });
    }
}
