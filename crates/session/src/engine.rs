//! The point-generation pipeline engine.
//!
//! One [`Engine`] value owns the whole session state: search space,
//! config store, trial pool, ready queue, layer stack, and strategy.
//! It is driven from a single-threaded event loop; plug-ins execute
//! inline, so none of this is locked.
//!
//! Every trial walks the layer stack forward under the generate pass and
//! backward under the analyze pass. The walk position is a tagged cursor
//! (pass + layer index); the two completion states hand the trial to the
//! ready queue or back to the strategy.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

use attune_core::config::keys;
use attune_core::{ConfigStore, Point, Space};

use crate::error::SessionError;
use crate::plugin::{CallbackEntry, Flow, Layer, Pass, PluginContext, Strategy, Waiting};
use crate::pool::{ReadyQueue, TrialPool};
use crate::registry::PluginRegistry;

/// Position of a trial's walk through the layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// About to run the given layer's entry for the given pass.
    Layer(Pass, usize),
    /// Forward pass complete: the trial belongs on the ready queue.
    GenDone,
    /// Reverse pass complete: the trial goes back to the strategy.
    AnaDone,
}

/// One loaded layer plus its two waitlists.
pub(crate) struct LayerSlot {
    pub(crate) layer: Box<dyn Layer>,
    pub(crate) wait_generate: Vec<usize>,
    pub(crate) wait_analyze: Vec<usize>,
}

/// Disjoint views over the engine's plug-ins and trial storage, handed
/// to the closures that invoke plug-in entry points.
pub(crate) struct Plugins<'a> {
    pub(crate) strategy: &'a mut dyn Strategy,
    pub(crate) layers: &'a mut Vec<LayerSlot>,
    pub(crate) pool: &'a mut TrialPool,
    pub(crate) space: &'a Space,
}

/// Outcome of a FETCH request.
pub enum FetchOutcome {
    /// A candidate is available; `best` rides along when it is newer
    /// than the best the client already knows.
    Candidate { cand: Point, best: Option<Point> },
    /// Paused or nothing ready: the current best stands in.
    Busy(Point),
}

/// The session engine.
pub struct Engine {
    space: Space,
    cfg: ConfigStore,
    pool: TrialPool,
    ready: ReadyQueue,
    strategy: Box<dyn Strategy>,
    strategy_name: String,
    layers: Vec<LayerSlot>,
    callbacks: Vec<CallbackEntry>,
    signal_tx: UnboundedSender<u64>,
    next_callback_id: u64,
    rng: StdRng,
    setcfg_queue: VecDeque<(String, String)>,
    /// Cleared when the strategy answers WAIT; set again when an analyze
    /// pass completes.
    gen_enabled: bool,
    /// Best-point id handed out by a BUSY fetch; a report against it is
    /// quietly discarded.
    paused_id: Option<i32>,
    num_clients: usize,
    per_client: usize,
}

impl Engine {
    /// Build and initialise an engine: seed the PRNG, load the strategy
    /// and layer list named in the config, and size the pool and ready
    /// queue for the expected clients.
    pub fn new(
        space: Space,
        cfg: ConfigStore,
        registry: &PluginRegistry,
        signal_tx: UnboundedSender<u64>,
    ) -> Result<Self, SessionError> {
        let seed = cfg.int(keys::RANDOM_SEED);
        let rng = if seed >= 0 {
            StdRng::seed_from_u64(seed as u64)
        } else {
            StdRng::from_entropy()
        };

        let perf_width = cfg.int(keys::PERF_COUNT).max(1) as usize;
        let per_client = cfg.int(keys::GEN_COUNT).max(1) as usize;
        let num_clients = cfg.int(keys::CLIENT_COUNT).max(1) as usize;
        let strategy_name = cfg.get(keys::SESSION_STRATEGY).unwrap_or("random").to_string();
        let layer_list = cfg.get(keys::SESSION_LAYERS).unwrap_or("").to_string();

        let mut engine = Self {
            space,
            cfg,
            pool: TrialPool::new(perf_width),
            ready: ReadyQueue::new(),
            strategy: registry.strategy(&strategy_name)?,
            strategy_name,
            layers: Vec::new(),
            callbacks: Vec::new(),
            signal_tx,
            next_callback_id: 0,
            rng,
            setcfg_queue: VecDeque::new(),
            gen_enabled: true,
            paused_id: None,
            num_clients,
            per_client,
        };

        engine.cfg.register(engine.strategy.keyinfo())?;
        engine.with_ctx(None, |ctx, p| p.strategy.init(ctx, p.space))?;

        for name in layer_list.split(';').map(str::trim).filter(|n| !n.is_empty()) {
            let layer = registry.layer(name)?;
            engine.cfg.register(layer.keyinfo())?;
            engine.layers.push(LayerSlot {
                layer,
                wait_generate: Vec::new(),
                wait_analyze: Vec::new(),
            });
            let idx = engine.layers.len() - 1;
            engine.with_ctx(Some(idx), |ctx, p| p.layers[idx].layer.init(ctx, p.space))?;
            debug!(target: "attune::engine", layer = name, position = idx, "layer loaded");
        }

        let target = engine.num_clients * engine.per_client;
        engine.pool.grow(target);
        engine.ready.grow(target);
        engine.drain_setcfg()?;

        info!(
            target: "attune::engine",
            strategy = %engine.strategy_name,
            layers = engine.layers.len(),
            capacity = target,
            "session engine initialised"
        );
        Ok(engine)
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn config(&self) -> &ConfigStore {
        &self.cfg
    }

    /// Direct store access, bypassing plug-in notification. Used for
    /// engine-internal bookkeeping keys such as `CURRENT_CLIENT`.
    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.cfg
    }

    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.layer.name()).collect()
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// True while another candidate may be produced right now.
    pub fn can_generate(&self) -> bool {
        self.gen_enabled && self.pool.has_room()
    }

    /// Produce one candidate trial and run its generate pass.
    pub fn generate_trial(&mut self) -> Result<(), SessionError> {
        let slot = self.pool.reserve()?;
        let flow =
            self.with_ctx(None, |ctx, p| p.strategy.generate(ctx, p.pool.point_mut(slot)))?;

        if flow == Flow::Wait {
            debug!(target: "attune::engine", "strategy paused point generation");
            self.gen_enabled = false;
            return self.drain_setcfg();
        }

        self.check_point(slot)?;
        self.pool.commit(slot);
        trace!(
            target: "attune::engine",
            slot,
            id = self.pool.get(slot).point.id,
            "trial generated"
        );

        let start = self.start_cursor(Pass::Generate);
        self.drive(slot, start)?;
        self.drain_setcfg()
    }

    /// A registered callback signal fired: resume one waitlisted trial.
    pub fn on_signal(&mut self, id: u64) -> Result<(), SessionError> {
        let Some(entry) = self.callbacks.iter().find(|c| c.id == id) else {
            return Err(SessionError::Internal(format!(
                "signal for unregistered callback {id}"
            )));
        };
        let (pass, layer_idx) = (entry.pass, entry.layer);

        let mut list = match pass {
            Pass::Generate => std::mem::take(&mut self.layers[layer_idx].wait_generate),
            Pass::Analyze => std::mem::take(&mut self.layers[layer_idx].wait_analyze),
        };
        if list.is_empty() {
            return Err(SessionError::Internal(
                "callback fired on a layer with an empty waitlist".into(),
            ));
        }

        let resumed = self.with_ctx(Some(layer_idx), |ctx, p| {
            let mut waiting = Waiting {
                pool: p.pool,
                list: &list,
            };
            p.layers[layer_idx].layer.resume(ctx, &mut waiting)
        });
        let (choice, flow) = match resumed {
            Ok(outcome) => outcome,
            Err(e) => {
                self.restore_waitlist(pass, layer_idx, list);
                return Err(e);
            }
        };

        if choice >= list.len() {
            let len = list.len();
            self.restore_waitlist(pass, layer_idx, list);
            return Err(SessionError::Internal(format!(
                "callback chose waitlist entry {choice} of {len}"
            )));
        }

        if flow == Flow::Wait {
            // Still not resolvable; the trial stays parked.
            self.restore_waitlist(pass, layer_idx, list);
            return Ok(());
        }

        let slot = list.swap_remove(choice);
        self.restore_waitlist(pass, layer_idx, list);
        trace!(target: "attune::engine", slot, layer = layer_idx, ?pass, ?flow, "trial resumed");

        if let Some(next) = self.apply(slot, pass, layer_idx, flow)? {
            self.drive(slot, next)?;
        }
        self.drain_setcfg()
    }

    /// Admit a client. The offered space must match the session's; the
    /// pool and ready queue grow to cover the new client's share.
    pub fn join(&mut self, client: &str, offered: &Space) -> Result<Space, SessionError> {
        if *offered != self.space {
            return Err(SessionError::SpaceMismatch(format!(
                "client {client} offered a space that differs from {}",
                self.space.name()
            )));
        }

        self.num_clients += 1;
        let target = self.num_clients * self.per_client;
        self.pool.grow(target);
        self.ready.grow(target);
        info!(target: "attune::engine", client, clients = self.num_clients, capacity = target, "client joined");

        self.with_ctx(None, |ctx, p| p.strategy.join(ctx, client))?;
        for i in 0..self.layers.len() {
            self.with_ctx(Some(i), |ctx, p| p.layers[i].layer.join(ctx, client))?;
        }
        self.drain_setcfg()?;
        Ok(self.space.clone())
    }

    /// Apply a configuration write and notify the plug-in stack:
    /// store first, then the strategy, then layers in load order.
    pub fn setcfg(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
        self.cfg.set(key, value);
        self.setcfg_queue
            .push_back((key.to_string(), value.to_string()));
        self.drain_setcfg()
    }

    pub fn best(&self) -> Point {
        self.strategy.best()
    }

    /// Answer a FETCH: pop the ready queue, or fall back to the best
    /// point when paused or empty.
    pub fn fetch(&mut self, client_best_id: i32) -> Result<FetchOutcome, SessionError> {
        let paused = self.cfg.bool(keys::PAUSED);
        if !paused {
            if let Some(slot) = self.ready.dequeue() {
                let cand = self.pool.get(slot).point.clone();
                let best = self.strategy.best();
                let newer = best.is_valid() && best.id > client_best_id;
                trace!(target: "attune::engine", id = cand.id, slot, "candidate fetched");
                return Ok(FetchOutcome::Candidate {
                    cand,
                    best: if newer { Some(best) } else { None },
                });
            }
        }

        let best = self.strategy.best();
        self.paused_id = if best.is_valid() { Some(best.id) } else { None };
        debug!(target: "attune::engine", paused, best = best.id, "fetch answered busy");
        Ok(FetchOutcome::Busy(best))
    }

    /// Record a reported performance and run the trial's analyze pass.
    /// Returns `false` when the report matched the paused best id and
    /// was discarded.
    pub fn report(&mut self, id: i32, perf: &[f64]) -> Result<bool, SessionError> {
        let Some(slot) = self.pool.find_by_id(id) else {
            if self.paused_id == Some(id) {
                debug!(target: "attune::engine", id, "discarding report against the paused best");
                return Ok(false);
            }
            return Err(SessionError::Protocol(format!(
                "report for unknown trial id {id}"
            )));
        };

        self.paused_id = None;
        self.pool.trial_mut(slot).perf.copy_from(perf)?;
        trace!(target: "attune::engine", id, slot, "performance reported");

        let start = self.start_cursor(Pass::Analyze);
        self.drive(slot, start)?;
        self.drain_setcfg()?;
        Ok(true)
    }

    /// Tear down and re-initialise the plug-in stack: layer finis in
    /// reverse load order, then the strategy's init, then layer inits in
    /// load order.
    pub fn restart(&mut self) -> Result<(), SessionError> {
        info!(target: "attune::engine", "restarting session plug-ins");
        for i in (0..self.layers.len()).rev() {
            self.with_ctx(Some(i), |ctx, p| p.layers[i].layer.fini(ctx))?;
        }
        self.with_ctx(None, |ctx, p| p.strategy.init(ctx, p.space))?;
        for i in 0..self.layers.len() {
            self.with_ctx(Some(i), |ctx, p| p.layers[i].layer.init(ctx, p.space))?;
        }
        self.drain_setcfg()
    }

    /// Best-effort teardown on session end.
    pub fn shutdown(&mut self) {
        for i in (0..self.layers.len()).rev() {
            let name = self.layers[i].layer.name();
            if let Err(e) = self.with_ctx(Some(i), |ctx, p| p.layers[i].layer.fini(ctx)) {
                warn!(target: "attune::engine", layer = name, error = %e, "layer teardown failed");
            }
        }
        if let Err(e) = self.with_ctx(None, |ctx, p| p.strategy.fini(ctx)) {
            warn!(target: "attune::engine", error = %e, "strategy teardown failed");
        }
    }

    // ── Workflow internals ───────────────────────────────────────────

    /// Starting cursor for a pass; an empty stack goes straight to the
    /// completion state.
    fn start_cursor(&self, pass: Pass) -> Cursor {
        match pass {
            Pass::Generate => {
                if self.layers.is_empty() {
                    Cursor::GenDone
                } else {
                    Cursor::Layer(Pass::Generate, 0)
                }
            }
            Pass::Analyze => {
                if self.layers.is_empty() {
                    Cursor::AnaDone
                } else {
                    Cursor::Layer(Pass::Analyze, self.layers.len() - 1)
                }
            }
        }
    }

    /// Walk a trial through the stack until it completes or parks.
    fn drive(&mut self, slot: usize, mut cursor: Cursor) -> Result<(), SessionError> {
        loop {
            match cursor {
                Cursor::Layer(pass, idx) => {
                    let flow = self.invoke_layer(pass, idx, slot)?;
                    match self.apply(slot, pass, idx, flow)? {
                        Some(next) => cursor = next,
                        None => return Ok(()),
                    }
                }
                Cursor::GenDone => {
                    self.ready.enqueue(slot)?;
                    trace!(
                        target: "attune::engine",
                        slot,
                        id = self.pool.get(slot).point.id,
                        "candidate ready"
                    );
                    return Ok(());
                }
                Cursor::AnaDone => return self.finalize(slot),
            }
        }
    }

    fn invoke_layer(&mut self, pass: Pass, idx: usize, slot: usize) -> Result<Flow, SessionError> {
        self.with_ctx(Some(idx), |ctx, p| {
            let trial = p.pool.trial_mut(slot);
            match pass {
                Pass::Generate => p.layers[idx].layer.generate(ctx, trial),
                Pass::Analyze => p.layers[idx].layer.analyze(ctx, trial),
            }
        })
    }

    /// The workflow transition table. `None` means the trial yielded
    /// (parked on a waitlist, or generation paused on its behalf).
    fn apply(
        &mut self,
        slot: usize,
        pass: Pass,
        idx: usize,
        flow: Flow,
    ) -> Result<Option<Cursor>, SessionError> {
        match flow {
            Flow::Accept => Ok(Some(self.advance(pass, idx))),
            Flow::Return | Flow::Retry => Ok(Some(Cursor::Layer(pass.flipped(), idx))),
            Flow::Wait => {
                self.park(slot, pass, idx);
                Ok(None)
            }
            Flow::Reject => {
                if pass == Pass::Analyze {
                    return Err(SessionError::Internal(
                        "REJECT is invalid during the analyze pass".into(),
                    ));
                }
                let flow = self
                    .with_ctx(None, |ctx, p| p.strategy.rejected(ctx, p.pool.point_mut(slot)))?;
                if flow == Flow::Wait {
                    debug!(target: "attune::engine", slot, "no replacement point; generation paused");
                    self.gen_enabled = false;
                    return Ok(None);
                }
                self.check_point(slot)?;
                trace!(target: "attune::engine", slot, "rejected point rewritten; restarting pass");
                Ok(Some(self.start_cursor(Pass::Generate)))
            }
        }
    }

    fn advance(&self, pass: Pass, idx: usize) -> Cursor {
        match pass {
            Pass::Generate => {
                if idx + 1 >= self.layers.len() {
                    Cursor::GenDone
                } else {
                    Cursor::Layer(Pass::Generate, idx + 1)
                }
            }
            Pass::Analyze => {
                if idx == 0 {
                    Cursor::AnaDone
                } else {
                    Cursor::Layer(Pass::Analyze, idx - 1)
                }
            }
        }
    }

    fn park(&mut self, slot: usize, pass: Pass, idx: usize) {
        trace!(target: "attune::engine", slot, layer = idx, ?pass, "trial parked");
        match pass {
            Pass::Generate => self.layers[idx].wait_generate.push(slot),
            Pass::Analyze => self.layers[idx].wait_analyze.push(slot),
        }
    }

    fn restore_waitlist(&mut self, pass: Pass, idx: usize, list: Vec<usize>) {
        match pass {
            Pass::Generate => self.layers[idx].wait_generate = list,
            Pass::Analyze => self.layers[idx].wait_analyze = list,
        }
    }

    /// Hand a finished trial to the strategy and release its slot.
    fn finalize(&mut self, slot: usize) -> Result<(), SessionError> {
        self.with_ctx(None, |ctx, p| p.strategy.analyze(ctx, p.pool.get(slot)))?;
        let id = self.pool.get(slot).point.id;
        self.pool.free(slot);
        self.gen_enabled = true;
        trace!(target: "attune::engine", slot, id, "trial finalised");
        Ok(())
    }

    /// Validate what the strategy wrote into a slot before it enters
    /// the pipeline.
    fn check_point(&self, slot: usize) -> Result<(), SessionError> {
        let point = &self.pool.get(slot).point;
        if !point.is_valid() {
            return Err(SessionError::Plugin(format!(
                "strategy {} produced a point without an id",
                self.strategy_name
            )));
        }
        if point.coords.len() != self.space.len() {
            return Err(SessionError::Plugin(format!(
                "strategy {} produced {} coordinates for a {}-dimensional space",
                self.strategy_name,
                point.coords.len(),
                self.space.len()
            )));
        }
        for (i, dim) in self.space.dims().iter().enumerate() {
            if point.coords[i] >= dim.size() {
                return Err(SessionError::Plugin(format!(
                    "strategy {} produced index {} for dimension {} (size {})",
                    self.strategy_name,
                    point.coords[i],
                    dim.name(),
                    dim.size()
                )));
            }
        }
        Ok(())
    }

    /// Run queued setcfg notifications: for each write, the strategy's
    /// hook first, then every layer's in load order. Hooks may enqueue
    /// further writes; those run after the current round.
    fn drain_setcfg(&mut self) -> Result<(), SessionError> {
        while let Some((key, value)) = self.setcfg_queue.pop_front() {
            self.with_ctx(None, |ctx, p| p.strategy.setcfg(ctx, &key, &value))?;
            for i in 0..self.layers.len() {
                self.with_ctx(Some(i), |ctx, p| p.layers[i].layer.setcfg(ctx, &key, &value))?;
            }
        }
        Ok(())
    }

    /// Split the engine into a plug-in context plus disjoint views of
    /// the plug-ins and trial storage, and run `f` with them.
    fn with_ctx<T>(
        &mut self,
        layer: Option<usize>,
        f: impl FnOnce(&mut PluginContext<'_>, Plugins<'_>) -> T,
    ) -> T {
        let Self {
            space,
            cfg,
            pool,
            strategy,
            layers,
            callbacks,
            signal_tx,
            next_callback_id,
            rng,
            setcfg_queue,
            ..
        } = self;
        let mut ctx = PluginContext {
            cfg,
            setcfg_queue,
            callbacks,
            rng,
            signal_tx,
            next_callback_id,
            layer,
        };
        f(
            &mut ctx,
            Plugins {
                strategy: strategy.as_mut(),
                layers,
                pool,
                space,
            },
        )
    }
}
