//! Plug-in API: search strategies and processing layers.
//!
//! Exactly one strategy drives a session; zero or more layers form an
//! ordered stack between the strategy and the clients. Every candidate
//! point runs through the stack forward (generate) on its way to the
//! ready queue and backward (analyze) once its performance is reported.
//!
//! Plug-ins run inline on the engine thread and communicate with it
//! through the [`PluginContext`] handed to every entry point. They
//! borrow trial data only for the duration of a call.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use attune_core::{ConfigStore, KeyInfo, Point, Space, Trial};

use crate::error::SessionError;
use crate::pool::TrialPool;

/// Per-step decision returned by strategy and layer entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Pass the trial on to the next position in the stack.
    Accept,
    /// Park the trial on this layer's waitlist until a callback resumes it.
    Wait,
    /// Send the trial back in the opposite direction from this layer.
    Return,
    /// Same transition as [`Flow::Return`]; kept distinct so layers can
    /// signal intent ("try this point again" vs "hand the result back").
    Retry,
    /// Generate pass only: ask the strategy for a replacement point.
    Reject,
}

/// Direction of travel through the layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Generate,
    Analyze,
}

impl Pass {
    pub(crate) fn flipped(self) -> Self {
        match self {
            Self::Generate => Self::Analyze,
            Self::Analyze => Self::Generate,
        }
    }
}

/// A registered callback: which layer and direction to resume when the
/// signal with this id fires.
pub(crate) struct CallbackEntry {
    pub id: u64,
    pub pass: Pass,
    pub layer: usize,
}

/// Handle returned by callback registration.
///
/// Raising the signal wakes the engine and routes control back into the
/// registering layer's `resume` entry. Handles are cheap to clone and
/// may be raised from anywhere (another task, a test harness); the
/// resumption itself always runs on the engine thread.
#[derive(Clone)]
pub struct CallbackSignal {
    id: u64,
    tx: UnboundedSender<u64>,
}

impl CallbackSignal {
    pub fn raise(&self) {
        // A closed channel means the session is already gone; the signal
        // is moot then.
        let _ = self.tx.send(self.id);
    }
}

/// Engine services exposed to plug-ins during a call.
pub struct PluginContext<'a> {
    pub(crate) cfg: &'a mut ConfigStore,
    pub(crate) setcfg_queue: &'a mut VecDeque<(String, String)>,
    pub(crate) callbacks: &'a mut Vec<CallbackEntry>,
    pub(crate) rng: &'a mut StdRng,
    pub(crate) signal_tx: &'a UnboundedSender<u64>,
    pub(crate) next_callback_id: &'a mut u64,
    /// Index of the layer currently being invoked; `None` during
    /// strategy calls.
    pub(crate) layer: Option<usize>,
}

impl PluginContext<'_> {
    /// Read a configuration value (explicit value or registered default).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.cfg.get(key)
    }

    /// Write a configuration value.
    ///
    /// The store is updated immediately; notification of the strategy and
    /// layers is queued and runs once the current plug-in call returns,
    /// strategy first, then layers in load order.
    pub fn set(&mut self, key: &str, value: &str) {
        self.cfg.set(key, value);
        self.setcfg_queue
            .push_back((key.to_string(), value.to_string()));
    }

    /// The session PRNG, seeded from `RANDOM_SEED`.
    pub fn rng(&mut self) -> &mut StdRng {
        self.rng
    }

    /// Register a callback that resumes trials parked on the calling
    /// layer's generate-side waitlist.
    pub fn callback_generate(&mut self) -> Result<CallbackSignal, SessionError> {
        self.register(Pass::Generate)
    }

    /// Register a callback that resumes trials parked on the calling
    /// layer's analyze-side waitlist.
    pub fn callback_analyze(&mut self) -> Result<CallbackSignal, SessionError> {
        self.register(Pass::Analyze)
    }

    fn register(&mut self, pass: Pass) -> Result<CallbackSignal, SessionError> {
        let layer = self.layer.ok_or_else(|| {
            SessionError::Plugin("callbacks can only be registered from a layer entry point".into())
        })?;
        let id = *self.next_callback_id;
        *self.next_callback_id += 1;
        self.callbacks.push(CallbackEntry { id, pass, layer });
        trace!(target: "attune::engine", id, layer, ?pass, "callback registered");
        Ok(CallbackSignal {
            id,
            tx: self.signal_tx.clone(),
        })
    }
}


/// View of one waitlist handed to a layer's `resume` entry.
pub struct Waiting<'a> {
    pub(crate) pool: &'a mut TrialPool,
    pub(crate) list: &'a [usize],
}

impl Waiting<'_> {
    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn trial(&self, i: usize) -> &Trial {
        self.pool.get(self.list[i])
    }

    pub fn trial_mut(&mut self, i: usize) -> &mut Trial {
        self.pool.trial_mut(self.list[i])
    }
}

/// The search strategy: proposes candidate points and consumes finished
/// trials. `generate` stamps a fresh session-unique id on the out-point;
/// `best` reports the incumbent (an invalid point before any analysis).
pub trait Strategy {
    /// Configuration keys this strategy recognises, merged into the
    /// store at load time.
    fn keyinfo(&self) -> &'static [KeyInfo] {
        &[]
    }

    fn init(&mut self, _ctx: &mut PluginContext<'_>, _space: &Space) -> Result<(), SessionError> {
        Ok(())
    }

    fn join(&mut self, _ctx: &mut PluginContext<'_>, _client: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn setcfg(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        _key: &str,
        _value: &str,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    fn fini(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), SessionError> {
        Ok(())
    }

    /// Propose the next candidate, writing id, step, and coordinates
    /// into `point`. Returning [`Flow::Wait`] pauses generation until an
    /// analyze pass completes.
    fn generate(
        &mut self,
        ctx: &mut PluginContext<'_>,
        point: &mut Point,
    ) -> Result<Flow, SessionError>;

    /// A layer rejected `point`; rewrite it (keeping or replacing the
    /// id) or return [`Flow::Wait`] when no replacement is available.
    fn rejected(
        &mut self,
        ctx: &mut PluginContext<'_>,
        point: &mut Point,
    ) -> Result<Flow, SessionError>;

    /// Consume a finished trial.
    fn analyze(&mut self, ctx: &mut PluginContext<'_>, trial: &Trial) -> Result<(), SessionError>;

    /// The best point observed so far.
    fn best(&self) -> Point;
}

/// A processing layer. All entry points are optional; an absent entry
/// behaves as [`Flow::Accept`].
pub trait Layer {
    /// Stable plug-in name, also used as the prefix for the layer's
    /// configuration keys.
    fn name(&self) -> &'static str;

    fn keyinfo(&self) -> &'static [KeyInfo] {
        &[]
    }

    fn init(&mut self, _ctx: &mut PluginContext<'_>, _space: &Space) -> Result<(), SessionError> {
        Ok(())
    }

    fn join(&mut self, _ctx: &mut PluginContext<'_>, _client: &str) -> Result<(), SessionError> {
        Ok(())
    }

    fn setcfg(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        _key: &str,
        _value: &str,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    fn fini(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), SessionError> {
        Ok(())
    }

    /// Forward pass: the trial is on its way to the ready queue.
    fn generate(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        _trial: &mut Trial,
    ) -> Result<Flow, SessionError> {
        Ok(Flow::Accept)
    }

    /// Reverse pass: the trial carries reported performance.
    fn analyze(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        _trial: &mut Trial,
    ) -> Result<Flow, SessionError> {
        Ok(Flow::Accept)
    }

    /// A callback registered by this layer fired. Pick the waitlisted
    /// trial it resolves and return its index in `waiting` together with
    /// the flow to apply; [`Flow::Wait`] leaves the waitlist untouched.
    fn resume(
        &mut self,
        _ctx: &mut PluginContext<'_>,
        _waiting: &mut Waiting<'_>,
    ) -> Result<(usize, Flow), SessionError> {
        Err(SessionError::Internal(format!(
            "layer {} fired a callback but has no resume entry",
            self.name()
        )))
    }
}
