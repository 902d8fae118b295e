//! Tuning session core.
//!
//! A session explores a search space on behalf of one or more clients:
//! a strategy proposes candidate points, an ordered stack of processing
//! layers filters them on the way out (generate) and back in (analyze),
//! and a protocol dispatcher serves candidates and collects performance
//! reports over a length-prefixed duplex channel.
//!
//! The whole core runs as a single-threaded cooperative event loop;
//! plug-ins execute inline and state is never locked.

pub mod engine;
pub mod error;
pub mod layers;
pub mod plugin;
pub mod pool;
pub mod registry;
pub mod server;
pub mod strategies;

pub use engine::{Engine, FetchOutcome};
pub use error::SessionError;
pub use plugin::{CallbackSignal, Flow, Layer, PluginContext, Strategy, Waiting};
pub use registry::PluginRegistry;
pub use server::serve;
