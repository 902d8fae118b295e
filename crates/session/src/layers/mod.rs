//! Built-in processing layers.

mod trace;

pub use trace::TraceLayer;
