//! Plug-in registry.
//!
//! Strategies and layers are late-bound by name at session start, but
//! from a registry of constructors compiled into the binary rather than
//! from shared objects on disk. Embedders (and tests) extend the search
//! surface by registering additional constructors.

use indexmap::IndexMap;

use crate::error::SessionError;
use crate::layers::TraceLayer;
use crate::plugin::{Layer, Strategy};
use crate::strategies::{RandomStrategy, SweepStrategy};

type StrategyCtor = Box<dyn Fn() -> Box<dyn Strategy>>;
type LayerCtor = Box<dyn Fn() -> Box<dyn Layer>>;

pub struct PluginRegistry {
    strategies: IndexMap<String, StrategyCtor>,
    layers: IndexMap<String, LayerCtor>,
}

impl PluginRegistry {
    /// An empty registry, for embedders that want full control.
    pub fn empty() -> Self {
        Self {
            strategies: IndexMap::new(),
            layers: IndexMap::new(),
        }
    }

    /// The registry of built-in plug-ins.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_strategy("random", || Box::new(RandomStrategy::new()));
        registry.register_strategy("sweep", || Box::new(SweepStrategy::new()));
        registry.register_layer("trace", || Box::new(TraceLayer::new()));
        registry
    }

    /// Register (or replace) a strategy constructor under `name`.
    pub fn register_strategy(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn() -> Box<dyn Strategy> + 'static,
    ) {
        self.strategies.insert(name.into(), Box::new(ctor));
    }

    /// Register (or replace) a layer constructor under `name`.
    pub fn register_layer(
        &mut self,
        name: impl Into<String>,
        ctor: impl Fn() -> Box<dyn Layer> + 'static,
    ) {
        self.layers.insert(name.into(), Box::new(ctor));
    }

    pub fn strategy(&self, name: &str) -> Result<Box<dyn Strategy>, SessionError> {
        self.strategies
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| SessionError::UnknownStrategy(name.to_string()))
    }

    pub fn layer(&self, name: &str) -> Result<Box<dyn Layer>, SessionError> {
        self.layers
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| SessionError::UnknownLayer(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve() {
        let registry = PluginRegistry::builtin();
        assert!(registry.strategy("random").is_ok());
        assert!(registry.strategy("sweep").is_ok());
        assert!(registry.layer("trace").is_ok());
    }

    #[test]
    fn unknown_names_are_load_errors() {
        let registry = PluginRegistry::builtin();
        assert!(matches!(
            registry.strategy("simplex"),
            Err(SessionError::UnknownStrategy(_))
        ));
        assert!(matches!(
            registry.layer("codegen"),
            Err(SessionError::UnknownLayer(_))
        ));
    }
}
