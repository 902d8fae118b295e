//! Session configuration store.
//!
//! A keyed string map shared by the engine and every loaded plug-in.
//! Recognised keys carry a [`KeyInfo`] entry (default value + help text);
//! plug-ins merge their own tables at load time. Lookups fall back to the
//! registered default when no explicit value has been set.

use std::env;

use indexmap::IndexMap;

use crate::error::CoreError;

/// Well-known configuration keys understood by the session core.
pub mod keys {
    /// Framework installation root.
    pub const HARMONY_HOME: &str = "HARMONY_HOME";
    /// Name of the search strategy plug-in.
    pub const SESSION_STRATEGY: &str = "SESSION_STRATEGY";
    /// Semicolon-separated list of processing layer plug-ins.
    pub const SESSION_LAYERS: &str = "SESSION_LAYERS";
    /// Number of clients expected to join the session.
    pub const CLIENT_COUNT: &str = "CLIENT_COUNT";
    /// Candidate points buffered per client.
    pub const GEN_COUNT: &str = "GEN_COUNT";
    /// Width of the performance vector.
    pub const PERF_COUNT: &str = "PERF_COUNT";
    /// Seed for the session PRNG; negative means seed from entropy.
    pub const RANDOM_SEED: &str = "RANDOM_SEED";
    /// When true, FETCH requests are answered with the current best.
    pub const PAUSED: &str = "PAUSED";
    /// Source id of the client whose request is currently being served.
    pub const CURRENT_CLIENT: &str = "CURRENT_CLIENT";
    /// Set by strategies once the search has converged.
    pub const STRATEGY_CONVERGED: &str = "STRATEGY_CONVERGED";
}

/// Declaration of a recognised configuration key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInfo {
    pub key: &'static str,
    /// Value returned by lookups when the key has not been set.
    pub default: Option<&'static str>,
    pub help: &'static str,
}

/// Key-info table for the core keys. Plug-in tables are merged on top of
/// this at load time.
const CORE_KEYINFO: &[KeyInfo] = &[
    KeyInfo {
        key: keys::HARMONY_HOME,
        default: None,
        help: "Framework installation root",
    },
    KeyInfo {
        key: keys::SESSION_STRATEGY,
        default: Some("random"),
        help: "Search strategy plug-in name",
    },
    KeyInfo {
        key: keys::SESSION_LAYERS,
        default: None,
        help: "Semicolon-separated processing layer list",
    },
    KeyInfo {
        key: keys::CLIENT_COUNT,
        default: Some("1"),
        help: "Number of participating clients",
    },
    KeyInfo {
        key: keys::GEN_COUNT,
        default: Some("1"),
        help: "Candidate points buffered per client",
    },
    KeyInfo {
        key: keys::PERF_COUNT,
        default: Some("1"),
        help: "Performance vector width",
    },
    KeyInfo {
        key: keys::RANDOM_SEED,
        default: Some("-1"),
        help: "PRNG seed (negative seeds from entropy)",
    },
    KeyInfo {
        key: keys::PAUSED,
        default: Some("0"),
        help: "Pause candidate hand-out",
    },
    KeyInfo {
        key: keys::CURRENT_CLIENT,
        default: None,
        help: "Client currently being served",
    },
    KeyInfo {
        key: keys::STRATEGY_CONVERGED,
        default: None,
        help: "Search convergence flag",
    },
];

/// Keyed string map with typed views and per-key defaults.
///
/// Iteration order is insertion order, which keeps config dumps and
/// change propagation deterministic.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    values: IndexMap<String, String>,
    info: IndexMap<&'static str, KeyInfo>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    /// Create a store with the core key-info table registered.
    pub fn new() -> Self {
        let mut store = Self {
            values: IndexMap::new(),
            info: IndexMap::new(),
        };
        // The core table is internally consistent; merging cannot fail.
        let _ = store.register(CORE_KEYINFO);
        store
    }

    /// Merge a plug-in's key-info table. Re-registering a key is an error
    /// unless the entries agree exactly.
    pub fn register(&mut self, table: &[KeyInfo]) -> Result<(), CoreError> {
        for info in table {
            match self.info.get(info.key) {
                Some(existing) if existing != info => {
                    return Err(CoreError::KeyConflict(info.key.to_string()));
                }
                Some(_) => {}
                None => {
                    self.info.insert(info.key, *info);
                }
            }
        }
        Ok(())
    }

    /// Seed recognised keys from identically named process environment
    /// variables. Explicitly set values are not overwritten.
    pub fn load_env(&mut self) {
        let known: Vec<&'static str> = self.info.keys().copied().collect();
        for key in known {
            if self.values.contains_key(key) {
                continue;
            }
            if let Ok(val) = env::var(key) {
                if !val.is_empty() {
                    self.values.insert(key.to_string(), val);
                }
            }
        }
    }

    /// Current value for `key`: explicit value first, else the registered
    /// default.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .or_else(|| self.info.get(key).and_then(|i| i.default))
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn unset(&mut self, key: &str) {
        self.values.shift_remove(key);
    }

    /// Integer view: parsed value, else parsed default, else 0.
    pub fn int(&self, key: &str) -> i64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
    }

    /// Real view: parsed value, else parsed default, else 0.0.
    pub fn real(&self, key: &str) -> f64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(0.0)
    }

    /// Boolean view: `1`, `true`, `yes`, and `on` (case-insensitive) are
    /// true; everything else, including an unset key, is false.
    pub fn bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| {
                matches!(
                    v.to_ascii_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
            .unwrap_or(false)
    }

    /// Explicitly set key/value pairs, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Summary of the explicit values for startup logs.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}
