use thiserror::Error;

/// Errors raised by the core data model.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("conflicting registration for config key {0}")]
    KeyConflict(String),

    #[error("invalid search space: {0}")]
    Space(String),

    #[error("index {index} out of range for dimension {name} (size {size})")]
    IndexOutOfRange {
        name: String,
        index: usize,
        size: usize,
    },

    #[error("performance vector length {got} does not match configured width {want}")]
    PerfWidth { got: usize, want: usize },
}
