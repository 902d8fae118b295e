use thiserror::Error;

use attune_core::CoreError;
use attune_wire::WireError;

/// Errors raised by the session engine and dispatcher.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("unknown strategy plug-in {0:?}")]
    UnknownStrategy(String),

    #[error("unknown layer plug-in {0:?}")]
    UnknownLayer(String),

    #[error("incompatible join: {0}")]
    SpaceMismatch(String),

    #[error("plug-in error: {0}")]
    Plugin(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Fatal errors terminate the session; everything else turns into a
    /// FAIL reply on the channel and the dispatcher keeps serving.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Internal(_) => true,
            Self::Wire(e) => e.is_fatal(),
            _ => false,
        }
    }
}
