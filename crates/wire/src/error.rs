use thiserror::Error;

/// Errors raised on the session channel.
///
/// Framing errors are fatal to the connection; malformed payloads are
/// protocol errors scoped to a single request.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad frame magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("unsupported protocol version {0}")]
    BadVersion(u16),

    #[error("frame length {0} shorter than the header")]
    BadLength(u16),

    #[error("connection closed mid-frame")]
    ShortRead,

    #[error("message too large for a frame ({0} bytes)")]
    Oversize(usize),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl WireError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    /// True for errors that corrupt framing and require dropping the
    /// connection, as opposed to request-scoped payload errors.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }
}
