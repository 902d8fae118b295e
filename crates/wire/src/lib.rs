//! Wire protocol for the tuning session channel.
//!
//! Every record is a six-byte header (magic, total length, protocol
//! version) followed by a typed payload. The layout is fixed by the
//! protocol, so the codec is written by hand over byte buffers rather
//! than derived.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use error::WireError;
pub use frame::{FrameReader, FrameWriter, HEADER_LEN, MAGIC, MAX_PAYLOAD, VERSION};
pub use message::{Body, Message, MessageKind, Status, WirePoint};
