//! Frame layer: six-byte header plus payload.
//!
//! Header layout, all big-endian:
//!
//! ```text
//! | magic: u32 | length: u16 | version: u16 |
//! ```
//!
//! `length` counts the whole record including the header. A magic or
//! version mismatch poisons the stream and is fatal.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::WireError;
use crate::message::Message;

pub const MAGIC: u32 = 0x5261793A;
pub const VERSION: u16 = 5;
pub const HEADER_LEN: usize = 6;
pub const MAX_PAYLOAD: usize = u16::MAX as usize - HEADER_LEN;

/// Buffered frame reader over the inbound half of the channel.
///
/// `recv` is cancel-safe: bytes accumulate in an internal buffer across
/// partial reads, so dropping an in-flight call never loses data.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Receive the next message. `Ok(None)` is a clean end-of-stream at a
    /// frame boundary; EOF mid-frame is a [`WireError::ShortRead`].
    pub async fn recv(&mut self) -> Result<Option<Message>, WireError> {
        loop {
            if let Some(payload) = self.take_frame()? {
                return Message::decode(payload).map(Some);
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(WireError::ShortRead);
            }
        }
    }

    /// Split one complete frame's payload off the buffer, if present.
    fn take_frame(&mut self) -> Result<Option<Bytes>, WireError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &self.buf[..HEADER_LEN];
        let magic = header.get_u32();
        let length = header.get_u16();
        let version = header.get_u16();

        if magic != MAGIC {
            return Err(WireError::BadMagic(magic));
        }
        if version != VERSION {
            return Err(WireError::BadVersion(version));
        }
        if (length as usize) < HEADER_LEN {
            return Err(WireError::BadLength(length));
        }
        if self.buf.len() < length as usize {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(length as usize - HEADER_LEN).freeze();
        trace!(target: "attune::wire", len = length, "frame received");
        Ok(Some(payload))
    }
}

/// Frame writer over the outbound half of the channel.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Serialize and send one message, flushing the stream.
    pub async fn send(&mut self, msg: &Message) -> Result<(), WireError> {
        let payload = msg.encode()?;
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::Oversize(payload.len()));
        }

        let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
        frame.put_u32(MAGIC);
        frame.put_u16((HEADER_LEN + payload.len()) as u16);
        frame.put_u16(VERSION);
        frame.extend_from_slice(&payload);

        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        trace!(target: "attune::wire", len = frame.len(), kind = ?msg.kind, status = ?msg.status, "frame sent");
        Ok(())
    }
}
