//! Primitive payload readers and writers.
//!
//! Integers are big-endian, reals travel as IEEE-754 bit patterns, and
//! strings are u16-length-prefixed UTF-8. Readers check remaining length
//! before every access so a truncated payload surfaces as a protocol
//! error instead of a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;

fn need(buf: &Bytes, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        return Err(WireError::malformed(format!(
            "payload truncated: wanted {n} more bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

pub fn get_u8(buf: &mut Bytes) -> Result<u8, WireError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut Bytes) -> Result<u16, WireError> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub fn get_i32(buf: &mut Bytes) -> Result<i32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn get_i64(buf: &mut Bytes) -> Result<i64, WireError> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn get_f64(buf: &mut Bytes) -> Result<f64, WireError> {
    need(buf, 8)?;
    Ok(f64::from_bits(buf.get_u64()))
}

pub fn get_str(buf: &mut Bytes) -> Result<String, WireError> {
    let len = get_u16(buf)? as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| WireError::malformed("string field is not valid UTF-8"))
}

pub fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), WireError> {
    let len = u16::try_from(s.len())
        .map_err(|_| WireError::Oversize(s.len()))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn put_f64(buf: &mut BytesMut, v: f64) {
    buf.put_u64(v.to_bits());
}
