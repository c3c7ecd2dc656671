//! Length-prefixed primitives shared by the envelope, exception and message
//! encoders.
//!
//! Every variable-size item is written as a 4-byte big-endian length followed
//! by the raw bytes. Readers never panic on short input; they return
//! [`Error::MalformedEnvelope`] instead.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{Error, Result};

/// Write a length-prefixed byte blob.
pub fn put_blob(buf: &mut impl BufMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Write a length-prefixed UTF-8 string.
pub fn put_str(buf: &mut impl BufMut, s: &str) {
    put_blob(buf, s.as_bytes());
}

pub fn get_u8(buf: &mut Bytes) -> Result<u8> {
    if buf.remaining() < 1 {
        return Err(Error::malformed("unexpected end of input reading u8"));
    }
    Ok(buf.get_u8())
}

pub fn get_u32(buf: &mut Bytes) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::malformed("unexpected end of input reading u32"));
    }
    Ok(buf.get_u32())
}

/// Read a length-prefixed blob without copying.
pub fn get_blob(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::malformed(format!(
            "declared length {} exceeds {} available bytes",
            len,
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}

/// Read a length-prefixed UTF-8 string.
pub fn get_str(buf: &mut Bytes) -> Result<String> {
    let raw = get_blob(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|e| Error::malformed(format!("invalid UTF-8: {}", e)))
}
