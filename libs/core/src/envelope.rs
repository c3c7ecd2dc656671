//! Versioned, length-framed container for opaque parameter and result bytes.
//!
//! Wire layout:
//!
//! ```text
//! [size: u32 BE, header + data][major: u8][minor: u8][data ...]
//! ```
//!
//! The envelope never interprets `data`; only the caller's own codec does.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Size of the `[size][major][minor]` header in bytes.
pub const HEADER_LEN: usize = 6;

/// Encoding version tag carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncodingVersion {
    pub major: u8,
    pub minor: u8,
}

impl EncodingVersion {
    pub const V1_0: Self = Self { major: 1, minor: 0 };
    pub const V1_1: Self = Self { major: 1, minor: 1 };

    /// The version written by [`Envelope::wrap`]
    pub const CURRENT: Self = Self::V1_1;

    pub fn is_supported(self) -> bool {
        self.major == 1 && self.minor <= 1
    }
}

impl fmt::Display for EncodingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// An encoded envelope, held in its wire form.
///
/// Constructing from the wire ([`Envelope::from_wire`]) performs no checks;
/// [`Envelope::unwrap`] validates the header and yields the data.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    raw: Bytes,
}

impl Envelope {
    /// Wrap opaque bytes with the current encoding version
    pub fn wrap(data: impl Into<Bytes>) -> Self {
        Self::wrap_with_version(EncodingVersion::CURRENT, data)
    }

    pub fn wrap_with_version(version: EncodingVersion, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut buf = BytesMut::with_capacity(HEADER_LEN + data.len());
        buf.put_u32((HEADER_LEN + data.len()) as u32);
        buf.put_u8(version.major);
        buf.put_u8(version.minor);
        buf.put_slice(&data);
        Self { raw: buf.freeze() }
    }

    /// An envelope with no data, used for void results.
    pub fn empty() -> Self {
        Self::wrap(Bytes::new())
    }

    /// Adopt bytes that are claimed to be an envelope.
    pub fn from_wire(raw: impl Into<Bytes>) -> Self {
        Self { raw: raw.into() }
    }

    /// Read one envelope off the front of `buf`, using its own size field
    /// to find where it ends.
    pub fn read_from(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(Error::malformed("missing envelope size"));
        }
        let size = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if size < HEADER_LEN {
            return Err(Error::malformed(format!("envelope size {} below header size", size)));
        }
        if size > buf.remaining() {
            return Err(Error::malformed(format!(
                "envelope size {} exceeds {} available bytes",
                size,
                buf.remaining()
            )));
        }
        Ok(Self { raw: buf.split_to(size) })
    }

    /// Validate the header and return the data without copying.
    ///
    /// Fails with [`Error::MalformedEnvelope`] when the declared size does not
    /// match the available bytes and with [`Error::UnsupportedEncoding`] for
    /// an unknown version tag.
    pub fn unwrap(&self) -> Result<Bytes> {
        let version = self.version()?;
        let declared = self.declared_size()?;
        if declared != self.raw.len() {
            return Err(Error::malformed(format!(
                "declared size {} but {} bytes available",
                declared,
                self.raw.len()
            )));
        }
        if !version.is_supported() {
            return Err(Error::UnsupportedEncoding {
                major: version.major,
                minor: version.minor,
            });
        }
        Ok(self.raw.slice(HEADER_LEN..))
    }

    pub fn version(&self) -> Result<EncodingVersion> {
        if self.raw.len() < HEADER_LEN {
            return Err(Error::malformed(format!(
                "{} bytes is shorter than the envelope header",
                self.raw.len()
            )));
        }
        Ok(EncodingVersion {
            major: self.raw[4],
            minor: self.raw[5],
        })
    }

    fn declared_size(&self) -> Result<usize> {
        if self.raw.len() < 4 {
            return Err(Error::malformed("missing envelope size"));
        }
        let size = u32::from_be_bytes([self.raw[0], self.raw[1], self.raw[2], self.raw[3]]) as usize;
        if size < HEADER_LEN {
            return Err(Error::malformed(format!("envelope size {} below header size", size)));
        }
        Ok(size)
    }

    /// Length of the data section as declared by the header.
    pub fn data_len(&self) -> usize {
        self.raw.len().saturating_sub(HEADER_LEN)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.raw
    }

    pub fn into_bytes(self) -> Bytes {
        self.raw
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.raw);
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("len", &self.raw.len())
            .field("version", &self.version().ok())
            .finish()
    }
}
