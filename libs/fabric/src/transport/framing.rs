//! Length-prefix framing shared by every stream transport.
//!
//! A frame is a 4-byte big-endian length followed by that many bytes.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::transport::{FrameReader, FrameWriter};

/// Largest frame accepted by default (100MB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

fn map_eof(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}

/// Read half of a framed stream
pub struct FramedReader<R> {
    inner: R,
    receive_timeout: Option<Duration>,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin + Send> FramedReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            receive_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let max = self.max_frame_len;
        let inner = &mut self.inner;
        let receive_op = async move {
            // Read length prefix
            let len = inner.read_u32().await.map_err(map_eof)? as usize;

            if len > max {
                return Err(Error::InvalidFrame(format!(
                    "Message too large: {} bytes",
                    len
                )));
            }

            let mut buf = vec![0u8; len];
            inner.read_exact(&mut buf).await.map_err(map_eof)?;

            Ok::<Vec<u8>, Error>(buf)
        };

        if let Some(timeout) = self.receive_timeout {
            tokio::time::timeout(timeout, receive_op)
                .await
                .map_err(|_| Error::Timeout("Receive"))?
        } else {
            receive_op.await
        }
    }
}

#[async_trait::async_trait]
impl<R: AsyncRead + Unpin + Send> FrameReader for FramedReader<R> {
    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.read_frame().await
    }
}

/// Write half of a framed stream
pub struct FramedWriter<W> {
    inner: W,
    send_timeout: Option<Duration>,
    max_frame_len: usize,
}

impl<W: AsyncWrite + Unpin + Send> FramedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            send_timeout: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max: usize) -> Self {
        self.max_frame_len = max;
        self
    }

    pub async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.max_frame_len {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                bytes.len()
            )));
        }

        let inner = &mut self.inner;
        let send_op = async move {
            inner.write_u32(bytes.len() as u32).await?;
            inner.write_all(bytes).await?;
            inner.flush().await?;
            Ok::<(), Error>(())
        };

        if let Some(timeout) = self.send_timeout {
            tokio::time::timeout(timeout, send_op)
                .await
                .map_err(|_| Error::Timeout("Send"))?
        } else {
            send_op.await
        }
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameWriter for FramedWriter<W> {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_frame(bytes).await
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await
    }
}
