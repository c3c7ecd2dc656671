use crate::error::Result;

pub mod framing;
pub mod memory;
pub mod tcp;
#[cfg(unix)]
pub mod unix;

pub use self::framing::{FramedReader, FramedWriter, DEFAULT_MAX_FRAME_LEN};
pub use self::memory::MemoryTransport;
pub use self::tcp::{TcpTransport, TcpTransportBuilder, TcpTransportListener};
#[cfg(unix)]
pub use self::unix::{UnixTransport, UnixTransportBuilder, UnixTransportListener};

/// Transport trait for sending and receiving framed bytes
///
/// Each transport instance represents a single connection.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send bytes over the transport
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Receive bytes from the transport
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Close the transport connection
    async fn close(&mut self) -> Result<()>;

    /// Split into halves that can be driven from different tasks
    fn into_split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);

    /// Human readable description of the remote end, for logs
    fn peer(&self) -> String;
}

/// Receiving half of a split transport
#[async_trait::async_trait]
pub trait FrameReader: Send {
    async fn receive(&mut self) -> Result<Vec<u8>>;
}

/// Sending half of a split transport
#[async_trait::async_trait]
pub trait FrameWriter: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Listener producing transports for incoming connections
#[async_trait::async_trait]
pub trait TransportListener: Send + Sync {
    type Transport: Transport + 'static;

    /// Accept the next incoming connection
    async fn accept(&self) -> Result<Self::Transport>;

    /// Stop listening
    async fn close(&mut self) -> Result<()>;
}
