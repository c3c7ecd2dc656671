//! Relay Fabric - Low-level transport and codec layer
//!
//! Provides framed transports (TCP, Unix sockets, in-memory pipes) and codec
//! support (bincode) for the invocation layer. Every transport moves opaque,
//! length-prefixed frames and can be split into independently owned read and
//! write halves.
//!
//! # Example
//!
//! ```no_run
//! use relay_fabric::{codec::{BincodeCodec, Codec}, transport::{TcpTransport, Transport}};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let addr = "127.0.0.1:8080".parse()?;
//! let mut transport = TcpTransport::connect(addr).await?;
//!
//! let bytes = BincodeCodec.encode(&"hello".to_string())?;
//! transport.send(&bytes).await?;
//! let reply = transport.receive().await?;
//! let text: String = BincodeCodec.decode(&reply)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod transport;

// Re-exports for convenience
pub use error::{Error, Result};
pub use transport::{FrameReader, FrameWriter, Transport, TransportListener};
