//! Relay Invoke - Generic invocation over framed transports
//!
//! A client sends an operation name, a mode and an [`Envelope`] of opaque
//! parameter bytes to a remote object. The server looks the object up in its
//! [`Dispatcher`] and hands the call to a [`Blobject`], which decides what the
//! operation means. No generated stubs are involved on either side.
//!
//! # Example
//!
//! ```no_run
//! use relay_core::{Envelope, Identity, OperationMode};
//! use relay_invoke::{Client, ClientConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(ClientConfig::default());
//! let proxy = client
//!     .proxy(Identity::new("printer")?, "127.0.0.1:4061".parse()?)
//!     .await?;
//!
//! let outcome = proxy
//!     .invoke("echo", OperationMode::Normal, Envelope::wrap(vec![1, 2, 3]))
//!     .await?;
//! assert!(outcome.result().is_some_and(|r| r.is_ok()));
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`Envelope`]: relay_core::Envelope

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod handle;
pub mod proxy;
pub mod servant;
pub mod server;

// Re-exports for convenience
pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use error::{BindError, InvocationError, Result};
pub use handle::{InvocationHandle, InvocationOutcome};
pub use proxy::Proxy;
pub use servant::{Blobject, Current, DispatchOutcome};
pub use server::{Server, ShutdownSignal};
