//! Relay Core - Shared data model for generic invocation
//!
//! Defines the pieces every layer agrees on: identities, operation and
//! invocation modes, the versioned parameter [`Envelope`], the exception codec
//! and the [`OperationResult`] returned by a dispatch. Nothing here performs
//! I/O; all encoders are pure transforms over [`bytes`] buffers.
//!
//! # Example
//!
//! ```
//! use relay_core::{Envelope, ExceptionKind, exception};
//!
//! let env = Envelope::wrap(vec![1, 2, 3]);
//! assert_eq!(&env.unwrap().unwrap()[..], &[1, 2, 3]);
//!
//! let failure = exception::encode_exception(ExceptionKind::UserDeclared, Some("::Demo::Oops"), &b"f"[..]);
//! let decoded = exception::decode_exception(&failure).unwrap();
//! assert_eq!(decoded.type_id.as_deref(), Some("::Demo::Oops"));
//! ```

pub mod envelope;
pub mod error;
pub mod exception;
pub mod identity;
pub mod mode;
pub mod request;
pub mod result;
pub mod wire;

// Re-exports for convenience
pub use envelope::{EncodingVersion, Envelope};
pub use error::{Error, Result};
pub use exception::{ExceptionKind, ExceptionPayload};
pub use identity::Identity;
pub use mode::{InvocationKind, OperationMode};
pub use request::{Context, OperationRequest};
pub use result::{OperationResult, ReplyStatus};
