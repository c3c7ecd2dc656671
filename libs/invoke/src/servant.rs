//! The generic servant extension point.
//!
//! A [`Blobject`] receives the operation name, mode and raw parameter bytes of
//! any request addressed to it and decides for itself what they mean. It
//! replaces operation-specific generated dispatch code.

use bytes::Bytes;
use relay_core::{Context, Identity, InvocationKind, OperationMode, OperationRequest};

/// Everything a servant may want to know about the request it is serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Current {
    pub identity: Identity,
    pub operation: String,
    pub mode: OperationMode,
    pub kind: InvocationKind,
    pub context: Context,
}

impl Current {
    pub fn from_request(request: &OperationRequest) -> Self {
        Self {
            identity: request.identity().clone(),
            operation: request.operation().to_string(),
            mode: request.mode(),
            kind: request.kind(),
            context: request.context().clone(),
        }
    }
}

/// What a servant did with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The operation ran; these are its encoded results.
    Ok(Bytes),
    /// The servant has no operation by this name.
    NotImplemented,
    /// The operation raised a declared exception.
    UserFailure { type_id: String, fields: Bytes },
    /// The servant could not run the operation, e.g. the parameters did not
    /// decode. Reported to the caller as an unknown local failure.
    Failed(String),
}

impl DispatchOutcome {
    pub fn ok(bytes: impl Into<Bytes>) -> Self {
        Self::Ok(bytes.into())
    }

    pub fn user_failure(type_id: impl Into<String>, fields: impl Into<Bytes>) -> Self {
        Self::UserFailure {
            type_id: type_id.into(),
            fields: fields.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A generic servant.
///
/// Called once per twoway or oneway request and once per item of a flushed
/// batch. The mode in `current` is advisory.
#[async_trait::async_trait]
pub trait Blobject: Send + Sync + 'static {
    async fn try_invoke(&self, current: &Current, params: Bytes) -> DispatchOutcome;
}
