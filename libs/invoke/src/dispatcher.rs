//! Server-side binding table and generic dispatch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use parking_lot::RwLock;
use relay_core::{
    Context, Envelope, ExceptionPayload, Identity, InvocationKind, OperationMode, OperationRequest,
    OperationResult,
};
use tracing::{debug, debug_span, warn, Instrument};

use crate::error::BindError;
use crate::servant::{Blobject, Current, DispatchOutcome};

/// Maps identities to generic servants and turns a request into an
/// [`OperationResult`].
///
/// Lookups are concurrent reads; `bind`/`unbind` lock only the affected shard.
#[derive(Default)]
pub struct Dispatcher {
    servants: DashMap<Identity, Arc<dyn Blobject>>,
    default_servant: RwLock<Option<Arc<dyn Blobject>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `servant` to `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::AlreadyBound`] if the identity already has a servant.
    pub fn bind(&self, identity: Identity, servant: Arc<dyn Blobject>) -> Result<(), BindError> {
        match self.servants.entry(identity) {
            Entry::Occupied(entry) => Err(BindError::AlreadyBound(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(identity = %entry.key(), "servant bound");
                entry.insert(servant);
                Ok(())
            }
        }
    }

    /// Remove the servant bound to `identity`, returning it.
    pub fn unbind(&self, identity: &Identity) -> Option<Arc<dyn Blobject>> {
        let removed = self.servants.remove(identity).map(|(_, servant)| servant);
        if removed.is_some() {
            debug!(%identity, "servant unbound");
        }
        removed
    }

    /// Install or remove the servant used for identities with no binding.
    pub fn set_default_servant(&self, servant: Option<Arc<dyn Blobject>>) {
        *self.default_servant.write() = servant;
    }

    pub fn find(&self, identity: &Identity) -> Option<Arc<dyn Blobject>> {
        self.servants
            .get(identity)
            .map(|entry| entry.value().clone())
            .or_else(|| self.default_servant.read().clone())
    }

    pub fn is_bound(&self, identity: &Identity) -> bool {
        self.servants.contains_key(identity)
    }

    pub fn len(&self) -> usize {
        self.servants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servants.is_empty()
    }

    /// Release every servant, including the default one.
    pub fn clear(&self) {
        self.servants.clear();
        *self.default_servant.write() = None;
    }

    /// Dispatch a bare call with no context.
    pub async fn dispatch(
        &self,
        identity: &Identity,
        operation: &str,
        mode: OperationMode,
        params: &Envelope,
    ) -> OperationResult {
        let current = Current {
            identity: identity.clone(),
            operation: operation.to_string(),
            mode,
            kind: InvocationKind::Twoway,
            context: Context::new(),
        };
        self.dispatch_current(current, params).await
    }

    /// Dispatch a decoded wire request.
    pub async fn dispatch_request(&self, request: &OperationRequest) -> OperationResult {
        self.dispatch_current(Current::from_request(request), request.params())
            .await
    }

    async fn dispatch_current(&self, current: Current, params: &Envelope) -> OperationResult {
        let span = debug_span!(
            "dispatch",
            identity = %current.identity,
            operation = %current.operation,
            mode = %current.mode,
        );
        self.run(current, params).instrument(span).await
    }

    async fn run(&self, current: Current, params: &Envelope) -> OperationResult {
        let Some(servant) = self.find(&current.identity) else {
            debug!("no servant bound");
            return OperationResult::from_exception(&ExceptionPayload::object_not_exist(
                &current.identity,
                &current.operation,
            ));
        };

        let data = match params.unwrap() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "rejecting request with malformed parameters");
                return OperationResult::from_exception(&ExceptionPayload::unknown_local(
                    e.to_string(),
                ));
            }
        };

        let outcome = AssertUnwindSafe(servant.try_invoke(&current, data))
            .catch_unwind()
            .await;

        match outcome {
            Ok(DispatchOutcome::Ok(bytes)) => OperationResult::ok(Envelope::wrap(bytes)),
            Ok(DispatchOutcome::NotImplemented) => {
                debug!("operation not implemented");
                OperationResult::from_exception(&ExceptionPayload::operation_not_exist(
                    &current.identity,
                    &current.operation,
                ))
            }
            Ok(DispatchOutcome::UserFailure { type_id, fields }) => {
                debug!(%type_id, "servant raised user exception");
                OperationResult::from_exception(&ExceptionPayload::user(type_id, fields))
            }
            Ok(DispatchOutcome::Failed(message)) => {
                warn!(%message, "servant failed");
                OperationResult::from_exception(&ExceptionPayload::unknown_local(message))
            }
            Err(_) => {
                warn!("servant panicked");
                OperationResult::from_exception(&ExceptionPayload::unknown_local(format!(
                    "servant panicked in `{}`",
                    current.operation
                )))
            }
        }
    }
}
