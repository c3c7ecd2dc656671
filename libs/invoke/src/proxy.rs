use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use relay_core::{Context, Envelope, Identity, InvocationKind, OperationMode, OperationRequest};
use tracing::debug;

use crate::connection::Connection;
use crate::error::{InvocationError, Result};
use crate::handle::{InvocationHandle, InvocationOutcome};

/// Requests held back by a proxy until the next flush.
#[derive(Default)]
pub(crate) struct BatchQueue {
    state: Mutex<BatchState>,
}

#[derive(Default)]
struct BatchState {
    batching: bool,
    queue: Vec<OperationRequest>,
}

impl BatchQueue {
    fn begin(&self) {
        self.state.lock().batching = true;
    }

    /// Queue `request` if it is a batch oneway or a oneway sent while
    /// batching; hand it back otherwise.
    ///
    /// A batch oneway enters batching. A plain oneway never changes the state.
    fn try_push(&self, request: OperationRequest) -> std::result::Result<(), OperationRequest> {
        let mut state = self.state.lock();
        match request.kind() {
            InvocationKind::BatchOneway => state.batching = true,
            InvocationKind::Oneway if state.batching => {}
            _ => return Err(request),
        }
        state.queue.push(request.with_kind(InvocationKind::BatchOneway));
        Ok(())
    }

    fn is_batching(&self) -> bool {
        self.state.lock().batching
    }

    fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Empty the queue and go back to idle.
    pub(crate) fn take(&self) -> Vec<OperationRequest> {
        let mut state = self.state.lock();
        state.batching = false;
        std::mem::take(&mut state.queue)
    }
}

struct ProxyInner {
    identity: Identity,
    connection: Arc<Connection>,
    kind: InvocationKind,
    context: Context,
    timeout: Option<Duration>,
    batch: Arc<BatchQueue>,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        let requests = self.batch.take();
        if !requests.is_empty() {
            debug!(identity = %self.identity, count = requests.len(), "flushing batch on drop");
            self.connection.enqueue_batch(requests);
        }
    }
}

/// Client-side handle to a remote object.
///
/// Clones share the same batch queue; the queue is flushed when the last
/// clone goes away. Proxies derived with the `with_*` methods get a queue of
/// their own.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    pub(crate) fn new(connection: Arc<Connection>, identity: Identity) -> Self {
        let timeout = connection.config().invocation_timeout;
        Self::build(ProxyInner {
            identity,
            connection,
            kind: InvocationKind::Twoway,
            context: Context::new(),
            timeout,
            batch: Arc::default(),
        })
    }

    fn build(inner: ProxyInner) -> Self {
        inner.connection.register_batch(&inner.batch);
        Self {
            inner: Arc::new(inner),
        }
    }

    fn derive(&self, change: impl FnOnce(&mut ProxyInner)) -> Self {
        let mut inner = ProxyInner {
            identity: self.inner.identity.clone(),
            connection: Arc::clone(&self.inner.connection),
            kind: self.inner.kind,
            context: self.inner.context.clone(),
            timeout: self.inner.timeout,
            batch: Arc::default(),
        };
        change(&mut inner);
        Self::build(inner)
    }

    pub fn identity(&self) -> &Identity {
        &self.inner.identity
    }

    pub fn kind(&self) -> InvocationKind {
        self.inner.kind
    }

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.inner.connection
    }

    pub fn with_kind(&self, kind: InvocationKind) -> Self {
        self.derive(|inner| inner.kind = kind)
    }

    pub fn twoway(&self) -> Self {
        self.with_kind(InvocationKind::Twoway)
    }

    pub fn oneway(&self) -> Self {
        self.with_kind(InvocationKind::Oneway)
    }

    pub fn batch_oneway(&self) -> Self {
        self.with_kind(InvocationKind::BatchOneway)
    }

    /// Context sent with every invocation made through the new proxy.
    pub fn with_context(&self, context: Context) -> Self {
        self.derive(|inner| inner.context = context)
    }

    /// `None` waits for a reply indefinitely.
    pub fn with_timeout(&self, timeout: Option<Duration>) -> Self {
        self.derive(|inner| inner.timeout = timeout)
    }

    /// Invoke `operation` and wait for the outcome.
    pub async fn invoke(
        &self,
        operation: &str,
        mode: OperationMode,
        params: Envelope,
    ) -> Result<InvocationOutcome> {
        self.invoke_async(operation, mode, params).await
    }

    /// Like [`invoke`](Self::invoke), replacing the proxy's context for this
    /// one call.
    pub async fn invoke_with_context(
        &self,
        operation: &str,
        mode: OperationMode,
        params: Envelope,
        context: Context,
    ) -> Result<InvocationOutcome> {
        self.start(operation, mode, params, context).await
    }

    /// Start an invocation without waiting for it.
    ///
    /// The request is queued for sending (or added to the batch) before this
    /// returns. Must be called from within a Tokio runtime.
    pub fn invoke_async(
        &self,
        operation: &str,
        mode: OperationMode,
        params: Envelope,
    ) -> InvocationHandle {
        self.start(operation, mode, params, self.inner.context.clone())
    }

    /// Raw form of a twoway call: the success flag and the unwrapped payload.
    ///
    /// On failure the payload is the encoded exception.
    pub async fn invoke_bytes(
        &self,
        operation: &str,
        mode: OperationMode,
        params: &[u8],
    ) -> Result<(bool, Bytes)> {
        if self.inner.kind != InvocationKind::Twoway {
            return Err(InvocationError::TwowayOnly {
                operation: operation.to_string(),
            });
        }
        let outcome = self
            .invoke(operation, mode, Envelope::wrap(Bytes::copy_from_slice(params)))
            .await?;
        let Some(result) = outcome.into_result() else {
            return Err(InvocationError::TwowayOnly {
                operation: operation.to_string(),
            });
        };
        let (ok, envelope) = result.into_pair();
        let bytes = envelope.unwrap().map_err(InvocationError::Malformed)?;
        Ok((ok, bytes))
    }

    fn start(
        &self,
        operation: &str,
        mode: OperationMode,
        params: Envelope,
        context: Context,
    ) -> InvocationHandle {
        let inner = &self.inner;
        let request = match OperationRequest::new(
            inner.identity.clone(),
            operation,
            mode,
            inner.kind,
            context,
            params,
        ) {
            Ok(request) => request,
            Err(e) => return InvocationHandle::failed(InvocationError::InvalidRequest(e)),
        };

        // Deciding and queueing under one lock keeps a concurrent flush from
        // stranding the request.
        let request = match inner.batch.try_push(request) {
            Ok(()) => return InvocationHandle::queued(),
            Err(request) => request,
        };
        match request.kind() {
            InvocationKind::Twoway => inner.connection.send_twoway(request, inner.timeout),
            _ => inner.connection.send_oneway(request, inner.timeout),
        }
    }

    /// Start queueing oneway invocations instead of sending them.
    pub fn begin_batch(&self) {
        self.inner.batch.begin();
    }

    pub fn is_batching(&self) -> bool {
        self.inner.batch.is_batching()
    }

    pub fn queued_len(&self) -> usize {
        self.inner.batch.len()
    }

    /// Send the queued requests as one batch frame and return to idle.
    ///
    /// Flushing an empty queue sends nothing.
    pub async fn flush_batch(&self) -> Result<()> {
        let requests = self.inner.batch.take();
        if requests.is_empty() {
            return Ok(());
        }
        self.inner
            .connection
            .send_batch(requests, self.inner.timeout)
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("identity", &self.inner.identity)
            .field("kind", &self.inner.kind)
            .field("peer", &self.inner.connection.peer())
            .finish()
    }
}
