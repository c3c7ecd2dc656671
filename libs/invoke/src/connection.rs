//! Client side of a single connection.
//!
//! Outbound frames go through one unbounded queue drained by a writer task,
//! which is the only code that touches the transport's write half. A reader
//! task routes replies to the pending table by request id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use relay_core::{Identity, OperationRequest, OperationResult};
use relay_fabric::transport::{FrameReader, FrameWriter, Transport};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{InvocationError, Result};
use crate::frame::{DecodeError, Message, NO_REPLY_ID};
use crate::handle::InvocationHandle;
use crate::proxy::{BatchQueue, Proxy};

type ReplySender = oneshot::Sender<Result<OperationResult>>;

/// Twoway calls waiting for their reply.
///
/// Once the connection fails the table is closed: every waiting call gets the
/// failure and new registrations are refused with the same error.
#[derive(Default)]
pub(crate) struct PendingTable {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    replies: HashMap<u32, ReplySender>,
    closed: Option<InvocationError>,
}

impl PendingTable {
    /// Returns `false`, after failing `tx`, when the table is closed.
    fn register(&self, request_id: u32, tx: ReplySender) -> bool {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            let _ = tx.send(Err(reason.clone()));
            return false;
        }
        state.replies.insert(request_id, tx);
        true
    }

    fn complete(&self, request_id: u32, result: OperationResult) -> bool {
        match self.state.lock().replies.remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(Ok(result));
                true
            }
            None => false,
        }
    }

    fn fail(&self, request_id: u32, error: InvocationError) -> bool {
        match self.state.lock().replies.remove(&request_id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Fail every waiting call and close the table. The first reason wins.
    fn fail_all(&self, error: InvocationError) {
        let waiting = {
            let mut state = self.state.lock();
            let reason = state.closed.get_or_insert(error).clone();
            std::mem::take(&mut state.replies)
                .into_values()
                .map(move |tx| (tx, reason.clone()))
                .collect::<Vec<_>>()
        };
        for (tx, reason) in waiting {
            let _ = tx.send(Err(reason));
        }
    }

    pub(crate) fn cancel(&self, request_id: u32) -> bool {
        self.state.lock().replies.remove(&request_id).is_some()
    }

    fn closed_reason(&self) -> Option<InvocationError> {
        self.state.lock().closed.clone()
    }

    fn len(&self) -> usize {
        self.state.lock().replies.len()
    }
}

enum Outbound {
    Frame {
        frame: Bytes,
        request_id: Option<u32>,
        sent: Option<oneshot::Sender<Result<()>>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// An established client connection.
///
/// Obtain one from [`Client`](crate::Client) or [`Connection::establish`] and
/// create [`Proxy`] objects from it.
pub struct Connection {
    peer: String,
    config: ClientConfig,
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: Arc<PendingTable>,
    next_request_id: AtomicU32,
    batches: Mutex<Vec<Weak<BatchQueue>>>,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Take over `transport` and start its reader and writer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn establish<T>(transport: T, config: ClientConfig) -> Arc<Self>
    where
        T: Transport + 'static,
    {
        let peer = transport.peer();
        let (reader, writer) = Box::new(transport).into_split();
        let pending = Arc::new(PendingTable::default());
        let (outbound, rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(writer, rx, Arc::clone(&pending), peer.clone()));
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&pending), peer.clone()));

        info!(%peer, "connection established");
        Arc::new(Self {
            peer,
            config,
            outbound,
            pending,
            next_request_id: AtomicU32::new(1),
            batches: Mutex::new(Vec::new()),
            reader,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether the connection has failed or been closed.
    pub fn is_closed(&self) -> bool {
        self.pending.closed_reason().is_some() || self.outbound.is_closed()
    }

    /// Number of twoway calls waiting for a reply.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Create a twoway proxy for `identity` over this connection.
    pub fn proxy(self: &Arc<Self>, identity: Identity) -> Proxy {
        Proxy::new(Arc::clone(self), identity)
    }

    fn next_request_id(&self) -> u32 {
        loop {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            if id != NO_REPLY_ID {
                return id;
            }
        }
    }

    fn not_connected(&self) -> InvocationError {
        self.pending
            .closed_reason()
            .unwrap_or(InvocationError::NotConnected)
    }

    pub(crate) fn send_twoway(
        &self,
        request: OperationRequest,
        timeout: Option<Duration>,
    ) -> InvocationHandle {
        let request_id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        let handle =
            InvocationHandle::twoway(request_id, rx, Arc::downgrade(&self.pending), timeout);
        if !self.pending.register(request_id, tx) {
            return handle;
        }

        let frame = Message::Request {
            request_id,
            request,
        }
        .encode();
        let queued = self.outbound.send(Outbound::Frame {
            frame,
            request_id: Some(request_id),
            sent: None,
        });
        if queued.is_err() {
            self.pending.fail(request_id, self.not_connected());
        }
        handle
    }

    pub(crate) fn send_oneway(
        &self,
        request: OperationRequest,
        timeout: Option<Duration>,
    ) -> InvocationHandle {
        let frame = Message::Request {
            request_id: NO_REPLY_ID,
            request,
        }
        .encode();
        self.send_unreplied(frame, timeout)
    }

    pub(crate) fn send_batch(
        &self,
        requests: Vec<OperationRequest>,
        timeout: Option<Duration>,
    ) -> InvocationHandle {
        debug!(peer = %self.peer, count = requests.len(), "flushing batch");
        self.send_unreplied(Message::Batch(requests).encode(), timeout)
    }

    fn send_unreplied(&self, frame: Bytes, timeout: Option<Duration>) -> InvocationHandle {
        let (tx, rx) = oneshot::channel();
        let queued = self.outbound.send(Outbound::Frame {
            frame,
            request_id: None,
            sent: Some(tx),
        });
        match queued {
            Ok(()) => InvocationHandle::sent(rx, timeout),
            Err(_) => InvocationHandle::failed(self.not_connected()),
        }
    }

    /// Queue a batch frame without waiting for it to be written.
    pub(crate) fn enqueue_batch(&self, requests: Vec<OperationRequest>) {
        let count = requests.len();
        let queued = self.outbound.send(Outbound::Frame {
            frame: Message::Batch(requests).encode(),
            request_id: None,
            sent: None,
        });
        if queued.is_err() {
            debug!(peer = %self.peer, count, "dropping batch, connection closed");
        }
    }

    pub(crate) fn register_batch(&self, queue: &Arc<BatchQueue>) {
        let mut batches = self.batches.lock();
        batches.retain(|weak| weak.strong_count() > 0);
        batches.push(Arc::downgrade(queue));
    }

    fn flush_batches(&self) {
        let queues: Vec<_> = self
            .batches
            .lock()
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect();
        for queue in queues {
            let requests = queue.take();
            if !requests.is_empty() {
                self.enqueue_batch(requests);
            }
        }
    }

    /// Flush every live batch queue, tell the peer we are leaving and close
    /// the transport. Calls still waiting for a reply fail with
    /// [`InvocationError::ConnectionLost`].
    pub async fn close(&self) {
        self.flush_batches();
        let (done, closed) = oneshot::channel();
        if self.outbound.send(Outbound::Close { done }).is_ok() {
            let _ = closed.await;
        }
        self.pending
            .fail_all(InvocationError::ConnectionLost("connection closed".to_string()));
        self.reader.abort();
        info!(peer = %self.peer, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending_len())
            .finish()
    }
}

async fn write_loop(
    mut writer: Box<dyn FrameWriter>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    pending: Arc<PendingTable>,
    peer: String,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame {
                frame,
                request_id,
                sent,
            } => match writer.send(&frame).await {
                Ok(()) => {
                    if let Some(sent) = sent {
                        let _ = sent.send(Ok(()));
                    }
                }
                Err(relay_fabric::Error::InvalidFrame(reason)) => {
                    warn!(%peer, %reason, "frame rejected");
                    let error = InvocationError::FrameRejected(reason);
                    if let Some(request_id) = request_id {
                        pending.fail(request_id, error.clone());
                    }
                    if let Some(sent) = sent {
                        let _ = sent.send(Err(error));
                    }
                }
                Err(e) => {
                    warn!(%peer, error = %e, "write failed, closing connection");
                    let error = InvocationError::from(e);
                    if let Some(sent) = sent {
                        let _ = sent.send(Err(error.clone()));
                    }
                    pending.fail_all(error);
                    break;
                }
            },
            Outbound::Close { done } => {
                if let Err(e) = writer.send(&Message::Close.encode()).await {
                    debug!(%peer, error = %e, "failed to send close");
                }
                let _ = writer.close().await;
                pending.fail_all(InvocationError::ConnectionLost("connection closed".to_string()));
                let _ = done.send(());
                break;
            }
        }
    }

    // Anything still queued can no longer be written.
    rx.close();
    let reason = pending
        .closed_reason()
        .unwrap_or_else(|| InvocationError::ConnectionLost("connection closed".to_string()));
    while let Ok(outbound) = rx.try_recv() {
        match outbound {
            Outbound::Frame { request_id, sent, .. } => {
                if let Some(request_id) = request_id {
                    pending.fail(request_id, reason.clone());
                }
                if let Some(sent) = sent {
                    let _ = sent.send(Err(reason.clone()));
                }
            }
            Outbound::Close { done } => {
                let _ = done.send(());
            }
        }
    }
    let _ = writer.close().await;
}

async fn read_loop(mut reader: Box<dyn FrameReader>, pending: Arc<PendingTable>, peer: String) {
    let reason = loop {
        let frame = match reader.receive().await {
            Ok(frame) => frame,
            Err(e) if e.is_disconnect() => {
                break InvocationError::ConnectionLost("connection closed by peer".to_string())
            }
            Err(e) => {
                warn!(%peer, error = %e, "read failed");
                break InvocationError::from(e);
            }
        };

        match Message::decode(Bytes::from(frame)) {
            Ok(Message::Reply { request_id, result }) => {
                if !pending.complete(request_id, result) {
                    debug!(%peer, request_id, "discarding reply with no waiting call");
                }
            }
            Ok(Message::Close) => {
                debug!(%peer, "peer closed the connection");
                break InvocationError::ConnectionLost("connection closed by peer".to_string());
            }
            Ok(_) => warn!(%peer, "ignoring request sent to client"),
            Err(DecodeError {
                request_id: Some(request_id),
                source,
            }) => {
                warn!(%peer, request_id, error = %source, "malformed reply");
                pending.fail(request_id, InvocationError::Malformed(source));
            }
            Err(e) => warn!(%peer, error = %e, "dropping undecodable frame"),
        }
    };
    pending.fail_all(reason);
}
