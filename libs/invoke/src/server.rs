//! Server side of the invocation layer.
//!
//! One task per connection reads frames and hands requests to a worker pool
//! bounded by a semaphore. Replies go back through a per-connection writer
//! guarded by a mutex, so frames are never interleaved. A batch is dispatched
//! inline by the connection task, item by item, so anything the peer sends
//! after the batch observes its effects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use relay_core::{ExceptionPayload, OperationRequest, OperationResult};
use relay_fabric::transport::{FrameWriter, Transport, TransportListener};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::frame::{DecodeError, Message, NO_REPLY_ID};

type SharedWriter = Arc<Mutex<Box<dyn FrameWriter>>>;

/// Pause after a failed accept, so a persistent error such as running out of
/// file descriptors does not spin the listener.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Cloneable trigger that asks a [`Server`] to stop.
///
/// Safe to call from inside a servant: it only flips the signal, the actual
/// teardown happens in [`Server::shutdown`].
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Accepts connections and dispatches their requests.
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    workers: Arc<Semaphore>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    tasks: parking_lot::Mutex<JoinSet<()>>,
    next_connection_id: AtomicU64,
}

impl Server {
    pub fn new(dispatcher: Arc<Dispatcher>, config: ServerConfig) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            dispatcher,
            workers: Arc::new(Semaphore::new(config.max_concurrent_dispatch.max(1))),
            config,
            shutdown_tx: Arc::new(shutdown_tx),
            tasks: parking_lot::Mutex::new(JoinSet::new()),
            next_connection_id: AtomicU64::new(1),
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Accept connections from `listener` until shutdown.
    pub fn listen<L>(self: &Arc<Self>, listener: L)
    where
        L: TransportListener + 'static,
    {
        let server = Arc::clone(self);
        self.tasks.lock().spawn(async move {
            let mut shutdown = server.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = stopped(&mut shutdown) => break,
                    accepted = listener.accept() => match accepted {
                        Ok(transport) => server.serve_connection(transport),
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    },
                }
            }
            debug!("listener stopped");
        });
    }

    /// Serve a single, already established connection.
    pub fn serve_connection<T>(self: &Arc<Self>, transport: T)
    where
        T: Transport + 'static,
    {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let server = Arc::clone(self);
        let mut tasks = self.tasks.lock();
        // Finished connections stay in the set until joined.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move { server.run_connection(id, Box::new(transport)).await });
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        stopped(&mut rx).await;
    }

    /// Stop accepting, drain in-flight dispatches and release every servant.
    ///
    /// Connections get `drain_timeout` to finish; whatever is still running
    /// afterwards is aborted.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        info!("server shutting down");

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "drain timeout expired, aborting connections");
            tasks.abort_all();
        }

        // Anything spawned while we were draining.
        self.tasks.lock().abort_all();

        self.workers.close();
        self.dispatcher.clear();
        info!("server stopped");
    }

    async fn run_connection(self: Arc<Self>, id: u64, transport: Box<dyn Transport>) {
        let peer = transport.peer();
        info!(connection = id, %peer, "connection accepted");

        let (mut reader, writer) = transport.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(writer));

        // Frame reads are not cancel safe, so they run on their own task and
        // arrive through a channel.
        let (frames_tx, mut frames_rx) = mpsc::channel(32);
        let read_task = tokio::spawn(async move {
            loop {
                let frame = reader.receive().await;
                let failed = frame.is_err();
                if frames_tx.send(frame).await.is_err() || failed {
                    break;
                }
            }
        });

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut dispatches = JoinSet::new();
        let mut peer_closed = false;

        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                Some(_) = dispatches.join_next(), if !dispatches.is_empty() => {}
                frame = frames_rx.recv() => match frame {
                    Some(Ok(bytes)) => {
                        if !self.handle_frame(Bytes::from(bytes), &writer, &mut dispatches).await {
                            peer_closed = true;
                            break;
                        }
                    }
                    Some(Err(e)) if e.is_disconnect() => {
                        debug!(connection = id, "peer disconnected");
                        peer_closed = true;
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = id, error = %e, "read failed, closing connection");
                        break;
                    }
                    None => break,
                },
            }
        }

        read_task.abort();
        while dispatches.join_next().await.is_some() {}

        let mut writer = writer.lock().await;
        if !peer_closed {
            if let Err(e) = writer.send(&Message::Close.encode()).await {
                debug!(connection = id, error = %e, "failed to send close");
            }
        }
        let _ = writer.close().await;
        info!(connection = id, %peer, "connection closed");
    }

    /// Returns `false` when the peer asked to close the connection.
    async fn handle_frame(
        &self,
        frame: Bytes,
        writer: &SharedWriter,
        dispatches: &mut JoinSet<()>,
    ) -> bool {
        match Message::decode(frame) {
            Ok(Message::Request { request_id, request }) => {
                self.spawn_request(request_id, request, writer, dispatches).await;
            }
            Ok(Message::Batch(requests)) => {
                self.dispatch_batch(requests).await;
            }
            Ok(Message::Close) => {
                debug!("peer requested close");
                return false;
            }
            Ok(Message::Reply { request_id, .. }) => {
                warn!(request_id, "ignoring reply sent to server");
            }
            Err(DecodeError {
                request_id: Some(request_id),
                source,
            }) if request_id != NO_REPLY_ID => {
                warn!(request_id, error = %source, "malformed request");
                let result = OperationResult::from_exception(&ExceptionPayload::unknown_local(
                    source.to_string(),
                ));
                send_reply(writer, request_id, result).await;
            }
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
            }
        }
        true
    }

    async fn spawn_request(
        &self,
        request_id: u32,
        request: OperationRequest,
        writer: &SharedWriter,
        dispatches: &mut JoinSet<()>,
    ) {
        let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
            return;
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let writer = Arc::clone(writer);
        dispatches.spawn(async move {
            let _permit = permit;
            let result = dispatcher.dispatch_request(&request).await;
            if request.kind().expects_reply() && request_id != NO_REPLY_ID {
                send_reply(&writer, request_id, result).await;
            }
        });
    }

    async fn dispatch_batch(&self, requests: Vec<OperationRequest>) {
        let Ok(_permit) = self.workers.acquire().await else {
            return;
        };
        debug!(count = requests.len(), "dispatching batch");
        for request in &requests {
            let result = self.dispatcher.dispatch_request(request).await;
            if !result.is_ok() {
                debug!(
                    operation = request.operation(),
                    status = %result.status(),
                    "batched request failed"
                );
            }
        }
    }
}

/// Resolve once the shutdown flag is set or its sender is gone.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn send_reply(writer: &SharedWriter, request_id: u32, result: OperationResult) {
    let frame = Message::Reply { request_id, result }.encode();
    if let Err(e) = writer.lock().await.send(&frame).await {
        warn!(request_id, error = %e, "failed to send reply");
    }
}
