use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use relay_core::{
    Context, Envelope, Identity, InvocationKind, OperationMode, OperationResult, ReplyStatus,
};
use relay_fabric::transport::{MemoryTransport, TcpTransportListener, Transport};
use relay_invoke::frame::Message;
use relay_invoke::{
    Blobject, Client, ClientConfig, Connection, Current, DispatchOutcome, Dispatcher,
    InvocationError, InvocationOutcome, Server, ServerConfig,
};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq)]
struct Call {
    operation: String,
    params: Bytes,
    mode: OperationMode,
    kind: InvocationKind,
}

/// Servant that records every call it sees.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Call>>,
    release: Notify,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn logged(&self) -> Vec<Bytes> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == "log")
            .map(|c| c.params)
            .collect()
    }

    async fn wait_for_calls(&self, operation: &str, count: usize) {
        for _ in 0..200 {
            if self.calls().iter().filter(|c| c.operation == operation).count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("servant never saw {count} `{operation}` calls");
    }
}

#[async_trait::async_trait]
impl Blobject for Recorder {
    async fn try_invoke(&self, current: &Current, params: Bytes) -> DispatchOutcome {
        self.calls.lock().push(Call {
            operation: current.operation.clone(),
            params: params.clone(),
            mode: current.mode,
            kind: current.kind,
        });
        match current.operation.as_str() {
            "echo" => DispatchOutcome::Ok(params),
            "log" => DispatchOutcome::ok(Bytes::new()),
            "fail" => DispatchOutcome::user_failure("T", params),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                DispatchOutcome::Ok(params)
            }
            "block" => {
                self.release.notified().await;
                DispatchOutcome::ok(Bytes::new())
            }
            "ctx" => match current.context.get("k") {
                Some(value) => DispatchOutcome::ok(value.clone().into_bytes()),
                None => DispatchOutcome::ok(Bytes::new()),
            },
            _ => DispatchOutcome::NotImplemented,
        }
    }
}

fn ident(name: &str) -> Identity {
    Identity::new(name).unwrap()
}

fn env(bytes: &'static [u8]) -> Envelope {
    Envelope::wrap(Bytes::from_static(bytes))
}

/// Server with one recorder bound as `obj`, connected over an in-memory pipe.
fn setup() -> (Arc<Server>, Arc<Recorder>, Arc<Connection>) {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.bind(ident("obj"), recorder.clone()).unwrap();
    let server = Server::new(dispatcher, ServerConfig::default());

    let (client_side, server_side) = MemoryTransport::pair();
    server.serve_connection(server_side);
    let connection = Connection::establish(client_side, ClientConfig::default());
    (server, recorder, connection)
}

fn reply(outcome: Result<InvocationOutcome, InvocationError>) -> OperationResult {
    match outcome.unwrap() {
        InvocationOutcome::Reply(result) => result,
        other => panic!("expected a reply, got {other:?}"),
    }
}

#[tokio::test]
async fn echo_returns_params() {
    let (_server, recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    let result = reply(proxy.invoke("echo", OperationMode::Normal, env(&[1, 2, 3])).await);

    assert_eq!(result.status(), ReplyStatus::Ok);
    assert_eq!(&result.success().unwrap().unwrap()[..], &[1, 2, 3]);

    let calls = recorder.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, InvocationKind::Twoway);
}

#[tokio::test]
async fn mode_reaches_servant_unchanged() {
    let (_server, recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    proxy
        .invoke("echo", OperationMode::Idempotent, env(b""))
        .await
        .unwrap();
    proxy
        .invoke("echo", OperationMode::Nonmutating, env(b""))
        .await
        .unwrap();

    let modes: Vec<_> = recorder.calls().iter().map(|c| c.mode).collect();
    assert_eq!(modes, vec![OperationMode::Idempotent, OperationMode::Nonmutating]);
}

#[tokio::test]
async fn invoke_bytes_is_raw_surface() {
    let (_server, _recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    let (ok, out) = proxy
        .invoke_bytes("echo", OperationMode::Normal, &[1, 2, 3])
        .await
        .unwrap();
    assert!(ok);
    assert_eq!(&out[..], &[1, 2, 3]);

    let (ok, out) = proxy
        .invoke_bytes("fail", OperationMode::Normal, b"F")
        .await
        .unwrap();
    assert!(!ok);
    let exception = relay_core::exception::decode_exception(&Envelope::wrap(out)).unwrap();
    assert_eq!(exception.type_id.as_deref(), Some("T"));
}

#[tokio::test]
async fn unknown_operation_is_operation_not_exist() {
    let (_server, _recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    let result = reply(proxy.invoke("doesNotExist", OperationMode::Normal, env(b"")).await);

    assert_eq!(result.status(), ReplyStatus::OperationNotExist);
    let details = result.exception().unwrap().not_exist_details().unwrap();
    assert_eq!(details.identity, ident("obj"));
    assert_eq!(details.operation, "doesNotExist");
}

#[tokio::test]
async fn unbound_identity_is_object_not_exist() {
    let (_server, recorder, connection) = setup();
    let proxy = connection.proxy(ident("missing"));

    let result = reply(proxy.invoke("echo", OperationMode::Normal, env(b"x")).await);

    assert_eq!(result.status(), ReplyStatus::ObjectNotExist);
    let details = result.exception().unwrap().not_exist_details().unwrap();
    assert_eq!(details.identity, ident("missing"));
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn user_failure_keeps_type_id_and_fields() {
    let (_server, _recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    let fields: &'static [u8] = &[0, 1, 2, 0xff, 0xfe];
    let result = reply(proxy.invoke("fail", OperationMode::Normal, env(fields)).await);

    assert_eq!(result.status(), ReplyStatus::UserException);
    let exception = result.exception().unwrap();
    assert_eq!(exception.type_id.as_deref(), Some("T"));
    assert_eq!(&exception.fields[..], fields);
}

#[tokio::test]
async fn oneway_completes_without_waiting_for_servant() {
    let (_server, recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj")).oneway();

    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        proxy.invoke("block", OperationMode::Normal, env(b"")),
    )
    .await
    .expect("oneway call waited for the servant")
    .unwrap();
    assert_eq!(outcome, InvocationOutcome::Sent);
    assert_eq!(connection.pending_len(), 0);

    recorder.wait_for_calls("block", 1).await;
    assert_eq!(recorder.calls()[0].kind, InvocationKind::Oneway);
    recorder.release.notify_one();
}

#[tokio::test]
async fn batch_is_dispatched_in_order() {
    let (_server, recorder, connection) = setup();
    let twoway = connection.proxy(ident("obj"));
    let batch = twoway.batch_oneway();

    for payload in [b"a", b"b", b"c"] {
        let outcome = batch
            .invoke("log", OperationMode::Normal, Envelope::wrap(&payload[..]))
            .await
            .unwrap();
        assert_eq!(outcome, InvocationOutcome::Queued);
    }
    assert!(batch.is_batching());
    assert_eq!(batch.queued_len(), 3);
    assert!(recorder.calls().is_empty());

    batch.flush_batch().await.unwrap();
    assert!(!batch.is_batching());
    assert_eq!(batch.queued_len(), 0);

    // Batches are dispatched before any later frame on the connection.
    twoway.invoke("echo", OperationMode::Normal, env(b"")).await.unwrap();

    assert_eq!(recorder.logged(), vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    assert!(recorder
        .calls()
        .iter()
        .filter(|c| c.operation == "log")
        .all(|c| c.kind == InvocationKind::BatchOneway));
}

#[tokio::test]
async fn oneway_calls_are_queued_while_batching() {
    let (_server, recorder, connection) = setup();
    let twoway = connection.proxy(ident("obj"));
    let oneway = twoway.oneway();

    oneway.begin_batch();
    assert!(oneway.is_batching());
    for payload in [b"P1", b"P2"] {
        let outcome = oneway
            .invoke("log", OperationMode::Normal, Envelope::wrap(&payload[..]))
            .await
            .unwrap();
        assert_eq!(outcome, InvocationOutcome::Queued);
    }
    oneway.flush_batch().await.unwrap();

    twoway.invoke("echo", OperationMode::Normal, env(b"")).await.unwrap();
    assert_eq!(recorder.logged(), vec![&b"P1"[..], &b"P2"[..]]);

    // Back to idle, so the next oneway goes straight out.
    let outcome = oneway
        .invoke("log", OperationMode::Normal, env(b"P3"))
        .await
        .unwrap();
    assert_eq!(outcome, InvocationOutcome::Sent);
}

#[tokio::test]
async fn twoway_calls_are_not_batched() {
    let (_server, _recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    proxy.begin_batch();
    let result = reply(proxy.invoke("echo", OperationMode::Normal, env(b"now")).await);
    assert_eq!(&result.success().unwrap().unwrap()[..], b"now");
    assert_eq!(proxy.queued_len(), 0);
}

#[tokio::test]
async fn empty_flush_sends_nothing() {
    let (client_side, mut raw) = MemoryTransport::pair();
    let connection = Connection::establish(client_side, ClientConfig::default());
    let oneway = connection.proxy(ident("obj")).oneway();

    oneway.begin_batch();
    oneway.flush_batch().await.unwrap();
    oneway.flush_batch().await.unwrap();
    assert!(!oneway.is_batching());

    oneway
        .invoke("marker", OperationMode::Normal, env(b""))
        .await
        .unwrap();

    // The first frame on the wire is the marker, not an empty batch.
    let frame = raw.receive().await.unwrap();
    match Message::decode(Bytes::from(frame)).unwrap() {
        Message::Request {
            request_id,
            request,
        } => {
            assert_eq!(request_id, 0);
            assert_eq!(request.operation(), "marker");
        }
        other => panic!("unexpected first frame {other:?}"),
    }
}

#[tokio::test]
async fn dropping_last_proxy_clone_flushes_batch() {
    let (_server, recorder, connection) = setup();
    let twoway = connection.proxy(ident("obj"));

    let batch = twoway.batch_oneway();
    let clone = batch.clone();
    batch
        .invoke("log", OperationMode::Normal, env(b"first"))
        .await
        .unwrap();
    clone
        .invoke("log", OperationMode::Normal, env(b"second"))
        .await
        .unwrap();
    assert_eq!(batch.queued_len(), 2);

    drop(batch);
    assert_eq!(clone.queued_len(), 2);
    drop(clone);

    twoway.invoke("echo", OperationMode::Normal, env(b"")).await.unwrap();
    assert_eq!(recorder.logged(), vec![&b"first"[..], &b"second"[..]]);
}

#[tokio::test]
async fn derived_proxies_have_their_own_queue() {
    let (_server, _recorder, connection) = setup();
    let batch = connection.proxy(ident("obj")).batch_oneway();
    batch.invoke("log", OperationMode::Normal, env(b"x")).await.unwrap();

    let derived = batch.with_timeout(Some(Duration::from_secs(1)));
    assert_eq!(derived.kind(), InvocationKind::BatchOneway);
    assert_eq!(derived.queued_len(), 0);
    assert_eq!(batch.queued_len(), 1);
}

#[tokio::test]
async fn canceled_call_discards_late_reply() {
    let (_server, recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    let mut handle = proxy.invoke_async("slow", OperationMode::Normal, env(b"late"));
    assert!(handle.request_id().is_some());
    recorder.wait_for_calls("slow", 1).await;

    handle.cancel();
    assert!(matches!(handle.await, Err(InvocationError::Canceled)));
    assert_eq!(connection.pending_len(), 0);

    // Let the late reply arrive and be dropped.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let result = reply(proxy.invoke("echo", OperationMode::Normal, env(b"next")).await);
    assert_eq!(&result.success().unwrap().unwrap()[..], b"next");
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn dropping_handle_cancels_call() {
    let (_server, recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    let handle = proxy.invoke_async("slow", OperationMode::Normal, env(b""));
    recorder.wait_for_calls("slow", 1).await;
    assert_eq!(connection.pending_len(), 1);
    drop(handle);
    assert_eq!(connection.pending_len(), 0);

    let result = reply(proxy.invoke("echo", OperationMode::Normal, env(b"ok")).await);
    assert!(result.is_ok());
}

#[tokio::test]
async fn twoway_replies_may_complete_out_of_order() {
    let (_server, _recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    let slow = proxy.invoke_async("slow", OperationMode::Normal, env(b"slow"));
    let fast = proxy.invoke_async("echo", OperationMode::Normal, env(b"fast"));

    let fast = reply(fast.await);
    assert_eq!(&fast.success().unwrap().unwrap()[..], b"fast");
    assert_eq!(connection.pending_len(), 1);

    let slow = reply(slow.await);
    assert_eq!(&slow.success().unwrap().unwrap()[..], b"slow");
}

#[tokio::test]
async fn invocation_timeout_surfaces_as_timeout() {
    let (_server, _recorder, connection) = setup();
    let proxy = connection
        .proxy(ident("obj"))
        .with_timeout(Some(Duration::from_millis(50)));

    let err = proxy
        .invoke("slow", OperationMode::Normal, env(b""))
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::Timeout(d) if d == Duration::from_millis(50)));
    assert!(err.is_transport());
    assert_eq!(connection.pending_len(), 0);

    let result = reply(proxy.invoke("echo", OperationMode::Normal, env(b"")).await);
    assert!(result.is_ok());
}

#[tokio::test]
async fn context_travels_with_request() {
    let (_server, _recorder, connection) = setup();
    let mut context = Context::new();
    context.insert("k".to_string(), "v".to_string());
    let proxy = connection.proxy(ident("obj")).with_context(context);

    let result = reply(proxy.invoke("ctx", OperationMode::Normal, env(b"")).await);
    assert_eq!(&result.success().unwrap().unwrap()[..], b"v");

    let mut other = Context::new();
    other.insert("k".to_string(), "override".to_string());
    let result = reply(
        proxy
            .invoke_with_context("ctx", OperationMode::Normal, env(b""), other)
            .await,
    );
    assert_eq!(&result.success().unwrap().unwrap()[..], b"override");
}

#[tokio::test]
async fn connection_loss_fails_pending_calls() {
    let (client_side, mut raw) = MemoryTransport::pair();
    let connection = Connection::establish(client_side, ClientConfig::default());
    let proxy = connection.proxy(ident("obj"));

    let first = proxy.invoke_async("echo", OperationMode::Normal, env(b"1"));
    let second = proxy.invoke_async("echo", OperationMode::Normal, env(b"2"));
    raw.receive().await.unwrap();
    raw.receive().await.unwrap();
    drop(raw);

    for handle in [first, second] {
        let err = handle.await.unwrap_err();
        assert!(matches!(err, InvocationError::ConnectionLost(_)), "got {err:?}");
        assert!(err.is_transport());
    }
    assert!(connection.is_closed());

    let err = proxy
        .invoke("echo", OperationMode::Normal, env(b""))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn malformed_reply_fails_only_that_call() {
    let (client_side, mut raw) = MemoryTransport::pair();
    let connection = Connection::establish(client_side, ClientConfig::default());
    let proxy = connection.proxy(ident("obj"));

    let broken = proxy.invoke_async("echo", OperationMode::Normal, env(b""));
    let healthy = proxy.invoke_async("echo", OperationMode::Normal, env(b""));

    let mut ids = Vec::new();
    for _ in 0..2 {
        match Message::decode(Bytes::from(raw.receive().await.unwrap())).unwrap() {
            Message::Request { request_id, .. } => ids.push(request_id),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    // Reply whose envelope is cut short
    let mut bad = BytesMut::new();
    bad.put_u8(2);
    bad.put_u32(ids[0]);
    bad.put_u8(0);
    bad.put_slice(&[0, 0]);
    raw.send(&bad).await.unwrap();

    let good = Message::Reply {
        request_id: ids[1],
        result: OperationResult::ok(env(b"fine")),
    };
    raw.send(&good.encode()).await.unwrap();

    assert!(matches!(broken.await, Err(InvocationError::Malformed(_))));
    let result = reply(healthy.await);
    assert_eq!(&result.success().unwrap().unwrap()[..], b"fine");
    assert!(!connection.is_closed());
}

#[tokio::test]
async fn malformed_request_gets_unknown_local_reply() {
    let dispatcher = Arc::new(Dispatcher::new());
    let server = Server::new(dispatcher, ServerConfig::default());
    let (mut raw, server_side) = MemoryTransport::pair();
    server.serve_connection(server_side);

    let mut bad = BytesMut::new();
    bad.put_u8(0);
    bad.put_u32(7);
    bad.put_slice(&[0xff, 0xff]);
    raw.send(&bad).await.unwrap();

    match Message::decode(Bytes::from(raw.receive().await.unwrap())).unwrap() {
        Message::Reply { request_id, result } => {
            assert_eq!(request_id, 7);
            assert_eq!(result.status(), ReplyStatus::UnknownLocalFailure);
            assert!(result.exception().unwrap().message().is_some());
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn invalid_requests_fail_before_sending() {
    let (_server, _recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));

    let err = proxy
        .invoke("", OperationMode::Normal, env(b""))
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::InvalidRequest(_)));

    let err = proxy
        .oneway()
        .invoke_bytes("echo", OperationMode::Normal, b"")
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::TwowayOnly { .. }));
}

#[tokio::test]
async fn tcp_client_and_server() {
    let recorder = Arc::new(Recorder::default());
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.bind(ident("obj"), recorder.clone()).unwrap();
    let server = Server::new(dispatcher.clone(), ServerConfig::default());

    let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    server.listen(listener);

    let client = Client::new(ClientConfig::default());
    let proxy = client.proxy(ident("obj"), addr).await.unwrap();
    let result = reply(proxy.invoke("echo", OperationMode::Normal, env(&[1, 2, 3])).await);
    assert_eq!(&result.success().unwrap().unwrap()[..], &[1, 2, 3]);

    // One cached connection per address
    let again = client.connect_tcp(addr).await.unwrap();
    assert!(Arc::ptr_eq(proxy.connection(), &again));

    // Batched calls left in the queue go out on client shutdown.
    let batch = proxy.batch_oneway();
    batch.invoke("log", OperationMode::Normal, env(b"bye")).await.unwrap();
    client.shutdown().await;
    recorder.wait_for_calls("log", 1).await;
    assert_eq!(batch.queued_len(), 0);

    server.shutdown().await;
    assert!(server.is_shutting_down());
    assert!(dispatcher.is_empty());
}

#[tokio::test]
async fn server_shutdown_closes_connections() {
    let (server, _recorder, connection) = setup();
    let proxy = connection.proxy(ident("obj"));
    proxy.invoke("echo", OperationMode::Normal, env(b"")).await.unwrap();

    let signal = server.shutdown_signal();
    signal.trigger();
    assert!(signal.is_triggered());
    server.wait_for_shutdown().await;
    server.shutdown().await;

    let err = proxy
        .invoke("echo", OperationMode::Normal, env(b""))
        .await
        .unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = Client::default();
    let err = client.connect_tcp(addr).await.unwrap_err();
    assert!(matches!(err, InvocationError::ConnectFailed(_)));
}
