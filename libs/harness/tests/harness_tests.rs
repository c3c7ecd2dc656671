use std::time::Duration;

use relay_core::{Envelope, OperationMode};
use relay_harness::{run_client, start_server, HarnessConfig, SUITES};
use relay_invoke::{Client, ClientConfig, InvocationError};

fn local_config() -> HarnessConfig {
    HarnessConfig {
        port: 0,
        invocation_timeout_ms: 5_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn client_runs_every_suite_and_stops_server() {
    let running = start_server(&local_config()).await.unwrap();
    let servant = running.servant().clone();

    let config = HarnessConfig {
        port: running.addr().port(),
        suites: SUITES.iter().map(|s| s.name.to_string()).collect(),
        ..local_config()
    };
    run_client(&config).await.unwrap();

    // The client's `shutdown` call stops the server.
    tokio::time::timeout(Duration::from_secs(5), running.wait())
        .await
        .expect("server did not stop after client shutdown");

    assert!(servant.oneway_calls() >= 5);
    let log = servant.logged();
    assert_eq!(log.len(), 2);
    assert_eq!(&log[0][..], b"P1");
    assert_eq!(&log[1][..], b"P2");
}

#[tokio::test]
async fn server_keeps_running_without_shutdown() {
    let running = start_server(&local_config()).await.unwrap();

    let config = HarnessConfig {
        port: running.addr().port(),
        suites: vec!["invoke".to_string()],
        shutdown_server: false,
        ..local_config()
    };
    run_client(&config).await.unwrap();
    // Running the same suite again on a fresh client still works.
    run_client(&config).await.unwrap();

    assert!(!running.server().is_shutting_down());
    running.shutdown().await;
}

#[tokio::test]
async fn unknown_suite_fails_before_connecting() {
    let config = HarnessConfig {
        port: 1,
        suites: vec!["missing".to_string()],
        ..local_config()
    };
    let err = run_client(&config).await.unwrap_err();
    assert!(format!("{err:#}").contains("unknown suite"));
}

#[tokio::test]
async fn wrong_identity_fails_the_run() {
    let running = start_server(&local_config()).await.unwrap();

    let config = HarnessConfig {
        port: running.addr().port(),
        identity: "someoneElse".to_string(),
        suites: vec!["invoke".to_string()],
        ..local_config()
    };
    let err = run_client(&config).await.unwrap_err();
    assert!(format!("{err:#}").contains("suite `invoke` failed"));

    running.shutdown().await;
}

#[tokio::test]
async fn server_enforces_frame_limit() {
    let running = start_server(&HarnessConfig {
        max_frame_len: 1024,
        ..local_config()
    })
    .await
    .unwrap();
    let identity = local_config().identity().unwrap();

    // The client side allows large frames, so only the server can refuse.
    let client = Client::new(
        ClientConfig::default().with_invocation_timeout(Some(Duration::from_secs(5))),
    );
    let proxy = client.proxy(identity, running.addr()).await.unwrap();

    let small = proxy
        .invoke("echo", OperationMode::Normal, Envelope::wrap(vec![7u8; 64]))
        .await;
    assert!(small.is_ok());

    let large = proxy
        .invoke("echo", OperationMode::Normal, Envelope::wrap(vec![7u8; 4096]))
        .await;
    assert!(matches!(large, Err(InvocationError::ConnectionLost(_))), "{large:?}");

    client.shutdown().await;
    running.shutdown().await;
}
