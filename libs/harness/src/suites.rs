//! Client-side test suites.
//!
//! Suites live in a fixed registry and are picked by name from the harness
//! configuration.

use std::time::Duration;

use anyhow::{bail, ensure, Result};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use relay_core::{Envelope, Identity, OperationMode, OperationResult, ReplyStatus};
use relay_fabric::codec::{BincodeCodec, Codec};
use relay_invoke::{InvocationError, InvocationOutcome, Proxy};

use crate::servant::MY_EXCEPTION;

pub type SuiteFuture<'a> = BoxFuture<'a, Result<()>>;

pub struct Suite {
    pub name: &'static str,
    pub description: &'static str,
    /// Optional suites only run when named explicitly.
    pub optional: bool,
    pub run: fn(&Proxy) -> SuiteFuture<'_>,
}

impl std::fmt::Debug for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suite")
            .field("name", &self.name)
            .field("optional", &self.optional)
            .finish()
    }
}

pub static SUITES: &[Suite] = &[
    Suite {
        name: "invoke",
        description: "awaited twoway and oneway invocations",
        optional: false,
        run: run_invoke,
    },
    Suite {
        name: "async",
        description: "invocation handles, concurrency and cancellation",
        optional: false,
        run: run_async,
    },
    Suite {
        name: "batch",
        description: "batched oneway invocations and flushing",
        optional: false,
        run: run_batch,
    },
    Suite {
        name: "stress",
        description: "many concurrent twoway invocations on one connection",
        optional: true,
        run: run_stress,
    },
];

pub fn find(name: &str) -> Option<&'static Suite> {
    SUITES.iter().find(|s| s.name == name)
}

pub fn names() -> Vec<&'static str> {
    SUITES.iter().map(|s| s.name).collect()
}

fn run_invoke(proxy: &Proxy) -> SuiteFuture<'_> {
    invoke(proxy).boxed()
}

fn run_async(proxy: &Proxy) -> SuiteFuture<'_> {
    invoke_async(proxy).boxed()
}

fn run_batch(proxy: &Proxy) -> SuiteFuture<'_> {
    batch(proxy).boxed()
}

fn run_stress(proxy: &Proxy) -> SuiteFuture<'_> {
    stress(proxy).boxed()
}

fn reply(operation: &str, outcome: InvocationOutcome) -> Result<OperationResult> {
    match outcome {
        InvocationOutcome::Reply(result) => Ok(result),
        other => bail!("`{operation}` returned {other:?} instead of a reply"),
    }
}

async fn call(proxy: &Proxy, operation: &str, params: Vec<u8>) -> Result<OperationResult> {
    let outcome = proxy
        .invoke(operation, OperationMode::Normal, Envelope::wrap(params))
        .await?;
    reply(operation, outcome)
}

fn expect_status(operation: &str, result: &OperationResult, status: ReplyStatus) -> Result<()> {
    ensure!(
        result.status() == status,
        "`{operation}` finished with {} instead of {status}",
        result.status()
    );
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(operation: &str, result: &OperationResult) -> Result<T> {
    expect_status(operation, result, ReplyStatus::Ok)?;
    let Some(payload) = result.success() else {
        bail!("`{operation}` carried no payload");
    };
    Ok(BincodeCodec.decode(&payload?)?)
}

fn check_op_string(result: &OperationResult, sent: &str) -> Result<()> {
    let (a, b): (String, String) = decode("opString", result)?;
    ensure!(a == sent && b == sent, "opString returned ({a:?}, {b:?}) for {sent:?}");
    Ok(())
}

fn check_my_exception(result: &OperationResult) -> Result<()> {
    expect_status("opException", result, ReplyStatus::UserException)?;
    let Some(exception) = result.exception() else {
        bail!("opException carried no exception");
    };
    ensure!(
        exception.type_id.as_deref() == Some(MY_EXCEPTION),
        "opException raised {:?}",
        exception.type_id
    );
    Ok(())
}

async fn invoke(proxy: &Proxy) -> Result<()> {
    let sent = proxy
        .oneway()
        .invoke("opOneway", OperationMode::Normal, Envelope::empty())
        .await?;
    ensure!(sent == InvocationOutcome::Sent, "oneway returned {sent:?}");

    let result = call(proxy, "opString", BincodeCodec.encode(&"hello".to_string())?).await?;
    check_op_string(&result, "hello")?;

    let result = call(proxy, "opException", Vec::new()).await?;
    check_my_exception(&result)?;

    let result = call(proxy, "opDoesNotExist", Vec::new()).await?;
    expect_status("opDoesNotExist", &result, ReplyStatus::OperationNotExist)?;

    let missing = proxy.connection().proxy(Identity::new("doesNotExist")?);
    let result = call(&missing, "opString", Vec::new()).await?;
    expect_status("opString", &result, ReplyStatus::ObjectNotExist)?;

    let (ok, out) = proxy
        .invoke_bytes("echo", OperationMode::Idempotent, &[1, 2, 3])
        .await?;
    ensure!(ok && out[..] == [1, 2, 3], "echo returned ({ok}, {out:?})");
    Ok(())
}

async fn invoke_async(proxy: &Proxy) -> Result<()> {
    let params = Envelope::wrap(BincodeCodec.encode(&"hello".to_string())?);
    let handle = proxy.invoke_async("opString", OperationMode::Normal, params);
    check_op_string(&reply("opString", handle.await?)?, "hello")?;

    let handle = proxy.invoke_async("opException", OperationMode::Normal, Envelope::empty());
    check_my_exception(&reply("opException", handle.await?)?)?;

    let handles: Vec<_> = (0u8..16)
        .map(|i| proxy.invoke_async("echo", OperationMode::Normal, Envelope::wrap(vec![i])))
        .collect();
    for (i, outcome) in join_all(handles).await.into_iter().enumerate() {
        let result = reply("echo", outcome?)?;
        let payload = result.success().transpose()?;
        ensure!(
            payload.as_deref() == Some(&[i as u8][..]),
            "echo {i} returned {payload:?}"
        );
    }

    let mut handle = proxy.invoke_async("echo", OperationMode::Normal, Envelope::empty());
    handle.cancel();
    match handle.await {
        Err(InvocationError::Canceled) => {}
        other => bail!("canceled invocation finished with {other:?}"),
    }

    let handle = proxy
        .oneway()
        .invoke_async("opOneway", OperationMode::Normal, Envelope::empty());
    ensure!(handle.await? == InvocationOutcome::Sent, "async oneway was not sent");

    // The connection is still usable after the cancellation.
    let result = call(proxy, "opString", BincodeCodec.encode(&"again".to_string())?).await?;
    check_op_string(&result, "again")
}

async fn oneway_count(proxy: &Proxy) -> Result<u64> {
    decode("onewayCount", &call(proxy, "onewayCount", Vec::new()).await?)
}

/// Oneway calls from earlier suites may still be running on the server's
/// worker pool; wait until the count stops moving.
async fn settled_oneway_count(proxy: &Proxy) -> Result<u64> {
    let mut last = oneway_count(proxy).await?;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let current = oneway_count(proxy).await?;
        if current == last {
            return Ok(current);
        }
        last = current;
    }
    bail!("oneway count never settled, last read {last}")
}

async fn batch(proxy: &Proxy) -> Result<()> {
    let before = settled_oneway_count(proxy).await?;

    let batch = proxy.batch_oneway();
    for _ in 0..3 {
        let queued = batch
            .invoke("opOneway", OperationMode::Normal, Envelope::empty())
            .await?;
        ensure!(queued == InvocationOutcome::Queued, "batch oneway returned {queued:?}");
    }
    ensure!(batch.queued_len() == 3, "expected 3 queued requests");
    batch.flush_batch().await?;
    batch.flush_batch().await?;
    ensure!(!batch.is_batching(), "batch still active after flush");

    // Batches are dispatched before any later frame on the connection.
    let after = oneway_count(proxy).await?;
    ensure!(after == before + 3, "batch delivered {} of 3 calls", after.saturating_sub(before));

    let oneway = proxy.oneway();
    oneway.begin_batch();
    for payload in [b"P1", b"P2"] {
        oneway
            .invoke("log", OperationMode::Normal, Envelope::wrap(payload.to_vec()))
            .await?;
    }
    oneway.flush_batch().await?;

    let log: Vec<Vec<u8>> = decode("getLog", &call(proxy, "getLog", Vec::new()).await?)?;
    ensure!(
        log.ends_with(&[b"P1".to_vec(), b"P2".to_vec()]),
        "log out of order: {log:?}"
    );
    Ok(())
}

async fn stress(proxy: &Proxy) -> Result<()> {
    let handles: Vec<_> = (0u32..500)
        .map(|i| {
            proxy.invoke_async(
                "echo",
                OperationMode::Normal,
                Envelope::wrap(i.to_be_bytes().to_vec()),
            )
        })
        .collect();
    for (i, outcome) in join_all(handles).await.into_iter().enumerate() {
        let result = reply("echo", outcome?)?;
        let payload = result.success().transpose()?;
        ensure!(
            payload.as_deref() == Some(&(i as u32).to_be_bytes()[..]),
            "echo {i} returned {payload:?}"
        );
    }
    Ok(())
}
