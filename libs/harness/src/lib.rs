//! Relay Harness - End-to-end checks for the invocation layer
//!
//! The server side binds a [`TestServant`] over TCP; the client side runs the
//! configured suites against it, asks it to shut down and then tears its own
//! connections down.

pub mod config;
pub mod servant;
pub mod suites;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use relay_core::{Envelope, OperationMode};
use relay_fabric::transport::TcpTransportListener;
use relay_invoke::{Client, Dispatcher, Server};
use tracing::{error, info};

pub use config::HarnessConfig;
pub use servant::TestServant;
pub use suites::{Suite, SUITES};

/// A harness server accepting connections.
pub struct RunningServer {
    server: Arc<Server>,
    servant: Arc<TestServant>,
    addr: SocketAddr,
}

impl RunningServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn servant(&self) -> &Arc<TestServant> {
        &self.servant
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Serve until a client calls `shutdown`, then tear down.
    pub async fn wait(self) {
        self.server.wait_for_shutdown().await;
        self.server.shutdown().await;
    }

    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

/// Bind the test servant and start listening.
pub async fn start_server(config: &HarnessConfig) -> Result<RunningServer> {
    let identity = config.identity()?;
    let addr = config.resolve().await?;

    let server_config = config.server_config();
    let max_frame_len = server_config.max_frame_len;
    let dispatcher = Arc::new(Dispatcher::new());
    let server = Server::new(Arc::clone(&dispatcher), server_config);
    let servant = Arc::new(TestServant::new(server.shutdown_signal()));
    dispatcher.bind(identity.clone(), servant.clone())?;

    let listener = TcpTransportListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?
        .with_max_frame_len(max_frame_len);
    let addr = listener.local_addr()?;
    server.listen(listener);
    info!(%addr, %identity, "harness server listening");

    Ok(RunningServer {
        server,
        servant,
        addr,
    })
}

/// Run a server until a client shuts it down or the process is interrupted.
pub async fn run_server(config: &HarnessConfig) -> Result<()> {
    let running = start_server(config).await?;
    let server = Arc::clone(running.server());
    tokio::select! {
        _ = server.wait_for_shutdown() => {}
        interrupted = tokio::signal::ctrl_c() => {
            interrupted.context("waiting for ctrl-c")?;
            info!("interrupted");
        }
    }
    running.shutdown().await;
    Ok(())
}

/// Run the configured suites against a harness server.
///
/// The first failing suite stops the run. The client's connections are
/// closed whatever the outcome.
pub async fn run_client(config: &HarnessConfig) -> Result<()> {
    let suites = config.selected_suites()?;
    let identity = config.identity()?;
    let addr = config.resolve().await?;

    let client = Client::new(config.client_config());
    let outcome = run_suites(&client, &suites, identity, addr, config.shutdown_server).await;
    client.shutdown().await;
    outcome
}

async fn run_suites(
    client: &Client,
    suites: &[&'static Suite],
    identity: relay_core::Identity,
    addr: SocketAddr,
    shutdown_server: bool,
) -> Result<()> {
    let proxy = client
        .proxy(identity, addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;

    for suite in suites {
        info!(suite = suite.name, "running {}", suite.description);
        if let Err(e) = (suite.run)(&proxy).await {
            error!(suite = suite.name, error = %format!("{e:#}"), "suite failed");
            return Err(e.context(format!("suite `{}` failed", suite.name)));
        }
        info!(suite = suite.name, "suite passed");
    }

    if shutdown_server {
        proxy
            .invoke("shutdown", OperationMode::Normal, Envelope::empty())
            .await
            .context("shutting down the server")?;
    }
    Ok(())
}
