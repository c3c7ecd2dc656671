use std::net::SocketAddr;
#[cfg(unix)]
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use relay_core::Identity;
use relay_fabric::transport::{TcpTransport, Transport};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{InvocationError, Result};
use crate::proxy::Proxy;

/// Entry point for making invocations.
///
/// Keeps one connection per TCP address and reconnects when a cached
/// connection has failed. Connections made any other way are tracked so that
/// [`Client::shutdown`] can close them too.
pub struct Client {
    config: ClientConfig,
    tcp: DashMap<SocketAddr, Arc<Connection>>,
    others: Mutex<Vec<Arc<Connection>>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            tcp: DashMap::new(),
            others: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connection to `addr`, reusing a live cached one.
    pub async fn connect_tcp(&self, addr: SocketAddr) -> Result<Arc<Connection>> {
        let cached = self.tcp.get(&addr).map(|entry| Arc::clone(entry.value()));
        if let Some(connection) = cached {
            if !connection.is_closed() {
                return Ok(connection);
            }
            debug!(%addr, "cached connection closed, reconnecting");
        }

        let mut builder = TcpTransport::builder()
            .address(addr)
            .max_frame_len(self.config.max_frame_len);
        if let Some(timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = self.config.send_timeout {
            builder = builder.send_timeout(timeout);
        }
        let transport = builder
            .connect()
            .await
            .map_err(|e| InvocationError::ConnectFailed(format!("{addr}: {e}")))?;

        let connection = Connection::establish(transport, self.config.clone());
        self.tcp.insert(addr, Arc::clone(&connection));
        Ok(connection)
    }

    /// Connection over a Unix domain socket. Not cached.
    #[cfg(unix)]
    pub async fn connect_unix(&self, path: impl AsRef<Path>) -> Result<Arc<Connection>> {
        let path = path.as_ref();
        let mut builder = relay_fabric::transport::UnixTransport::builder()
            .path(path)
            .max_frame_len(self.config.max_frame_len);
        if let Some(timeout) = self.config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = self.config.send_timeout {
            builder = builder.send_timeout(timeout);
        }
        let transport = builder
            .connect()
            .await
            .map_err(|e| InvocationError::ConnectFailed(format!("{}: {e}", path.display())))?;
        Ok(self.attach(transport))
    }

    /// Run the invocation protocol over an already connected transport.
    pub fn attach<T>(&self, transport: T) -> Arc<Connection>
    where
        T: Transport + 'static,
    {
        let connection = Connection::establish(transport, self.config.clone());
        let mut others = self.others.lock();
        others.retain(|c| !c.is_closed());
        others.push(Arc::clone(&connection));
        connection
    }

    /// Twoway proxy for `identity` at `addr`.
    pub async fn proxy(&self, identity: Identity, addr: SocketAddr) -> Result<Proxy> {
        Ok(self.connect_tcp(addr).await?.proxy(identity))
    }

    /// Flush pending batches and close every connection.
    pub async fn shutdown(&self) {
        let mut connections: Vec<_> = self
            .tcp
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.tcp.clear();
        connections.append(&mut self.others.lock());

        info!(count = connections.len(), "closing client connections");
        for connection in connections {
            connection.close().await;
        }
    }
}
