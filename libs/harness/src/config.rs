use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use relay_core::Identity;
use relay_fabric::transport::DEFAULT_MAX_FRAME_LEN;
use relay_invoke::{ClientConfig, ServerConfig};
use serde::Deserialize;

use crate::suites::{self, Suite};

/// Settings shared by the harness server and client.
///
/// Loaded from an optional TOML file; command line flags override individual
/// fields afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub host: String,
    pub port: u16,
    /// Name of the test object on the server.
    pub identity: String,
    /// Suites to run, by name. Empty means every non-optional suite.
    pub suites: Vec<String>,
    /// Twoway invocation timeout in milliseconds; 0 disables it.
    pub invocation_timeout_ms: u64,
    pub max_concurrent_dispatch: usize,
    /// Largest frame either side accepts or sends, in bytes.
    pub max_frame_len: usize,
    /// Whether the client asks the server to stop once the suites are done.
    pub shutdown_server: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 12010,
            identity: "test".to_string(),
            suites: Vec::new(),
            invocation_timeout_ms: 60_000,
            max_concurrent_dispatch: 64,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            shutdown_server: true,
        }
    }
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid harness configuration")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    pub fn identity(&self) -> Result<Identity> {
        self.identity
            .parse()
            .with_context(|| format!("invalid identity `{}`", self.identity))
    }

    /// Resolve `host:port`, taking the first address returned.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        let target = format!("{}:{}", self.host, self.port);
        let addr = tokio::net::lookup_host(&target)
            .await
            .with_context(|| format!("resolving {target}"))?
            .next()
            .with_context(|| format!("{target} resolved to no address"));
        addr
    }

    /// The suites to run, in registry order.
    pub fn selected_suites(&self) -> Result<Vec<&'static Suite>> {
        if self.suites.is_empty() {
            return Ok(suites::SUITES.iter().filter(|s| !s.optional).collect());
        }
        for name in &self.suites {
            if suites::find(name).is_none() {
                bail!(
                    "unknown suite `{name}`, expected one of: {}",
                    suites::names().join(", ")
                );
            }
        }
        Ok(suites::SUITES
            .iter()
            .filter(|s| self.suites.iter().any(|name| name == s.name))
            .collect())
    }

    pub fn client_config(&self) -> ClientConfig {
        let timeout = match self.invocation_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        ClientConfig::default()
            .with_invocation_timeout(timeout)
            .with_max_frame_len(self.max_frame_len)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::default()
            .with_max_concurrent_dispatch(self.max_concurrent_dispatch)
            .with_max_frame_len(self.max_frame_len)
    }
}
