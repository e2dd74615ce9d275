use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;
use wc_storage::DEFAULT_STORAGE_KEY;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Startup settings, read once from the environment.
#[derive(Debug, Clone)]
pub(crate) struct BridgeConfig {
    pub addr: SocketAddr,
    pub rpc_url: Option<String>,
    pub store_path: Option<String>,
    pub poll_interval: Duration,
    pub storage_key: String,
}

impl BridgeConfig {
    pub(crate) fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let addr = value("WALLET_BRIDGE_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_owned())
            .parse::<SocketAddr>()
            .context("WALLET_BRIDGE_ADDR must be a socket address")?;

        let poll_interval_ms = match value("WALLET_POLL_INTERVAL_MS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .context("WALLET_POLL_INTERVAL_MS must be a number of milliseconds")?,
            None => DEFAULT_POLL_INTERVAL_MS,
        };

        Ok(Self {
            addr,
            rpc_url: value("WALLET_RPC_URL"),
            store_path: value("WALLET_STORE_PATH"),
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            storage_key: value("WALLET_STORAGE_KEY").unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_owned()),
        })
    }
}
