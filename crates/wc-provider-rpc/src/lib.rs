use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wc_provider::{
    InjectedProvider, ListenerId, ListenerSet, RawEventHandler, RpcError, parse_accounts,
    parse_chain_id,
};
use wc_types::chain_id_to_hex;

pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// EIP-1193 "disconnected" code, used when the endpoint cannot be reached.
pub const DISCONNECTED_CODE: i64 = 4900;

/// Wallet provider backed by a JSON-RPC 2.0 endpoint over HTTP.
///
/// Reads `WALLET_RPC_URL` from environment at construction time
/// (default: `http://localhost:8545`). HTTP cannot push events, so
/// [`JsonRpcProvider::spawn_watcher`] polls and emits them instead.
pub struct JsonRpcProvider {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
    listeners: ListenerSet,
}

impl Default for JsonRpcProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl JsonRpcProvider {
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var("WALLET_RPC_URL").ok())
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            listeners: ListenerSet::default(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: Value) -> Result<std::result::Result<Value, RpcError>> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{method} transport"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("{method} HTTP {status}: {text}");
        }

        let reply: JsonRpcResponse = response
            .json()
            .await
            .with_context(|| format!("{method} parse"))?;

        Ok(match reply.error {
            Some(error) => Err(RpcError::new(error.code, error.message)),
            None => Ok(reply.result.unwrap_or(Value::Null)),
        })
    }

    /// Polls accounts and chain every `period`, emitting `connect`,
    /// `disconnect`, `accountsChanged` and `chainChanged` on changes.
    /// Stops once the provider is dropped.
    pub fn spawn_watcher(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let provider = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut watched = WatchedState::default();
            loop {
                ticker.tick().await;
                let Some(provider) = provider.upgrade() else {
                    break;
                };
                provider.poll_once(&mut watched).await;
            }
            debug!("provider watcher stopped");
        })
    }

    pub async fn poll_once(&self, watched: &mut WatchedState) {
        let observed = match self.snapshot().await {
            Ok(observed) => observed,
            Err(err) => {
                if watched.reachable {
                    warn!("wallet endpoint unreachable: {:#}", err);
                    watched.reachable = false;
                    self.listeners.emit(
                        "disconnect",
                        &json!({ "code": DISCONNECTED_CODE, "message": err.to_string() }),
                    );
                }
                return;
            }
        };

        let (accounts, chain_id) = observed;
        if !watched.reachable {
            info!(endpoint = %self.endpoint, chain_id, "wallet endpoint reachable");
            watched.reachable = true;
            self.listeners
                .emit("connect", &json!({ "chainId": chain_id_to_hex(chain_id) }));
        }

        if watched.chain_id.is_some_and(|previous| previous != chain_id) {
            self.listeners
                .emit("chainChanged", &Value::String(chain_id_to_hex(chain_id)));
        }
        if watched
            .accounts
            .as_ref()
            .is_some_and(|previous| previous != &accounts)
        {
            self.listeners.emit("accountsChanged", &json!(accounts));
        }

        watched.chain_id = Some(chain_id);
        watched.accounts = Some(accounts);
    }

    async fn snapshot(&self) -> Result<(Vec<String>, u64)> {
        let accounts = self
            .call("eth_accounts", json!([]))
            .await?
            .map_err(|err| anyhow::anyhow!("eth_accounts: {err}"))?;
        let accounts = parse_accounts(&accounts)?;

        let chain = self
            .call("eth_chainId", json!([]))
            .await?
            .map_err(|err| anyhow::anyhow!("eth_chainId: {err}"))?;
        let chain_id = parse_chain_id(&chain).context("eth_chainId returned a non-numeric value")?;

        Ok((accounts, chain_id))
    }
}

/// Last values seen by the watcher.
#[derive(Debug, Clone, Default)]
pub struct WatchedState {
    pub accounts: Option<Vec<String>>,
    pub chain_id: Option<u64>,
    pub reachable: bool,
}

// ── JSON-RPC 2.0 wire types ──────────────────────────────────────────

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
}

#[async_trait]
impl InjectedProvider for JsonRpcProvider {
    async fn request(&self, method: &str, params: Option<Value>) -> std::result::Result<Value, RpcError> {
        match self.call(method, params.unwrap_or_else(|| json!([]))).await {
            Ok(reply) => reply,
            Err(err) => Err(RpcError::new(DISCONNECTED_CODE, format!("{err:#}"))),
        }
    }

    fn on(&self, event: &str, handler: RawEventHandler) -> ListenerId {
        self.listeners.add(event, handler)
    }

    fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, routing::post};
    use std::sync::Mutex;

    async fn node(State(chain): State<Arc<AtomicU64>>, Json(request): Json<Value>) -> Json<Value> {
        let id = request["id"].clone();
        let reply = match request["method"].as_str() {
            Some("eth_chainId") => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": chain_id_to_hex(chain.load(Ordering::SeqCst)),
            }),
            Some("eth_accounts") => json!({ "jsonrpc": "2.0", "id": id, "result": ["0xabc"] }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": 4001, "message": "User rejected the request." },
            }),
        };
        Json(reply)
    }

    async fn spawn_node(chain: Arc<AtomicU64>) -> Result<String> {
        let app = Router::new().route("/", post(node)).with_state(chain);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(format!("http://{addr}"))
    }

    #[tokio::test]
    async fn forwards_results_and_error_objects() -> Result<()> {
        let endpoint = spawn_node(Arc::new(AtomicU64::new(42161))).await?;
        let provider = JsonRpcProvider::new(Some(format!("{endpoint}/")));
        assert_eq!(provider.endpoint(), endpoint);

        let chain = provider.request("eth_chainId", None).await?;
        assert_eq!(chain, json!("0xa4b1"));

        let err = provider
            .request("eth_requestAccounts", None)
            .await
            .unwrap_err();
        assert_eq!(err.code, 4001);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_disconnected() {
        let provider = JsonRpcProvider::new(Some("http://127.0.0.1:9".to_owned()));
        let err = provider.request("eth_chainId", None).await.unwrap_err();
        assert_eq!(err.code, DISCONNECTED_CODE);
    }

    #[tokio::test]
    async fn poll_emits_connect_then_chain_changes() -> Result<()> {
        let chain = Arc::new(AtomicU64::new(1));
        let endpoint = spawn_node(chain.clone()).await?;
        let provider = JsonRpcProvider::new(Some(endpoint));

        let seen = Arc::new(Mutex::new(Vec::new()));
        for event in ["connect", "chainChanged", "accountsChanged"] {
            let sink = seen.clone();
            provider.on(
                event,
                Arc::new(move |payload: &Value| {
                    sink.lock().unwrap().push((event, payload.clone()));
                }),
            );
        }

        let mut watched = WatchedState::default();
        provider.poll_once(&mut watched).await;
        provider.poll_once(&mut watched).await;
        chain.store(137, Ordering::SeqCst);
        provider.poll_once(&mut watched).await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("connect", json!({ "chainId": "0x1" })),
                ("chainChanged", json!("0x89")),
            ]
        );
        assert!(watched.reachable);
        assert_eq!(watched.accounts, Some(vec!["0xabc".to_owned()]));
        Ok(())
    }
}
