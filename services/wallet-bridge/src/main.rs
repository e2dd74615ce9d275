mod config;
mod wallet;

use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use config::BridgeConfig;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use wc_broadcast::BroadcastHub;
use wc_core::{WalletService, WalletServiceConfig};
use wc_provider::ProviderRegistry;
use wc_provider_rpc::JsonRpcProvider;
use wc_storage::{InMemoryStore, KeyValueStore, RocksDbStore};
use wc_types::{WalletError, WalletErrorKind, WalletType};

#[derive(Debug, Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<WalletErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i64>,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);
pub(crate) type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Clone)]
pub(crate) struct AppState {
    wallet: Arc<WalletService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = BridgeConfig::from_env()?;

    let rpc = Arc::new(JsonRpcProvider::new(config.rpc_url.clone()));
    let _watcher = rpc.spawn_watcher(config.poll_interval);
    info!("evm provider at {}", rpc.endpoint());

    let storage: Arc<dyn KeyValueStore> = match &config.store_path {
        Some(path) => Arc::new(RocksDbStore::open_default(path)?),
        None => {
            warn!("WALLET_STORE_PATH not set; wallet record is kept in memory only");
            Arc::new(InMemoryStore::default())
        }
    };

    let wallet = Arc::new(WalletService::new(
        WalletServiceConfig {
            storage_key: config.storage_key.clone(),
            ..WalletServiceConfig::default()
        },
        ProviderRegistry::default().with(WalletType::Evm, rpc),
        storage,
        &BroadcastHub::new(),
    ));
    let _events = wallet.spawn_event_loop();
    wallet.initialize().await;

    let app = app(AppState { wallet }).layer(CorsLayer::permissive());

    info!("wallet-bridge listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/wallet/state", get(wallet::wallet_state))
        .route("/wallet/connect", post(wallet::wallet_connect))
        .route("/wallet/disconnect", post(wallet::wallet_disconnect))
        .route("/wallet/switch-network", post(wallet::wallet_switch_network))
        .route("/wallet/refresh-balance", post(wallet::wallet_refresh_balance))
        .route("/wallet/clear-error", post(wallet::wallet_clear_error))
        .route("/wallet/supported/{wallet_type}", get(wallet::wallet_supported))
        .route("/networks/{chain_id}", get(wallet::network_by_chain_id))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "wallet-bridge",
        status: "ok",
    })
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "wallet-bridge",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    plain_error(StatusCode::BAD_REQUEST, message)
}

pub(crate) fn not_found(message: impl Into<String>) -> ApiError {
    plain_error(StatusCode::NOT_FOUND, message)
}

fn plain_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            kind: None,
            code: None,
        }),
    )
}

/// Maps a classified wallet error to a response. The caller has already
/// ruled out a missing provider.
pub(crate) fn wallet_error(err: WalletError) -> ApiError {
    let status = if err.is_user_rejection() {
        StatusCode::CONFLICT
    } else {
        StatusCode::BAD_GATEWAY
    };

    (
        status,
        Json(ErrorResponse {
            error: err.message,
            kind: Some(err.kind),
            code: err.code,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wc_provider::{InMemoryProvider, RpcError};

    const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";

    fn test_app(provider: Arc<InMemoryProvider>) -> (Router, Arc<WalletService>) {
        let wallet = Arc::new(WalletService::new(
            WalletServiceConfig::default(),
            ProviderRegistry::default().with(WalletType::Evm, provider),
            Arc::new(InMemoryStore::default()),
            &BroadcastHub::new(),
        ));
        (app(AppState { wallet: wallet.clone() }), wallet)
    }

    fn provider() -> Arc<InMemoryProvider> {
        Arc::new(
            InMemoryProvider::new(vec![ADDRESS.to_owned()], 1)
                .with_known_chains([10])
                .with_balance(2_000_000_000_000_000_000),
        )
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> anyhow::Result<(StatusCode, Value)> {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body)?))?,
            None => request.body(Body::empty())?,
        };

        let response = app.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, value))
    }

    #[tokio::test]
    async fn health_and_version() -> anyhow::Result<()> {
        let (app, _) = test_app(provider());

        let (status, body) = call(&app, "GET", "/health", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(&app, "GET", "/version", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "wallet-bridge");
        Ok(())
    }

    #[tokio::test]
    async fn connect_switch_and_disconnect() -> anyhow::Result<()> {
        let (app, wallet) = test_app(provider());

        let (status, body) = call(&app, "GET", "/wallet/state", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isConnected"], false);
        assert_eq!(body["address"], Value::Null);

        let (status, body) = call(&app, "POST", "/wallet/connect", Some(json!({ "walletType": "evm" }))).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isConnected"], true);
        assert_eq!(body["address"], ADDRESS);
        assert_eq!(body["walletType"], "evm");
        assert_eq!(body["network"]["name"], "Ethereum");

        let (status, _) = call(&app, "POST", "/wallet/switch-network", Some(json!({ "chainId": 10 }))).await?;
        assert_eq!(status, StatusCode::OK);
        wallet
            .handle_provider_event(wc_provider::ProviderEvent::ChainChanged(10))
            .await;
        let (_, body) = call(&app, "GET", "/wallet/state", None).await?;
        assert_eq!(body["chainId"], 10);
        assert_eq!(body["network"]["name"], "Optimism");

        let (status, body) = call(&app, "POST", "/wallet/refresh-balance", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"]["formatted"], "2.0000");
        assert_eq!(body["balance"]["symbol"], "ETH");

        let (status, body) = call(&app, "POST", "/wallet/disconnect", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isConnected"], false);
        assert_eq!(body["isInitialized"], true);
        Ok(())
    }

    #[tokio::test]
    async fn rejection_is_a_conflict() -> anyhow::Result<()> {
        let provider = provider();
        provider.fail_method("eth_requestAccounts", RpcError::new(4001, "User rejected the request."));
        let (app, _) = test_app(provider);

        let (status, body) = call(&app, "POST", "/wallet/connect", Some(json!({ "walletType": "evm" }))).await?;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["type"], "connection");
        assert_eq!(body["code"], 4001);
        assert_eq!(body["error"], "Connection request was cancelled in your wallet.");

        let (_, body) = call(&app, "GET", "/wallet/state", None).await?;
        assert_eq!(body["error"]["code"], 4001);

        let (status, body) = call(&app, "POST", "/wallet/clear-error", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], Value::Null);
        Ok(())
    }

    #[tokio::test]
    async fn provider_failures_are_bad_gateway() -> anyhow::Result<()> {
        let (app, _) = test_app(provider());
        call(&app, "POST", "/wallet/connect", Some(json!({ "walletType": "evm" }))).await?;

        let (status, body) = call(&app, "POST", "/wallet/switch-network", Some(json!({ "chainId": 31337 }))).await?;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["type"], "network");
        assert_eq!(body["code"], 4902);
        Ok(())
    }

    #[tokio::test]
    async fn missing_provider_is_a_bad_request() -> anyhow::Result<()> {
        let (app, _) = test_app(provider());

        let (status, body) = call(&app, "POST", "/wallet/connect", Some(json!({ "walletType": "near" }))).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["type"], "connection");

        let (status, body) = call(&app, "GET", "/wallet/supported/near", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "walletType": "near", "supported": false }));

        let (status, body) = call(&app, "GET", "/wallet/supported/evm", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["supported"], true);

        let (status, _) = call(&app, "GET", "/wallet/supported/solana", None).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn network_lookup() -> anyhow::Result<()> {
        let (app, _) = test_app(provider());

        let (status, body) = call(&app, "GET", "/networks/42161", None).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "name": "Arbitrum", "chainId": 42161, "isSupported": true, "isTestnet": false })
        );

        let (status, _) = call(&app, "GET", "/networks/31337", None).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        Ok(())
    }
}
