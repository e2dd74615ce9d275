use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use wc_core::WalletService;
use wc_types::{NetworkInfo, WalletError, WalletState, WalletType};

use crate::{ApiError, ApiResult, AppState, ErrorResponse, bad_request, not_found, wallet_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConnectRequest {
    pub(crate) wallet_type: WalletType,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SwitchNetworkRequest {
    pub(crate) chain_id: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SupportedResponse {
    pub(crate) wallet_type: WalletType,
    pub(crate) supported: bool,
}

pub(crate) async fn wallet_state(State(state): State<AppState>) -> Json<WalletState> {
    Json(state.wallet.state())
}

pub(crate) async fn wallet_connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<WalletState> {
    let supported = state.wallet.is_wallet_supported(request.wallet_type);
    match state.wallet.connect(request.wallet_type).await {
        Ok(()) => Ok(Json(state.wallet.state())),
        Err(err) if !supported => Err(missing_provider(err)),
        Err(err) => Err(wallet_error(err)),
    }
}

pub(crate) async fn wallet_disconnect(State(state): State<AppState>) -> ApiResult<WalletState> {
    state.wallet.disconnect().await.map_err(wallet_error)?;
    Ok(Json(state.wallet.state()))
}

pub(crate) async fn wallet_switch_network(
    State(state): State<AppState>,
    Json(request): Json<SwitchNetworkRequest>,
) -> ApiResult<WalletState> {
    state
        .wallet
        .switch_network(request.chain_id)
        .await
        .map_err(wallet_error)?;
    Ok(Json(state.wallet.state()))
}

pub(crate) async fn wallet_refresh_balance(State(state): State<AppState>) -> ApiResult<WalletState> {
    state.wallet.refresh_balance().await.map_err(wallet_error)?;
    Ok(Json(state.wallet.state()))
}

pub(crate) async fn wallet_clear_error(State(state): State<AppState>) -> Json<WalletState> {
    state.wallet.clear_error();
    Json(state.wallet.state())
}

pub(crate) async fn wallet_supported(
    State(state): State<AppState>,
    Path(wallet_type): Path<String>,
) -> ApiResult<SupportedResponse> {
    let wallet_type = wallet_type
        .parse::<WalletType>()
        .map_err(|err| bad_request(err.to_string()))?;

    Ok(Json(SupportedResponse {
        wallet_type,
        supported: state.wallet.is_wallet_supported(wallet_type),
    }))
}

pub(crate) async fn network_by_chain_id(Path(chain_id): Path<u64>) -> ApiResult<NetworkInfo> {
    WalletService::get_network_by_chain_id(chain_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("chain {chain_id} is not supported")))
}

fn missing_provider(err: WalletError) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: err.message,
            kind: Some(err.kind),
            code: err.code,
        }),
    )
}
