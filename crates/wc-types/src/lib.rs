use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

mod network;

pub use network::{
    NativeCurrency, NetworkDefinition, NetworkInfo, SUPPORTED_NETWORKS, chain_id_to_hex,
    network_definition, network_info,
};

pub const USER_REJECTED_CODE: i64 = 4001;
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Evm,
    Near,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Evm => "evm",
            WalletType::Near => "near",
        }
    }
}

impl fmt::Display for WalletType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown wallet type: {0}")]
pub struct UnknownWalletType(pub String);

impl FromStr for WalletType {
    type Err = UnknownWalletType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "evm" => Ok(WalletType::Evm),
            "near" => Ok(WalletType::Near),
            other => Err(UnknownWalletType(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    pub value: String,
    pub formatted: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WalletErrorKind {
    Connection,
    Network,
    Account,
    Permission,
}

impl fmt::Display for WalletErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WalletErrorKind::Connection => "connection",
            WalletErrorKind::Network => "network",
            WalletErrorKind::Account => "account",
            WalletErrorKind::Permission => "permission",
        };
        f.write_str(label)
    }
}

/// Classified failure of the last wallet operation.
///
/// Stored in `WalletState::error` and returned to the caller of the operation
/// that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct WalletError {
    #[serde(rename = "type")]
    pub kind: WalletErrorKind,
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
}

impl WalletError {
    pub fn new(kind: WalletErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == Some(USER_REJECTED_CODE)
    }
}

/// Canonical wallet connection state of one tab.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub address: Option<String>,
    pub wallet_type: Option<WalletType>,
    pub chain_id: Option<u64>,
    pub network: Option<NetworkInfo>,
    pub balance: Option<Balance>,
    pub error: Option<WalletError>,
    pub last_connected: Option<u64>,
    pub is_initialized: bool,
}

/// Partial `WalletState`.
///
/// An outer `None` leaves the field untouched. For nullable fields
/// `Some(None)` clears it, and serializes as JSON `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connecting: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub wallet_type: Option<Option<WalletType>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub chain_id: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub network: Option<Option<NetworkInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub balance: Option<Option<Balance>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub error: Option<Option<WalletError>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "nullable")]
    pub last_connected: Option<Option<u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_initialized: Option<bool>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl WalletStatePatch {
    /// Connection facts of `state`, as announced to other tabs.
    pub fn connection_of(state: &WalletState) -> Self {
        Self {
            is_connected: Some(state.is_connected),
            address: Some(state.address.clone()),
            wallet_type: Some(state.wallet_type),
            chain_id: Some(state.chain_id),
            network: Some(state.network.clone()),
            last_connected: Some(state.last_connected),
            ..Self::default()
        }
    }

    pub fn disconnected() -> Self {
        Self {
            is_connected: Some(false),
            address: Some(None),
            wallet_type: Some(None),
            chain_id: Some(None),
            network: Some(None),
            balance: Some(None),
            error: Some(None),
            last_connected: Some(None),
            ..Self::default()
        }
    }

    /// Writes every present field onto `state`.
    pub fn apply(&self, state: &mut WalletState) {
        if let Some(value) = self.is_connected {
            state.is_connected = value;
        }
        if let Some(value) = self.is_connecting {
            state.is_connecting = value;
        }
        if let Some(value) = &self.address {
            state.address = value.clone();
        }
        if let Some(value) = self.wallet_type {
            state.wallet_type = value;
        }
        if let Some(value) = self.chain_id {
            state.chain_id = value;
        }
        if let Some(value) = &self.network {
            state.network = value.clone();
        }
        if let Some(value) = &self.balance {
            state.balance = value.clone();
        }
        if let Some(value) = &self.error {
            state.error = value.clone();
        }
        if let Some(value) = self.last_connected {
            state.last_connected = value;
        }
        if let Some(value) = self.is_initialized {
            state.is_initialized = value;
        }
    }
}

/// Durable connection claim. Verified against the live provider before use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletStorageData {
    pub address: Option<String>,
    pub chain_id: Option<u64>,
    pub wallet_type: Option<WalletType>,
    pub last_connected: u64,
}

impl WalletStorageData {
    pub fn from_state(state: &WalletState) -> Self {
        Self {
            address: state.address.clone(),
            chain_id: state.chain_id,
            wallet_type: state.wallet_type,
            last_connected: state.last_connected.unwrap_or_else(epoch_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TabSyncKind {
    #[serde(rename = "WALLET_STATE_CHANGE")]
    WalletStateChange,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TabSyncMessage {
    #[serde(rename = "type")]
    pub kind: TabSyncKind,
    pub payload: WalletStatePatch,
    pub timestamp: u64,
    pub tab_id: String,
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arbitrum_lookup() {
        let info = network_info(42161).expect("arbitrum is in the table");
        assert_eq!(info.name, "Arbitrum");
        assert!(info.is_supported);
        assert!(!info.is_testnet);
        assert_eq!(network_info(999_999), None);
        assert_eq!(chain_id_to_hex(137), "0x89");
    }

    #[test]
    fn patch_distinguishes_absent_from_null() {
        let patch: WalletStatePatch =
            serde_json::from_value(json!({ "isConnected": false, "address": null })).unwrap();
        assert_eq!(patch.is_connected, Some(false));
        assert_eq!(patch.address, Some(None));
        assert_eq!(patch.chain_id, None);

        let encoded = serde_json::to_value(&patch).unwrap();
        assert_eq!(encoded, json!({ "isConnected": false, "address": null }));
    }

    #[test]
    fn patch_apply_leaves_absent_fields() {
        let mut state = WalletState {
            is_connected: true,
            address: Some("0xabc".to_owned()),
            chain_id: Some(1),
            is_initialized: true,
            ..WalletState::default()
        };

        WalletStatePatch {
            chain_id: Some(Some(10)),
            ..WalletStatePatch::default()
        }
        .apply(&mut state);

        assert_eq!(state.chain_id, Some(10));
        assert_eq!(state.address.as_deref(), Some("0xabc"));
        assert!(state.is_connected);
    }

    #[test]
    fn storage_record_wire_format() {
        let record = WalletStorageData {
            address: Some("0xABC".to_owned()),
            chain_id: Some(42161),
            wallet_type: Some(WalletType::Evm),
            last_connected: 1_700_000_000_000,
        };
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "address": "0xABC",
                "chainId": 42161,
                "walletType": "evm",
                "lastConnected": 1_700_000_000_000u64,
            })
        );
    }

    #[test]
    fn sync_message_wire_format() {
        let message = TabSyncMessage {
            kind: TabSyncKind::WalletStateChange,
            payload: WalletStatePatch::disconnected(),
            timestamp: 42,
            tab_id: "tab-1".to_owned(),
        };
        let encoded = serde_json::to_value(&message).unwrap();
        assert_eq!(encoded["type"], "WALLET_STATE_CHANGE");
        assert_eq!(encoded["tabId"], "tab-1");
        assert_eq!(encoded["payload"]["address"], serde_json::Value::Null);
        assert_eq!(encoded["payload"].get("lastConnected"), Some(&serde_json::Value::Null));
        assert_eq!(encoded["payload"].get("error"), Some(&serde_json::Value::Null));
        assert!(encoded["payload"].get("isConnecting").is_none());
    }

    #[test]
    fn wallet_error_wire_format() {
        let error = WalletError::new(WalletErrorKind::Network, "switch failed").with_code(-32603);
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({ "type": "network", "message": "switch failed", "code": -32603 })
        );
        assert_eq!(error.to_string(), "network error: switch failed");
        assert!(!error.is_user_rejection());
    }

    #[test]
    fn wallet_type_parsing() {
        assert_eq!("EVM".parse::<WalletType>(), Ok(WalletType::Evm));
        assert_eq!("near".parse::<WalletType>(), Ok(WalletType::Near));
        assert!("solana".parse::<WalletType>().is_err());
    }
}
