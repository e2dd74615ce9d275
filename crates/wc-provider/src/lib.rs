use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use wc_types::{
    NetworkDefinition, UNRECOGNIZED_CHAIN_CODE, USER_REJECTED_CODE, WalletError, WalletErrorKind,
    WalletType, chain_id_to_hex,
};

mod events;
mod memory;

pub use events::{
    ListenerId, ListenerSet, ProviderEvent, ProviderEventKind, RawEventHandler, parse_accounts,
    parse_chain_id, parse_quantity,
};
pub use memory::InMemoryProvider;

const REJECTION_SIGNATURES: [&str; 5] = [
    "user rejected",
    "user denied",
    "rejected by user",
    "user cancelled",
    "user canceled",
];

/// Error object returned by a provider `request`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The injected wallet object: a request function plus an event emitter.
#[async_trait]
pub trait InjectedProvider: Send + Sync {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError>;
    fn on(&self, event: &str, handler: RawEventHandler) -> ListenerId;
    fn remove_listener(&self, event: &str, id: ListenerId) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("no {0} wallet provider is available")]
    NotAvailable(WalletType),
    #[error("request rejected by user: {message}")]
    UserRejected { code: i64, message: String },
    #[error("chain is not known to the wallet: {message}")]
    UnrecognizedChain { message: String },
    #[error("provider error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn classify(err: RpcError) -> Self {
        let lowered = err.message.to_ascii_lowercase();
        if err.code == USER_REJECTED_CODE
            || REJECTION_SIGNATURES
                .iter()
                .any(|signature| lowered.contains(signature))
        {
            return ProviderError::UserRejected {
                code: err.code,
                message: err.message,
            };
        }

        if err.code == UNRECOGNIZED_CHAIN_CODE {
            return ProviderError::UnrecognizedChain {
                message: err.message,
            };
        }

        ProviderError::Rpc {
            code: err.code,
            message: err.message,
        }
    }

    pub fn code(&self) -> Option<i64> {
        match self {
            ProviderError::UserRejected { .. } => Some(USER_REJECTED_CODE),
            ProviderError::UnrecognizedChain { .. } => Some(UNRECOGNIZED_CHAIN_CODE),
            ProviderError::Rpc { code, .. } => Some(*code),
            ProviderError::NotAvailable(_) | ProviderError::InvalidResponse(_) => None,
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        matches!(self, ProviderError::UserRejected { .. })
    }

    /// Converts into the user-facing error stored in wallet state.
    pub fn into_wallet_error(self, kind: WalletErrorKind) -> WalletError {
        let code = self.code();
        let message = match (&self, kind) {
            (ProviderError::UserRejected { .. }, WalletErrorKind::Network) => {
                "Network switch was cancelled in your wallet.".to_owned()
            }
            (ProviderError::UserRejected { .. }, _) => {
                "Connection request was cancelled in your wallet.".to_owned()
            }
            (ProviderError::NotAvailable(wallet_type), _) => {
                format!("No {wallet_type} wallet found. Install a wallet extension and try again.")
            }
            _ => self.to_string(),
        };

        let error = WalletError::new(kind, message);
        match code {
            Some(code) => error.with_code(code),
            None => error,
        }
    }
}

/// Injected providers by wallet family.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<WalletType, Arc<dyn InjectedProvider>>,
}

impl ProviderRegistry {
    pub fn register(&mut self, wallet_type: WalletType, provider: Arc<dyn InjectedProvider>) {
        self.providers.insert(wallet_type, provider);
    }

    pub fn with(mut self, wallet_type: WalletType, provider: Arc<dyn InjectedProvider>) -> Self {
        self.register(wallet_type, provider);
        self
    }

    pub fn provider(&self, wallet_type: WalletType) -> Option<Arc<dyn InjectedProvider>> {
        self.providers.get(&wallet_type).cloned()
    }
}

pub type EventHandler = Arc<dyn Fn(ProviderEvent) + Send + Sync>;

/// Handle returned by [`ProviderAdapter::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub wallet_type: WalletType,
    pub kind: ProviderEventKind,
    pub id: ListenerId,
}

/// Capability-checked access to the injected providers.
#[derive(Clone)]
pub struct ProviderAdapter {
    registry: ProviderRegistry,
}

impl ProviderAdapter {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    pub fn is_available(&self, wallet_type: WalletType) -> bool {
        self.registry.provider(wallet_type).is_some()
    }

    fn provider(&self, wallet_type: WalletType) -> Result<Arc<dyn InjectedProvider>, ProviderError> {
        self.registry
            .provider(wallet_type)
            .ok_or(ProviderError::NotAvailable(wallet_type))
    }

    pub async fn request(
        &self,
        wallet_type: WalletType,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ProviderError> {
        let provider = self.provider(wallet_type)?;
        debug!(%wallet_type, method, "provider request");
        provider
            .request(method, params)
            .await
            .map_err(ProviderError::classify)
    }

    /// Prompts the wallet for account access.
    pub async fn request_accounts(&self, wallet_type: WalletType) -> Result<Vec<String>, ProviderError> {
        let value = self.request(wallet_type, "eth_requestAccounts", None).await?;
        parse_accounts(&value)
    }

    /// Accounts already exposed to this origin, without prompting.
    pub async fn accounts(&self, wallet_type: WalletType) -> Result<Vec<String>, ProviderError> {
        let value = self.request(wallet_type, "eth_accounts", None).await?;
        parse_accounts(&value)
    }

    pub async fn chain_id(&self, wallet_type: WalletType) -> Result<u64, ProviderError> {
        let value = self.request(wallet_type, "eth_chainId", None).await?;
        parse_chain_id(&value)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("eth_chainId returned {value}")))
    }

    pub async fn switch_chain(&self, wallet_type: WalletType, chain_id: u64) -> Result<(), ProviderError> {
        let params = json!([{ "chainId": chain_id_to_hex(chain_id) }]);
        self.request(wallet_type, "wallet_switchEthereumChain", Some(params))
            .await
            .map(|_| ())
    }

    pub async fn add_chain(
        &self,
        wallet_type: WalletType,
        network: &NetworkDefinition,
    ) -> Result<(), ProviderError> {
        let params = json!([{
            "chainId": network.chain_id_hex(),
            "chainName": network.name,
            "nativeCurrency": {
                "name": network.native_currency.name,
                "symbol": network.native_currency.symbol,
                "decimals": network.native_currency.decimals,
            },
            "rpcUrls": network.rpc_urls,
            "blockExplorerUrls": network.block_explorer_urls,
        }]);
        self.request(wallet_type, "wallet_addEthereumChain", Some(params))
            .await
            .map(|_| ())
    }

    pub async fn revoke_permissions(&self, wallet_type: WalletType) -> Result<(), ProviderError> {
        let params = json!([{ "eth_accounts": {} }]);
        self.request(wallet_type, "wallet_revokePermissions", Some(params))
            .await
            .map(|_| ())
    }

    /// Native balance in the chain's smallest unit.
    pub async fn balance(&self, wallet_type: WalletType, address: &str) -> Result<u128, ProviderError> {
        let value = self
            .request(wallet_type, "eth_getBalance", Some(json!([address, "latest"])))
            .await?;
        value
            .as_str()
            .and_then(parse_quantity)
            .ok_or_else(|| ProviderError::InvalidResponse(format!("eth_getBalance returned {value}")))
    }

    /// Subscribes to one event kind. Payloads that fail validation are logged
    /// and never reach `handler`.
    pub fn on(
        &self,
        wallet_type: WalletType,
        kind: ProviderEventKind,
        handler: EventHandler,
    ) -> Result<Subscription, ProviderError> {
        let provider = self.provider(wallet_type)?;
        let raw: RawEventHandler = Arc::new(move |payload: &Value| {
            match ProviderEvent::parse(kind, payload) {
                Ok(event) => handler(event),
                Err(err) => warn!(event = %kind, "dropping provider event: {}", err),
            }
        });
        let id = provider.on(kind.as_str(), raw);
        Ok(Subscription {
            wallet_type,
            kind,
            id,
        })
    }

    pub fn remove_listener(&self, subscription: &Subscription) -> bool {
        match self.registry.provider(subscription.wallet_type) {
            Some(provider) => provider.remove_listener(subscription.kind.as_str(), subscription.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn adapter_with(provider: Arc<InMemoryProvider>) -> ProviderAdapter {
        ProviderAdapter::new(ProviderRegistry::default().with(WalletType::Evm, provider))
    }

    #[test]
    fn classifies_rejections_by_code_and_message() {
        let by_code = ProviderError::classify(RpcError::new(4001, "nope"));
        assert!(by_code.is_user_rejection());

        let by_message = ProviderError::classify(RpcError::new(-32000, "MetaMask Tx Signature: User denied transaction signature."));
        assert!(by_message.is_user_rejection());

        let unknown_chain = ProviderError::classify(RpcError::new(4902, "Unrecognized chain ID"));
        assert_eq!(
            unknown_chain,
            ProviderError::UnrecognizedChain {
                message: "Unrecognized chain ID".to_owned()
            }
        );

        let other = ProviderError::classify(RpcError::new(-32603, "internal error"));
        assert!(!other.is_user_rejection());
        assert_eq!(other.code(), Some(-32603));
    }

    #[test]
    fn rejection_gets_a_gentle_message() {
        let error = ProviderError::UserRejected {
            code: 4001,
            message: "User rejected the request.".to_owned(),
        }
        .into_wallet_error(WalletErrorKind::Connection);
        assert_eq!(error.kind, WalletErrorKind::Connection);
        assert_eq!(error.message, "Connection request was cancelled in your wallet.");
        assert!(error.is_user_rejection());
    }

    #[test]
    fn parses_chain_id_encodings() {
        assert_eq!(parse_chain_id(&json!("0xa4b1")), Some(42161));
        assert_eq!(parse_chain_id(&json!("137")), Some(137));
        assert_eq!(parse_chain_id(&json!(10)), Some(10));
        assert_eq!(parse_chain_id(&json!("0x")), None);
        assert_eq!(parse_chain_id(&json!(null)), None);
    }

    #[tokio::test]
    async fn missing_provider_is_not_available() {
        let adapter = ProviderAdapter::new(ProviderRegistry::default());
        assert!(!adapter.is_available(WalletType::Near));
        let err = adapter.request_accounts(WalletType::Near).await.unwrap_err();
        assert_eq!(err, ProviderError::NotAvailable(WalletType::Near));
    }

    #[tokio::test]
    async fn reads_accounts_and_chain() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new(vec!["0xABC".to_owned()], 42161));
        let adapter = adapter_with(provider.clone());

        assert!(adapter.accounts(WalletType::Evm).await?.is_empty());
        assert_eq!(adapter.request_accounts(WalletType::Evm).await?, vec!["0xABC"]);
        assert_eq!(adapter.accounts(WalletType::Evm).await?, vec!["0xABC"]);
        assert_eq!(adapter.chain_id(WalletType::Evm).await?, 42161);
        Ok(())
    }

    #[tokio::test]
    async fn add_chain_sends_table_urls() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new(vec![], 1));
        let adapter = adapter_with(provider.clone());

        let err = adapter.switch_chain(WalletType::Evm, 137).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnrecognizedChain { .. }));

        let polygon = wc_types::network_definition(137).expect("polygon");
        adapter.add_chain(WalletType::Evm, polygon).await?;
        assert!(provider.knows_chain(137));
        assert_eq!(provider.chain_id(), 137);
        Ok(())
    }

    #[test]
    fn invalid_event_payloads_are_dropped() {
        let provider = Arc::new(InMemoryProvider::new(vec![], 1));
        let adapter = adapter_with(provider.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let subscription = adapter
            .on(
                WalletType::Evm,
                ProviderEventKind::ChainChanged,
                Arc::new(move |event| sink.lock().unwrap().push(event)),
            )
            .unwrap();

        provider.emit("chainChanged", json!({ "unexpected": true }));
        provider.emit("chainChanged", json!("0x89"));
        assert_eq!(*seen.lock().unwrap(), vec![ProviderEvent::ChainChanged(137)]);

        assert!(adapter.remove_listener(&subscription));
        provider.emit("chainChanged", json!("0x1"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
