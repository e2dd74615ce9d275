//! Wallet service: one instance per tab.
//!
//! Build it once at the composition root and share it (`Arc<WalletService>`)
//! with every collaborator of that tab. It drives the provider adapter, the
//! persisted record and the cross-tab channel, and is the only writer of the
//! tab's `WalletState`.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OnceCell, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use wc_broadcast::{BroadcastHub, DEFAULT_CHANNEL_NAME, TabChannel, TabId, TabReceiver};
use wc_provider::{
    EventHandler, ProviderAdapter, ProviderError, ProviderEvent, ProviderEventKind,
    ProviderRegistry, Subscription,
};
use wc_state::{WalletAction, WalletStore};
use wc_storage::{DEFAULT_STORAGE_KEY, KeyValueStore, PersistenceStore};
use wc_types::{
    Balance, NetworkInfo, TabSyncMessage, UNRECOGNIZED_CHAIN_CODE, WalletError, WalletErrorKind,
    WalletState, WalletStatePatch, WalletStorageData, WalletType, epoch_ms, network_definition,
    network_info,
};


const BALANCE_PRECISION: usize = 4;

#[derive(Debug, Clone)]
pub struct WalletServiceConfig {
    pub storage_key: String,
    pub channel_name: String,
}

impl Default for WalletServiceConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_owned(),
            channel_name: DEFAULT_CHANNEL_NAME.to_owned(),
        }
    }
}

struct EventInputs {
    provider_events: mpsc::UnboundedReceiver<ProviderEvent>,
    sync_inbox: TabReceiver,
}

pub struct WalletService {
    adapter: ProviderAdapter,
    persistence: PersistenceStore,
    channel: TabChannel,
    store: WalletStore,
    restored: OnceCell<()>,
    subscriptions: Mutex<Vec<Subscription>>,
    provider_events: mpsc::UnboundedSender<ProviderEvent>,
    inputs: Mutex<Option<EventInputs>>,
}

impl WalletService {
    pub fn new(
        config: WalletServiceConfig,
        providers: ProviderRegistry,
        storage: Arc<dyn KeyValueStore>,
        hub: &BroadcastHub,
    ) -> Self {
        let channel = hub.open(&config.channel_name, TabId::new_random());
        let (provider_events, events_rx) = mpsc::unbounded_channel();
        let inputs = EventInputs {
            provider_events: events_rx,
            sync_inbox: channel.subscribe(),
        };

        Self {
            adapter: ProviderAdapter::new(providers),
            persistence: PersistenceStore::new(storage, config.storage_key),
            channel,
            store: WalletStore::new(),
            restored: OnceCell::new(),
            subscriptions: Mutex::new(Vec::new()),
            provider_events,
            inputs: Mutex::new(Some(inputs)),
        }
    }

    pub fn tab_id(&self) -> &TabId {
        self.channel.tab_id()
    }

    pub fn state(&self) -> WalletState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.store.subscribe()
    }

    pub fn is_wallet_supported(&self, wallet_type: WalletType) -> bool {
        self.adapter.is_available(wallet_type)
    }

    pub fn get_network_by_chain_id(chain_id: u64) -> Option<NetworkInfo> {
        network_info(chain_id)
    }

    /// Runs the startup restore once. Later calls return immediately.
    pub async fn initialize(&self) {
        self.restored.get_or_init(|| self.restore()).await;
    }

    /// Trusts the stored record only if the live provider still exposes the
    /// same account. Never fails: every problem ends in an initialized,
    /// disconnected state.
    async fn restore(&self) {
        let record = match self.persistence.load().await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.store.dispatch(WalletAction::SetInitialized(true));
                return;
            }
            Err(err) => {
                warn!(key = self.persistence.key(), "failed to read stored wallet record: {:#}", err);
                self.store.dispatch(WalletAction::SetInitialized(true));
                return;
            }
        };

        let wallet_type = record.wallet_type.unwrap_or(WalletType::Evm);
        if !self.adapter.is_available(wallet_type) {
            info!(%wallet_type, "stored wallet has no provider; discarding record");
            self.clear_record().await;
            self.store.dispatch(WalletAction::SetInitialized(true));
            return;
        }

        let live = match self.live_account(wallet_type).await {
            Ok(live) => live,
            Err(err) => {
                warn!(%wallet_type, "provider unreachable during restore: {}", err);
                self.store.dispatch(WalletAction::SetInitialized(true));
                return;
            }
        };

        let stored = record.address.as_deref().unwrap_or_default();
        match live {
            (Some(current), chain_id) if current.eq_ignore_ascii_case(stored) => {
                self.store.dispatch(WalletAction::RestoreState(WalletStatePatch {
                    is_connected: Some(true),
                    address: Some(Some(current)),
                    wallet_type: Some(Some(wallet_type)),
                    chain_id: Some(Some(chain_id)),
                    network: Some(network_info(chain_id)),
                    last_connected: Some(Some(record.last_connected)),
                    error: Some(None),
                    ..WalletStatePatch::default()
                }));
                self.attach_listeners(wallet_type);
                info!(%wallet_type, chain_id, "restored wallet connection");
            }
            _ => {
                info!(%wallet_type, "stored wallet no longer matches provider; discarding record");
                self.clear_record().await;
                self.store.dispatch(WalletAction::SetInitialized(true));
            }
        }
    }

    async fn live_account(&self, wallet_type: WalletType) -> Result<(Option<String>, u64), ProviderError> {
        let accounts = self.adapter.accounts(wallet_type).await?;
        let chain_id = self.adapter.chain_id(wallet_type).await?;
        Ok((accounts.into_iter().next(), chain_id))
    }

    /// Connects the given wallet family. A second call while one is in flight
    /// starts another attempt; whichever resolves last wins.
    pub async fn connect(&self, wallet_type: WalletType) -> Result<(), WalletError> {
        self.initialize().await;
        let previous = self.store.snapshot();
        self.store.dispatch(WalletAction::SetConnecting(true));
        info!(%wallet_type, "connecting wallet");

        let (address, chain_id) = match self.request_connection(wallet_type).await {
            Ok(connection) => connection,
            Err(err) => {
                let error = err.into_wallet_error(WalletErrorKind::Connection);
                warn!(%wallet_type, "wallet connection failed: {}", error);
                // SetConnecting already cleared the previous session locally
                if previous.wallet_type.is_some() {
                    self.end_session().await;
                }
                self.store.dispatch(WalletAction::SetError(error.clone()));
                return Err(error);
            }
        };

        let state = self.store.dispatch(WalletAction::SetConnected {
            address,
            chain_id,
            wallet_type,
            connected_at: epoch_ms(),
        });
        self.attach_listeners(wallet_type);
        self.persist(&state).await;
        self.announce(WalletStatePatch::connection_of(&state));
        info!(%wallet_type, chain_id, "wallet connected");
        Ok(())
    }

    async fn request_connection(&self, wallet_type: WalletType) -> Result<(String, u64), ProviderError> {
        let address = self
            .adapter
            .request_accounts(wallet_type)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("wallet returned no accounts".to_owned()))?;
        let chain_id = self.adapter.chain_id(wallet_type).await?;
        Ok((address, chain_id))
    }

    /// Clears the local connection. The provider-side revoke is best-effort.
    pub async fn disconnect(&self) -> Result<(), WalletError> {
        self.initialize().await;
        let wallet_type = self.store.snapshot().wallet_type;
        self.detach_listeners();

        if let Some(wallet_type) = wallet_type.filter(|kind| self.adapter.is_available(*kind)) {
            if let Err(err) = self.adapter.revoke_permissions(wallet_type).await {
                warn!(%wallet_type, "provider disconnect failed: {}", err);
            }
        }

        self.end_session().await;
        info!("wallet disconnected");
        Ok(())
    }

    /// Drops the local session and tells the other tabs.
    async fn end_session(&self) {
        self.detach_listeners();
        self.store.dispatch(WalletAction::SetDisconnected);
        self.clear_record().await;
        self.announce(WalletStatePatch::disconnected());
    }

    /// Asks the wallet to switch chains, adding the chain first if the wallet
    /// does not know it. `chain_id` in state only changes when the provider
    /// reports `chainChanged`.
    pub async fn switch_network(&self, chain_id: u64) -> Result<(), WalletError> {
        self.initialize().await;
        self.store.dispatch(WalletAction::ClearError);
        let wallet_type = self.store.snapshot().wallet_type.unwrap_or(WalletType::Evm);

        let outcome = match self.adapter.switch_chain(wallet_type, chain_id).await {
            Ok(()) => Ok(()),
            Err(ProviderError::UnrecognizedChain { .. }) => self.add_chain(wallet_type, chain_id).await,
            Err(err) => Err(err.into_wallet_error(WalletErrorKind::Network)),
        };

        if let Err(error) = &outcome {
            warn!(chain_id, "network switch failed: {}", error);
            self.store.dispatch(WalletAction::SetError(error.clone()));
        }
        outcome
    }

    async fn add_chain(&self, wallet_type: WalletType, chain_id: u64) -> Result<(), WalletError> {
        let Some(network) = network_definition(chain_id) else {
            return Err(WalletError::new(
                WalletErrorKind::Network,
                format!("Chain {chain_id} is not supported."),
            )
            .with_code(UNRECOGNIZED_CHAIN_CODE));
        };

        info!(chain_id, name = network.name, "chain unknown to wallet; requesting add");
        self.adapter
            .add_chain(wallet_type, network)
            .await
            .map_err(|err| err.into_wallet_error(WalletErrorKind::Network))
    }

    /// Best-effort native balance lookup; failures keep the previous value.
    pub async fn refresh_balance(&self) -> Result<(), WalletError> {
        let state = self.store.snapshot();
        let (true, Some(address), Some(wallet_type)) =
            (state.is_connected, state.address.as_deref(), state.wallet_type)
        else {
            return Ok(());
        };

        match self.adapter.balance(wallet_type, address).await {
            Ok(value) => {
                let (symbol, decimals) = state
                    .chain_id
                    .and_then(network_definition)
                    .map(|network| (network.native_currency.symbol, network.native_currency.decimals))
                    .unwrap_or(("ETH", 18));
                self.store.dispatch(WalletAction::SetBalance(Some(Balance {
                    value: value.to_string(),
                    formatted: format_units(value, decimals, BALANCE_PRECISION),
                    symbol: symbol.to_owned(),
                })));
            }
            Err(err) => warn!(%wallet_type, "balance refresh failed: {}", err),
        }
        Ok(())
    }

    pub fn clear_error(&self) {
        self.store.dispatch(WalletAction::ClearError);
    }

    /// Applies a provider event as if the user had acted through the UI:
    /// state transition, record write and broadcast.
    pub async fn handle_provider_event(&self, event: ProviderEvent) {
        let state = self.store.snapshot();
        let Some(wallet_type) = state.wallet_type else {
            debug!(event = %event.kind(), "ignoring provider event without an active wallet");
            return;
        };

        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                self.on_account_changed(accounts.into_iter().next()).await;
            }
            ProviderEvent::ChainChanged(chain_id) => self.on_chain_changed(chain_id).await,
            ProviderEvent::Connect { chain_id } if state.is_connected => {
                self.on_chain_changed(chain_id).await;
            }
            ProviderEvent::Connect { chain_id } => {
                debug!(%wallet_type, chain_id, "provider connected");
            }
            ProviderEvent::Disconnect { code, message } => {
                warn!(%wallet_type, ?code, "provider disconnected: {}", message);
                self.on_account_changed(None).await;
            }
        }
    }

    async fn on_account_changed(&self, address: Option<String>) {
        let before = self.store.snapshot();
        let after = self.store.dispatch(WalletAction::SetAccountChanged(address));
        if before == after {
            return;
        }

        if after.is_connected {
            self.persist(&after).await;
        } else {
            self.clear_record().await;
        }
        self.announce(WalletStatePatch {
            is_connected: Some(after.is_connected),
            address: Some(after.address.clone()),
            ..WalletStatePatch::default()
        });
    }

    async fn on_chain_changed(&self, chain_id: u64) {
        let before = self.store.snapshot();
        let after = self.store.dispatch(WalletAction::SetChainChanged(chain_id));
        if before == after {
            return;
        }

        if after.is_connected {
            self.persist(&after).await;
        }
        self.announce(WalletStatePatch {
            chain_id: Some(after.chain_id),
            network: Some(after.network.clone()),
            ..WalletStatePatch::default()
        });
    }

    /// Applies another tab's change. Returns `false` for this tab's own
    /// messages. Never writes the persisted record.
    pub fn apply_remote(&self, message: TabSyncMessage) -> bool {
        if message.tab_id == self.tab_id().as_str() {
            trace!("ignoring own sync message");
            return false;
        }

        debug!(from = %message.tab_id, timestamp = message.timestamp, "applying change from another tab");
        let state = self.store.dispatch(WalletAction::SyncFromTab(message.payload));

        let listening = !self.lock_subscriptions().is_empty();
        match (state.is_connected, state.wallet_type) {
            (true, Some(wallet_type)) if !listening => self.attach_listeners(wallet_type),
            (false, None) if listening => self.detach_listeners(),
            _ => {}
        }
        true
    }

    /// Spawns the task that feeds provider events and cross-tab messages into
    /// the service one at a time. Returns `None` if it is already running.
    pub fn spawn_event_loop(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let EventInputs {
            mut provider_events,
            mut sync_inbox,
        } = self
            .inputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let service = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = provider_events.recv() => {
                        let Some(service) = service.upgrade() else { break };
                        service.handle_provider_event(event).await;
                    }
                    Some(message) = sync_inbox.recv() => {
                        let Some(service) = service.upgrade() else { break };
                        service.apply_remote(message);
                    }
                    else => break,
                }
            }
            debug!("wallet event loop stopped");
        }))
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attach_listeners(&self, wallet_type: WalletType) {
        self.detach_listeners();

        let mut attached = Vec::with_capacity(ProviderEventKind::ALL.len());
        for kind in ProviderEventKind::ALL {
            let events = self.provider_events.clone();
            let handler: EventHandler = Arc::new(move |event| {
                let _ = events.send(event);
            });
            match self.adapter.on(wallet_type, kind, handler) {
                Ok(subscription) => attached.push(subscription),
                Err(err) => warn!(%wallet_type, event = %kind, "cannot listen to provider: {}", err),
            }
        }
        *self.lock_subscriptions() = attached;
    }

    fn detach_listeners(&self) {
        let attached = std::mem::take(&mut *self.lock_subscriptions());
        for subscription in &attached {
            self.adapter.remove_listener(subscription);
        }
    }

    async fn persist(&self, state: &WalletState) {
        if state.address.is_none() {
            return;
        }
        if let Err(err) = self.persistence.save(&WalletStorageData::from_state(state)).await {
            warn!(key = self.persistence.key(), "failed to store wallet record: {:#}", err);
        }
    }

    async fn clear_record(&self) {
        if let Err(err) = self.persistence.clear().await {
            warn!(key = self.persistence.key(), "failed to clear wallet record: {:#}", err);
        }
    }

    fn announce(&self, patch: WalletStatePatch) {
        if let Err(err) = self.channel.publish(patch) {
            warn!("failed to broadcast wallet change: {}", err);
        }
    }
}

/// Renders `value` smallest units as a decimal with `precision` fractional
/// digits, truncating.
pub fn format_units(value: u128, decimals: u8, precision: usize) -> String {
    let decimals = u32::from(decimals.min(38));
    let base = 10u128.pow(decimals);
    let whole = value / base;
    if decimals == 0 || precision == 0 {
        return whole.to_string();
    }

    let fraction = format!("{:0width$}", value % base, width = decimals as usize);
    let shown = &fraction[..precision.min(fraction.len())];
    format!("{whole}.{shown}")
}
