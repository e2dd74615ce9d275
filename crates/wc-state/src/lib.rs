//! Connection state machine.
//!
//! `reduce` is the only code that produces a new `WalletState`; `WalletStore`
//! owns the current value and hands out read-only subscriptions.

use tokio::sync::watch;
use tracing::debug;
use wc_types::{
    Balance, NetworkInfo, WalletError, WalletState, WalletStatePatch, WalletType, network_info,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletAction {
    SetConnecting(bool),
    SetConnected {
        address: String,
        chain_id: u64,
        wallet_type: WalletType,
        connected_at: u64,
    },
    SetDisconnected,
    /// `None` is a provider-driven disconnect.
    SetAccountChanged(Option<String>),
    SetChainChanged(u64),
    /// Overrides `network` without touching `chain_id`.
    SetNetwork(Option<NetworkInfo>),
    SetBalance(Option<Balance>),
    SetError(WalletError),
    ClearError,
    SetInitialized(bool),
    /// Startup restore result; always marks the state initialized.
    RestoreState(WalletStatePatch),
    /// Change announced by another tab.
    SyncFromTab(WalletStatePatch),
}

impl WalletAction {
    pub fn name(&self) -> &'static str {
        match self {
            WalletAction::SetConnecting(_) => "SET_CONNECTING",
            WalletAction::SetConnected { .. } => "SET_CONNECTED",
            WalletAction::SetDisconnected => "SET_DISCONNECTED",
            WalletAction::SetAccountChanged(_) => "SET_ACCOUNT_CHANGED",
            WalletAction::SetChainChanged(_) => "SET_CHAIN_CHANGED",
            WalletAction::SetNetwork(_) => "SET_NETWORK",
            WalletAction::SetBalance(_) => "SET_BALANCE",
            WalletAction::SetError(_) => "SET_ERROR",
            WalletAction::ClearError => "CLEAR_ERROR",
            WalletAction::SetInitialized(_) => "SET_INITIALIZED",
            WalletAction::RestoreState(_) => "RESTORE_STATE",
            WalletAction::SyncFromTab(_) => "SYNC_FROM_TAB",
        }
    }
}

pub fn reduce(state: &WalletState, action: WalletAction) -> WalletState {
    let mut next = state.clone();

    match action {
        WalletAction::SetConnecting(true) => {
            next.is_connecting = true;
            next.is_connected = false;
            next.address = None;
            next.error = None;
        }
        WalletAction::SetConnecting(false) => {
            next.is_connecting = false;
        }
        WalletAction::SetConnected {
            address,
            chain_id,
            wallet_type,
            connected_at,
        } => {
            next.is_connected = true;
            next.is_connecting = false;
            next.address = Some(address);
            next.wallet_type = Some(wallet_type);
            next.chain_id = Some(chain_id);
            next.network = network_info(chain_id);
            next.error = None;
            next.last_connected = Some(connected_at);
        }
        WalletAction::SetDisconnected => {
            next = WalletState {
                is_initialized: state.is_initialized,
                ..WalletState::default()
            };
        }
        WalletAction::SetAccountChanged(address) => {
            next.is_connected = address.is_some();
            next.address = address;
        }
        WalletAction::SetChainChanged(chain_id) => {
            next.chain_id = Some(chain_id);
            next.network = network_info(chain_id);
        }
        WalletAction::SetNetwork(network) => {
            next.network = network;
        }
        WalletAction::SetBalance(balance) => {
            next.balance = balance;
        }
        WalletAction::SetError(error) => {
            next.error = Some(error);
            next.is_connecting = false;
        }
        WalletAction::ClearError => {
            next.error = None;
        }
        WalletAction::SetInitialized(initialized) => {
            next.is_initialized = initialized;
        }
        WalletAction::RestoreState(patch) => {
            patch.apply(&mut next);
            next.is_initialized = true;
        }
        WalletAction::SyncFromTab(mut patch) => {
            // another tab's transient flags mean nothing here
            patch.is_connecting = None;
            patch.is_initialized = None;
            patch.apply(&mut next);
        }
    }

    next
}

/// Single-writer, many-reader container for the tab's `WalletState`.
///
/// Subscribers are woken only when a transition changes the state.
pub struct WalletStore {
    sender: watch::Sender<WalletState>,
}

impl Default for WalletStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletStore {
    pub fn new() -> Self {
        Self {
            sender: watch::Sender::new(WalletState::default()),
        }
    }

    pub fn dispatch(&self, action: WalletAction) -> WalletState {
        let name = action.name();
        let mut snapshot = WalletState::default();

        let changed = self.sender.send_if_modified(|state| {
            let next = reduce(state, action);
            let changed = next != *state;
            *state = next;
            snapshot = state.clone();
            changed
        });

        debug!(
            action = name,
            changed,
            connected = snapshot.is_connected,
            connecting = snapshot.is_connecting,
            chain_id = ?snapshot.chain_id,
            "wallet state transition"
        );
        snapshot
    }

    pub fn snapshot(&self) -> WalletState {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.sender.subscribe()
    }
}
