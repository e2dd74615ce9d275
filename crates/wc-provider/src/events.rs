use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::ProviderError;

pub type RawEventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
    Connect,
    Disconnect,
}

impl ProviderEventKind {
    pub const ALL: [ProviderEventKind; 4] = [
        ProviderEventKind::AccountsChanged,
        ProviderEventKind::ChainChanged,
        ProviderEventKind::Connect,
        ProviderEventKind::Disconnect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderEventKind::AccountsChanged => "accountsChanged",
            ProviderEventKind::ChainChanged => "chainChanged",
            ProviderEventKind::Connect => "connect",
            ProviderEventKind::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for ProviderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider event after validation at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(u64),
    Connect { chain_id: u64 },
    Disconnect { code: Option<i64>, message: String },
}

impl ProviderEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self {
            ProviderEvent::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
            ProviderEvent::ChainChanged(_) => ProviderEventKind::ChainChanged,
            ProviderEvent::Connect { .. } => ProviderEventKind::Connect,
            ProviderEvent::Disconnect { .. } => ProviderEventKind::Disconnect,
        }
    }

    pub fn parse(kind: ProviderEventKind, payload: &Value) -> Result<Self, ProviderError> {
        match kind {
            ProviderEventKind::AccountsChanged => parse_accounts(payload).map(ProviderEvent::AccountsChanged),
            ProviderEventKind::ChainChanged => parse_chain_id(payload)
                .map(ProviderEvent::ChainChanged)
                .ok_or_else(|| invalid("chainChanged", payload)),
            ProviderEventKind::Connect => parse_chain_id(&payload["chainId"])
                .map(|chain_id| ProviderEvent::Connect { chain_id })
                .ok_or_else(|| invalid("connect", payload)),
            ProviderEventKind::Disconnect => Ok(ProviderEvent::Disconnect {
                code: payload["code"].as_i64(),
                message: payload["message"].as_str().unwrap_or_default().to_owned(),
            }),
        }
    }
}

fn invalid(what: &str, payload: &Value) -> ProviderError {
    ProviderError::InvalidResponse(format!("{what}: unexpected payload {payload}"))
}

pub fn parse_accounts(payload: &Value) -> Result<Vec<String>, ProviderError> {
    let entries = payload
        .as_array()
        .ok_or_else(|| invalid("accounts", payload))?;

    entries
        .iter()
        .map(|entry| match entry.as_str().map(str::trim) {
            Some(account) if !account.is_empty() => Ok(account.to_owned()),
            _ => Err(invalid("accounts", payload)),
        })
        .collect()
}

/// Accepts `"0xa4b1"`, `"42161"` or `42161`.
pub fn parse_chain_id(payload: &Value) -> Option<u64> {
    match payload {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => parse_quantity(text).and_then(|value| u64::try_from(value).ok()),
        _ => None,
    }
}

pub fn parse_quantity(text: &str) -> Option<u128> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some("") => None,
        Some(hex) => u128::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Event listener bookkeeping for `InjectedProvider` implementations.
#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, RawEventHandler)>>>,
}

impl ListenerSet {
    pub fn add(&self, event: &str, handler: RawEventHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(event.to_owned()).or_default().push((id, handler));
        id
    }

    pub fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = guard.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        before != entries.len()
    }

    pub fn count(&self, event: &str) -> usize {
        let guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(event).map(Vec::len).unwrap_or(0)
    }

    /// Calls every handler registered for `event`; returns how many ran.
    pub fn emit(&self, event: &str, payload: &Value) -> usize {
        // handlers run outside the lock so they may (un)subscribe
        let handlers: Vec<RawEventHandler> = {
            let guard = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            guard
                .get(event)
                .map(|entries| entries.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }
}
