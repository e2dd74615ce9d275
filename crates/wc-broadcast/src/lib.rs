//! Same-origin, cross-tab publish/subscribe.
//!
//! Messages travel as JSON text, are delivered best-effort, and are never
//! persisted. A receiver skips messages stamped with its own tab id.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{trace, warn};
use uuid::Uuid;
use wc_types::{TabSyncKind, TabSyncMessage, WalletStatePatch, epoch_ms};

pub const DEFAULT_CHANNEL_NAME: &str = "wallet-sync";

const CHANNEL_CAPACITY: usize = 64;

/// Random per-tab identity, generated once per wallet service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabId(String);

impl TabId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TabId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to encode sync message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Named channels of one origin.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, name: &str) -> broadcast::Sender<String> {
        let mut guard = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(name.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn open(&self, name: &str, tab_id: TabId) -> TabChannel {
        TabChannel {
            name: name.to_owned(),
            tab_id,
            sender: self.sender(name),
        }
    }

    /// Posts raw text to a channel, as any script of the origin may.
    pub fn post(&self, name: &str, raw: String) -> usize {
        self.sender(name).send(raw).unwrap_or(0)
    }
}

/// A tab's handle on a named channel.
#[derive(Clone)]
pub struct TabChannel {
    name: String,
    tab_id: TabId,
    sender: broadcast::Sender<String>,
}

impl TabChannel {
    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    /// Stamps `payload` with this tab's id and the current time and sends it.
    /// Returns the number of receivers reached; zero when no tab listens.
    pub fn publish(&self, payload: WalletStatePatch) -> Result<usize, BroadcastError> {
        let message = TabSyncMessage {
            kind: TabSyncKind::WalletStateChange,
            payload,
            timestamp: epoch_ms(),
            tab_id: self.tab_id.as_str().to_owned(),
        };
        let raw = serde_json::to_string(&message)?;
        let reached = self.sender.send(raw).unwrap_or(0);
        trace!(channel = %self.name, tab_id = %self.tab_id, reached, "published sync message");
        Ok(reached)
    }

    pub fn subscribe(&self) -> TabReceiver {
        TabReceiver {
            tab_id: self.tab_id.clone(),
            receiver: self.sender.subscribe(),
        }
    }
}

pub struct TabReceiver {
    tab_id: TabId,
    receiver: broadcast::Receiver<String>,
}

impl TabReceiver {
    /// Next message from another tab. `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<TabSyncMessage> {
        loop {
            let raw = match self.receiver.recv().await {
                Ok(raw) => raw,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(tab_id = %self.tab_id, skipped, "sync receiver lagged; messages dropped");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };

            let message = match serde_json::from_str::<TabSyncMessage>(&raw) {
                Ok(message) => message,
                Err(err) => {
                    warn!(tab_id = %self.tab_id, "ignoring malformed sync message: {}", err);
                    continue;
                }
            };

            if message.tab_id == self.tab_id.as_str() {
                continue;
            }
            return Some(message);
        }
    }
}
