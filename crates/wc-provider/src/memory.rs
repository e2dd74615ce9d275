use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use wc_types::{UNRECOGNIZED_CHAIN_CODE, chain_id_to_hex};

use crate::events::{ListenerId, ListenerSet, RawEventHandler, parse_chain_id};
use crate::{InjectedProvider, RpcError};

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

struct WalletScript {
    accounts: Vec<String>,
    authorized: bool,
    chain_id: u64,
    known_chains: HashSet<u64>,
    balance_wei: u128,
    failures: HashMap<String, RpcError>,
    calls: Vec<String>,
    last_params: HashMap<String, Value>,
}

/// Scriptable in-process wallet, the counterpart of an injected extension.
///
/// Answers the EIP-1193 methods the adapter uses and emits events when its
/// accounts or chain change.
pub struct InMemoryProvider {
    script: Mutex<WalletScript>,
    listeners: ListenerSet,
}

impl InMemoryProvider {
    pub fn new(accounts: Vec<String>, chain_id: u64) -> Self {
        Self {
            script: Mutex::new(WalletScript {
                accounts,
                authorized: false,
                chain_id,
                known_chains: HashSet::from([chain_id]),
                balance_wei: 0,
                failures: HashMap::new(),
                calls: Vec::new(),
                last_params: HashMap::new(),
            }),
            listeners: ListenerSet::default(),
        }
    }

    /// Starts with the site already authorized, as after a previous connect.
    pub fn authorized(self) -> Self {
        self.with_script(|script| script.authorized = true);
        self
    }

    pub fn with_known_chains(self, chains: impl IntoIterator<Item = u64>) -> Self {
        self.with_script(|script| script.known_chains.extend(chains));
        self
    }

    pub fn with_balance(self, balance_wei: u128) -> Self {
        self.with_script(|script| script.balance_wei = balance_wei);
        self
    }

    /// Makes every later call to `method` fail with `error`.
    pub fn fail_method(&self, method: &str, error: RpcError) {
        self.with_script(|script| script.failures.insert(method.to_owned(), error));
    }

    pub fn clear_failures(&self) {
        self.with_script(|script| script.failures.clear());
    }

    pub fn set_accounts(&self, accounts: Vec<String>) {
        let visible = self.with_script(|script| {
            script.accounts = accounts;
            script.visible_accounts()
        });
        self.listeners.emit("accountsChanged", &json!(visible));
    }

    pub fn set_chain(&self, chain_id: u64) {
        self.with_script(|script| {
            script.chain_id = chain_id;
            script.known_chains.insert(chain_id);
        });
        self.listeners
            .emit("chainChanged", &Value::String(chain_id_to_hex(chain_id)));
    }

    /// Emits an arbitrary raw event, valid or not.
    pub fn emit(&self, event: &str, payload: Value) -> usize {
        self.listeners.emit(event, &payload)
    }

    pub fn chain_id(&self) -> u64 {
        self.with_script(|script| script.chain_id)
    }

    pub fn knows_chain(&self, chain_id: u64) -> bool {
        self.with_script(|script| script.known_chains.contains(&chain_id))
    }

    pub fn calls(&self) -> Vec<String> {
        self.with_script(|script| script.calls.clone())
    }

    pub fn last_params(&self, method: &str) -> Option<Value> {
        self.with_script(|script| script.last_params.get(method).cloned())
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    fn with_script<R>(&self, f: impl FnOnce(&mut WalletScript) -> R) -> R {
        let mut guard = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl WalletScript {
    fn visible_accounts(&self) -> Vec<String> {
        if self.authorized {
            self.accounts.clone()
        } else {
            Vec::new()
        }
    }
}

fn requested_chain(params: &Option<Value>) -> Result<u64, RpcError> {
    params
        .as_ref()
        .and_then(|value| parse_chain_id(&value[0]["chainId"]))
        .ok_or_else(|| RpcError::new(INVALID_PARAMS, "missing chainId parameter"))
}

#[async_trait]
impl InjectedProvider for InMemoryProvider {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let (result, emitted_chain) = self.with_script(|script| {
            script.calls.push(method.to_owned());
            if let Some(params) = &params {
                script.last_params.insert(method.to_owned(), params.clone());
            }
            if let Some(failure) = script.failures.get(method) {
                return (Err(failure.clone()), None);
            }

            match method {
                "eth_requestAccounts" => {
                    script.authorized = true;
                    (Ok(json!(script.accounts)), None)
                }
                "eth_accounts" => (Ok(json!(script.visible_accounts())), None),
                "eth_chainId" => (Ok(Value::String(chain_id_to_hex(script.chain_id))), None),
                "eth_getBalance" => (Ok(Value::String(format!("0x{:x}", script.balance_wei))), None),
                "wallet_switchEthereumChain" => match requested_chain(&params) {
                    Ok(chain_id) if script.known_chains.contains(&chain_id) => {
                        script.chain_id = chain_id;
                        (Ok(Value::Null), Some(chain_id))
                    }
                    Ok(chain_id) => (
                        Err(RpcError::new(
                            UNRECOGNIZED_CHAIN_CODE,
                            format!("Unrecognized chain ID \"{}\"", chain_id_to_hex(chain_id)),
                        )),
                        None,
                    ),
                    Err(err) => (Err(err), None),
                },
                // wallets switch to a freshly added chain as part of the add flow
                "wallet_addEthereumChain" => match requested_chain(&params) {
                    Ok(chain_id) => {
                        script.known_chains.insert(chain_id);
                        script.chain_id = chain_id;
                        (Ok(Value::Null), Some(chain_id))
                    }
                    Err(err) => (Err(err), None),
                },
                "wallet_revokePermissions" => {
                    script.authorized = false;
                    (Ok(Value::Null), None)
                }
                other => (
                    Err(RpcError::new(
                        METHOD_NOT_FOUND,
                        format!("method {other} is not supported"),
                    )),
                    None,
                ),
            }
        });

        if let Some(chain_id) = emitted_chain {
            self.listeners
                .emit("chainChanged", &Value::String(chain_id_to_hex(chain_id)));
        }
        result
    }

    fn on(&self, event: &str, handler: RawEventHandler) -> ListenerId {
        self.listeners.add(event, handler)
    }

    fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }
}
