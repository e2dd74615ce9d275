use serde::{Deserialize, Serialize};

/// Network metadata as exposed in `WalletState`. Always derived from a chain id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub name: String,
    pub chain_id: u64,
    pub is_supported: bool,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeCurrency {
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
}

/// Static chain definition, including what a wallet needs to add the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkDefinition {
    pub chain_id: u64,
    pub name: &'static str,
    pub is_testnet: bool,
    pub native_currency: NativeCurrency,
    pub rpc_urls: &'static [&'static str],
    pub block_explorer_urls: &'static [&'static str],
}

impl NetworkDefinition {
    pub fn info(&self) -> NetworkInfo {
        NetworkInfo {
            name: self.name.to_owned(),
            chain_id: self.chain_id,
            is_supported: true,
            is_testnet: self.is_testnet,
        }
    }

    pub fn chain_id_hex(&self) -> String {
        chain_id_to_hex(self.chain_id)
    }
}

const ETH: NativeCurrency = NativeCurrency {
    name: "Ether",
    symbol: "ETH",
    decimals: 18,
};

pub const SUPPORTED_NETWORKS: &[NetworkDefinition] = &[
    NetworkDefinition {
        chain_id: 1,
        name: "Ethereum",
        is_testnet: false,
        native_currency: ETH,
        rpc_urls: &["https://eth.llamarpc.com"],
        block_explorer_urls: &["https://etherscan.io"],
    },
    NetworkDefinition {
        chain_id: 10,
        name: "Optimism",
        is_testnet: false,
        native_currency: ETH,
        rpc_urls: &["https://mainnet.optimism.io"],
        block_explorer_urls: &["https://optimistic.etherscan.io"],
    },
    NetworkDefinition {
        chain_id: 56,
        name: "BNB Smart Chain",
        is_testnet: false,
        native_currency: NativeCurrency {
            name: "BNB",
            symbol: "BNB",
            decimals: 18,
        },
        rpc_urls: &["https://bsc-dataseed.binance.org"],
        block_explorer_urls: &["https://bscscan.com"],
    },
    NetworkDefinition {
        chain_id: 137,
        name: "Polygon",
        is_testnet: false,
        native_currency: NativeCurrency {
            name: "POL",
            symbol: "POL",
            decimals: 18,
        },
        rpc_urls: &["https://polygon-rpc.com"],
        block_explorer_urls: &["https://polygonscan.com"],
    },
    NetworkDefinition {
        chain_id: 8453,
        name: "Base",
        is_testnet: false,
        native_currency: ETH,
        rpc_urls: &["https://mainnet.base.org"],
        block_explorer_urls: &["https://basescan.org"],
    },
    NetworkDefinition {
        chain_id: 42161,
        name: "Arbitrum",
        is_testnet: false,
        native_currency: ETH,
        rpc_urls: &["https://arb1.arbitrum.io/rpc"],
        block_explorer_urls: &["https://arbiscan.io"],
    },
    NetworkDefinition {
        chain_id: 11155111,
        name: "Sepolia",
        is_testnet: true,
        native_currency: NativeCurrency {
            name: "Sepolia Ether",
            symbol: "ETH",
            decimals: 18,
        },
        rpc_urls: &["https://rpc.sepolia.org"],
        block_explorer_urls: &["https://sepolia.etherscan.io"],
    },
    NetworkDefinition {
        chain_id: 421614,
        name: "Arbitrum Sepolia",
        is_testnet: true,
        native_currency: ETH,
        rpc_urls: &["https://sepolia-rollup.arbitrum.io/rpc"],
        block_explorer_urls: &["https://sepolia.arbiscan.io"],
    },
];

pub fn network_definition(chain_id: u64) -> Option<&'static NetworkDefinition> {
    SUPPORTED_NETWORKS
        .iter()
        .find(|network| network.chain_id == chain_id)
}

pub fn network_info(chain_id: u64) -> Option<NetworkInfo> {
    network_definition(chain_id).map(NetworkDefinition::info)
}

pub fn chain_id_to_hex(chain_id: u64) -> String {
    format!("0x{chain_id:x}")
}
