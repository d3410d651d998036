//! Per-network chain parameters.

use serde::{Deserialize, Serialize};

/// Network type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

/// Network-specific configuration.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub network: Network,
    /// Maximum participants per mixing session.
    pub pool_max_participants: usize,
    /// Minimum peer protocol version for mixing messages.
    pub min_mixing_proto_version: u32,
    /// Prefix hashed into every signed protocol message.
    pub message_magic: &'static str,
    pub p2p_port: u16,
    pub rpc_port: u16,
}

pub static MAINNET_PARAMS: ChainParams = ChainParams {
    network: Network::Mainnet,
    pool_max_participants: 3,
    min_mixing_proto_version: 70208,
    message_magic: "Umbra Signed Message:\n",
    p2p_port: 9788,
    rpc_port: 9789,
};

pub static TESTNET_PARAMS: ChainParams = ChainParams {
    network: Network::Testnet,
    pool_max_participants: 3,
    min_mixing_proto_version: 70208,
    message_magic: "Umbra Signed Message:\n",
    p2p_port: 19788,
    rpc_port: 19789,
};

pub static REGTEST_PARAMS: ChainParams = ChainParams {
    network: Network::Regtest,
    pool_max_participants: 3,
    min_mixing_proto_version: 70208,
    message_magic: "Umbra Signed Message:\n",
    p2p_port: 29788,
    rpc_port: 29789,
};

/// Get the chain parameters for a given network.
pub fn chain_params(network: Network) -> &'static ChainParams {
    match network {
        Network::Mainnet => &MAINNET_PARAMS,
        Network::Testnet => &TESTNET_PARAMS,
        Network::Regtest => &REGTEST_PARAMS,
    }
}
