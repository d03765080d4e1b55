//! # Configuration Constants
//!
//! Configuration values used throughout the Satlock escrow system,
//! overridable through environment variables where noted.

/// Network and chain-API configuration
pub mod network {
    use std::time::Duration;

    /// Default Esplora-style chain API base URL (Mutinynet signet)
    pub const DEFAULT_API_BASE: &str = "https://mutinynet.com/api";

    /// Request timeout for chain API operations
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    /// Interval between lifecycle poll cycles
    pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
}

/// Escrow economic parameters
pub mod escrow {
    /// Minimum output value in satoshis. Unlock transactions whose
    /// output would fall below this after fees are rejected rather
    /// than silently under-funded.
    pub const DUST_LIMIT_SATS: u64 = 546;

    /// Default fee rate in sat/vB for unlock transactions when the
    /// caller does not supply one.
    pub const DEFAULT_FEE_RATE: u64 = 2;
}

/// File paths and names
pub mod files {
    /// Default escrow record store file
    pub const DEFAULT_STORE_PATH: &str = "escrows.json";
}

/// Environment variable names
pub mod env {
    /// Chain API base URL override
    pub const API_BASE: &str = "SATLOCK_API_BASE";

    /// Network selection override (mainnet/testnet/signet/regtest)
    pub const NETWORK: &str = "SATLOCK_NETWORK";

    /// Record store path override
    pub const STORE_PATH: &str = "SATLOCK_STORE";
}

use crate::error::{EscrowError, EscrowResult};
use bitcoin::Network;

/// Resolve the configured network from the environment, defaulting to
/// Signet (Mutinynet parameters).
pub fn configured_network() -> EscrowResult<Network> {
    dotenv::dotenv().ok();
    match std::env::var(env::NETWORK) {
        Ok(name) => match name.to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
            "testnet" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            other => Err(EscrowError::operation(
                "configured_network",
                format!("unknown network '{other}'"),
            )),
        },
        Err(_) => Ok(Network::Signet),
    }
}

/// Resolve the chain API base URL from the environment or the default.
pub fn configured_api_base() -> String {
    dotenv::dotenv().ok();
    std::env::var(env::API_BASE).unwrap_or_else(|_| network::DEFAULT_API_BASE.to_string())
}

/// Resolve the record store path from the environment or the default.
pub fn configured_store_path() -> String {
    dotenv::dotenv().ok();
    std::env::var(env::STORE_PATH).unwrap_or_else(|_| files::DEFAULT_STORE_PATH.to_string())
}
