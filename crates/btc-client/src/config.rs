//! Connection settings for a `bitcoind` node.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for [`BitcoinCoreClient`](crate::BitcoinCoreClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtcClientConfig {
    /// RPC endpoint, including the wallet path if the federation address is watched by a
    /// non-default wallet.
    pub url: String,

    /// RPC user.
    pub user: String,

    /// RPC password.
    pub pass: String,

    /// Upper bound in milliseconds for any single chain call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_timeout_ms() -> u64 {
    30_000
}

impl BtcClientConfig {
    /// The per-call timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
