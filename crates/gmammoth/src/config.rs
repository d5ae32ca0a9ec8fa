//! Client configuration.

use alloy::primitives::Address;
use serde::Deserialize;
use std::time::Duration;

/// Astria Flame dawn-1 public RPC.
pub const DEFAULT_HTTP_URL: &str = "https://rpc.flame.dawn-1.astria.org";
/// Astria Flame dawn-1 chain id.
pub const DEFAULT_CHAIN_ID: u64 = 16_604_737_732_183;

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP RPC URL (eth_call, eth_sendTransaction, receipts, eth_getLogs polling).
    pub http_url: String,
    /// WebSocket RPC URL for live log subscriptions. Falls back to eth_getLogs polling when unset.
    pub ws_url: Option<String>,
    /// gMammoth contract address.
    pub contract_address: Address,
    /// Chain the node must report (`eth_chainId`) before a transaction is broadcast.
    pub chain_id: u64,
    /// Blocks required on top of the inclusion block before a transaction counts as final.
    pub confirmations: u64,
    /// Receipt and log polling interval.
    pub poll_interval_ms: u64,
    /// Max block range per eth_getLogs request.
    pub getlogs_max_range: u64,
    pub transport: TransportConfig,
    /// WebSocket reconnection backoff.
    pub reconnection: ReconnectionConfig,
}

impl ClientConfig {
    pub fn new(http_url: impl Into<String>, contract_address: Address) -> Self {
        Self {
            http_url: http_url.into(),
            contract_address,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            http_url: DEFAULT_HTTP_URL.to_string(),
            ws_url: None,
            contract_address: Address::ZERO,
            chain_id: DEFAULT_CHAIN_ID,
            confirmations: 0,
            poll_interval_ms: 1000,
            getlogs_max_range: 1000,
            transport: TransportConfig::default(),
            reconnection: ReconnectionConfig::default(),
        }
    }
}

/// Bounded retry for transport-level failures (connect, timeout). JSON-RPC errors are not retried.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub timeout_secs: u64,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry_count: 3,
            retry_delay_ms: 1000,
        }
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
        }
    }
}

impl ReconnectionConfig {
    /// Backoff before reconnect attempt `attempt` (0-based): doubles from the initial value, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self
            .initial_backoff_secs
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }
}
