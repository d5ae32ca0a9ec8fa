//! Boundaries to the ledger node and to the signing wallet.
//!
//! Components take these as `Arc<dyn Node>` / `Arc<dyn Wallet>` so a process shares one
//! connection and tests can substitute fakes.

use crate::error::NodeError;
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;

/// Transaction hash returned by broadcast.
pub type TxHash = B256;

/// Stream of log batches (raw JSON-RPC log objects), in delivery order.
/// Ends when the node side of the subscription is gone.
pub type LogStream = BoxStream<'static, Vec<Value>>;

/// A contract call to dry-run and broadcast on behalf of `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub data: Vec<u8>,
}

/// Outcome of a successful dry run; broadcast submits exactly this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simulation {
    pub request: CallRequest,
    /// Gas estimate attached to the broadcast (None lets the node decide).
    pub gas: Option<u64>,
}

/// Receipt of a transaction that reached the configured confirmation depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub gas_used: Option<u64>,
    pub success: bool,
}

/// Ledger node (JSON-RPC) boundary.
#[async_trait]
pub trait Node: Send + Sync {
    /// Read-only call against the latest state (`eth_call`).
    async fn read_contract(&self, to: Address, calldata: Vec<u8>) -> Result<Vec<u8>, NodeError>;

    /// Dry-run `request` against the latest state.
    async fn simulate(&self, request: CallRequest) -> Result<Simulation, NodeError>;

    /// Submit a simulated call for inclusion.
    async fn broadcast(&self, simulation: &Simulation) -> Result<TxHash, NodeError>;

    /// Suspend until `tx_hash` is included and final.
    async fn wait_for_finality(&self, tx_hash: TxHash) -> Result<TransactionReceipt, NodeError>;

    /// Open a log subscription for `address` filtered by `topic0`. Fails if the node cannot be
    /// reached at open time.
    async fn subscribe_logs(&self, address: Address, topic0: B256) -> Result<LogStream, NodeError>;
}

/// Signing capability (connected wallet).
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Active accounts; empty means nothing is connected.
    async fn accounts(&self) -> Result<Vec<Address>, NodeError>;
}

/// Wallet with a fixed account list (local signer setups, tests).
#[derive(Debug, Clone, Default)]
pub struct StaticWallet {
    accounts: Vec<Address>,
}

impl StaticWallet {
    pub fn new(accounts: Vec<Address>) -> Self {
        Self { accounts }
    }

    pub fn single(account: Address) -> Self {
        Self::new(vec![account])
    }
}

#[async_trait]
impl Wallet for StaticWallet {
    async fn accounts(&self) -> Result<Vec<Address>, NodeError> {
        Ok(self.accounts.clone())
    }
}
