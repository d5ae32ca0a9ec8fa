//! Submitting state-changing contract calls: simulate, broadcast, wait for finality.
//!
//! Every `submit` ends with exactly one notification, success or failure. Dropping the
//! `submit` future abandons the local wait; nothing is notified afterwards, although an
//! already broadcast transaction may still land.

use crate::abi::{format_address, ContractFunction};
use crate::error::{classify, ClassifiedError, ErrorKind, NodeError};
use crate::node::{CallRequest, Node, TransactionReceipt, Wallet};
use crate::notify::{Notification, Notifier};
use alloy::primitives::Address;
use std::sync::Arc;

#[derive(Clone)]
pub struct TransactionSubmitter {
    node: Arc<dyn Node>,
    wallet: Option<Arc<dyn Wallet>>,
    notifier: Arc<dyn Notifier>,
    contract: Address,
}

impl TransactionSubmitter {
    pub fn new(
        node: Arc<dyn Node>,
        wallet: Option<Arc<dyn Wallet>>,
        notifier: Arc<dyn Notifier>,
        contract: Address,
    ) -> Self {
        Self {
            node,
            wallet,
            notifier,
            contract,
        }
    }

    pub async fn register(&self) -> Result<TransactionReceipt, ClassifiedError> {
        self.submit(ContractFunction::Register).await
    }

    pub async fn deregister(&self) -> Result<TransactionReceipt, ClassifiedError> {
        self.submit(ContractFunction::Deregister).await
    }

    pub async fn send_gmammoth(&self, to: Address) -> Result<TransactionReceipt, ClassifiedError> {
        self.submit(ContractFunction::SendGMammoth { to }).await
    }

    /// Run `function` to finality as the wallet's active account.
    pub async fn submit(
        &self,
        function: ContractFunction,
    ) -> Result<TransactionReceipt, ClassifiedError> {
        let result = self.execute(&function).await;
        match &result {
            Ok(receipt) => {
                tracing::info!(
                    function = function.name(),
                    tx = %receipt.tx_hash,
                    block = receipt.block_number,
                    "transaction confirmed"
                );
                self.notifier
                    .notify(Notification::transaction_succeeded(&function));
            }
            Err(e) => {
                tracing::warn!(function = function.name(), reason = %e, "transaction failed");
                self.notifier
                    .notify(Notification::transaction_failed(&function, e));
            }
        }
        result
    }

    async fn execute(
        &self,
        function: &ContractFunction,
    ) -> Result<TransactionReceipt, ClassifiedError> {
        let from = self.active_account().await?;
        let request = CallRequest {
            from,
            to: self.contract,
            data: function.calldata(),
        };

        tracing::debug!(function = function.name(), from = %format_address(&from), "simulating");
        let simulation = self
            .node
            .simulate(request)
            .await
            .map_err(|e| classify(&simulation_failure(e)))?;

        let tx_hash = self
            .node
            .broadcast(&simulation)
            .await
            .map_err(|e| classify(&e))?;
        tracing::info!(function = function.name(), tx = %tx_hash, "transaction broadcast");

        let receipt = self
            .node
            .wait_for_finality(tx_hash)
            .await
            .map_err(|e| classify(&e))?;
        if !receipt.success {
            return Err(classify(&NodeError::Reverted(receipt.tx_hash)));
        }
        Ok(receipt)
    }

    async fn active_account(&self) -> Result<Address, ClassifiedError> {
        let wallet = self
            .wallet
            .as_ref()
            .ok_or_else(ClassifiedError::wallet_not_connected)?;
        match wallet.accounts().await {
            Ok(accounts) => accounts
                .first()
                .copied()
                .ok_or_else(ClassifiedError::wallet_not_connected),
            Err(e) => Err(ClassifiedError {
                kind: ErrorKind::WalletNotConnected,
                detail: Some(e.to_string()),
                source: Some(e),
            }),
        }
    }
}

/// Errors out of `simulate` are simulation failures, except transport failures, which stay
/// network errors.
fn simulation_failure(e: NodeError) -> NodeError {
    match e {
        NodeError::Transport(_) | NodeError::Simulation(_) => e,
        other => NodeError::Simulation(Box::new(other)),
    }
}
