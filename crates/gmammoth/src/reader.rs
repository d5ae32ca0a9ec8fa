//! Read-only contract views.

use crate::abi;
use crate::error::NodeError;
use crate::node::Node;
use alloy::primitives::Address;
use std::sync::Arc;

/// Typed `eth_call` wrapper for the contract's view functions.
#[derive(Clone)]
pub struct ContractReader {
    node: Arc<dyn Node>,
    contract: Address,
}

impl ContractReader {
    pub fn new(node: Arc<dyn Node>, contract: Address) -> Self {
        Self { node, contract }
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    /// `isRegistered(account)` at the latest block.
    pub async fn is_registered(&self, account: Address) -> Result<bool, NodeError> {
        let data = self
            .node
            .read_contract(self.contract, abi::is_registered_calldata(account))
            .await?;
        Ok(abi::decode_is_registered_return(&data)?)
    }

    /// `getRegisteredUsers()` at the latest block, in contract order.
    pub async fn registered_users(&self) -> Result<Vec<Address>, NodeError> {
        let data = self
            .node
            .read_contract(self.contract, abi::registered_users_calldata())
            .await?;
        Ok(abi::decode_registered_users_return(&data)?)
    }
}
