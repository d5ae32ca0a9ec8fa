//! The contract's registered wallet list.

use crate::error::NodeError;
use crate::live::LiveValue;
use crate::reader::ContractReader;
use crate::subscription::SubscriptionManager;
use alloy::primitives::Address;
use futures_util::FutureExt;
use tokio::sync::watch;

const LISTENER: &str = "registered-wallets";

/// `getRegisteredUsers()`, replaced wholesale on every Registration or Deregistration log.
pub struct RegisteredWallets {
    live: LiveValue<Vec<Address>>,
}

impl RegisteredWallets {
    pub async fn new(reader: ContractReader, manager: &SubscriptionManager) -> Self {
        let live = LiveValue::<Vec<Address>>::start(
            LISTENER,
            manager,
            Vec::new(),
            Box::new(move || {
                let reader = reader.clone();
                async move { reader.registered_users().await }.boxed()
            }),
        )
        .await;
        Self { live }
    }

    /// Last fetched list, in contract order. Empty until the first read completes.
    pub fn wallets(&self) -> Vec<Address> {
        self.live.current()
    }

    pub fn contains(&self, account: &Address) -> bool {
        self.wallets().contains(account)
    }

    pub async fn refresh(&self) -> Result<Vec<Address>, NodeError> {
        self.live.refresh().await
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Address>> {
        self.live.watch()
    }

    pub fn is_loaded(&self) -> bool {
        self.live.is_loaded()
    }
}
