//! Registration status of one account.

use crate::abi::format_address;
use crate::error::NodeError;
use crate::live::LiveValue;
use crate::reader::ContractReader;
use crate::subscription::SubscriptionManager;
use alloy::primitives::Address;
use futures_util::FutureExt;
use tokio::sync::watch;

/// Last observed `isRegistered(account)`, refetched whenever any account registers or
/// deregisters. Dropping the cache closes its subscriptions.
pub struct RegistrationStatusCache {
    account: Address,
    live: LiveValue<bool>,
}

impl RegistrationStatusCache {
    /// Read the status once, then follow Registration and Deregistration logs.
    pub async fn new(
        account: Address,
        reader: ContractReader,
        manager: &SubscriptionManager,
    ) -> Self {
        let listener = format!("registration-status:{}", format_address(&account));
        let live = LiveValue::<bool>::start(
            listener,
            manager,
            false,
            Box::new(move || {
                let reader = reader.clone();
                async move { reader.is_registered(account).await }.boxed()
            }),
        )
        .await;
        Self { account, live }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// Last observed status; `false` until the first read completes.
    pub fn current_status(&self) -> bool {
        self.live.current()
    }

    /// Read the status now and publish it. On failure the previous value is kept.
    pub async fn refresh(&self) -> Result<bool, NodeError> {
        self.live.refresh().await
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.live.watch()
    }

    /// Whether at least one read has succeeded.
    pub fn is_loaded(&self) -> bool {
        self.live.is_loaded()
    }
}
