//! A connected account: registration status, the registered wallet list, message
//! notifications and transaction submission, torn down together on disconnect.

use crate::abi::{format_address, ContractEvent};
use crate::error::ClassifiedError;
use crate::node::{Node, TransactionReceipt, Wallet};
use crate::notify::{NotificationDispatcher, Notifier};
use crate::reader::ContractReader;
use crate::status::RegistrationStatusCache;
use crate::submitter::TransactionSubmitter;
use crate::subscription::{Interest, SubscriptionHandle, SubscriptionManager};
use crate::wallets::RegisteredWallets;
use alloy::primitives::Address;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const INBOX_LISTENER: &str = "inbox";

/// Collaborators a session is built from.
#[derive(Clone)]
pub struct SessionDeps {
    pub node: Arc<dyn Node>,
    pub wallet: Option<Arc<dyn Wallet>>,
    pub notifier: Arc<dyn Notifier>,
    pub contract: Address,
}

/// What the account should be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionView {
    /// Not registered: offer registration.
    Unregistered,
    /// Registered: show the registered wallets to send to.
    Registered { wallets: Vec<Address> },
}

pub struct Session {
    account: Address,
    manager: SubscriptionManager,
    status: RegistrationStatusCache,
    wallets: RegisteredWallets,
    submitter: TransactionSubmitter,
    inbox: JoinHandle<()>,
}

impl Session {
    /// Load status and wallet list for `account` and start following the registry.
    /// Incoming gMammoths are notified while the account is registered.
    pub async fn connect(account: Address, deps: SessionDeps) -> Self {
        let SessionDeps {
            node,
            wallet,
            notifier,
            contract,
        } = deps;
        let manager = SubscriptionManager::new(Arc::clone(&node), contract);
        let reader = ContractReader::new(Arc::clone(&node), contract);
        let status = RegistrationStatusCache::new(account, reader.clone(), &manager).await;
        let wallets = RegisteredWallets::new(reader, &manager).await;
        let submitter = TransactionSubmitter::new(node, wallet, Arc::clone(&notifier), contract);
        let inbox = tokio::spawn(follow_registration(
            status.watch(),
            manager.clone(),
            NotificationDispatcher::new(notifier),
            account,
        ));
        tracing::info!(
            account = %format_address(&account),
            registered = status.current_status(),
            "session connected"
        );
        Self {
            account,
            manager,
            status,
            wallets,
            submitter,
            inbox,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn view(&self) -> SessionView {
        if self.status.current_status() {
            SessionView::Registered {
                wallets: self.wallets.wallets(),
            }
        } else {
            SessionView::Unregistered
        }
    }

    pub fn status(&self) -> &RegistrationStatusCache {
        &self.status
    }

    pub fn wallets(&self) -> &RegisteredWallets {
        &self.wallets
    }

    /// Whether incoming gMammoths are currently being followed.
    pub fn inbox_open(&self) -> bool {
        self.manager
            .is_open(INBOX_LISTENER, Interest::message_delivered(self.account))
    }

    pub async fn register(&self) -> Result<TransactionReceipt, ClassifiedError> {
        self.submitter.register().await
    }

    pub async fn deregister(&self) -> Result<TransactionReceipt, ClassifiedError> {
        self.submitter.deregister().await
    }

    pub async fn send_gmammoth(&self, to: Address) -> Result<TransactionReceipt, ClassifiedError> {
        self.submitter.send_gmammoth(to).await
    }

    /// Close every subscription and stop background work.
    pub fn disconnect(self) {
        drop(self);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inbox.abort();
        tracing::info!(account = %format_address(&self.account), "session disconnected");
    }
}

/// Keep the inbox subscription open exactly while `status` says registered.
async fn follow_registration(
    mut status: watch::Receiver<bool>,
    manager: SubscriptionManager,
    dispatcher: NotificationDispatcher,
    account: Address,
) {
    let mut inbox: Option<SubscriptionHandle> = None;
    loop {
        let registered = *status.borrow_and_update();
        match (registered, inbox.is_some()) {
            (true, false) => {
                let dispatcher = dispatcher.clone();
                let handle = manager
                    .open(
                        INBOX_LISTENER,
                        Interest::message_delivered(account),
                        move |event| {
                            if let ContractEvent::MessageDelivered { from, .. } = event {
                                dispatcher.on_message_delivered(from);
                            }
                        },
                    )
                    .await;
                inbox = Some(handle);
            }
            (false, true) => {
                tracing::info!(account = %format_address(&account), "closing inbox");
                inbox = None;
            }
            _ => {}
        }
        if status.changed().await.is_err() {
            break;
        }
    }
}
