//! Off-chain gMammoth client: safe contract calls, confirmation tracking and live event
//! subscriptions for the gMammoth registry contract.
//!
//! - **TransactionSubmitter**: simulate, then broadcast, then wait for the configured
//!   confirmation depth ([ConfirmationDepth]). Failures are classified ([classify]) and every
//!   submit ends with exactly one [Notification].
//! - **SubscriptionManager**: one task per subscription over a WebSocket `eth_subscribe` or
//!   `eth_getLogs` polling stream; subscriptions are keyed, so reopening replaces.
//! - **RegistrationStatusCache** / **RegisteredWallets**: contract reads refetched on every
//!   Registration or Deregistration log.
//! - **Session**: ties the above to one connected account.

pub mod abi;
pub mod config;
pub mod cursor;
pub mod error;
mod live;
pub mod node;
pub mod notify;
pub mod reader;
pub mod rpc;
pub mod session;
pub mod status;
pub mod submitter;
pub mod subscription;
pub mod wallets;

pub use abi::{ContractEvent, ContractFunction, EventCategory, RawLog};
pub use config::{ClientConfig, ReconnectionConfig, TransportConfig};
pub use cursor::Cursor;
pub use error::{classify, ClassifiedError, ErrorKind, NodeError};
pub use node::{
    CallRequest, LogStream, Node, Simulation, StaticWallet, TransactionReceipt, TxHash, Wallet,
};
pub use notify::{Notification, NotificationDispatcher, NotificationKind, Notifier, TracingNotifier};
pub use reader::ContractReader;
pub use rpc::{ConfirmationDepth, FinalityStrategy, JsonRpcNode, RpcClient, RpcWallet};
pub use session::{Session, SessionDeps, SessionView};
pub use status::RegistrationStatusCache;
pub use submitter::TransactionSubmitter;
pub use subscription::{Interest, SubscriptionHandle, SubscriptionKey, SubscriptionManager};
pub use wallets::RegisteredWallets;
