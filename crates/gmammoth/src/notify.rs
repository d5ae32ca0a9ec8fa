//! User-facing notifications.
//!
//! The crate never renders anything itself. It hands [Notification]s to a [Notifier]
//! supplied by the embedding application.

use crate::abi::{format_address, ContractFunction};
use crate::error::ClassifiedError;
use alloy::primitives::Address;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Auto-dismiss for transaction outcome notices.
pub const TX_NOTICE_DISMISS: Duration = Duration::from_millis(3000);
/// Auto-dismiss for incoming message notices.
pub const MESSAGE_DISMISS: Duration = Duration::from_millis(5000);
pub const MESSAGE_TITLE: &str = "gMammoth!";
pub const MESSAGE_ICON: &str = "mammoth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub body: Option<String>,
    pub icon: Option<&'static str>,
    pub auto_dismiss: Duration,
}

impl Notification {
    /// Confirmed transaction.
    pub fn transaction_succeeded(function: &ContractFunction) -> Self {
        let title = match function {
            ContractFunction::Register => "Successfully registered!",
            ContractFunction::Deregister => "Successfully deregistered!",
            ContractFunction::SendGMammoth { .. } => "Successfully sent gMammoth!",
        };
        Self {
            kind: NotificationKind::Success,
            title: title.to_string(),
            body: None,
            icon: None,
            auto_dismiss: TX_NOTICE_DISMISS,
        }
    }

    /// Failed transaction; the classified cause goes in the body.
    pub fn transaction_failed(function: &ContractFunction, error: &ClassifiedError) -> Self {
        let title = match function {
            ContractFunction::Register => "Failed to register. Please try again.",
            ContractFunction::Deregister => "Failed to deregister. Please try again.",
            ContractFunction::SendGMammoth { .. } => "Failed to send gMammoth. Please try again.",
        };
        Self {
            kind: NotificationKind::Error,
            title: title.to_string(),
            body: Some(error.to_string()),
            icon: None,
            auto_dismiss: TX_NOTICE_DISMISS,
        }
    }

    /// Incoming gMammoth from `sender`.
    pub fn message_received(sender: Address) -> Self {
        Self {
            kind: NotificationKind::Message,
            title: MESSAGE_TITLE.to_string(),
            body: Some(format_address(&sender)),
            icon: Some(MESSAGE_ICON),
            auto_dismiss: MESSAGE_DISMISS,
        }
    }
}

/// Presentation boundary.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        match n.kind {
            NotificationKind::Error => {
                tracing::warn!(title = %n.title, body = ?n.body, "notification")
            }
            _ => tracing::info!(title = %n.title, body = ?n.body, "notification"),
        }
    }
}

/// Turns accepted MessageDelivered logs into message notifications.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Called once per delivered message; duplicates produce duplicate notices.
    pub fn on_message_delivered(&self, sender: Address) {
        tracing::debug!(sender = %format_address(&sender), "gMammoth received");
        self.notifier.notify(Notification::message_received(sender));
    }
}
