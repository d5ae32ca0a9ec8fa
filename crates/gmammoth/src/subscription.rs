//! Contract event subscriptions.
//!
//! [SubscriptionManager::open] registers interest in one event category and delivers each
//! matching log to a callback, from a dedicated task per subscription. Subscriptions are keyed
//! by (listener, interest): opening an already-open key cancels the previous subscription
//! before the new one starts, so re-entering the owning scope never stacks callbacks.
//!
//! Opening never fails from the caller's point of view. If the node cannot be reached, the
//! failure is logged and a no-op [SubscriptionHandle] is returned.

use crate::abi::{decode_event, decode_raw_log, ContractEvent, EventCategory};
use crate::node::{LogStream, Node};
use alloy::primitives::Address;
use futures_util::StreamExt;
use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

/// What a subscription listens for. MessageDelivered always carries its recipient predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Registration,
    Deregistration,
    /// `GMammothSent` logs whose `to` equals `recipient`.
    MessageDelivered { recipient: Address },
}

impl Interest {
    pub fn message_delivered(recipient: Address) -> Self {
        Interest::MessageDelivered { recipient }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            Interest::Registration => EventCategory::Registration,
            Interest::Deregistration => EventCategory::Deregistration,
            Interest::MessageDelivered { .. } => EventCategory::MessageDelivered,
        }
    }

    /// Address equality is byte equality, so hex case never matters here.
    fn accepts(&self, event: &ContractEvent) -> bool {
        match (self, event) {
            (Interest::Registration, ContractEvent::Registered) => true,
            (Interest::Deregistration, ContractEvent::Deregistered) => true,
            (Interest::MessageDelivered { recipient }, ContractEvent::MessageDelivered { to, .. }) => {
                to == recipient
            }
            _ => false,
        }
    }
}

/// Identity of a subscription: who listens (`listener`) and for what.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub listener: Cow<'static, str>,
    pub interest: Interest,
}

struct Entry {
    id: u64,
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Entry {
    fn cancel(self) {
        self.active.store(false, Ordering::Release);
        self.task.abort();
    }
}

type Registry = Arc<Mutex<HashMap<SubscriptionKey, Entry>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<SubscriptionKey, Entry>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove `key` only if it still belongs to subscription `id` (a replacement keeps its entry).
fn remove_entry(registry: &Registry, key: &SubscriptionKey, id: u64) -> Option<Entry> {
    let mut map = lock(registry);
    match map.get(key) {
        Some(entry) if entry.id == id => map.remove(key),
        _ => None,
    }
}

/// Opens and tracks contract event subscriptions against one node.
#[derive(Clone)]
pub struct SubscriptionManager {
    node: Arc<dyn Node>,
    contract: Address,
    registry: Registry,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionManager {
    pub fn new(node: Arc<dyn Node>, contract: Address) -> Self {
        Self {
            node,
            contract,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a subscription for `interest` on behalf of `listener`, replacing any subscription
    /// already open under the same key. `callback` runs once per accepted log, in log order.
    pub async fn open<F>(
        &self,
        listener: impl Into<Cow<'static, str>>,
        interest: Interest,
        callback: F,
    ) -> SubscriptionHandle
    where
        F: FnMut(ContractEvent) + Send + 'static,
    {
        let key = SubscriptionKey {
            listener: listener.into(),
            interest,
        };
        if let Some(prev) = lock(&self.registry).remove(&key) {
            tracing::info!(listener = %key.listener, ?interest, "replacing open subscription");
            prev.cancel();
        }

        let category = interest.category();
        let stream = match self.node.subscribe_logs(self.contract, category.topic0()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    listener = %key.listener,
                    event = category.event_name(),
                    reason = %e,
                    "failed to open event subscription"
                );
                return SubscriptionHandle::noop();
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        {
            // Spawn under the lock so a stream that ends at once cannot remove its entry
            // before it is inserted.
            let mut map = lock(&self.registry);
            let task = tokio::spawn(deliver(
                stream,
                key.clone(),
                Box::new(callback),
                Arc::clone(&active),
                Arc::clone(&self.registry),
                id,
            ));
            let entry = Entry {
                id,
                active: Arc::clone(&active),
                task,
            };
            if let Some(prev) = map.insert(key.clone(), entry) {
                prev.cancel();
            }
        }
        tracing::info!(listener = %key.listener, event = category.event_name(), "event subscription opened");

        SubscriptionHandle {
            inner: Some(HandleInner {
                key,
                id,
                active,
                registry: Arc::clone(&self.registry),
            }),
        }
    }

    /// Number of subscriptions currently delivering.
    pub fn active_count(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn is_open(&self, listener: &str, interest: Interest) -> bool {
        let key = SubscriptionKey {
            listener: Cow::Owned(listener.to_string()),
            interest,
        };
        lock(&self.registry).contains_key(&key)
    }
}

async fn deliver(
    mut stream: LogStream,
    key: SubscriptionKey,
    mut callback: Box<dyn FnMut(ContractEvent) + Send>,
    active: Arc<AtomicBool>,
    registry: Registry,
    id: u64,
) {
    let category = key.interest.category();
    let topic0 = category.topic0();
    while let Some(batch) = stream.next().await {
        tracing::debug!(listener = %key.listener, count = batch.len(), "log batch received");
        for log in &batch {
            if !active.load(Ordering::Acquire) {
                return;
            }
            let raw = match decode_raw_log(log) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(listener = %key.listener, reason = %e, "skipping malformed log");
                    continue;
                }
            };
            if raw.topic0() != Some(topic0) {
                continue;
            }
            let event = match decode_event(category, &raw) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(
                        listener = %key.listener,
                        event = category.event_name(),
                        reason = %e,
                        "skipping undecodable log"
                    );
                    continue;
                }
            };
            if !key.interest.accepts(&event) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(listener = %key.listener, "subscription callback panicked");
            }
        }
    }
    tracing::info!(listener = %key.listener, event = category.event_name(), "log stream ended");
    if active.swap(false, Ordering::AcqRel) {
        remove_entry(&registry, &key, id);
    }
}

struct HandleInner {
    key: SubscriptionKey,
    id: u64,
    active: Arc<AtomicBool>,
    registry: Registry,
}

/// Cancellation handle for one subscription. Cancelling is idempotent and dropping the
/// handle cancels.
#[must_use = "dropping the handle closes the subscription"]
pub struct SubscriptionHandle {
    inner: Option<HandleInner>,
}

impl SubscriptionHandle {
    /// Handle for a subscription that never opened.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Whether callbacks may still fire.
    pub fn is_active(&self) -> bool {
        self.inner
            .as_ref()
            .map(|i| i.active.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Stop further callbacks. Safe to call any number of times, and after the stream ended.
    pub fn cancel(&self) {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return,
        };
        if !inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(entry) = remove_entry(&inner.registry, &inner.key, inner.id) {
            entry.task.abort();
        }
        tracing::debug!(listener = %inner.key.listener, "event subscription closed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("SubscriptionHandle")
                .field("key", &inner.key)
                .field("active", &inner.active.load(Ordering::Acquire))
                .finish(),
            None => f.write_str("SubscriptionHandle(noop)"),
        }
    }
}
