//! A contract-derived value kept fresh by refetching on registry events.
//!
//! The value is read once on construction, then re-read whenever a Registration or
//! Deregistration log for any account is observed. Reads are serialized through a gate and
//! event wake-ups are coalesced through a [Notify] permit, so the published value always
//! converges to a read started after the most recent event.

use crate::error::NodeError;
use crate::subscription::{Interest, SubscriptionHandle, SubscriptionManager};
use futures_util::future::BoxFuture;
use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;

pub(crate) type FetchFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T, NodeError>> + Send + Sync>;

struct Shared<T> {
    listener: Cow<'static, str>,
    value: watch::Sender<T>,
    loaded: AtomicBool,
    gate: Mutex<()>,
    wake: Notify,
    fetch: FetchFn<T>,
}

impl<T> Shared<T>
where
    T: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    async fn refresh(&self) -> Result<T, NodeError> {
        let _gate = self.gate.lock().await;
        match (self.fetch)().await {
            Ok(fresh) => {
                let changed = self.value.send_if_modified(|current| {
                    if *current == fresh {
                        false
                    } else {
                        *current = fresh.clone();
                        true
                    }
                });
                if changed {
                    tracing::info!(listener = %self.listener, value = ?fresh, "value changed");
                } else {
                    tracing::debug!(listener = %self.listener, "value unchanged");
                }
                self.loaded.store(true, Ordering::Release);
                Ok(fresh)
            }
            Err(e) => {
                tracing::warn!(listener = %self.listener, reason = %e, "refresh failed; keeping previous value");
                Err(e)
            }
        }
    }
}

async fn refresh_loop<T>(shared: Arc<Shared<T>>)
where
    T: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    loop {
        shared.wake.notified().await;
        // Failures are logged inside refresh; the next event retries.
        let _ = shared.refresh().await;
    }
}

/// Owns the value, its refresher task and its two registry subscriptions. Dropping it
/// closes the subscriptions and stops the refresher.
pub(crate) struct LiveValue<T> {
    shared: Arc<Shared<T>>,
    refresher: JoinHandle<()>,
    _subscriptions: [SubscriptionHandle; 2],
}

impl<T> LiveValue<T>
where
    T: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    pub(crate) async fn start(
        listener: impl Into<Cow<'static, str>>,
        manager: &SubscriptionManager,
        initial: T,
        fetch: FetchFn<T>,
    ) -> Self {
        let (value, _) = watch::channel(initial);
        let shared = Arc::new(Shared {
            listener: listener.into(),
            value,
            loaded: AtomicBool::new(false),
            gate: Mutex::new(()),
            wake: Notify::new(),
            fetch,
        });

        let _ = shared.refresh().await;

        let refresher = tokio::spawn(refresh_loop(Arc::clone(&shared)));
        let registered = Self::wake_on(&shared, manager, Interest::Registration).await;
        let deregistered = Self::wake_on(&shared, manager, Interest::Deregistration).await;

        Self {
            shared,
            refresher,
            _subscriptions: [registered, deregistered],
        }
    }

    async fn wake_on(
        shared: &Arc<Shared<T>>,
        manager: &SubscriptionManager,
        interest: Interest,
    ) -> SubscriptionHandle {
        let target = Arc::clone(shared);
        manager
            .open(shared.listener.clone(), interest, move |_| target.wake.notify_one())
            .await
    }

    pub(crate) fn current(&self) -> T {
        self.shared.value.borrow().clone()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<T> {
        self.shared.value.subscribe()
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::Acquire)
    }

    pub(crate) async fn refresh(&self) -> Result<T, NodeError> {
        self.shared.refresh().await
    }
}

impl<T> Drop for LiveValue<T> {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}
