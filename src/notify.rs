//! Per-chat study notifications.
//!
//! Every subscribed chat has at most one pending timer. Any user event
//! re-arms it from the current store state; when it fires the chat is
//! told how many studies are waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::db::Store;
use crate::error::{Result, StoreError};
use crate::types::{ChatId, Mode};

/// Outbound side of a notification: renders and sends the message.
pub trait Deliver: Send + Sync + 'static {
    fn send_due(&self, chat_id: ChatId, due: usize) -> anyhow::Result<()>;
}

/// Delivery that only logs. Used when no chat platform is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeliver;

impl Deliver for LogDeliver {
    fn send_due(&self, chat_id: ChatId, due: usize) -> anyhow::Result<()> {
        tracing::info!(chat_id, due, "Studies due");
        Ok(())
    }
}

struct Inner {
    store: Arc<Store>,
    deliver: Arc<dyn Deliver>,
    runtime: Handle,
    timers: Mutex<HashMap<ChatId, JoinHandle<()>>>,
}

/// Timer manager for study notifications. Clones share the same timers.
#[derive(Clone)]
pub struct Notifier {
    inner: Option<Arc<Inner>>,
}

impl Notifier {
    /// Create a notifier on the current tokio runtime.
    ///
    /// If the store config has notifications switched off the notifier
    /// is created disabled.
    pub fn new(store: Arc<Store>, deliver: Arc<dyn Deliver>) -> Result<Self> {
        if !store.config().notify {
            return Ok(Self::disabled());
        }
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        Ok(Self {
            inner: Some(Arc::new(Inner {
                store,
                deliver,
                runtime,
                timers: Mutex::new(HashMap::new()),
            })),
        })
    }

    /// A notifier for which every call is a no-op.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Arm timers for every chat active since its last notification.
    /// Returns the number of chats considered.
    pub fn start(&self) -> Result<usize> {
        let Some(inner) = &self.inner else {
            return Ok(0);
        };
        let mut n = 0;
        inner.store.each_active_chat(|chat_id| {
            self.schedule_notify(chat_id);
            n += 1;
        })?;
        tracing::info!(chats = n, "Notifications enabled");
        Ok(n)
    }

    /// Recompute and re-arm the notification timer of a chat.
    ///
    /// Errors are logged, not returned: the chat is simply left without a
    /// timer until its next event.
    pub fn schedule_notify(&self, chat_id: ChatId) {
        let Some(inner) = &self.inner else {
            return;
        };

        match inner.store.is_subscribed(chat_id) {
            Ok(true) => {}
            Ok(false) => {
                self.cancel(chat_id);
                return;
            }
            Err(e) => {
                tracing::error!(chat_id, "Failed to check subscription: {}", e);
                return;
            }
        }

        let next = inner.store.get_notify_time(chat_id);

        let mut timers = inner.timers();
        timers.retain(|_, h| !h.is_finished());
        if let Some(old) = timers.remove(&chat_id) {
            // A timer already firing runs to completion
            old.abort();
        }

        let (wait, due) = match next {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(chat_id, "Failed to get notify time: {}", e);
                return;
            }
        };
        if due == 0 {
            return;
        }

        tracing::info!(chat_id, due, "Notify in {:?}", wait);
        let task = Arc::clone(inner);
        let handle = inner.runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            task.fire(chat_id, due);
        });
        timers.insert(chat_id, handle);
    }

    /// Drop the pending timer of a chat, if any.
    pub fn cancel(&self, chat_id: ChatId) {
        if let Some(inner) = &self.inner {
            if let Some(old) = inner.timers().remove(&chat_id) {
                old.abort();
            }
        }
    }

    /// Drop every pending timer.
    pub fn cancel_all(&self) {
        if let Some(inner) = &self.inner {
            for (_, handle) in inner.timers().drain() {
                handle.abort();
            }
        }
    }

    pub fn is_armed(&self, chat_id: ChatId) -> bool {
        self.inner.as_ref().is_some_and(|inner| {
            inner
                .timers()
                .get(&chat_id)
                .is_some_and(|h| !h.is_finished())
        })
    }

    /// Number of timers that have not fired yet.
    pub fn pending(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| {
            inner.timers().values().filter(|h| !h.is_finished()).count()
        })
    }
}

impl Inner {
    fn timers(&self) -> MutexGuard<'_, HashMap<ChatId, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fire(&self, chat_id: ChatId, due: usize) {
        if let Err(e) = self.store.set_mode(chat_id, Mode::Menu) {
            tracing::error!(chat_id, "Failed to activate menu mode while notifying: {}", e);
        }
        match self.deliver.send_due(chat_id, due) {
            Ok(()) => tracing::info!(chat_id, due, "Notified"),
            Err(e) => tracing::error!(chat_id, "Failed to notify: {}", e),
        }
        // Stops further notifications until the user reads this one
        if let Err(e) = self.store.set_activity(chat_id, self.store.now()) {
            tracing::error!(chat_id, "Failed to record activity: {}", e);
        }
    }
}
