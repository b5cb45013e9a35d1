use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use studyroom_types::{RowEvent, SubscriptionKey};

/// Runs once when a subscription closes, with the number of subscriptions
/// still open for the same key.
pub type ReleaseHook = Box<dyn FnOnce(&SubscriptionKey, usize) + Send>;

/// Fans row events out to the subscriptions registered for their key.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// key -> (subscription id -> sender)
    subscribers: RwLock<HashMap<SubscriptionKey, HashMap<Uuid, mpsc::UnboundedSender<RowEvent>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a subscription for `key`. Events published after this call are delivered to it.
    pub fn subscribe(&self, key: SubscriptionKey) -> Subscription {
        self.subscribe_with_release(key, None)
    }

    pub fn subscribe_with_release(
        &self,
        key: SubscriptionKey,
        release: Option<ReleaseHook>,
    ) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.subscribers.write() {
            Ok(mut subscribers) => {
                subscribers.entry(key.clone()).or_default().insert(id, tx);
            }
            Err(e) => warn!("Subscriber table lock poisoned: {}", e),
        }
        debug!("Opened subscription {} for {}", id, key);

        Subscription {
            registration: Arc::new(Registration {
                id,
                key,
                hub: self.clone(),
                closed: AtomicBool::new(false),
                release: Mutex::new(release),
            }),
            rx,
        }
    }

    /// Deliver `event` to every open subscription for its key. Returns the delivery count.
    pub fn publish(&self, event: RowEvent) -> usize {
        let Ok(subscribers) = self.inner.subscribers.read() else {
            return 0;
        };
        let Some(targets) = subscribers.get(&event.key) else {
            return 0;
        };
        targets
            .values()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Number of open subscriptions for `key`.
    pub fn active(&self, key: &SubscriptionKey) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subscribers| subscribers.get(key).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    /// Total open subscriptions across all keys.
    pub fn total_active(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subscribers| subscribers.values().map(HashMap::len).sum())
            .unwrap_or(0)
    }

    /// Remove one subscription. Returns how many remain for the key.
    fn unregister(&self, key: &SubscriptionKey, id: Uuid) -> usize {
        let Ok(mut subscribers) = self.inner.subscribers.write() else {
            return 0;
        };
        let Some(targets) = subscribers.get_mut(key) else {
            return 0;
        };
        targets.remove(&id);
        let remaining = targets.len();
        if remaining == 0 {
            subscribers.remove(key);
        }
        remaining
    }
}

struct Registration {
    id: Uuid,
    key: SubscriptionKey,
    hub: Dispatcher,
    closed: AtomicBool,
    release: Mutex<Option<ReleaseHook>>,
}

impl Registration {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Unregister before returning so nothing is published to us afterwards.
        let remaining = self.hub.unregister(&self.key, self.id);
        debug!("Closed subscription {} for {} ({} left)", self.id, self.key, remaining);

        let hook = self.release.lock().ok().and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook(&self.key, remaining);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A live push subscription. Closing it, explicitly or by dropping it, stops
/// delivery immediately: no event is yielded after close, even one already queued.
pub struct Subscription {
    registration: Arc<Registration>,
    rx: mpsc::UnboundedReceiver<RowEvent>,
}

impl Subscription {
    pub fn key(&self) -> &SubscriptionKey {
        &self.registration.key
    }

    /// Next event, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<RowEvent> {
        if self.registration.is_closed() {
            return None;
        }
        let event = self.rx.recv().await?;
        if self.registration.is_closed() {
            return None;
        }
        Some(event)
    }

    /// Handle that can close this subscription from elsewhere, e.g. while
    /// another task is parked in [`Subscription::recv`].
    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle {
            registration: self.registration.clone(),
        }
    }

    pub fn close(&mut self) {
        self.registration.close();
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.registration.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registration.close();
    }
}

#[derive(Clone)]
pub struct SubscriptionHandle {
    registration: Arc<Registration>,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.registration.key
    }

    pub fn close(&self) {
        self.registration.close();
    }

    pub fn is_closed(&self) -> bool {
        self.registration.is_closed()
    }
}
