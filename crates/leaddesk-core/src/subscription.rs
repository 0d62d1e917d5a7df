// Cancellable snapshot subscriptions.
//
// A `Subscription` is a handle plus a channel: the store pushes the full
// current contents of the subscribed collection on every change, and the
// holder can cancel at any time. Cancelling removes the sender from the
// registry, so the channel closes and no further snapshots are delivered.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Collection, DocPath, Record};

/// Full current state of a subscribed collection.
pub type Snapshot = Vec<Record>;

type SnapshotSender = mpsc::UnboundedSender<Result<Snapshot, CoreError>>;

struct Subscriber {
    id: u64,
    collection: Collection,
    tx: SnapshotSender,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
}

/// Bookkeeping shared by a store and every subscription it handed out.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("subscriber registry mutex poisoned")
    }

    /// Register a new subscriber and deliver `initial` as its first snapshot.
    pub fn register(
        &self,
        collection: Collection,
        initial: Result<Snapshot, CoreError>,
    ) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive here, the send cannot fail.
        let _ = tx.send(initial);

        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        debug!(id, %collection, "subscription opened");
        inner.subscribers.push(Subscriber {
            id,
            collection,
            tx,
        });

        Subscription {
            id,
            rx,
            registry: self.clone(),
        }
    }

    fn cancel(&self, id: u64) {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != id);
        if inner.subscribers.len() < before {
            debug!(id, "subscription cancelled");
        }
    }

    fn is_active(&self, id: u64) -> bool {
        self.lock().subscribers.iter().any(|s| s.id == id)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a fresh snapshot to every subscriber whose collection contains
    /// `changed`. `snapshot` is evaluated once per distinct collection and
    /// outside the registry lock.
    pub fn notify_change<F>(&self, changed: &DocPath, mut snapshot: F)
    where
        F: FnMut(&Collection) -> Result<Snapshot, CoreError>,
    {
        let targets: Vec<(u64, Collection, SnapshotSender)> = self
            .lock()
            .subscribers
            .iter()
            .filter(|s| s.collection.matches(changed))
            .map(|s| (s.id, s.collection.clone(), s.tx.clone()))
            .collect();

        let mut computed: Vec<(Collection, Result<Snapshot, CoreError>)> = Vec::new();
        let mut closed = Vec::new();
        for (id, collection, tx) in targets {
            let payload = match computed.iter().find(|(c, _)| *c == collection) {
                Some((_, payload)) => payload.clone(),
                None => {
                    let payload = snapshot(&collection);
                    computed.push((collection, payload.clone()));
                    payload
                }
            };
            if tx.send(payload).is_err() {
                closed.push(id);
            }
        }

        for id in closed {
            self.cancel(id);
        }
    }

    /// Deliver an error to every subscriber of exactly `collection`.
    pub fn notify_error(&self, collection: &Collection, err: CoreError) {
        for subscriber in self.lock().subscribers.iter() {
            if subscriber.collection == *collection {
                let _ = subscriber.tx.send(Err(err.clone()));
            }
        }
    }
}

/// A live snapshot stream for one collection.
///
/// Dropping the subscription cancels it.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Result<Snapshot, CoreError>>,
    registry: SubscriberRegistry,
}

impl Subscription {
    /// Wait for the next snapshot. Returns `None` once cancelled and drained.
    pub async fn next(&mut self) -> Option<Result<Snapshot, CoreError>> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Subscription::next`].
    pub fn try_next(&mut self) -> Option<Result<Snapshot, CoreError>> {
        self.rx.try_recv().ok()
    }

    /// Stop delivery. Snapshots already queued stay readable; nothing new
    /// arrives after this returns.
    pub fn cancel(&self) {
        self.registry.cancel(self.id);
    }

    pub fn is_active(&self) -> bool {
        self.registry.is_active(self.id)
    }

    /// A detached handle that can cancel this subscription after it has been
    /// moved into a forwarding task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            id: self.id,
            registry: self.registry.clone(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.cancel(self.id);
    }
}

/// Cancels a subscription from outside the task that owns it.
#[derive(Clone)]
pub struct CancelHandle {
    id: u64,
    registry: SubscriberRegistry,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.registry.cancel(self.id);
    }
}
