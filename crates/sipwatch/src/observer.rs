//! Change notifications for external consumers (spec.md §4.C15). Every
//! subscriber gets its own bounded channel and a draining task; a
//! subscriber that falls behind has its oldest notifications dropped
//! rather than back-pressuring the dissection worker, per spec.md §5's
//! "coalesce, don't block" ordering guarantee.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use sipwatch_capture::InputId;
use sipwatch_storage::Call;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// A capture input failure, detached from `sipwatch_capture::CaptureError`
/// (which isn't `Clone`) so it can be handed to every subscriber.
#[derive(Clone, Debug)]
pub struct InputFailure {
    pub input: InputId,
    pub message: String,
}

#[derive(Clone, Debug)]
pub(crate) enum Notification {
    CallAdded(Call),
    CallChanged(Call),
    CallsCleared,
    InputFailed(InputFailure),
}

/// Callbacks delivered to a subscriber. All have no-op default bodies so
/// implementers only override what they care about.
pub trait Observer: Send + Sync {
    fn on_call_added(&self, _call: &Call) {}
    fn on_call_changed(&self, _call: &Call) {}
    fn on_calls_cleared(&self) {}
    fn on_input_failed(&self, _failure: &InputFailure) {}
}

type ObserverList = Arc<RwLock<Vec<(u64, mpsc::Sender<Notification>)>>>;

pub(crate) struct ObserverHub {
    observers: ObserverList,
    next_id: AtomicU64,
}

impl ObserverHub {
    pub(crate) fn new() -> Self {
        Self {
            observers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(&self, observer: Arc<dyn Observer>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                match notification {
                    Notification::CallAdded(call) => observer.on_call_added(&call),
                    Notification::CallChanged(call) => observer.on_call_changed(&call),
                    Notification::CallsCleared => observer.on_calls_cleared(),
                    Notification::InputFailed(failure) => observer.on_input_failed(&failure),
                }
            }
        });
        self.observers.write().push((id, tx));
        Subscription { id, observers: self.observers.clone() }
    }

    pub(crate) fn notify(&self, notification: Notification) {
        for (_, tx) in self.observers.read().iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(notification.clone()) {
                tracing::debug!("dropping notification for a subscriber that is falling behind");
            }
        }
    }
}

/// A live subscription. Dropping it unsubscribes; `unsubscribe` does the
/// same explicitly.
pub struct Subscription {
    id: u64,
    observers: ObserverList,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.observers.write().retain(|(id, _)| *id != self.id);
    }
}
