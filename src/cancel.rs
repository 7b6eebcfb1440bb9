use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// One-shot cancellation signal shared by every future in a chain.
///
/// The flag is monotonic and the subscriber list is swept exactly once, by
/// the first `raise`. Subscribers are held weakly so a dropped future does
/// not keep its whole chain alive through the token.
pub(crate) struct CancelToken {
    raised: AtomicBool,
    subscribers: Mutex<Vec<Weak<dyn CancelNotify>>>,
}

/// Type-erased side of a future registered on a chain token.
pub(crate) trait CancelNotify: Send + Sync {
    /// Moves the subscriber to its cancelled state if it is still pending.
    fn on_cancel(&self);
}

impl CancelToken {
    pub(crate) fn new() -> Arc<CancelToken> {
        Arc::new(CancelToken {
            raised: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub(crate) fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Registers a future of this chain.
    ///
    /// The flag is re-checked under the subscriber lock, so a concurrent
    /// `raise` either sweeps the new entry or is observed here and the
    /// subscriber is cancelled on the spot.
    pub(crate) fn subscribe(&self, subscriber: Weak<dyn CancelNotify>) {
        let mut subscribers = self.subscribers.lock().expect("Unrecoverable error");
        if self.is_raised() {
            drop(subscribers);
            if let Some(subscriber) = subscriber.upgrade() {
                subscriber.on_cancel();
            }
            return;
        }
        subscribers.push(subscriber);
    }

    /// Raises the signal and cancels every still-pending subscriber.
    /// Idempotent; only the first call sweeps.
    pub(crate) fn raise(&self) {
        if self.raised.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscribers =
            std::mem::take(&mut *self.subscribers.lock().expect("Unrecoverable error"));
        for subscriber in subscribers {
            if let Some(subscriber) = subscriber.upgrade() {
                subscriber.on_cancel();
            }
        }
    }
}
