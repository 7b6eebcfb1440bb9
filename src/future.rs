use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::cancel::{CancelNotify, CancelToken};
use crate::Outcome;

static WORKER_NAME: &str = "xfuture-worker";

/// Per-future state machine. `Pending` is the only non-terminal state; the
/// first transition out of it wins and is never revisited.
enum State<T, E> {
    Pending,
    Ready(Result<T, E>),
    Cancelled,
    Poisoned,
}

struct FutureInner<T, E> {
    state: Mutex<State<T, E>>,
    cond: Condvar,
}

impl<T, E> FutureInner<T, E> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(State::Pending),
            cond: Condvar::new(),
        }
    }

    /// Stores the computation's result and wakes waiters, unless a signal
    /// already won the race; then the result is dropped and the slot stays
    /// empty.
    fn publish(&self, result: Result<T, E>) {
        let mut state = self.state.lock().expect("Unrecoverable error");
        match *state {
            State::Pending => {
                *state = State::Ready(result);
                self.cond.notify_all();
            }
            _ => {
                log::trace!("{WORKER_NAME}: discarding the result of a cancelled future");
            }
        }
    }

    fn poison(&self) {
        let mut state = self.state.lock().expect("Unrecoverable error");
        if let State::Pending = *state {
            *state = State::Poisoned;
            self.cond.notify_all();
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(
            *self.state.lock().expect("Unrecoverable error"),
            State::Pending
        )
    }
}

impl<T: Clone, E: Clone> FutureInner<T, E> {
    fn wait(&self) -> Outcome<T, E> {
        let mut state = self.state.lock().expect("Unrecoverable error");
        loop {
            match &*state {
                State::Pending => {
                    state = self.cond.wait(state).expect("Unrecoverable error");
                }
                State::Ready(result) => return Outcome::Ready(result.clone()),
                State::Cancelled => return Outcome::Cancelled,
                State::Poisoned => panic!("future computation panicked"),
            }
        }
    }

    fn wait_deadline(&self, timeout: Duration) -> Option<Outcome<T, E>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("Unrecoverable error");
        loop {
            match &*state {
                State::Pending => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    state = self
                        .cond
                        .wait_timeout(state, deadline - now)
                        .expect("Unrecoverable error")
                        .0;
                }
                State::Ready(result) => return Some(Outcome::Ready(result.clone())),
                State::Cancelled => return Some(Outcome::Cancelled),
                State::Poisoned => panic!("future computation panicked"),
            }
        }
    }
}

impl<T: Send + 'static, E: Send + 'static> CancelNotify for FutureInner<T, E> {
    fn on_cancel(&self) {
        let mut state = self.state.lock().expect("Unrecoverable error");
        if let State::Pending = *state {
            *state = State::Cancelled;
            self.cond.notify_all();
        }
    }
}

/// Handle to a computation running on its own worker thread.
///
/// The handle is cheaply cloneable; the original creator and every future
/// produced by [`Future::then`] share ownership of the underlying state.
/// A future reaches exactly one terminal state: completed (with a value or
/// an error) or cancelled. Cancellation never interrupts the running
/// computation, it only suppresses the result and stops not-yet-started
/// chain steps.
pub struct Future<T, E> {
    inner: Arc<FutureInner<T, E>>,
    cancel: Arc<CancelToken>,
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Future {
            inner: Arc::clone(&self.inner),
            cancel: Arc::clone(&self.cancel),
        }
    }
}

impl<T, E> Future<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Starts `computation` on a fresh worker thread and returns a handle
    /// to its eventual outcome. The chain rooted here gets its own
    /// cancellation token.
    pub fn new<F>(computation: F) -> Future<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Future::drive(CancelToken::new(), move || Some(computation()))
    }

    /// Spawns the worker that runs `computation` and publishes its result.
    ///
    /// `None` from the computation means there is nothing to publish (a
    /// chained step whose parent was cancelled; the shared token has
    /// already moved this future to `Cancelled`).
    fn drive<F>(cancel: Arc<CancelToken>, computation: F) -> Future<T, E>
    where
        F: FnOnce() -> Option<Result<T, E>> + Send + 'static,
    {
        let inner = Arc::new(FutureInner::pending());
        cancel.subscribe(Arc::downgrade(&inner) as Weak<dyn CancelNotify>);
        let worker = Arc::clone(&inner);
        let spawned = std::thread::Builder::new()
            .name(WORKER_NAME.into())
            .spawn(move || {
                log::trace!("{WORKER_NAME}: starting");
                match catch_unwind(AssertUnwindSafe(computation)) {
                    Ok(Some(result)) => worker.publish(result),
                    Ok(None) => {}
                    Err(_) => {
                        log::warn!("{WORKER_NAME}: computation panicked");
                        worker.poison();
                    }
                }
                log::trace!("{WORKER_NAME}: exiting");
            });
        if let Err(err) = spawned {
            log::error!("{WORKER_NAME}: spawn failed: {err:?}");
            inner.poison();
        }
        Future { inner, cancel }
    }

    /// Requests cancellation of this future's chain.
    ///
    /// A no-op if this future is already terminal. Otherwise the shared
    /// signal is raised: every still-pending future in the chain becomes
    /// cancelled, current and future `get` calls on them return
    /// immediately, and no not-yet-started chain step will run. The
    /// computation currently in flight is not stopped; its result is
    /// discarded. Never blocks.
    pub fn cancel(&self) {
        if self.inner.is_terminal() {
            return;
        }
        self.cancel.raise();
    }

    /// True iff the chain's cancellation signal has been raised.
    /// Never blocks.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_raised()
    }
}

impl<T, E> Future<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Blocks until the first terminal signal and returns it.
    ///
    /// Completion yields [`Outcome::Ready`] with the computation's result;
    /// cancellation yields [`Outcome::Cancelled`]. Whichever signal is
    /// observed first is cached: repeated calls return the identical
    /// outcome instantaneously.
    ///
    /// # Panics
    ///
    /// Panics if the computation itself panicked.
    pub fn get(&self) -> Outcome<T, E> {
        self.inner.wait()
    }

    /// Like [`Future::get`], but waits at most `timeout`.
    ///
    /// Returns `None` if the deadline elapses before either signal; the
    /// future itself is unaffected and a later call may still observe the
    /// real outcome.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Outcome<T, E>> {
        self.inner.wait_deadline(timeout)
    }

    /// Chains `step` onto this future and returns the new pending handle.
    ///
    /// The step runs on its own worker once this future completes with a
    /// value. An upstream error is propagated unchanged and `step` is never
    /// invoked; likewise after cancellation. The new future shares this
    /// chain's cancellation signal, so cancelling any link affects the
    /// whole chain. Never blocks the caller.
    pub fn then<U, F>(&self, step: F) -> Future<U, E>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let parent = self.clone();
        Future::drive(Arc::clone(&self.cancel), move || match parent.get() {
            Outcome::Ready(Ok(value)) => Some(step(value)),
            Outcome::Ready(Err(err)) => Some(Err(err)),
            Outcome::Cancelled => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    #[test]
    fn get_returns_value() {
        let f = Future::new(|| Ok::<_, String>(10));
        assert_eq!(f.get(), Outcome::Ready(Ok(10)));
        assert_eq!(f.get(), Outcome::Ready(Ok(10)));
    }

    #[test]
    fn get_returns_error() {
        let f = Future::new(|| Err::<i32, _>("boom".to_string()));
        assert_eq!(f.get(), Outcome::Ready(Err("boom".to_string())));
    }

    #[test]
    fn cancel_before_completion_is_permanent() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let f = Future::new(move || {
            gate_rx.recv().ok();
            done_tx.send(()).ok();
            Ok::<_, String>(1)
        });

        f.cancel();
        assert!(f.is_cancelled());
        assert_eq!(f.get(), Outcome::Cancelled);

        // Let the computation finish in the background; its result must be
        // discarded.
        gate_tx.send(()).unwrap();
        done_rx.recv().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(f.get(), Outcome::Cancelled);
        assert!(f.is_cancelled());
    }

    #[test]
    fn cancel_after_completion_is_noop() {
        let f = Future::new(|| Ok::<_, String>(7));
        assert_eq!(f.get(), Outcome::Ready(Ok(7)));

        f.cancel();
        assert!(!f.is_cancelled());
        assert_eq!(f.get(), Outcome::Ready(Ok(7)));
    }

    #[test]
    fn double_cancel_is_noop() {
        let (_gate_tx, gate_rx) = mpsc::channel::<()>();
        let f = Future::new(move || {
            gate_rx.recv().ok();
            Ok::<_, String>(1)
        });

        f.cancel();
        f.cancel();
        assert!(f.is_cancelled());
        assert_eq!(f.get(), Outcome::Cancelled);
    }

    #[test]
    fn get_timeout_expires_without_mutating() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let f = Future::new(move || {
            gate_rx.recv().ok();
            Ok::<_, String>(5)
        });

        assert_eq!(f.get_timeout(Duration::from_millis(20)), None);
        assert!(!f.is_cancelled());

        gate_tx.send(()).unwrap();
        assert_eq!(
            f.get_timeout(Duration::from_secs(5)),
            Some(Outcome::Ready(Ok(5)))
        );
    }

    #[test]
    fn get_timeout_on_terminal_future_returns_immediately() {
        let f = Future::new(|| Ok::<_, String>(3));
        assert_eq!(f.get(), Outcome::Ready(Ok(3)));
        assert_eq!(
            f.get_timeout(Duration::from_millis(0)),
            Some(Outcome::Ready(Ok(3)))
        );
    }

    #[test]
    fn then_chains_values() {
        let f = Future::new(|| Ok::<_, String>(10))
            .then(|v| Ok(2 * v))
            .then(|v| Ok(2 + v));
        assert_eq!(f.get(), Outcome::Ready(Ok(22)));
    }

    #[test]
    fn then_skips_step_after_upstream_error() {
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let f = Future::new(|| Err::<i32, _>("boom".to_string())).then(move |v| {
            flag.store(true, Ordering::SeqCst);
            Ok(2 * v)
        });

        assert_eq!(f.get(), Outcome::Ready(Err("boom".to_string())));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[test]
    fn then_carries_downstream_error() {
        let f = Future::new(|| Ok::<_, String>(10))
            .then(|_| Err::<i32, _>("step failed".to_string()));
        assert_eq!(f.get(), Outcome::Ready(Err("step failed".to_string())));
    }

    #[test]
    fn cancel_prevents_chained_step() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let invoked = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&invoked);

        let parent = Future::new(move || {
            gate_rx.recv().ok();
            Ok::<_, String>(1)
        });
        let child = parent.then(move |v| {
            flag.store(true, Ordering::SeqCst);
            Ok(v + 1)
        });

        // Cancelling the child cancels the whole chain through the shared
        // signal.
        child.cancel();
        assert!(parent.is_cancelled());
        assert!(child.is_cancelled());

        gate_tx.send(()).unwrap();
        assert_eq!(child.get(), Outcome::Cancelled);
        assert_eq!(parent.get(), Outcome::Cancelled);
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_getters_agree() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let f = Future::new(move || {
            gate_rx.recv().ok();
            Ok::<_, String>(42)
        });

        let mut getters = Vec::new();
        for _ in 0..8 {
            let f = f.clone();
            getters.push(std::thread::spawn(move || f.get()));
        }

        gate_tx.send(()).unwrap();
        for getter in getters {
            assert_eq!(getter.join().unwrap(), Outcome::Ready(Ok(42)));
        }
    }

    #[test]
    #[should_panic(expected = "future computation panicked")]
    fn panicked_computation_poisons_get() {
        let f = Future::new(|| -> Result<i32, String> { panic!("user code") });
        let _ = f.get();
    }

    #[test]
    fn cancel_race_settles_on_one_outcome() {
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let delay = rng.gen_range(0..150u64);
            let f = Future::new(move || {
                std::thread::sleep(Duration::from_micros(delay));
                Ok::<_, String>(1)
            });
            if rng.gen_bool(0.5) {
                std::thread::yield_now();
            }
            f.cancel();

            let first = f.get();
            match &first {
                Outcome::Ready(Ok(1)) | Outcome::Cancelled => {}
                other => panic!("unexpected outcome: {other:?}"),
            }
            // Whichever signal won is immutable.
            assert_eq!(f.get(), first);
        }
    }
}
