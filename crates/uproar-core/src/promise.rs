//! One-shot promises.
//!
//! A `Promise`/`Resolver` pair is the completion side of every proactor
//! operation. The resolver lives inside the operation's completion
//! handler on the ring-owning thread; the promise goes back to whoever
//! started the operation. Resolve-once falls out of move semantics: the
//! resolver is consumed by `resolve`/`fail`, and a resolver dropped
//! unresolved fails the promise with `RingClosed` so waiters never hang
//! on a torn-down ring.
//!
//! A promise is single-consumer: either subscribe a callback with
//! `on_complete` or block in `wait`, not both.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Result, UringError};

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

enum State<T> {
    Pending,
    Subscribed(Callback<T>),
    Done(Result<T>),
    Taken,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

pub struct Resolver<T> {
    inner: Option<Arc<Inner<T>>>,
}

/// Create a connected promise/resolver pair.
pub fn pair<T>() -> (Promise<T>, Resolver<T>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State::Pending),
        cond: Condvar::new(),
    });
    (
        Promise { inner: Arc::clone(&inner) },
        Resolver { inner: Some(inner) },
    )
}

impl<T> Resolver<T> {
    pub fn resolve(mut self, value: T) {
        self.complete(Ok(value));
    }

    pub fn fail(mut self, err: UringError) {
        self.complete(Err(err));
    }

    fn complete(&mut self, result: Result<T>) {
        let inner = match self.inner.take() {
            Some(inner) => inner,
            None => return,
        };
        let callback = {
            let mut state = inner.lock();
            match std::mem::replace(&mut *state, State::Taken) {
                State::Pending => {
                    *state = State::Done(result);
                    inner.cond.notify_all();
                    return;
                }
                State::Subscribed(cb) => cb,
                // Should not happen while a resolver is alive; keep what was there.
                other => {
                    *state = other;
                    return;
                }
            }
        };
        // Run the callback outside the lock.
        callback(result);
    }
}

impl<T> Drop for Resolver<T> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            self.complete(Err(UringError::RingClosed));
        }
    }
}

impl<T> Promise<T> {
    /// Run `f` with the result as soon as it exists, on whichever thread
    /// resolves the operation. If the result is already in, `f` runs now.
    pub fn on_complete<F>(self, f: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let done = {
            let mut state = self.inner.lock();
            match std::mem::replace(&mut *state, State::Taken) {
                State::Pending => {
                    *state = State::Subscribed(Box::new(f));
                    return;
                }
                State::Done(result) => result,
                other => {
                    *state = other;
                    return;
                }
            }
        };
        f(done);
    }

    /// Block until the result exists, up to `timeout`.
    pub fn wait(self, timeout: Duration) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        loop {
            if let State::Done(_) = *state {
                match std::mem::replace(&mut *state, State::Taken) {
                    State::Done(result) => return result,
                    _ => unreachable!(),
                }
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => return Err(UringError::TimedOut),
            };
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Take the result if it is already in.
    pub fn try_take(&self) -> Option<Result<T>> {
        let mut state = self.inner.lock();
        if let State::Done(_) = *state {
            match std::mem::replace(&mut *state, State::Taken) {
                State::Done(result) => Some(result),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }
}

/// Counts how many of a batch of promises resolved successfully.
/// Handy in tests and demos that fan out many operations.
pub struct CompletionCounter {
    ok: AtomicUsize,
    err: AtomicUsize,
}

impl CompletionCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { ok: AtomicUsize::new(0), err: AtomicUsize::new(0) })
    }

    pub fn observe<T>(self: &Arc<Self>, result: &Result<T>) {
        match result {
            Ok(_) => self.ok.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.err.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn ok_count(&self) -> usize {
        self.ok.load(Ordering::Relaxed)
    }

    pub fn err_count(&self) -> usize {
        self.err.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn resolve_then_wait() {
        let (p, r) = pair();
        r.resolve(42);
        assert_eq!(p.wait(Duration::from_millis(10)), Ok(42));
    }

    #[test]
    fn wait_times_out() {
        let (p, _r) = pair::<i32>();
        assert_eq!(p.wait(Duration::from_millis(20)), Err(UringError::TimedOut));
    }

    #[test]
    fn cross_thread_resolve_wakes_waiter() {
        let (p, r) = pair();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            r.resolve("done");
        });
        assert_eq!(p.wait(Duration::from_secs(5)), Ok("done"));
        t.join().unwrap();
    }

    #[test]
    fn callback_before_resolve() {
        let (p, r) = pair::<i32>();
        let counter = CompletionCounter::new();
        let c = Arc::clone(&counter);
        p.on_complete(move |res| c.observe(&res));
        r.resolve(1);
        assert_eq!(counter.ok_count(), 1);
    }

    #[test]
    fn callback_after_resolve_runs_immediately() {
        let (p, r) = pair::<i32>();
        r.fail(UringError::NotSocket);
        let counter = CompletionCounter::new();
        let c = Arc::clone(&counter);
        p.on_complete(move |res| c.observe(&res));
        assert_eq!(counter.err_count(), 1);
    }

    #[test]
    fn dropped_resolver_fails_the_promise() {
        let (p, r) = pair::<()>();
        drop(r);
        assert_eq!(p.wait(Duration::from_millis(10)), Err(UringError::RingClosed));
    }

    #[test]
    fn try_take_before_and_after() {
        let (p, r) = pair();
        assert!(p.try_take().is_none());
        r.resolve(5);
        assert_eq!(p.try_take(), Some(Ok(5)));
        assert!(p.try_take().is_none());
    }
}
