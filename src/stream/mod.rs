//! Push-based value streams
//!
//! A [`ValueStream`] delivers values to subscribed [`Observer`]s and remembers the
//! last value, so late subscribers start from the current state. Completion and
//! errors are terminal and reach every subscriber exactly once.

mod file;
mod polling;

pub use file::{FileSource, DEFAULT_SETTLE};
pub use polling::PollingSource;

use crate::error::PipelineError;
use parking_lot::{Mutex, ReentrantMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Error delivered through a stream's error channel
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("{0}")]
    Producer(String),
    #[error(transparent)]
    Pipeline(Arc<PipelineError>),
}

impl From<PipelineError> for StreamError {
    fn from(err: PipelineError) -> Self {
        StreamError::Pipeline(Arc::new(err))
    }
}

type NextFn<T> = Box<dyn FnMut(&T) -> Result<(), StreamError> + Send>;
type ErrorFn = Box<dyn FnMut(&StreamError) + Send>;
type CompleteFn = Box<dyn FnOnce() + Send>;

/// Callbacks receiving a stream's signals
pub struct Observer<T> {
    next: NextFn<T>,
    error: Option<ErrorFn>,
    complete: Option<CompleteFn>,
}

impl<T> Observer<T> {
    /// Observer whose `next` may fail; a failure is routed to its error handler
    /// and ends the subscription
    pub fn new(next: impl FnMut(&T) -> Result<(), StreamError> + Send + 'static) -> Self {
        Self {
            next: Box::new(next),
            error: None,
            complete: None,
        }
    }

    /// Observer that only consumes values
    pub fn from_fn(mut next: impl FnMut(&T) + Send + 'static) -> Self {
        Self::new(move |value| {
            next(value);
            Ok(())
        })
    }

    pub fn with_error(mut self, on_error: impl FnMut(&StreamError) + Send + 'static) -> Self {
        self.error = Some(Box::new(on_error));
        self
    }

    pub fn with_complete(mut self, on_complete: impl FnOnce() + Send + 'static) -> Self {
        self.complete = Some(Box::new(on_complete));
        self
    }

    fn fail(&mut self, err: &StreamError) {
        match &mut self.error {
            Some(on_error) => on_error(err),
            None => log::warn!("Unhandled stream error: {}", err),
        }
    }

    fn finish(&mut self, terminal: &Terminal) {
        match terminal {
            Terminal::Completed => {
                if let Some(on_complete) = self.complete.take() {
                    on_complete();
                }
            }
            Terminal::Failed(err) => self.fail(err),
        }
    }
}

struct Slot<T> {
    id: u64,
    active: AtomicBool,
    observer: Mutex<Observer<T>>,
    // Terminal raised from inside this observer's own `next`
    pending: Mutex<Option<Terminal>>,
}

impl<T> Slot<T> {
    fn new(id: u64, observer: Observer<T>) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            observer: Mutex::new(observer),
            pending: Mutex::new(None),
        }
    }

    /// Returns false when the observer failed and must be dropped
    fn deliver(&self, value: &T) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return true;
        }
        let Some(mut observer) = self.observer.try_lock() else {
            log::warn!("Dropped re-entrant emission for observer {}", self.id);
            return true;
        };
        let delivered = match (observer.next)(value) {
            Ok(()) => true,
            Err(err) => {
                self.active.store(false, Ordering::Release);
                observer.fail(&err);
                false
            }
        };
        let pending = self.pending.lock().take();
        if let Some(terminal) = pending {
            if delivered {
                observer.finish(&terminal);
            }
        }
        delivered
    }

    fn terminate(&self, terminal: &Terminal) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        match self.observer.try_lock() {
            Some(mut observer) => observer.finish(terminal),
            // Busy in `next` on this thread; `deliver` finishes it on return
            None => *self.pending.lock() = Some(terminal.clone()),
        }
    }
}

#[derive(Clone)]
enum Terminal {
    Completed,
    Failed(StreamError),
}

struct State<T> {
    last: Option<T>,
    terminal: Option<Terminal>,
    slots: Vec<Arc<Slot<T>>>,
    next_id: u64,
}

struct Shared<T> {
    // Serializes emissions and replays; re-entrant so observers may emit
    delivery: ReentrantMutex<()>,
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    fn remove(&self, id: u64) {
        self.state.lock().slots.retain(|slot| slot.id != id);
    }
}

/// A replay-one value stream
pub struct ValueStream<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ValueStream<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T: Clone + Send + 'static> ValueStream<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                delivery: ReentrantMutex::new(()),
                state: Mutex::new(State {
                    last: None,
                    terminal: None,
                    slots: Vec::new(),
                    next_id: 1,
                }),
            }),
        }
    }

    /// Stream whose first subscriber immediately receives `value`
    pub fn with_value(value: T) -> Self {
        let stream = Self::new();
        stream.shared.state.lock().last = Some(value);
        stream
    }

    /// Push a value to every subscriber
    pub fn emit(&self, value: T) {
        let _delivery = self.shared.delivery.lock();
        let slots = {
            let mut state = self.shared.state.lock();
            if state.terminal.is_some() {
                log::warn!("Emission on a terminated stream ignored");
                return;
            }
            state.last = Some(value.clone());
            state.slots.clone()
        };

        for slot in slots {
            if !slot.deliver(&value) {
                self.shared.remove(slot.id);
            }
        }
    }

    /// Complete the stream
    pub fn complete(&self) {
        self.terminate(Terminal::Completed);
    }

    /// Fail the stream
    pub fn error(&self, err: StreamError) {
        self.terminate(Terminal::Failed(err));
    }

    fn terminate(&self, terminal: Terminal) {
        let _delivery = self.shared.delivery.lock();
        let slots = {
            let mut state = self.shared.state.lock();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal.clone());
            std::mem::take(&mut state.slots)
        };
        for slot in slots {
            slot.terminate(&terminal);
        }
    }

    /// Subscribe an observer; the last value (if any) is delivered immediately
    pub fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let _delivery = self.shared.delivery.lock();
        let (slot, last, terminal) = {
            let mut state = self.shared.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            let slot = Arc::new(Slot::new(id, observer));
            if state.terminal.is_none() {
                state.slots.push(slot.clone());
            }
            (slot, state.last.clone(), state.terminal.clone())
        };
        log::debug!("Stream subscriber {} added", slot.id);

        if let Some(value) = last {
            if !slot.deliver(&value) {
                self.shared.remove(slot.id);
            }
        }
        if let Some(terminal) = terminal {
            slot.terminate(&terminal);
            return Subscription::empty();
        }

        let shared: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Subscription::new(move || {
            slot.active.store(false, Ordering::Release);
            if let Some(shared) = shared.upgrade() {
                shared.remove(slot.id);
            }
            log::debug!("Stream subscriber {} removed", slot.id);
        })
    }

    /// Subscribe a plain value callback
    pub fn subscribe_fn(&self, next: impl FnMut(&T) + Send + 'static) -> Subscription {
        self.subscribe(Observer::from_fn(next))
    }

    /// Most recent value
    pub fn last(&self) -> Option<T> {
        self.shared.state.lock().last.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().slots.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.state.lock().terminal.is_some()
    }
}

impl<T: Clone + Send + 'static> Default for ValueStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an active subscription; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    /// A subscription with nothing to cancel
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Stop receiving values; an in-flight delivery still completes
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Keep the observer attached for the lifetime of the stream
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl FnMut(&i32) + Send + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: &i32| sink.lock().push(*v))
    }

    #[test]
    fn test_values_delivered_in_order() {
        let stream = ValueStream::new();
        let (seen, next) = recorder();
        let _sub = stream.subscribe_fn(next);
        stream.emit(1);
        stream.emit(2);
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_late_subscriber_gets_last_value() {
        let stream = ValueStream::new();
        stream.emit(1);
        stream.emit(5);
        let (seen, next) = recorder();
        let _sub = stream.subscribe_fn(next);
        assert_eq!(*seen.lock(), vec![5]);
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let stream = ValueStream::new();
        let (seen, next) = recorder();
        let sub = stream.subscribe_fn(next);
        stream.emit(1);
        drop(sub);
        stream.emit(2);
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_failing_observer_gets_error_and_is_removed() {
        let stream = ValueStream::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        let _sub = stream.subscribe(
            Observer::new(|v: &i32| {
                if *v > 1 {
                    Err(StreamError::Producer(format!("too big: {v}")))
                } else {
                    Ok(())
                }
            })
            .with_error(move |e| sink.lock().push(e.to_string())),
        );

        stream.emit(1);
        stream.emit(2);
        stream.emit(3);
        assert_eq!(*errors.lock(), vec!["too big: 2".to_string()]);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_complete_reaches_every_subscriber_once() {
        let stream: ValueStream<i32> = ValueStream::new();
        let completions = Arc::new(Mutex::new(0));
        let mut subs = Vec::new();
        for _ in 0..3 {
            let c = completions.clone();
            subs.push(stream.subscribe(Observer::from_fn(|_| {}).with_complete(move || *c.lock() += 1)));
        }
        stream.complete();
        stream.complete();
        assert_eq!(*completions.lock(), 3);
        assert!(stream.is_terminated());
    }

    #[test]
    fn test_subscribe_after_complete_replays_then_completes() {
        let stream = ValueStream::with_value(9);
        stream.complete();
        let (seen, next) = recorder();
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let _sub = stream.subscribe(
            Observer::from_fn(next).with_complete(move || flag.store(true, Ordering::SeqCst)),
        );
        assert_eq!(*seen.lock(), vec![9]);
        assert!(completed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_emit_from_observer_does_not_deadlock() {
        let stream = ValueStream::new();
        let (seen, mut next) = recorder();
        let echo = stream.clone();
        let _sub = stream.subscribe_fn(move |v: &i32| {
            next(v);
            if *v == 1 {
                echo.emit(2);
            }
        });
        stream.emit(1);
        // the nested emission reaches nobody busy, but is remembered
        assert_eq!(*seen.lock(), vec![1]);
        assert_eq!(stream.last(), Some(2));
    }

    #[test]
    fn test_complete_from_observer_finishes_after_next() {
        let stream = ValueStream::new();
        let (seen, mut next) = recorder();
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let echo = stream.clone();
        let _sub = stream.subscribe(
            Observer::from_fn(move |v: &i32| {
                next(v);
                if *v == 3 {
                    echo.complete();
                }
            })
            .with_complete(move || flag.store(true, Ordering::SeqCst)),
        );

        stream.emit(1);
        stream.emit(3);
        stream.emit(4);
        assert_eq!(*seen.lock(), vec![1, 3]);
        assert!(completed.load(Ordering::SeqCst));
        assert!(stream.is_terminated());
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn test_error_from_observer_reaches_every_subscriber() {
        let stream = ValueStream::new();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let echo = stream.clone();
        let first = errors.clone();
        let second = errors.clone();
        let _a = stream.subscribe(
            Observer::from_fn(move |v: &i32| {
                if *v < 0 {
                    echo.error(StreamError::Producer("negative".into()));
                }
            })
            .with_error(move |e| first.lock().push(format!("a: {e}"))),
        );
        let _b = stream.subscribe(
            Observer::from_fn(|_: &i32| {}).with_error(move |e| second.lock().push(format!("b: {e}"))),
        );

        stream.emit(-1);
        let mut errors = errors.lock().clone();
        errors.sort();
        assert_eq!(errors, vec!["a: negative".to_string(), "b: negative".to_string()]);
    }

    #[test]
    fn test_complete_during_replay_finishes_subscriber() {
        let stream = ValueStream::with_value(7);
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let echo = stream.clone();
        let _sub = stream.subscribe(
            Observer::from_fn(move |_: &i32| echo.complete())
                .with_complete(move || flag.store(true, Ordering::SeqCst)),
        );
        assert!(completed.load(Ordering::SeqCst));
        assert!(stream.is_terminated());
    }
}
