//! Value stream fed by a polling thread

use super::ValueStream;
use parking_lot::{Condvar, Mutex};
use std::fmt::Display;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

#[derive(Default)]
struct PollState {
    paused: bool,
    cancelled: bool,
}

#[derive(Default)]
struct PollControl {
    state: Mutex<PollState>,
    wake: Condvar,
}

/// Periodically refreshes a value on a background thread and emits it
///
/// Polling only runs while the source is not paused and the stream has at least
/// one subscriber. Refresh errors are logged and the next tick tries again.
/// Cancelling (or dropping) the source joins the thread and completes the stream.
pub struct PollingSource<T: Clone + Send + 'static> {
    stream: ValueStream<T>,
    control: Arc<PollControl>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + 'static> PollingSource<T> {
    pub fn spawn<F, E>(name: &str, interval: Duration, mut refresh: F) -> std::io::Result<Self>
    where
        F: FnMut() -> Result<T, E> + Send + 'static,
        E: Display,
    {
        let stream = ValueStream::new();
        let control = Arc::new(PollControl::default());

        let thread_stream = stream.clone();
        let thread_control = control.clone();
        let thread_name = name.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("poll-{}", name))
            .spawn(move || loop {
                {
                    let mut state = thread_control.state.lock();
                    if state.cancelled {
                        break;
                    }
                    if state.paused || thread_stream.subscriber_count() == 0 {
                        thread_control.wake.wait_for(&mut state, interval);
                        continue;
                    }
                }

                match refresh() {
                    Ok(value) => thread_stream.emit(value),
                    Err(e) => log::warn!("Polling source '{}' refresh failed: {}", thread_name, e),
                }

                let mut state = thread_control.state.lock();
                if !state.cancelled {
                    thread_control.wake.wait_for(&mut state, interval);
                }
            })?;

        log::debug!("Polling source '{}' started ({:?} interval)", name, interval);
        Ok(Self {
            stream,
            control,
            thread: Some(thread),
        })
    }

    pub fn stream(&self) -> &ValueStream<T> {
        &self.stream
    }

    pub fn pause(&self) {
        self.control.state.lock().paused = true;
    }

    pub fn resume(&self) {
        self.control.state.lock().paused = false;
        self.control.wake.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.control.state.lock().paused
    }

    /// Stop polling, join the thread and complete the stream
    pub fn cancel(&mut self) {
        {
            let mut state = self.control.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
        }
        self.control.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Polling thread panicked");
            }
        }
        self.stream.complete();
    }
}

impl<T: Clone + Send + 'static> Drop for PollingSource<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
