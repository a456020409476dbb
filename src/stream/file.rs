//! Value streams fed by a watched file

use super::{StreamError, ValueStream};
use crate::error::{PipelineError, PipelineResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

/// Quiet period after the last change event before the file is read again
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(250);

enum Signal {
    Changed,
    Stop,
}

/// Reloads a file on every change and emits the result
///
/// The parent directory is watched so files replaced by rename are still seen.
/// Bursts of change events are coalesced until the file has been quiet for the
/// settle period. A load failure fails the stream; dropping the source stops
/// the watcher and completes the stream.
pub struct FileSource<T: Clone + Send + 'static> {
    path: PathBuf,
    stream: ValueStream<T>,
    signals: Sender<Signal>,
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Clone + Send + 'static> FileSource<T> {
    /// Load `path` now and after every change
    ///
    /// An initial load failure is delivered through the stream's error channel.
    pub fn watch<F, E>(path: impl AsRef<Path>, settle: Duration, load: F) -> PipelineResult<Self>
    where
        F: FnMut(&Path) -> Result<T, E> + Send + 'static,
        E: Display,
    {
        Self::start(path.as_ref(), settle, load, true)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stream(&self) -> &ValueStream<T> {
        &self.stream
    }

    fn start<F, E>(path: &Path, settle: Duration, mut load: F, initial: bool) -> PipelineResult<Self>
    where
        F: FnMut(&Path) -> Result<T, E> + Send + 'static,
        E: Display,
    {
        let path = path.to_path_buf();
        let stream = ValueStream::new();
        if initial && !reload(&stream, &path, &mut load) {
            log::warn!("Initial load of {} failed", path.display());
        }

        let (signals, events) = crossbeam_channel::unbounded();
        let watcher = watch_file(&path, signals.clone())?;

        let thread_stream = stream.clone();
        let thread_path = path.clone();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let thread = std::thread::Builder::new()
            .name(format!("watch-{}", name))
            .spawn(move || {
                while let Some(()) = next_change(&events, settle) {
                    if !reload(&thread_stream, &thread_path, &mut load) {
                        break;
                    }
                }
            })
            .map_err(|e| {
                PipelineError::configuration(format!("watch thread for {}: {}", path.display(), e))
            })?;

        log::debug!("Watching {}", path.display());
        Ok(Self {
            path,
            stream,
            signals,
            watcher: Some(watcher),
            thread: Some(thread),
        })
    }
}

impl FileSource<PathBuf> {
    /// Stream of change notifications for `path`, without reading it
    pub fn changes(path: impl AsRef<Path>, settle: Duration) -> PipelineResult<Self> {
        Self::start(
            path.as_ref(),
            settle,
            |changed: &Path| Ok::<_, std::convert::Infallible>(changed.to_path_buf()),
            false,
        )
    }
}

impl<T: Clone + Send + DeserializeOwned + 'static> FileSource<T> {
    /// Stream of the parsed JSON contents of `path`
    pub fn json(path: impl AsRef<Path>) -> PipelineResult<Self> {
        Self::json_with_settle(path, DEFAULT_SETTLE)
    }

    pub fn json_with_settle(path: impl AsRef<Path>, settle: Duration) -> PipelineResult<Self> {
        Self::watch(path, settle, |path: &Path| -> Result<T, String> {
            let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
            serde_json::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))
        })
    }
}

impl<T: Clone + Send + 'static> Drop for FileSource<T> {
    fn drop(&mut self) {
        // Stop events first so the worker sees Stop before anything else
        self.watcher = None;
        let _ = self.signals.send(Signal::Stop);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Watch thread for {} panicked", self.path.display());
            }
        }
        self.stream.complete();
        log::debug!("Stopped watching {}", self.path.display());
    }
}

fn watch_file(path: &Path, signals: Sender<Signal>) -> PipelineResult<RecommendedWatcher> {
    let file_name = path.file_name().map(|n| n.to_os_string()).ok_or_else(|| {
        PipelineError::configuration(format!("{} does not name a file", path.display()))
    })?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                log::warn!("File watch error: {}", e);
                return;
            }
        };
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        if event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str())) {
            let _ = signals.send(Signal::Changed);
        }
    })
    .map_err(|e| PipelineError::configuration(format!("cannot watch {}: {}", path.display(), e)))?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(|e| PipelineError::configuration(format!("cannot watch {}: {}", dir.display(), e)))?;
    Ok(watcher)
}

/// Wait for a change, then for the settle period to pass without another
fn next_change(events: &Receiver<Signal>, settle: Duration) -> Option<()> {
    match events.recv() {
        Ok(Signal::Changed) => {}
        Ok(Signal::Stop) | Err(_) => return None,
    }
    loop {
        match events.recv_timeout(settle) {
            Ok(Signal::Changed) => continue,
            Err(RecvTimeoutError::Timeout) => return Some(()),
            Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

/// Emit a fresh load; false when the stream was failed instead
fn reload<T, F, E>(stream: &ValueStream<T>, path: &Path, load: &mut F) -> bool
where
    T: Clone + Send + 'static,
    F: FnMut(&Path) -> Result<T, E>,
    E: Display,
{
    match load(path) {
        Ok(value) => {
            log::debug!("Reloaded {}", path.display());
            stream.emit(value);
            true
        }
        Err(e) => {
            log::error!("Failed to load {}: {}", path.display(), e);
            stream.error(StreamError::Producer(e.to_string()));
            false
        }
    }
}
