//! Concurrent pool of reusable handles
//!
//! Handles are taken without blocking: an idle handle is reused when one is
//! available, otherwise the factory builds a new one and the pool grows. The
//! available set is a lock-free MPMC queue, so producer threads and the render
//! thread can take and return handles concurrently.

use crate::backend::GraphicsDevice;
use crate::command::CommandList;
use crate::error::{PipelineError, PipelineResult};
use crossbeam_channel::{Receiver, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Builds a new pooled handle
pub type PoolFactory<T> = Box<dyn Fn() -> PipelineResult<T> + Send + Sync>;

/// Restores a returned handle to its initial state
pub type PoolRecycler<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Thread-safe pool of reusable handles
pub struct Pool<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    factory: PoolFactory<T>,
    recycler: Option<PoolRecycler<T>>,
    capacity: AtomicUsize,
    outstanding: AtomicUsize,
    disposed: AtomicBool,
}

impl<T: Send> Pool<T> {
    pub fn new(factory: impl Fn() -> PipelineResult<T> + Send + Sync + 'static) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            factory: Box::new(factory),
            recycler: None,
            capacity: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn builder() -> PoolBuilder<T> {
        PoolBuilder::default()
    }

    /// Check out a handle, building one if none is idle
    pub fn take(&self) -> PipelineResult<Pooled<'_, T>> {
        let item = match self.receiver.try_recv() {
            Ok(item) => item,
            Err(_) => {
                let item = (self.factory)()?;
                let capacity = self.capacity.fetch_add(1, Ordering::AcqRel) + 1;
                log::debug!("Pool grew to {} handles", capacity);
                item
            }
        };
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(Pooled { pool: self, item: Some(item) })
    }

    /// Return a handle to the available set
    ///
    /// The handle's origin is not checked. Handles returned after `dispose` are
    /// dropped immediately.
    pub fn put(&self, mut item: T) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        if self.disposed.load(Ordering::Acquire) {
            log::debug!("Dropping handle returned to a disposed pool");
            return;
        }
        if let Some(recycle) = &self.recycler {
            recycle(&mut item);
        }
        // Both channel ends live in `self`, so the send cannot fail
        let _ = self.sender.send(item);
    }

    /// Ensure at least `count` handles exist, building the missing ones now
    pub fn reserve(&self, count: usize) -> PipelineResult<()> {
        let current = self.capacity.load(Ordering::Acquire);
        if count <= current {
            return Ok(());
        }
        for _ in current..count {
            let item = (self.factory)()?;
            let _ = self.sender.send(item);
            self.capacity.fetch_add(1, Ordering::AcqRel);
        }
        log::debug!("Pool reserved {} handles", count);
        Ok(())
    }

    /// Number of handles built by this pool
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Number of idle handles
    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    /// Number of handles currently checked out
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Drop every idle handle
    ///
    /// Checked-out handles are not reclaimed here; they are dropped when their
    /// guard returns them.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let released = self.receiver.try_iter().count();
        let outstanding = self.outstanding();
        log::debug!("Pool disposed {} idle handles", released);
        if outstanding > 0 {
            log::warn!("Pool disposed with {} handles still checked out", outstanding);
        }
    }
}

impl Pool<CommandList> {
    /// Pool of command lists created by `device`, reset on return
    pub fn for_command_lists(device: Arc<dyn GraphicsDevice>) -> Self {
        let mut pool = Pool::new(move || Ok(device.create_command_list()?));
        pool.recycler = Some(Box::new(CommandList::reset));
        pool
    }
}

impl<T> Drop for Pool<T> {
    fn drop(&mut self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            let released = self.receiver.try_iter().count();
            log::debug!("Pool dropped, released {} idle handles", released);
        }
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity.load(Ordering::Relaxed))
            .field("available", &self.receiver.len())
            .field("outstanding", &self.outstanding.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builder for [`Pool`]
pub struct PoolBuilder<T> {
    factory: Option<PoolFactory<T>>,
    recycler: Option<PoolRecycler<T>>,
    reserved: usize,
}

impl<T> Default for PoolBuilder<T> {
    fn default() -> Self {
        Self { factory: None, recycler: None, reserved: 0 }
    }
}

impl<T: Send> PoolBuilder<T> {
    pub fn with_factory(mut self, factory: impl Fn() -> PipelineResult<T> + Send + Sync + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    pub fn with_recycler(mut self, recycler: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.recycler = Some(Box::new(recycler));
        self
    }

    pub fn with_reserved(mut self, count: usize) -> Self {
        self.reserved = count;
        self
    }

    pub fn build(self) -> PipelineResult<Pool<T>> {
        let factory = self
            .factory
            .ok_or_else(|| PipelineError::configuration("pool has no factory"))?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        let pool = Pool {
            sender,
            receiver,
            factory,
            recycler: self.recycler,
            capacity: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        };
        pool.reserve(self.reserved)?;
        Ok(pool)
    }
}

/// A checked-out handle; returns itself to the pool on drop
pub struct Pooled<'a, T: Send> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<'a, T: Send> Pooled<'a, T> {
    /// Take the handle out of pool tracking
    pub fn detach(mut self) -> Option<T> {
        let item = self.item.take();
        if item.is_some() {
            self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
            self.pool.capacity.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }
}

impl<T: Send> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `detach` and `drop` empty the slot, and both consume the guard
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled handle accessed after release"),
        }
    }
}

impl<T: Send> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled handle accessed after release"),
        }
    }
}

impl<T: Send> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.put(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counting_pool() -> (Pool<u32>, Arc<AtomicU32>) {
        let built = Arc::new(AtomicU32::new(0));
        let counter = built.clone();
        let pool = Pool::new(move || Ok(counter.fetch_add(1, Ordering::SeqCst)));
        (pool, built)
    }

    #[test]
    fn test_take_builds_when_empty() {
        let (pool, built) = counting_pool();
        let a = pool.take().unwrap();
        let b = pool.take().unwrap();
        assert_ne!(*a, *b);
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.outstanding(), 2);
    }

    #[test]
    fn test_released_handle_is_reused() {
        let (pool, built) = counting_pool();
        let first = *pool.take().unwrap();
        let again = pool.take().unwrap();
        assert_eq!(*again, first);
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reserve_builds_up_front() {
        let (pool, built) = counting_pool();
        pool.reserve(4).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 4);
        assert_eq!(pool.available(), 4);

        // Already satisfied
        pool.reserve(2).unwrap();
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn test_builder_without_factory_is_configuration_error() {
        let result = Pool::<u32>::builder().with_reserved(2).build();
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn test_factory_failure_propagates() {
        let pool: Pool<u32> = Pool::new(|| Err(PipelineError::build("no device")));
        assert!(matches!(pool.take(), Err(PipelineError::Build(_))));
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_recycler_runs_on_return() {
        let pool = Pool::builder()
            .with_factory(|| Ok(Vec::<u8>::new()))
            .with_recycler(|v: &mut Vec<u8>| v.clear())
            .build()
            .unwrap();
        {
            let mut v = pool.take().unwrap();
            v.push(1);
        }
        assert!(pool.take().unwrap().is_empty());
    }

    #[test]
    fn test_dispose_keeps_outstanding_out() {
        let (pool, _) = counting_pool();
        pool.reserve(2).unwrap();
        let held = pool.take().unwrap();
        pool.dispose();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.outstanding(), 1);

        drop(held);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_detach_removes_from_tracking() {
        let (pool, _) = counting_pool();
        let handle = pool.take().unwrap();
        let value = handle.detach();
        assert_eq!(value, Some(0));
        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_command_list_pool_returns_reset_lists() {
        let device: Arc<dyn GraphicsDevice> = Arc::new(crate::backend::HeadlessDevice::default());
        let pool = Pool::for_command_lists(device);
        {
            let mut list = pool.take().unwrap();
            list.begin();
            list.dispatch(1, 1, 1);
        }
        let list = pool.take().unwrap();
        assert_eq!(list.state(), crate::command::ListState::Idle);
        assert!(list.is_empty());
    }
}
