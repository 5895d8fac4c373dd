//! Bounded blocking object pool.
//!
//! Two independent limits:
//! - `max_instances` caps live objects (checked out + idle). 0 = unbounded.
//! - `pool_size` caps idle objects kept for reuse. 0 = every release destroys.
//!
//! Counter transitions are CAS loops and the idle queue is lock-free. The monitor
//! is only taken to block in `get()` and to wake blocked callers; waking happens
//! only when a release or discard moves the pool off its `max_instances` ceiling.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};
use std::sync::{Condvar, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use serde::Serialize;

use crate::config::PoolConfig;

/// Creates and destroys pooled objects.
pub trait PoolFactory<T>: Send + Sync {
    fn create(&self) -> anyhow::Result<T>;

    fn destroy(&self, obj: T);
}

impl<T, F: PoolFactory<T>> PoolFactory<T> for std::sync::Arc<F> {
    fn create(&self) -> anyhow::Result<T> {
        F::create(self)
    }

    fn destroy(&self, obj: T) {
        F::destroy(self, obj)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Pool exhausted: no instance became available within {timeout_millis}ms")]
    Exhausted { timeout_millis: u64 },
    #[error("Failed to create pooled instance")]
    Create(#[source] anyhow::Error),
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub create_count: u64,
    pub remove_count: u64,
    /// Live instances, checked out or idle.
    pub instances: usize,
    /// Idle instances waiting for reuse.
    pub pooled: usize,
    /// Instances that can still be created before `get()` blocks.
    pub available: usize,
}

pub struct BoundedPool<T, F: PoolFactory<T>> {
    factory: F,
    max_instances: AtomicUsize,
    pool_size: usize,
    timeout_millis: u64,
    instances: AtomicUsize,
    /// `None` when pooling is disabled.
    idle: Option<ArrayQueue<T>>,
    waiters: AtomicUsize,
    monitor: StdMutex<()>,
    capacity_freed: Condvar,
    create_count: AtomicU64,
    remove_count: AtomicU64,
}

/// Holds one reserved unit of `instances`; gives it back on drop unless disarmed.
///
/// Keeps the counter honest when the factory fails or panics.
struct InstanceSlot<'a, T, F: PoolFactory<T>> {
    pool: &'a BoundedPool<T, F>,
    armed: bool,
}

impl<T, F: PoolFactory<T>> InstanceSlot<'_, T, F> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T, F: PoolFactory<T>> Drop for InstanceSlot<'_, T, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

impl<T, F: PoolFactory<T>> BoundedPool<T, F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            factory,
            max_instances: AtomicUsize::new(config.max_instances),
            pool_size: config.pool_size,
            timeout_millis: config.timeout_millis,
            instances: AtomicUsize::new(0),
            idle: (config.pool_size > 0).then(|| ArrayQueue::new(config.pool_size)),
            waiters: AtomicUsize::new(0),
            monitor: StdMutex::new(()),
            capacity_freed: Condvar::new(),
            create_count: AtomicU64::new(0),
            remove_count: AtomicU64::new(0),
        }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Take an idle instance, create one, or block until one of those is possible.
    pub fn get(&self) -> Result<T, PoolError> {
        let deadline = (self.timeout_millis > 0)
            .then(|| Instant::now() + Duration::from_millis(self.timeout_millis));

        loop {
            if let Some(obj) = self.pop_idle() {
                return Ok(obj);
            }

            let max = self.max_instances.load(Ordering::SeqCst);
            if max == 0 {
                self.instances.fetch_add(1, Ordering::SeqCst);
                return self.create_instance();
            }
            if try_increment_bounded(&self.instances, max) {
                return self.create_instance();
            }

            if let Some(obj) = self.wait_for_capacity(deadline)? {
                return Ok(obj);
            }
        }
    }

    /// Return an instance for reuse, destroying it if the idle queue is full.
    pub fn release(&self, obj: T) {
        let obj = match &self.idle {
            Some(idle) => match idle.push(obj) {
                Ok(()) => {
                    fence(Ordering::SeqCst);
                    let max = self.max_instances.load(Ordering::SeqCst);
                    if max > 0 && self.instances.load(Ordering::SeqCst) >= max {
                        self.wake_waiters();
                    }
                    return;
                }
                Err(obj) => obj,
            },
            None => obj,
        };

        let slot = InstanceSlot {
            pool: self,
            armed: true,
        };
        self.remove_count.fetch_add(1, Ordering::SeqCst);
        self.factory.destroy(obj);
        drop(slot);
    }

    /// Destroy an instance that must not be reused. Capacity is freed before destroy runs.
    pub fn discard(&self, obj: T) {
        self.release_slot();
        self.remove_count.fetch_add(1, Ordering::SeqCst);
        self.factory.destroy(obj);
    }

    /// Destroy every idle instance. Checked-out instances are unaffected.
    pub fn stop(&self) {
        let Some(idle) = &self.idle else {
            return;
        };

        let mut destroyed = 0usize;
        while let Some(obj) = idle.pop() {
            let slot = InstanceSlot {
                pool: self,
                armed: true,
            };
            self.remove_count.fetch_add(1, Ordering::SeqCst);
            self.factory.destroy(obj);
            drop(slot);
            destroyed += 1;
        }
        tracing::debug!(destroyed, "Pool stopped, idle instances destroyed");
    }

    /// Slots left before `get()` blocks. Always 0 when unbounded.
    pub fn available_count(&self) -> usize {
        let max = self.max_instances.load(Ordering::SeqCst);
        if max == 0 {
            return 0;
        }
        max.saturating_sub(self.instances.load(Ordering::SeqCst))
    }

    /// Instances created and not yet destroyed.
    pub fn current_size(&self) -> u64 {
        self.create_count
            .load(Ordering::SeqCst)
            .saturating_sub(self.remove_count.load(Ordering::SeqCst))
    }

    pub fn max_size(&self) -> usize {
        self.max_instances.load(Ordering::SeqCst)
    }

    /// Change the live-instance cap. Applies to future `get()`/`release()` calls.
    pub fn set_max_size(&self, max_instances: usize) {
        let previous = self.max_instances.swap(max_instances, Ordering::SeqCst);
        if previous != max_instances {
            tracing::info!(previous, max_instances, "Pool max size changed");
            self.wake_waiters();
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn timeout_millis(&self) -> u64 {
        self.timeout_millis
    }

    pub fn pooled_count(&self) -> usize {
        self.idle.as_ref().map_or(0, ArrayQueue::len)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            create_count: self.create_count.load(Ordering::SeqCst),
            remove_count: self.remove_count.load(Ordering::SeqCst),
            instances: self.instances.load(Ordering::SeqCst),
            pooled: self.pooled_count(),
            available: self.available_count(),
        }
    }

    fn pop_idle(&self) -> Option<T> {
        self.idle.as_ref().and_then(ArrayQueue::pop)
    }

    /// Create under an already-reserved instance slot.
    fn create_instance(&self) -> Result<T, PoolError> {
        let slot = InstanceSlot {
            pool: self,
            armed: true,
        };
        let obj = self.factory.create().map_err(|e| {
            tracing::warn!(error = %e, "Pool factory failed to create instance");
            PoolError::Create(e)
        })?;
        slot.disarm();
        self.create_count.fetch_add(1, Ordering::SeqCst);
        Ok(obj)
    }

    /// Give back one unit of `instances`, waking waiters if it leaves the ceiling.
    fn release_slot(&self) {
        let previous = match self
            .instances
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(previous) => previous,
            Err(_) => {
                tracing::error!("Pool instance count underflow - object not from this pool?");
                return;
            }
        };

        if previous == self.max_instances.load(Ordering::SeqCst) {
            self.wake_waiters();
        }
    }

    /// Block until an idle instance can be taken (returned) or a slot can be
    /// reserved (`None`, caller retries from the top).
    fn wait_for_capacity(&self, deadline: Option<Instant>) -> Result<Option<T>, PoolError> {
        let mut guard = self.lock_monitor();
        self.waiters.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);

        let result = loop {
            if let Some(obj) = self.pop_idle() {
                break Ok(Some(obj));
            }
            let max = self.max_instances.load(Ordering::SeqCst);
            if max == 0 || self.instances.load(Ordering::SeqCst) < max {
                break Ok(None);
            }

            match deadline {
                None => {
                    guard = self
                        .capacity_freed
                        .wait(guard)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        tracing::debug!(
                            timeout_millis = self.timeout_millis,
                            "Pool exhausted, giving up"
                        );
                        break Err(PoolError::Exhausted {
                            timeout_millis: self.timeout_millis,
                        });
                    }
                    let (next, _) = self
                        .capacity_freed
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard = next;
                }
            }
        };

        self.waiters.fetch_sub(1, Ordering::SeqCst);
        drop(guard);
        result
    }

    fn wake_waiters(&self) {
        fence(Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }
        let _guard = self.lock_monitor();
        self.capacity_freed.notify_all();
    }

    fn lock_monitor(&self) -> MutexGuard<'_, ()> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Idle instances go back through the factory; checked-out ones are the holder's.
impl<T, F: PoolFactory<T>> Drop for BoundedPool<T, F> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn try_increment_bounded(counter: &AtomicUsize, bound: usize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < bound).then_some(n + 1)
        })
        .is_ok()
}
