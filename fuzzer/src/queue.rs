//! Bounded hand-off queues between producing and consuming actions.
//!
//! A [`WorkQueue`] is a multi-producer / multi-consumer FIFO of [`Key`]s with a
//! fixed capacity. Capacity is tracked with two semaphores: `free_slots`
//! counts room for new keys and `ready` counts keys waiting to be taken.
//!
//! Consumers that intend to put a key back use [`WorkQueue::checkout`]. A
//! checked out key keeps its slot, so returning it never waits on capacity.
//! Only fresh keys from producers compete for free slots. When none is free a
//! producer can take over the slot of the oldest queued key with
//! [`WorkQueue::push_displacing`], which keeps the working set rotating.

use hailmary_lib::Key;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Why a bounded wait on a queue ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
pub struct WorkQueue {
    name: &'static str,
    capacity: usize,
    items: Mutex<VecDeque<Key>>,
    free_slots: Semaphore,
    ready: Semaphore,
}

impl WorkQueue {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            free_slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys currently queued. Checked out keys are not counted.
    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for a free slot, then queues `key`.
    pub async fn push(&self, key: Key) {
        take(&self.free_slots).await;
        self.enqueue(key);
    }

    /// Queues `key` if a slot is free right now; hands it back otherwise.
    pub fn try_push(&self, key: Key) -> Result<(), Key> {
        match self.free_slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.enqueue(key);
                Ok(())
            }
            Err(_) => Err(key),
        }
    }

    /// Like [`WorkQueue::push`], giving up after `wait` or on cancellation.
    /// The key is handed back on failure.
    pub async fn push_within(
        &self,
        key: Key,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), (Key, WaitError)> {
        match take_within(&self.free_slots, wait, cancel).await {
            Ok(()) => {
                self.enqueue(key);
                Ok(())
            }
            Err(reason) => Err((key, reason)),
        }
    }

    /// Queues `key`, displacing the oldest queued key when no slot is free.
    /// Returns the displaced key, if any. `key` is handed back only when
    /// every slot is held by a checkout.
    pub fn push_displacing(&self, key: Key) -> Result<Option<Key>, Key> {
        let key = match self.try_push(key) {
            Ok(()) => return Ok(None),
            Err(key) => key,
        };
        let Ok(permit) = self.ready.try_acquire() else {
            return Err(key);
        };
        permit.forget();
        // The oldest key's slot passes straight to the new one
        let oldest = {
            let mut items = self.items();
            let oldest = items.pop_front();
            items.push_back(key);
            oldest
        };
        self.ready.add_permits(1);
        Ok(oldest)
    }

    /// Waits for a key and removes it, freeing its slot.
    pub async fn pop(&self) -> Key {
        loop {
            take(&self.ready).await;
            if let Some(key) = self.dequeue() {
                self.free_slots.add_permits(1);
                return key;
            }
        }
    }

    pub fn try_pop(&self) -> Option<Key> {
        let permit = self.ready.try_acquire().ok()?;
        permit.forget();
        let key = self.dequeue()?;
        self.free_slots.add_permits(1);
        Some(key)
    }

    /// Waits for a key and takes it while keeping its slot reserved. The key
    /// goes back to the tail of this queue when the guard is restored or
    /// dropped.
    pub async fn checkout(&self) -> Checkout<'_> {
        loop {
            take(&self.ready).await;
            if let Some(key) = self.dequeue() {
                return Checkout { queue: self, key };
            }
        }
    }

    /// Like [`WorkQueue::checkout`], giving up after `wait` or on cancellation.
    pub async fn checkout_within(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Checkout<'_>, WaitError> {
        take_within(&self.ready, wait, cancel).await?;
        match self.dequeue() {
            Some(key) => Ok(Checkout { queue: self, key }),
            None => Err(WaitError::TimedOut),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<Key>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Callers must already own a free slot for the key.
    fn enqueue(&self, key: Key) {
        self.items().push_back(key);
        self.ready.add_permits(1);
    }

    // `ready` permits are only added after an item is queued, so holding one
    // guarantees an item unless the queue state was corrupted.
    fn dequeue(&self) -> Option<Key> {
        self.items().pop_front()
    }
}

/// A key taken out of a [`WorkQueue`] that still owns its slot.
#[derive(Debug)]
pub struct Checkout<'a> {
    queue: &'a WorkQueue,
    key: Key,
}

impl Checkout<'_> {
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Puts the key back at the tail of its queue. Never waits.
    pub fn restore(self) {
        drop(self);
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        self.queue.enqueue(self.key.clone());
    }
}

// The semaphores are never closed, so acquisition only ever waits.
async fn take(semaphore: &Semaphore) {
    if let Ok(permit) = semaphore.acquire().await {
        permit.forget();
    }
}

async fn take_within(
    semaphore: &Semaphore,
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<(), WaitError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        acquired = tokio::time::timeout(wait, semaphore.acquire()) => match acquired {
            Ok(Ok(permit)) => {
                permit.forget();
                Ok(())
            }
            Ok(Err(_)) => Err(WaitError::Cancelled),
            Err(_) => Err(WaitError::TimedOut),
        },
    }
}

/// The two queues every engine shares: PUT feeds GET through `keys`, PROVIDE
/// feeds FIND-PROVIDE through `providers`.
#[derive(Debug, Clone)]
pub struct WorkQueues {
    pub keys: Arc<WorkQueue>,
    pub providers: Arc<WorkQueue>,
}

impl WorkQueues {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: Arc::new(WorkQueue::new("keys", capacity)),
            providers: Arc::new(WorkQueue::new("providers", capacity)),
        }
    }
}

impl Default for WorkQueues {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
