use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Condvar, Mutex, MutexGuard},
};

use serde::Serialize;

/// Admission result of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Accepted.
    Ok,
    /// Rejected: the queue is busy and the caller asked to be throttled.
    Throttled,
    /// Rejected: the queue is at its maximum depth.
    Full,
    /// Rejected: the queue has been shut down.
    Closed,
}

impl QueueState {
    pub fn is_ok(self) -> bool {
        self == QueueState::Ok
    }

    /// `Ok(())` if accepted, otherwise the matching error.
    pub fn check(self) -> crate::error::Result<()> {
        match self {
            QueueState::Ok => Ok(()),
            QueueState::Closed => Err(crate::error::Error::ShuttingDown),
            state => Err(crate::error::Error::Rejected(state)),
        }
    }
}

/// Depth limits of one queue. `throttle_at` must be below `max_depth`.
/// Throttleable pushes are refused once more than `throttle_at` items are
/// queued; every push is refused at `max_depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueLimits {
    pub max_depth: usize,
    pub throttle_at: usize,
}

impl QueueLimits {
    pub fn new(max_depth: usize, throttle_at: usize) -> Self {
        assert!(
            throttle_at < max_depth,
            "throttle threshold {throttle_at} must be below max depth {max_depth}"
        );
        Self {
            max_depth,
            throttle_at,
        }
    }

    fn admit(&self, depth: usize, allow_throttle: bool) -> QueueState {
        if depth >= self.max_depth {
            QueueState::Full
        } else if allow_throttle && depth > self.throttle_at {
            QueueState::Throttled
        } else {
            QueueState::Ok
        }
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO queue with throttling admission and a blocking consumer.
pub struct Queue<T> {
    limits: QueueLimits,
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

impl<T> Queue<T> {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an item unless the queue is full, throttled (when
    /// `allow_throttle`), or closed. Never blocks.
    pub fn push(&self, item: T, allow_throttle: bool) -> QueueState {
        let mut inner = self.lock();
        if inner.closed {
            return QueueState::Closed;
        }
        let state = self.limits.admit(inner.items.len(), allow_throttle);
        if state.is_ok() {
            inner.items.push_back(item);
            drop(inner);
            self.ready.notify_one();
        }
        state
    }

    /// Add an item skipping the admission check. Used for work that was
    /// already admitted elsewhere. Returns the item back if the queue is
    /// closed.
    pub fn push_unchecked(&self, item: T) -> Result<(), T> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(item);
        }
        inner.items.push_back(item);
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// What `push` would return right now if `pending` items admitted
    /// elsewhere were already queued.
    pub fn admission_with_pending(&self, pending: usize, allow_throttle: bool) -> QueueState {
        let inner = self.lock();
        if inner.closed {
            return QueueState::Closed;
        }
        self.limits.admit(inner.items.len() + pending, allow_throttle)
    }

    /// Take the oldest item, blocking while the queue is empty. Returns
    /// `None` once the queue is closed.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            inner = self.ready.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Shut the queue down, waking every consumer. Items still queued are
    /// handed back to the caller.
    pub fn close(&self) -> Vec<T> {
        let mut inner = self.lock();
        inner.closed = true;
        let remaining = inner.items.drain(..).collect();
        drop(inner);
        self.ready.notify_all();
        remaining
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }
}

struct Named<T> {
    limits: QueueLimits,
    items: VecDeque<T>,
}

struct GroupInner<T> {
    queues: BTreeMap<String, Named<T>>,
    /// Name of the queue served last, for round-robin.
    last_served: Option<String>,
    closed: bool,
}

/// A set of named FIFO queues behind one lock, drained round-robin by a
/// shared pool of consumers.
pub struct QueueGroup<T> {
    default_limits: QueueLimits,
    inner: Mutex<GroupInner<T>>,
    ready: Condvar,
}

impl<T> QueueGroup<T> {
    /// Queues created on first use get `default_limits`.
    pub fn new(default_limits: QueueLimits) -> Self {
        Self {
            default_limits,
            inner: Mutex::new(GroupInner {
                queues: BTreeMap::new(),
                last_served: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GroupInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_limits(&self, name: &str, limits: QueueLimits) {
        let mut inner = self.lock();
        inner
            .queues
            .entry(name.to_string())
            .and_modify(|q| q.limits = limits)
            .or_insert_with(|| Named {
                limits,
                items: VecDeque::new(),
            });
    }

    pub fn push(&self, name: &str, item: T, allow_throttle: bool) -> QueueState {
        let mut inner = self.lock();
        if inner.closed {
            return QueueState::Closed;
        }
        let default_limits = self.default_limits;
        let queue = inner
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Named {
                limits: default_limits,
                items: VecDeque::new(),
            });
        let state = queue.limits.admit(queue.items.len(), allow_throttle);
        if state.is_ok() {
            queue.items.push_back(item);
            drop(inner);
            self.ready.notify_one();
        }
        state
    }

    /// Take the next item, visiting non-empty queues in turn. Blocks while
    /// every queue is empty; returns `None` once the group is closed.
    pub fn pop(&self) -> Option<(String, T)> {
        let mut inner = self.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(name) = next_non_empty(&inner) {
                let item = inner
                    .queues
                    .get_mut(&name)
                    .and_then(|q| q.items.pop_front());
                if let Some(item) = item {
                    inner.last_served = Some(name.clone());
                    return Some((name, item));
                }
            }
            inner = self.ready.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Shut every queue down and return what was still queued.
    pub fn close(&self) -> Vec<(String, T)> {
        let mut inner = self.lock();
        inner.closed = true;
        let mut remaining = Vec::new();
        for (name, queue) in inner.queues.iter_mut() {
            remaining.extend(queue.items.drain(..).map(|item| (name.clone(), item)));
        }
        drop(inner);
        self.ready.notify_all();
        remaining
    }

    pub fn len(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.items.len())
    }

    /// Depth of every known queue.
    pub fn depths(&self) -> BTreeMap<String, usize> {
        self.lock()
            .queues
            .iter()
            .map(|(name, q)| (name.clone(), q.items.len()))
            .collect()
    }
}

fn next_non_empty<T>(inner: &GroupInner<T>) -> Option<String> {
    use std::ops::Bound::{Excluded, Unbounded};

    let after = match &inner.last_served {
        Some(last) => inner
            .queues
            .range::<String, _>((Excluded(last), Unbounded))
            .find(|(_, q)| !q.items.is_empty()),
        None => None,
    };
    after
        .or_else(|| inner.queues.iter().find(|(_, q)| !q.items.is_empty()))
        .map(|(name, _)| name.clone())
}
