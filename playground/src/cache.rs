use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::args::Invocation;
use crate::errors::{PlaygroundError, Result};
use crate::params::Channel;
use crate::run::{ExecutionAdapter, RawExecution};

pub const DEFAULT_CAPACITY: usize = 256;

/// Everything that determines what the sandbox prints. Argument order is
/// significant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub version: Channel,
    pub command: String,
    pub args: Vec<String>,
    pub code: String,
    pub backtrace: bool,
}

impl Signature {
    pub fn new(version: Channel, invocation: Invocation, code: impl Into<String>) -> Self {
        Self {
            version,
            command: invocation.command,
            args: invocation.args,
            code: code.into(),
            backtrace: invocation.backtrace,
        }
    }
}

type Slot<V> = Arc<OnceCell<V>>;

/// Bounded LRU memo table with one in-flight computation per key.
///
/// Finished values live in the LRU. Computations in progress are tracked
/// separately, so eviction never drops one and an abandoned computation never
/// displaces a finished value. The lock only guards lookups and bookkeeping;
/// computations run outside it and later callers for the same key wait on
/// the running one instead of starting a second. Failed or cancelled
/// computations leave nothing behind.
pub struct DispatchCache<K, V> {
    slots: Mutex<Slots<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct Slots<K, V> {
    ready: LruCache<K, V>,
    pending: HashMap<K, Slot<V>>,
}

enum Lookup<V> {
    Ready(V),
    Pending(Slot<V>),
}

impl<K: Hash + Eq + Clone, V: Clone> DispatchCache<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            slots: Mutex::new(Slots {
                ready: LruCache::new(capacity),
                pending: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            PlaygroundError::InvalidConfig("cache capacity must be greater than zero".to_string())
        })?;
        Ok(Self::new(capacity))
    }

    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        key: &K,
        init: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let slot = match self.lookup(key) {
            Lookup::Ready(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(hit = true, ok = true, "dispatch cache lookup");
                return Ok(value);
            }
            Lookup::Pending(slot) => slot,
        };
        let pending = PendingSlot {
            cache: self,
            key,
            slot,
        };

        let mut computed = false;
        let outcome = pending
            .slot
            .get_or_try_init(|| {
                computed = true;
                init()
            })
            .await
            .cloned();

        match &outcome {
            Ok(value) if computed => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.promote(key, &pending.slot, value.clone());
            }
            Ok(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
        debug!(hit = !computed, ok = outcome.is_ok(), "dispatch cache lookup");
        outcome
    }

    fn lookup(&self, key: &K) -> Lookup<V> {
        let mut slots = self.slots.lock();
        if let Some(value) = slots.ready.get(key) {
            return Lookup::Ready(value.clone());
        }
        let slot = slots.pending.entry(key.clone()).or_default();
        Lookup::Pending(Arc::clone(slot))
    }

    fn promote(&self, key: &K, slot: &Slot<V>, value: V) {
        let mut slots = self.slots.lock();
        let current = slots
            .pending
            .get(key)
            .is_some_and(|pending| Arc::ptr_eq(pending, slot));
        if current {
            slots.pending.remove(key);
        }
        slots.ready.put(key.clone(), value);
    }

    /// Finished entries only.
    pub fn len(&self) -> usize {
        self.slots.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().ready.cap().get()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.lock().ready.contains(key)
    }

    /// Keys with a computation currently running.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().pending.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// A caller's claim on an in-flight slot. The last claim to go away without
/// the value being promoted removes the slot.
struct PendingSlot<'a, K: Hash + Eq, V> {
    cache: &'a DispatchCache<K, V>,
    key: &'a K,
    slot: Slot<V>,
}

impl<K: Hash + Eq, V> Drop for PendingSlot<'_, K, V> {
    fn drop(&mut self) {
        let mut slots = self.cache.slots.lock();
        let ours = std::mem::take(&mut self.slot);
        // Claims are taken and released under the lock, so two strong
        // references are the map's and ours.
        let abandoned = slots.pending.get(self.key).is_some_and(|pending| {
            Arc::ptr_eq(pending, &ours) && Arc::strong_count(pending) == 2
        });
        drop(ours);
        if abandoned {
            slots.pending.remove(self.key);
        }
    }
}

/// Memoized front of an [`ExecutionAdapter`].
pub struct Dispatcher {
    cache: DispatchCache<Signature, RawExecution>,
    adapter: Arc<dyn ExecutionAdapter>,
}

impl Dispatcher {
    pub fn new(adapter: Arc<dyn ExecutionAdapter>, capacity: NonZeroUsize) -> Self {
        Self {
            cache: DispatchCache::new(capacity),
            adapter,
        }
    }

    pub fn cache(&self) -> &DispatchCache<Signature, RawExecution> {
        &self.cache
    }

    /// Tool failures are memoized like successes; adapter errors are not.
    pub async fn get_or_execute(&self, signature: &Signature) -> Result<RawExecution> {
        self.cache
            .get_or_try_insert_with(signature, || {
                self.adapter.execute(
                    signature.version,
                    &signature.command,
                    &signature.args,
                    &signature.code,
                )
            })
            .await
    }
}
