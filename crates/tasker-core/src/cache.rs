//! Concurrent, lazily populated resource cache.
//!
//! [`ResourceCache`] maps a string key to a resource created on first use by
//! an owner-supplied [`Preparer`]. Creation happens at most once per key
//! under concurrent access, failures are never cached, and the whole cache is
//! torn down in bulk by [`ResourceCache::close`].
//!
//! ## Locking
//!
//! The key table sits behind a shared/exclusive lock. Lookups take the shared
//! lock; a miss re-checks under the exclusive lock before inserting an empty
//! per-key slot. The expensive creation itself runs through that slot
//! *outside* the table lock, so a slow creation for one key never blocks
//! lookups or creations for other keys, while racing callers for the same key
//! wait on the same slot and observe the same resource.
//!
//! ## After `close`
//!
//! A closed cache stays closed: every later [`ResourceCache::get`] fails with
//! [`Closed`]. A creation that was already running when the cache closed
//! finishes, releases its resource and reports [`Closed`] as well.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;

/// Returned by [`ResourceCache::get`] once the cache has been closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, thiserror::Error)]
#[error("Resource cache is closed")]
pub struct Closed;

/// Creates the resource for a key on behalf of a [`ResourceCache`].
///
/// `prepare` may run concurrently for different keys. The cache guarantees
/// it is not invoked twice concurrently for the same key, but a key whose
/// creation failed is prepared again on the next lookup.
pub trait Preparer: Send + Sync {
    type Resource: Release + Send + Sync + 'static;
    type Error: From<Closed> + Send;

    fn prepare(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Self::Resource, Self::Error>> + Send;
}

/// Teardown hook for cached resources, run once per resource on close.
pub trait Release {
    type Error: fmt::Display;

    fn release(&self) -> Result<(), Self::Error>;
}

/// Per-key cell. Whoever flips `released` first (`close` or a creator that
/// finished after `close`) owns the release of the resource.
struct Slot<R> {
    cell: OnceCell<Arc<R>>,
    released: AtomicBool,
}

impl<R: Release> Slot<R> {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            released: AtomicBool::new(false),
        }
    }

    /// Releases the resource if it exists and nobody released it yet.
    /// Returns `None` when there was nothing left to release.
    fn release(&self) -> Option<Result<(), R::Error>> {
        let resource = self.cell.get()?;
        if self.released.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(resource.release())
    }
}

struct Entries<R> {
    slots: HashMap<String, Arc<Slot<R>>>,
    closed: bool,
}

/// Memoizing key to resource store with single-flight creation per key.
pub struct ResourceCache<P: Preparer> {
    entries: RwLock<Entries<P::Resource>>,
    preparer: P,
}

impl<P: Preparer> ResourceCache<P> {
    pub fn new(preparer: P) -> Self {
        Self {
            entries: RwLock::new(Entries {
                slots: HashMap::new(),
                closed: false,
            }),
            preparer,
        }
    }

    /// Returns the preparer backing this cache.
    pub const fn preparer(&self) -> &P {
        &self.preparer
    }

    /// Returns the resource for `key`, creating it if this is the first
    /// successful lookup.
    ///
    /// # Errors
    ///
    /// Returns the preparer's error if creation fails (nothing is cached, so
    /// the next call retries), or [`Closed`] once the cache has been closed.
    pub async fn get(&self, key: &str) -> Result<Arc<P::Resource>, P::Error> {
        let slot = self.slot(key)?;
        if let Some(resource) = slot.cell.get() {
            return Ok(Arc::clone(resource));
        }

        let mut created = false;
        let flag = &mut created;
        let resource = slot
            .cell
            .get_or_try_init(|| async move {
                let resource = self.preparer.prepare(key).await?;
                *flag = true;
                Ok::<_, P::Error>(Arc::new(resource))
            })
            .await
            .map(Arc::clone)?;

        if self.is_closed() {
            // `close` may have drained this slot before or after it was
            // filled; the slot flag decides which side releases.
            if created {
                if let Some(Err(err)) = slot.release() {
                    tracing::debug!(key = %key, "failed to release resource created after close: {err}");
                }
            }
            return Err(Closed.into());
        }

        if created {
            tracing::trace!(key = %key, "resource created");
        }

        Ok(resource)
    }

    /// Looks up `key` and hands the resource to `work`.
    ///
    /// Errors from `work` are returned as they are; only lookup failures are
    /// converted into `E`.
    pub async fn with<T, E, F, Fut>(&self, key: &str, work: F) -> Result<T, E>
    where
        F: FnOnce(Arc<P::Resource>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<P::Error>,
    {
        let resource = self.get(key).await?;
        work(resource).await
    }

    /// Closes the cache and releases every created resource.
    ///
    /// Release failures are logged and skipped so that one failing resource
    /// does not keep the rest alive. Calling `close` again is a no-op.
    pub fn close(&self) {
        let slots = {
            let mut entries = self.entries.write();
            entries.closed = true;
            core::mem::take(&mut entries.slots)
        };

        let mut released = 0_usize;
        for (key, slot) in slots {
            match slot.release() {
                Some(Ok(())) => released += 1,
                Some(Err(err)) => {
                    tracing::debug!(key = %key, "failed to release cached resource: {err}");
                }
                None => {}
            }
        }

        tracing::debug!(released, "resource cache closed");
    }

    pub fn is_closed(&self) -> bool {
        self.entries.read().closed
    }

    /// Number of keys with a created or in-progress resource.
    pub fn len(&self) -> usize {
        self.entries.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Result<Arc<Slot<P::Resource>>, Closed> {
        {
            let entries = self.entries.read();
            if entries.closed {
                return Err(Closed);
            }
            if let Some(slot) = entries.slots.get(key) {
                return Ok(Arc::clone(slot));
            }
        }

        let mut entries = self.entries.write();
        if entries.closed {
            return Err(Closed);
        }
        Ok(Arc::clone(
            entries
                .slots
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Slot::new())),
        ))
    }
}

impl<P: Preparer> fmt::Debug for ResourceCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read();
        f.debug_struct("ResourceCache")
            .field("len", &entries.slots.len())
            .field("closed", &entries.closed)
            .finish_non_exhaustive()
    }
}
