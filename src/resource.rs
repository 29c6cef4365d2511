//! Pooled resources and the scoped-acquisition guard.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    time::Duration,
};

use tokio::time::Instant;

use crate::{factory::ResourceFactory, pool::Pool};

/// Resource handle along with pool-managed metadata.
pub(crate) struct Resource<T> {
    /// Pool-unique identifier.
    pub(crate) id: u64,
    /// Creation time.
    pub(crate) created_at: Instant,
    /// Time of last return to the pool.
    pub(crate) last_released_at: Instant,
    /// Original resource.
    pub(crate) handle: T,
}

impl<T> Resource<T> {
    pub(crate) fn new(id: u64, now: Instant, handle: T) -> Self {
        Self {
            id,
            created_at: now,
            last_released_at: now,
            handle,
        }
    }
}

/// Resource checked out from a [`Pool`].
///
/// Returned to the pool exactly once when dropped, on every exit path of the caller.
#[must_use = "resource is returned to the pool immediately if unused"]
pub struct Pooled<F: ResourceFactory> {
    /// Originating pool.
    pool: Pool<F>,
    /// Emptied only by `detach` and `drop`.
    resource: Option<Resource<F::Resource>>,
    /// Retrieval time.
    acquired_at: std::time::Instant,
}

impl<F: ResourceFactory> Pooled<F> {
    pub(crate) fn new(pool: Pool<F>, resource: Resource<F::Resource>) -> Self {
        Self {
            pool,
            resource: Some(resource),
            // This is different from time used in wait_time metric.
            acquired_at: std::time::Instant::now(),
        }
    }

    #[inline]
    fn entry(&self) -> &Resource<F::Resource> {
        self.resource
            .as_ref()
            .expect("pooled resource is present until dropped")
    }

    #[inline]
    fn entry_mut(&mut self) -> &mut Resource<F::Resource> {
        self.resource
            .as_mut()
            .expect("pooled resource is present until dropped")
    }

    /// Pool-unique identifier of this resource.
    pub fn id(this: &Self) -> u64 {
        this.entry().id
    }

    /// Time this resource was created.
    pub fn created_at(this: &Self) -> Instant {
        this.entry().created_at
    }

    /// Time elapsed since this resource was created, according to the pool clock.
    pub fn age(this: &Self) -> Duration {
        this.pool.now().saturating_duration_since(this.entry().created_at)
    }

    /// Pool this resource belongs to.
    pub fn pool(this: &Self) -> &Pool<F> {
        &this.pool
    }

    /// Take this resource out of the pool permanently.
    ///
    /// The slot it occupied becomes available for a new resource.
    pub fn detach(mut this: Self) -> F::Resource {
        let resource = this
            .resource
            .take()
            .expect("pooled resource is present until dropped");
        this.pool.detached(resource.id);
        resource.handle
    }
}

impl<F: ResourceFactory> Deref for Pooled<F> {
    type Target = F::Resource;

    fn deref(&self) -> &Self::Target {
        &self.entry().handle
    }
}

impl<F: ResourceFactory> DerefMut for Pooled<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entry_mut().handle
    }
}

impl<F: ResourceFactory> AsRef<F::Resource> for Pooled<F> {
    fn as_ref(&self) -> &F::Resource {
        self
    }
}

impl<F: ResourceFactory> AsMut<F::Resource> for Pooled<F> {
    fn as_mut(&mut self) -> &mut F::Resource {
        self
    }
}

impl<F> fmt::Debug for Pooled<F>
where
    F: ResourceFactory,
    F::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Pooled");
        if let Some(resource) = &self.resource {
            dbg.field("id", &resource.id)
                .field("created_at", &resource.created_at)
                .field("resource", &resource.handle);
        }
        dbg.finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        // Record time spent outside the pool.
        self.pool.record_use_time(self.acquired_at.elapsed());
        if let Some(resource) = self.resource.take() {
            self.pool.checkin(resource);
        }
    }
}
