use std::{
    fmt, mem,
    ops::Deref,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, debug_span, trace, warn, Instrument};

use crate::{
    clock::{Clock, TokioClock},
    config::PoolConfig,
    error::{ConfigError, Error},
    factory::ResourceFactory,
    metrics::{pool_kv, Metrics, PoolState, POOL_METRICS},
    policy::{Expiry, ExpiryPolicy},
    resource::{Pooled, Resource},
    waiter::{Grant, WaiterQueue},
};

/// Bounded resource pool with age and idle retirement.
///
/// Resources are created lazily through a [`ResourceFactory`], reused while fresh, and closed
/// once they exceed maximum age or idle time. Callers unable to get a resource immediately are
/// queued and served in arrival order.
///
/// This struct can be cloned and transferred across thread boundaries and uses reference
/// counting for its internal state. Idle resources are closed once the last handle and the last
/// checked out resource are dropped.
pub struct Pool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

struct PoolInner<F: ResourceFactory> {
    /// Creates and closes resources.
    factory: F,
    /// Time source for resource timestamps.
    clock: Box<dyn Clock>,
    policy: ExpiryPolicy,
    connect_timeout: Duration,
    /// Pool label.
    label: [KeyValue; 1],
    /// Linked metrics storage.
    metrics: Arc<Metrics>,
    metrics_interval: Duration,
    /// Time of last gathering of common pool metrics.
    last_gathered_at: Mutex<std::time::Instant>,
    next_id: AtomicU64,
    slots: Mutex<Slots<F::Resource>>,
}

/// Mutable pool state, guarded by a single lock.
struct Slots<T> {
    /// Idle resources, most recently released last.
    free: Vec<Resource<T>>,
    /// Checked out resources, plus slots reserved for creation.
    outstanding: usize,
    max_size: usize,
    waiters: WaiterQueue<T>,
    closed: bool,
}

impl<T> Slots<T> {
    fn has_capacity(&self) -> bool {
        self.outstanding + self.free.len() < self.max_size
    }

    /// Reserve a slot on behalf of the oldest live waiter.
    ///
    /// Returns `false` if there is no spare capacity or no one to hand it to.
    fn grant_slot(&mut self) -> bool {
        if self.closed || !self.has_capacity() {
            return false;
        }
        self.outstanding += 1;
        if self.waiters.grant(Grant::Create, Instant::now()).is_ok() {
            true
        } else {
            self.outstanding -= 1;
            false
        }
    }

    fn state(&self, now: Instant) -> PoolState {
        PoolState {
            max_size: self.max_size,
            size: self.outstanding + self.free.len(),
            idle: self.free.len(),
            in_use: self.outstanding,
            waiting: self.waiters.live(now),
        }
    }
}

/// Result of the synchronous part of acquisition.
enum Checkout<T> {
    Ready(Resource<T>),
    /// Slot is reserved, resource must be created.
    Create,
    Wait(u64, oneshot::Receiver<Grant<T>>),
}

impl<F: ResourceFactory> Pool<F> {
    /// Create a new pool using the tokio timer as its clock.
    ///
    /// No resources are created until first requested.
    ///
    /// # Errors
    ///
    /// Returns `Err` if configuration is invalid.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, ConfigError> {
        Self::with_clock(factory, config, TokioClock)
    }

    /// Create a new pool using provided clock for resource age and idle time calculations.
    ///
    /// # Errors
    ///
    /// Returns `Err` if configuration is invalid.
    pub fn with_clock(
        factory: F,
        config: PoolConfig,
        clock: impl Clock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let label = pool_kv(config.name.as_deref());
        let metrics = POOL_METRICS.deref().clone();
        let slots = Slots {
            free: Vec::with_capacity(config.max_size),
            outstanding: 0,
            max_size: config.max_size,
            waiters: WaiterQueue::default(),
            closed: false,
        };
        metrics.record_state(&label, &slots.state(Instant::now()));
        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                clock: Box::new(clock),
                policy: ExpiryPolicy::new(config.max_age, config.max_idle),
                connect_timeout: config.connect_timeout,
                label,
                metrics,
                metrics_interval: config.metrics_interval,
                last_gathered_at: Mutex::new(std::time::Instant::now()),
                next_id: AtomicU64::new(1),
                slots: Mutex::new(slots),
            }),
        })
    }

    /// Acquire a resource, waiting up to `timeout` for one to become available.
    ///
    /// Resource creation, if needed, is bounded by both the connect timeout and the remaining
    /// time until the deadline. Dropping the returned future at any point is safe: the caller
    /// leaves the waiter queue, and anything already granted to it goes back to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AcquireTimeout`] if nothing was granted before the deadline,
    /// [`Error::Connect`] or [`Error::ConnectTimeout`] if resource creation failed, and
    /// [`Error::Closed`] if the pool was shut down.
    pub async fn acquire(&self, timeout: Duration) -> Result<Pooled<F>, Error<F::Error>> {
        let now = std::time::Instant::now();
        let span = debug_span!(
            "pool_acquire",
            name = self.inner.label[0].value.as_str().as_ref()
        );
        let deadline = deadline_after(Instant::now(), timeout);
        let result = self.inner.acquire(deadline).instrument(span).await;
        self.finish_acquire(now, result)
    }

    /// Instantly acquire an idle resource from the pool.
    ///
    /// Never creates new resources.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WouldBlock`] if there are no idle resources, and [`Error::Closed`] if
    /// the pool was shut down.
    pub fn try_acquire(&self) -> Result<Pooled<F>, Error<F::Error>> {
        let now = std::time::Instant::now();
        let span = debug_span!(
            "pool_try_acquire",
            name = self.inner.label[0].value.as_str().as_ref()
        )
        .entered();
        let result = self.inner.try_acquire();
        drop(span);
        self.finish_acquire(now, result)
    }

    /// Internal method to record metrics after resource acquisition.
    #[inline]
    fn finish_acquire(
        &self,
        before: std::time::Instant,
        result: Result<Resource<F::Resource>, Error<F::Error>>,
    ) -> Result<Pooled<F>, Error<F::Error>> {
        let result = match result {
            Ok(resource) => {
                self.inner
                    .metrics
                    .wait_time
                    .record(before.elapsed().as_secs_f64(), &self.inner.label);
                Ok(Pooled::new(self.clone(), resource))
            }
            Err(err) => {
                if matches!(err, Error::AcquireTimeout) {
                    self.inner.metrics.timeouts.add(1, &self.inner.label);
                }
                Err(err)
            }
        };
        self.update_metrics();
        result
    }

    /// Return a resource to the pool.
    ///
    /// Same as dropping it.
    pub fn release(&self, resource: Pooled<F>) {
        drop(resource);
    }

    /// Close the pool.
    ///
    /// Idle resources are closed immediately, checked out ones once returned. Pending and
    /// future acquisitions fail with [`Error::Closed`].
    pub fn shutdown(&self) {
        let idle = {
            let mut slots = self.inner.slots.lock();
            if slots.closed {
                return;
            }
            slots.closed = true;
            slots.waiters.clear();
            mem::take(&mut slots.free)
        };
        debug!(idle = idle.len(), "shutting down pool");
        for resource in idle {
            self.inner.close(resource, "pool closed");
        }
    }

    /// Whether [`Self::shutdown`] was called.
    pub fn is_closed(&self) -> bool {
        self.inner.slots.lock().closed
    }

    /// Close all idle resources, keeping the pool open.
    pub fn clear(&self) {
        let idle = {
            let mut slots = self.inner.slots.lock();
            let idle = mem::take(&mut slots.free);
            while slots.grant_slot() {}
            idle
        };
        for resource in idle {
            self.inner.close(resource, "pool cleared");
        }
    }

    /// Change maximum pool size.
    ///
    /// Growing the pool lets queued waiters create resources right away. Shrinking it closes
    /// surplus idle resources; surplus checked out ones are closed as they are returned.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `max_size` is zero.
    pub fn resize(&self, max_size: usize) -> Result<(), ConfigError> {
        if max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        let surplus: Vec<_> = {
            let mut slots = self.inner.slots.lock();
            slots.max_size = max_size;
            let excess = (slots.outstanding + slots.free.len())
                .saturating_sub(max_size)
                .min(slots.free.len());
            // Least recently released resources go first.
            let surplus = slots.free.drain(..excess).collect();
            while slots.grant_slot() {}
            surplus
        };
        debug!(max_size, closing = surplus.len(), "resized pool");
        for resource in surplus {
            self.inner.close(resource, "pool shrunk");
        }
        Ok(())
    }

    /// Get current pool counts.
    pub fn status(&self) -> PoolState {
        self.inner.slots.lock().state(Instant::now())
    }

    /// Resource factory used by this pool.
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }

    /// Manually update pool metrics.
    ///
    /// Normally you wouldn't need to call this directly, as metrics collection occurs
    /// automatically as you use the pool.
    pub fn update_metrics(&self) {
        let mut last_gathered_at = self.inner.last_gathered_at.lock();
        if last_gathered_at.elapsed() > self.inner.metrics_interval {
            *last_gathered_at = std::time::Instant::now();
            drop(last_gathered_at);
            self.inner
                .metrics
                .record_state(&self.inner.label, &self.status());
        }
    }

    pub(crate) fn now(&self) -> Instant {
        self.inner.clock.now()
    }

    pub(crate) fn checkin(&self, resource: Resource<F::Resource>) {
        self.inner.checkin(resource);
    }

    pub(crate) fn detached(&self, id: u64) {
        debug!(resource = id, "detached resource from pool");
        self.inner.release_slot();
    }

    pub(crate) fn record_use_time(&self, elapsed: Duration) {
        self.inner
            .metrics
            .use_time
            .record(elapsed.as_secs_f64(), &self.inner.label);
    }
}

impl<F: ResourceFactory> PoolInner<F> {
    async fn acquire(&self, deadline: Instant) -> Result<Resource<F::Resource>, Error<F::Error>> {
        match self.checkout(deadline)? {
            Checkout::Ready(resource) => {
                trace!(resource = resource.id, "reusing idle resource");
                Ok(resource)
            }
            Checkout::Create => self.create(deadline).await,
            Checkout::Wait(id, rx) => self.wait(id, rx, deadline).await,
        }
    }

    fn try_acquire(&self) -> Result<Resource<F::Resource>, Error<F::Error>> {
        let mut stale = Vec::new();
        let result = {
            let mut slots = self.slots.lock();
            if slots.closed {
                return Err(Error::Closed);
            }
            self.pop_fresh(&mut slots, &mut stale)
                .ok_or(Error::WouldBlock)
        };
        for (resource, expiry) in stale {
            self.close(resource, expiry);
        }
        result
    }

    /// Take a fresh idle resource, reserve a slot for creation, or join the waiter queue.
    fn checkout(&self, deadline: Instant) -> Result<Checkout<F::Resource>, Error<F::Error>> {
        let mut stale = Vec::new();
        let checkout = {
            let mut slots = self.slots.lock();
            if slots.closed {
                return Err(Error::Closed);
            }
            if let Some(resource) = self.pop_fresh(&mut slots, &mut stale) {
                Checkout::Ready(resource)
            } else if slots.has_capacity() {
                slots.outstanding += 1;
                Checkout::Create
            } else {
                let (id, rx) = slots.waiters.push(deadline);
                trace!(waiter = id, "pool exhausted, queueing");
                Checkout::Wait(id, rx)
            }
        };
        for (resource, expiry) in stale {
            self.close(resource, expiry);
        }
        Ok(checkout)
    }

    /// Pop the most recently released fresh resource, moving stale ones out to be closed.
    fn pop_fresh(
        &self,
        slots: &mut Slots<F::Resource>,
        stale: &mut Vec<(Resource<F::Resource>, Expiry)>,
    ) -> Option<Resource<F::Resource>> {
        let now = self.clock.now();
        while let Some(resource) = slots.free.pop() {
            match self
                .policy
                .check_free(resource.created_at, resource.last_released_at, now)
            {
                Expiry::Fresh => {
                    slots.outstanding += 1;
                    return Some(resource);
                }
                expiry => stale.push((resource, expiry)),
            }
        }
        None
    }

    /// Create a resource in a slot already reserved by the caller.
    async fn create(&self, deadline: Instant) -> Result<Resource<F::Resource>, Error<F::Error>> {
        let reservation = Reservation {
            pool: self,
            armed: true,
        };
        let started = Instant::now();
        let connect_deadline = deadline_after(started, self.connect_timeout);
        let (bound, elapsed_err): (Instant, Error<F::Error>) = if connect_deadline <= deadline {
            (connect_deadline, Error::ConnectTimeout)
        } else {
            (deadline, Error::AcquireTimeout)
        };
        let handle = match tokio::time::timeout_at(bound, self.factory.create()).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                warn!(error = %err, "failed to create resource");
                return Err(Error::Connect(err));
            }
            Err(_) => {
                warn!(
                    elapsed = ?started.elapsed(),
                    "resource creation did not finish in time"
                );
                return Err(elapsed_err);
            }
        };
        self.metrics
            .create_time
            .record(started.elapsed().as_secs_f64(), &self.label);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resource = Resource::new(id, self.clock.now(), handle);
        if self.slots.lock().closed {
            self.close(resource, "pool closed");
            return Err(Error::Closed);
        }
        reservation.commit();
        debug!(resource = id, "created resource");
        Ok(resource)
    }

    /// Wait in the queue until granted something, or until the deadline.
    async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<Grant<F::Resource>>,
        deadline: Instant,
    ) -> Result<Resource<F::Resource>, Error<F::Error>> {
        let mut ticket = WaitTicket {
            pool: self,
            id,
            rx,
            settled: false,
        };
        let grant = match tokio::time::timeout_at(deadline, &mut ticket.rx).await {
            Ok(Ok(grant)) => {
                ticket.settled = true;
                grant
            }
            Ok(Err(_)) => {
                // Grant slot was closed by shutdown, or we were skipped as expired.
                ticket.settled = true;
                return Err(if self.slots.lock().closed {
                    Error::Closed
                } else {
                    Error::AcquireTimeout
                });
            }
            Err(_) => match ticket.abandon() {
                Some(grant) => grant,
                None => {
                    debug!(waiter = id, "timed out waiting for resource");
                    return Err(Error::AcquireTimeout);
                }
            },
        };
        match grant {
            Grant::Resource(resource) => {
                trace!(waiter = id, resource = resource.id, "received resource");
                Ok(resource)
            }
            Grant::Create => self.create(deadline).await,
        }
    }

    /// Take back a resource returned by its user.
    fn checkin(&self, mut resource: Resource<F::Resource>) {
        let reset = self.factory.reset(&mut resource.handle);
        if let Err(err) = &reset {
            warn!(resource = resource.id, error = %err, "failed to reset resource");
        }
        let now = self.clock.now();
        let retired = {
            let mut slots = self.slots.lock();
            let reason = if slots.closed {
                Some("pool closed")
            } else if reset.is_err() {
                Some("reset failed")
            } else if self.policy.is_aged(resource.created_at, now) {
                Some("max age exceeded")
            } else if slots.outstanding + slots.free.len() > slots.max_size {
                Some("pool shrunk")
            } else {
                None
            };
            match reason {
                Some(reason) => {
                    slots.outstanding = slots.outstanding.saturating_sub(1);
                    slots.grant_slot();
                    Some((resource, reason))
                }
                None => {
                    resource.last_released_at = now;
                    // Hand over directly, so that the oldest waiter is not overtaken.
                    if let Err(grant) = slots
                        .waiters
                        .grant(Grant::Resource(resource), Instant::now())
                    {
                        slots.outstanding = slots.outstanding.saturating_sub(1);
                        if let Grant::Resource(resource) = grant {
                            slots.free.push(resource);
                        }
                    }
                    None
                }
            }
        };
        if let Some((resource, reason)) = retired {
            self.close(resource, reason);
        }
    }

    /// Give up a reserved slot, passing it on to the oldest live waiter.
    fn release_slot(&self) {
        let mut slots = self.slots.lock();
        slots.outstanding = slots.outstanding.saturating_sub(1);
        slots.grant_slot();
    }

    /// Put back a grant its waiter no longer wants.
    fn return_grant(&self, grant: Grant<F::Resource>) {
        match grant {
            Grant::Resource(resource) => self.checkin(resource),
            Grant::Create => self.release_slot(),
        }
    }

    /// Close a resource, logging failures.
    fn close(&self, resource: Resource<F::Resource>, reason: impl fmt::Display) {
        let id = resource.id;
        match self.factory.close(resource.handle) {
            Ok(()) => debug!(resource = id, %reason, "closed resource"),
            Err(err) => warn!(resource = id, %reason, error = %err, "failed to close resource"),
        }
    }
}

/// Slot reserved for resource creation.
///
/// Released back to the pool unless committed, including when creation is cancelled.
struct Reservation<'a, F: ResourceFactory> {
    pool: &'a PoolInner<F>,
    armed: bool,
}

impl<F: ResourceFactory> Reservation<'_, F> {
    fn commit(mut self) {
        self.armed = false;
    }
}

impl<F: ResourceFactory> Drop for Reservation<'_, F> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

/// Place in the waiter queue.
///
/// Leaves the queue when dropped unsettled, returning any grant that raced in.
struct WaitTicket<'a, F: ResourceFactory> {
    pool: &'a PoolInner<F>,
    id: u64,
    rx: oneshot::Receiver<Grant<F::Resource>>,
    settled: bool,
}

impl<F: ResourceFactory> WaitTicket<'_, F> {
    /// Leave the queue, returning a grant if one was already sent.
    fn abandon(&mut self) -> Option<Grant<F::Resource>> {
        self.settled = true;
        let removed = self.pool.slots.lock().waiters.remove(self.id);
        if removed {
            return None;
        }
        // Grants are sent under the pool lock, so anything sent is already in the slot.
        self.rx.close();
        self.rx.try_recv().ok()
    }
}

impl<F: ResourceFactory> Drop for WaitTicket<'_, F> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(grant) = self.abandon() {
            trace!(waiter = self.id, "returning grant of cancelled waiter");
            self.pool.return_grant(grant);
        }
    }
}

/// Compute a deadline, saturating instead of overflowing.
fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    // Roughly 30 years.
    const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

impl<F: ResourceFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ResourceFactory> Drop for PoolInner<F> {
    fn drop(&mut self) {
        let idle = mem::take(&mut self.slots.get_mut().free);
        for resource in idle {
            self.close(resource, "pool dropped");
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.label[0].value.as_str())
            .field("state", &self.status())
            .finish_non_exhaustive()
    }
}
