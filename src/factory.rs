//! Resource factory interface.

use std::sync::Arc;

/// Creates and destroys raw resources on behalf of a pool.
///
/// The pool never inspects resource internals, it only tracks timestamps and counts.
#[async_trait::async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    /// Resource type produced by this factory.
    type Resource: Send + 'static;
    /// Error type returned by this factory.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new resource.
    ///
    /// The pool bounds this call with its connect timeout, so implementations must be
    /// cancellation-safe.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a resource could not be created.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Close a retired resource.
    ///
    /// Closing is best-effort: errors are logged and the resource is discarded regardless.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the resource was not closed cleanly.
    fn close(&self, resource: Self::Resource) -> Result<(), Self::Error> {
        drop(resource);
        Ok(())
    }

    /// Clear per-use state of a resource being returned to the pool.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the resource could not be reset. Such a resource is retired instead of
    /// being reused.
    fn reset(&self, _resource: &mut Self::Resource) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<F: ResourceFactory> ResourceFactory for Arc<F> {
    type Resource = F::Resource;
    type Error = F::Error;

    async fn create(&self) -> Result<Self::Resource, Self::Error> {
        F::create(self).await
    }

    fn close(&self, resource: Self::Resource) -> Result<(), Self::Error> {
        F::close(self, resource)
    }

    fn reset(&self, resource: &mut Self::Resource) -> Result<(), Self::Error> {
        F::reset(self, resource)
    }
}

/// Factory with controllable latency and failures, for testing purposes.
#[cfg(test)]
pub(crate) mod mock {
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    use parking_lot::Mutex;

    use super::ResourceFactory;

    /// Error produced by [`MockFactory`].
    #[derive(Debug, thiserror::Error)]
    #[error("mock factory failure")]
    pub(crate) struct MockError;

    /// Resource produced by [`MockFactory`].
    #[derive(Debug, PartialEq, Eq)]
    pub(crate) struct MockConn {
        pub(crate) serial: usize,
    }

    #[derive(Default)]
    pub(crate) struct MockFactory {
        pub(crate) created: AtomicUsize,
        pub(crate) closed: AtomicUsize,
        pub(crate) resets: AtomicUsize,
        pub(crate) fail_create: AtomicBool,
        /// Number of upcoming creations to fail.
        pub(crate) fail_next: AtomicUsize,
        pub(crate) fail_reset: AtomicBool,
        pub(crate) delay: Mutex<Duration>,
    }

    impl MockFactory {
        pub(crate) fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        pub(crate) fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }

        pub(crate) fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }
    }

    #[async_trait::async_trait]
    impl ResourceFactory for MockFactory {
        type Resource = MockConn;
        type Error = MockError;

        async fn create(&self) -> Result<MockConn, MockError> {
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let fail_once = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail_once || self.fail_create.load(Ordering::SeqCst) {
                return Err(MockError);
            }
            let serial = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(MockConn { serial })
        }

        fn close(&self, _resource: MockConn) -> Result<(), MockError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn reset(&self, _resource: &mut MockConn) -> Result<(), MockError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            if self.fail_reset.load(Ordering::SeqCst) {
                return Err(MockError);
            }
            Ok(())
        }
    }
}
