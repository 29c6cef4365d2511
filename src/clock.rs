//! Time source used for resource age and idle calculations.

use tokio::time::Instant;

/// Monotonic time source.
///
/// Only resource timestamps are taken from the clock. Waiter deadlines always
/// follow the tokio timer.
pub trait Clock: Send + Sync + 'static {
    /// Current point in time.
    fn now(&self) -> Instant;
}

/// Clock backed by the tokio timer.
///
/// Honors paused and manually advanced time in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> Instant + Send + Sync + 'static,
{
    fn now(&self) -> Instant {
        self()
    }
}
