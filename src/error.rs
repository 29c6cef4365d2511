//! Error types and error support code.

/// Error returned by pool operations.
///
/// Generic over the error type `E` of the resource factory.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error<E> {
    /// Resource acquisition took longer than the specified timeout.
    #[error("resource acquisition timeout")]
    AcquireTimeout,
    /// Resource factory failed to create a new resource.
    #[error("resource creation failed: {0}")]
    Connect(#[source] E),
    /// Resource factory did not create a new resource within the connect timeout.
    #[error("resource creation timeout")]
    ConnectTimeout,
    /// Pool was shut down.
    #[error("pool is closed")]
    Closed,
    /// Call would block, and non-blocking operation was requested.
    #[error("acquisition from pool would block execution")]
    WouldBlock,
}

impl<E> Error<E> {
    /// Whether this error was caused by an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::AcquireTimeout | Self::ConnectTimeout)
    }

    /// Whether the resource factory was involved in this error.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::ConnectTimeout)
    }
}

/// Pool configuration error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Pool must be able to hold at least one resource.
    #[error("maximum pool size must be greater than zero")]
    ZeroMaxSize,
    /// Creating a resource must be allowed to take some time.
    #[error("connect timeout must be greater than zero")]
    ZeroConnectTimeout,
}
