//! Resource expiration policy.
//!
//! Checks are lazy: they run when a free resource is about to be handed out, and when a
//! resource is returned to the pool. No background timer is involved.

use std::{fmt, time::Duration};

use tokio::time::Instant;

/// Reason for retiring a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Expiry {
    /// Resource is fit for reuse.
    Fresh,
    /// Resource lived past maximum age.
    Aged,
    /// Resource sat in the free list past maximum idle time.
    Idle,
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fresh => "fresh",
            Self::Aged => "max age exceeded",
            Self::Idle => "max idle time exceeded",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExpiryPolicy {
    /// Zero disables reuse entirely.
    max_age: Duration,
    /// Zero disables reuse entirely.
    max_idle: Duration,
}

impl ExpiryPolicy {
    pub(crate) fn new(max_age: Duration, max_idle: Duration) -> Self {
        Self { max_age, max_idle }
    }

    /// Check a resource sitting in the free list.
    pub(crate) fn check_free(
        &self,
        created_at: Instant,
        last_released_at: Instant,
        now: Instant,
    ) -> Expiry {
        if self.is_aged(created_at, now) {
            Expiry::Aged
        } else if now.saturating_duration_since(last_released_at) >= self.max_idle {
            Expiry::Idle
        } else {
            Expiry::Fresh
        }
    }

    /// Check a resource being returned to the pool.
    pub(crate) fn is_aged(&self, created_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(created_at) >= self.max_age
    }
}
