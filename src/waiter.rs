//! FIFO queue of acquire requests waiting for capacity.

use std::collections::VecDeque;

use tokio::{sync::oneshot, time::Instant};
use tracing::trace;

use crate::resource::Resource;

/// Outcome handed to a waiter.
pub(crate) enum Grant<T> {
    /// Recently released resource, transferred directly.
    Resource(Resource<T>),
    /// Slot already reserved on behalf of the waiter, which must create the resource itself.
    Create,
}

/// Pending acquire request.
struct Waiter<T> {
    id: u64,
    deadline: Instant,
    tx: oneshot::Sender<Grant<T>>,
}

pub(crate) struct WaiterQueue<T> {
    queue: VecDeque<Waiter<T>>,
    next_id: u64,
}

impl<T> Default for WaiterQueue<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            next_id: 0,
        }
    }
}

impl<T> WaiterQueue<T> {
    /// Append a waiter, returning its identifier and the receiving end of its grant slot.
    pub(crate) fn push(&mut self, deadline: Instant) -> (u64, oneshot::Receiver<Grant<T>>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.queue.push_back(Waiter { id, deadline, tx });
        (id, rx)
    }

    /// Deregister a waiter.
    ///
    /// Returns `false` if the waiter is no longer queued, meaning it was either granted or
    /// skipped.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        // Waiters leaving on their own are usually near the front.
        match self.queue.iter().position(|waiter| waiter.id == id) {
            Some(idx) => {
                self.queue.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Hand a grant to the oldest live waiter.
    ///
    /// Waiters with an elapsed deadline or a dropped receiver are discarded along the way.
    /// The grant is returned back if nobody took it.
    pub(crate) fn grant(&mut self, mut grant: Grant<T>, now: Instant) -> Result<(), Grant<T>> {
        while let Some(waiter) = self.queue.pop_front() {
            if waiter.deadline <= now {
                trace!(waiter = waiter.id, "skipping expired waiter");
                continue;
            }
            match waiter.tx.send(grant) {
                Ok(()) => {
                    trace!(waiter = waiter.id, "granted waiter");
                    return Ok(());
                }
                Err(returned) => grant = returned,
            }
        }
        Err(grant)
    }

    /// Number of waiters still within their deadline.
    pub(crate) fn live(&self, now: Instant) -> usize {
        self.queue
            .iter()
            .filter(|waiter| waiter.deadline > now && !waiter.tx.is_closed())
            .count()
    }

    /// Drop all waiters, closing their grant slots.
    pub(crate) fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const SEC: Duration = Duration::from_secs(1);

    /// Grants are served in arrival order.
    #[test]
    fn fifo() {
        let now = Instant::now();
        let mut queue = WaiterQueue::<()>::default();
        let (_, mut first) = queue.push(now + SEC);
        let (_, mut second) = queue.push(now + SEC);
        assert!(queue.grant(Grant::Create, now).is_ok());
        assert!(matches!(first.try_recv(), Ok(Grant::Create)));
        assert!(second.try_recv().is_err());
        assert_eq!(queue.live(now), 1);
    }

    /// Expired waiters are skipped and their slots closed.
    #[test]
    fn skip_expired() {
        let now = Instant::now();
        let mut queue = WaiterQueue::<()>::default();
        let (_, mut expired) = queue.push(now);
        let (_, mut live) = queue.push(now + SEC);
        assert_eq!(queue.live(now), 1);
        assert!(queue.grant(Grant::Create, now).is_ok());
        assert!(matches!(
            expired.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert!(matches!(live.try_recv(), Ok(Grant::Create)));
    }

    /// Waiters with a dropped receiver are skipped.
    #[test]
    fn skip_abandoned() {
        let now = Instant::now();
        let mut queue = WaiterQueue::<()>::default();
        let (_, abandoned) = queue.push(now + SEC);
        drop(abandoned);
        assert_eq!(queue.live(now), 0);
        assert!(matches!(queue.grant(Grant::Create, now), Err(Grant::Create)));
    }

    /// Removal from the middle of the queue keeps order of the rest.
    #[test]
    fn remove_middle() {
        let now = Instant::now();
        let mut queue = WaiterQueue::<()>::default();
        let (_, mut first) = queue.push(now + SEC);
        let (middle, _middle_rx) = queue.push(now + SEC);
        let (_, mut last) = queue.push(now + SEC);
        assert!(queue.remove(middle));
        assert!(!queue.remove(middle));
        assert!(queue.grant(Grant::Create, now).is_ok());
        assert!(queue.grant(Grant::Create, now).is_ok());
        assert!(matches!(first.try_recv(), Ok(Grant::Create)));
        assert!(matches!(last.try_recv(), Ok(Grant::Create)));
        assert!(queue.grant(Grant::Create, now).is_err());
    }

    /// Clearing closes every grant slot.
    #[test]
    fn clear_closes() {
        let now = Instant::now();
        let mut queue = WaiterQueue::<()>::default();
        let (_, mut rx) = queue.push(now + SEC);
        queue.clear();
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
    }
}
