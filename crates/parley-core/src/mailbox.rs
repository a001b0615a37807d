//! Per-user pending event queue.
//!
//! A mailbox is the unit of delivery: publishers append, a streamer pulls
//! from the front. Waiting consumers park on a [`Notify`] instead of polling.

use parley_protocol::Event;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// FIFO queue of events waiting for one user.
#[derive(Debug, Default)]
pub struct Mailbox {
    /// Pending events, oldest first.
    queue: Mutex<VecDeque<Arc<Event>>>,
    /// Signalled once per published event.
    notify: Notify,
    /// Optional backlog bound; `None` means unbounded.
    capacity: Option<usize>,
}

impl Mailbox {
    /// Create an unbounded mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mailbox that drops its oldest event once `capacity` are pending.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Arc<Event>>> {
        // The queue has no invariant a panicking holder could break.
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event. Never blocks.
    ///
    /// Returns the evicted event if the mailbox is bounded and was full.
    pub fn publish(&self, event: Arc<Event>) -> Option<Arc<Event>> {
        let evicted = {
            let mut queue = self.queue();
            let evicted = match self.capacity {
                Some(capacity) if queue.len() >= capacity => queue.pop_front(),
                _ => None,
            };
            queue.push_back(event);
            trace!(backlog = queue.len(), "Event queued");
            evicted
        };

        if evicted.is_some() {
            debug!("Mailbox full, dropped oldest event");
        }
        self.notify.notify_one();
        evicted
    }

    /// Remove the oldest event without waiting.
    pub fn try_take(&self) -> Option<Arc<Event>> {
        self.queue().pop_front()
    }

    /// Remove the oldest event, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout. Dropping the returned future abandons the
    /// wait without losing any queued event.
    pub async fn take(&self, timeout: Duration) -> Option<Arc<Event>> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a publish between the
            // check and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.try_take() {
                return Some(event);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_take();
            }
        }
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue().len()
    }

    /// Check if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// The backlog bound, if any.
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
