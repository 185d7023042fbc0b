//! Per-table FIFO ordering.
//!
//! Batches for one table must apply in the order their poll cycles
//! produced them, even though their row loads may overlap. A
//! [`FifoGate`] hands out [`Ticket`]s in call order; each ticket's turn
//! comes when the previous ticket is dropped. Claim the ticket
//! synchronously at dispatch time, do the slow loading work, then await
//! [`Ticket::turn`] and hold the ticket until the batch is fully
//! applied.
//!
//! Tickets chain through oneshot channels, so a ticket dropped early
//! (abandoned dispatch, panic) releases its successor instead of
//! wedging the table.

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Hands out FIFO turn tickets for one table.
#[derive(Debug, Default)]
pub struct FifoGate {
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FifoGate {
    /// Creates a gate with no outstanding tickets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the next turn. Tickets get their turns in the order this
    /// method was called.
    #[must_use]
    pub fn ticket(&self) -> Ticket {
        let (release, turn) = oneshot::channel();
        let prev = self.tail.lock().replace(turn);
        Ticket {
            prev,
            release: Some(release),
        }
    }
}

/// One claimed turn at a [`FifoGate`].
///
/// Dropping the ticket releases the next one, whether or not
/// [`turn`](Ticket::turn) was ever awaited.
#[derive(Debug)]
pub struct Ticket {
    prev: Option<oneshot::Receiver<()>>,
    release: Option<oneshot::Sender<()>>,
}

impl Ticket {
    /// Waits until every earlier ticket has been dropped.
    pub async fn turn(&mut self) {
        if let Some(prev) = self.prev.take() {
            // A dropped predecessor closes the channel, which is just
            // as good as an explicit release.
            let _ = prev.await;
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            let _ = release.send(());
        }
    }
}
