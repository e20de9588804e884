//! Live snapshot subscriptions.
//!
//! A background task watches the store's change revision and publishes a
//! full snapshot into a `watch` channel whenever it moves. Only the latest
//! event is kept: a slow reader skips intermediate states but always sees
//! the most recent one.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::store::Ledger;
use super::types::Snapshot;

/// Something a subscriber should react to.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    /// The ledger's full contents changed.
    Snapshot(Snapshot),
    /// The store could not be read. Delivery resumes once it recovers.
    Unavailable { message: String },
}

/// Handle to a running subscription.
///
/// Dropping the handle (or calling [`Subscription::cancel`]) stops the
/// background task; no further events are produced.
pub struct Subscription {
    events: watch::Receiver<Option<LedgerEvent>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn spawn(ledger: Ledger) -> Self {
        let (tx, events) = watch::channel(None);
        let task = tokio::spawn(watch_ledger(ledger, tx));
        Self { events, task }
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription has stopped.
    pub async fn next(&mut self) -> Option<LedgerEvent> {
        loop {
            self.events.changed().await.ok()?;
            if let Some(event) = self.events.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }

    /// Wait for the next snapshot, skipping availability notices.
    pub async fn next_snapshot(&mut self) -> Option<Snapshot> {
        loop {
            match self.next().await? {
                LedgerEvent::Snapshot(snapshot) => return Some(snapshot),
                LedgerEvent::Unavailable { .. } => {},
            }
        }
    }

    /// The most recent event, without waiting.
    pub fn latest(&self) -> Option<LedgerEvent> {
        self.events.borrow().clone()
    }

    /// Stop delivery.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn watch_ledger(ledger: Ledger, tx: watch::Sender<Option<LedgerEvent>>) {
    let mut local_writes = ledger.local_writes();
    let mut delivered: Option<u64> = None;
    let mut failing = false;

    loop {
        match poll_once(&ledger, delivered).await {
            Ok(Some(snapshot)) => {
                delivered = Some(snapshot.revision);
                failing = false;
                debug!(revision = snapshot.revision, "Publishing snapshot");
                if tx.send(Some(LedgerEvent::Snapshot(snapshot))).is_err() {
                    break;
                }
            },
            Ok(None) => failing = false,
            Err(e) => {
                if !failing {
                    warn!(error = %e, "Ledger subscription cannot read store");
                    failing = true;
                    // Republish in full once the store is back, even if
                    // its revision has not moved.
                    delivered = None;
                    let event = LedgerEvent::Unavailable {
                        message: e.to_string(),
                    };
                    if tx.send(Some(event)).is_err() {
                        break;
                    }
                }
            },
        }

        tokio::select! {
            () = tx.closed() => break,
            changed = local_writes.changed() => {
                // The sender lives in `ledger`, which this task owns.
                if changed.is_err() {
                    break;
                }
            },
            () = tokio::time::sleep(ledger.poll_interval()) => {},
        }
    }
}

/// Returns a snapshot if the store moved past `delivered`.
async fn poll_once(
    ledger: &Ledger,
    delivered: Option<u64>,
) -> crate::error::Result<Option<Snapshot>> {
    if let Some(seen) = delivered {
        let revision = ledger
            .backend()
            .revision()
            .await
            .map_err(|e| crate::error::Error::store_unavailable("watch", e))?;
        if revision == seen {
            return Ok(None);
        }
    }
    ledger.snapshot().await.map(Some)
}
