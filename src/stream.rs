//! Rendezvous pipe feeding a single cell
//!
//! A stream has one pull side (the owning cell's behavior) and any
//! number of concurrent push sides (upstream cells, the mesh front
//! door, named emitters). A send completes only when the pull side
//! takes the event, so each edge holds at most one event in flight
//! and a stuck consumer turns into a finite-time error instead of an
//! unbounded buffer.

use crate::error::{MeshError, Result};
use crate::event::Event;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

/// Total budget a push may wait for the receiving cell
pub(crate) const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial retry sleep, also the per-retry increment
pub(crate) const PUSH_BACKOFF_STEP: Duration = Duration::from_millis(50);

/// One event offered to the pull side; delivery completes on ack.
/// Dropping the ack receiver retracts the offer.
struct Handoff {
    event: Event,
    ack: oneshot::Sender<()>,
}

/// Push side of a cell's input pipe
#[derive(Debug)]
pub(crate) struct Stream {
    tx: mpsc::Sender<Handoff>,
}

impl Stream {
    /// Create a pipe, returning the push side and the pull side
    pub(crate) fn new() -> (Stream, Receptor) {
        let (tx, rx) = mpsc::channel(1);
        (Stream { tx }, Receptor { rx })
    }

    /// Construct an event and send it
    #[cfg(test)]
    pub(crate) async fn emit(&self, topic: &str) -> Result<()> {
        self.emit_event(Event::new(topic)?).await
    }

    /// Bounded-wait send: retries with increasing sleeps (50 ms,
    /// +50 ms per retry) until the pull side takes the event; fails
    /// with a timeout once the 5 s budget is spent. A timed out event
    /// is never delivered.
    pub(crate) async fn emit_event(&self, event: Event) -> Result<()> {
        let mut wait = PUSH_BACKOFF_STEP;
        let mut waited = Duration::ZERO;
        let mut pending = event;
        loop {
            let (ack_tx, mut ack_rx) = oneshot::channel();
            match self.tx.try_send(Handoff {
                event: pending,
                ack: ack_tx,
            }) {
                Ok(()) => {
                    let remaining = PUSH_TIMEOUT.saturating_sub(waited);
                    return match time::timeout(remaining, &mut ack_rx).await {
                        Ok(Ok(())) => Ok(()),
                        // Pull side dropped mid-handoff; the event is lost.
                        Ok(Err(_)) => Err(MeshError::PushTimeout(PUSH_TIMEOUT)),
                        Err(_) => {
                            // Retract the offer; a late ack means the
                            // consumer won the race and got the event.
                            ack_rx.close();
                            match ack_rx.try_recv() {
                                Ok(()) => Ok(()),
                                Err(_) => Err(MeshError::PushTimeout(PUSH_TIMEOUT)),
                            }
                        }
                    };
                }
                Err(TrySendError::Full(handoff)) | Err(TrySendError::Closed(handoff)) => {
                    // Occupied or draining; back off and retry within budget.
                    pending = handoff.event;
                    if waited + wait > PUSH_TIMEOUT {
                        return Err(MeshError::PushTimeout(PUSH_TIMEOUT));
                    }
                    time::sleep(wait).await;
                    waited += wait;
                    wait += PUSH_BACKOFF_STEP;
                }
            }
        }
    }
}

/// Pull side of a cell's input pipe, owned by the cell's behavior
pub struct Receptor {
    rx: mpsc::Receiver<Handoff>,
}

impl Receptor {
    /// Receive the next event
    ///
    /// Completes the producer's pending send. Returns `None` once the
    /// push side is gone.
    pub async fn pull(&mut self) -> Option<Event> {
        loop {
            let handoff = self.rx.recv().await?;
            if handoff.ack.send(()).is_ok() {
                return Some(handoff.event);
            }
            // Producer gave up waiting; skip the retracted event.
        }
    }
}
