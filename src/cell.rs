//! Cells: behavior hosts wired into the subscription graph
//!
//! A cell owns one input stream, runs one behavior on its own task,
//! and broadcasts everything the behavior emits to its current
//! subscribers. The subscription relation is kept symmetric: whenever
//! cell A is in B's fan-out, B is in A's fan-in.

use crate::behavior::Behavior;
use crate::error::Result;
use crate::event::{CellFailed, CellTerminated, Event, TOPIC_ERROR, TOPIC_TERMINATED};
use crate::mesh::{Mesh, MeshInner};
use crate::stream::{Receptor, Stream};
use crate::testbed::TestbedCore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// A cell registered in a mesh
///
/// Owns the input pipe push side and both sides of the subscription
/// relation. Shared between the mesh registry, the cell's own task,
/// and the fan-out sets of its upstream cells.
#[derive(Debug)]
pub(crate) struct CellCore {
    pub(crate) name: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) input: Stream,

    /// Cells subscribed to this one, by name
    fan_out: RwLock<HashMap<String, Arc<CellCore>>>,

    /// Cells this one subscribed to, by name. Weak so subscription
    /// cycles cannot keep dead cells alive.
    fan_in: Mutex<HashMap<String, Weak<CellCore>>>,

    /// Set once the mesh has erased the name; stale emitter handles
    /// observe it and fail like a fresh lookup would
    gone: AtomicBool,

    mesh: Weak<MeshInner>,
}

impl CellCore {
    /// Construct the cell and start its behavior task
    pub(crate) fn spawn(
        name: impl Into<String>,
        cancel: CancellationToken,
        mesh: Weak<MeshInner>,
        behavior: impl Behavior,
    ) -> Arc<CellCore> {
        let (input, receptor) = Stream::new();
        let core = Arc::new(CellCore {
            name: name.into(),
            cancel,
            input,
            fan_out: RwLock::new(HashMap::new()),
            fan_in: Mutex::new(HashMap::new()),
            gone: AtomicBool::new(false),
            mesh,
        });
        tokio::spawn(run_cell(core.clone(), Box::new(behavior), receptor));
        core
    }

    /// Subscribe this cell to the given upstream cell. Idempotent.
    pub(crate) async fn subscribe_to(self: &Arc<Self>, upstream: &Arc<CellCore>) {
        upstream
            .fan_out
            .write()
            .await
            .insert(self.name.clone(), self.clone());
        self.fan_in
            .lock()
            .await
            .insert(upstream.name.clone(), Arc::downgrade(upstream));
        tracing::debug!(emitter = %upstream.name, receptor = %self.name, "subscribed");
    }

    /// Remove the subscription to the given upstream cell. Removing
    /// an absent edge is a no-op.
    pub(crate) async fn unsubscribe_from(self: &Arc<Self>, upstream: &Arc<CellCore>) {
        upstream.fan_out.write().await.remove(&self.name);
        self.fan_in.lock().await.remove(&upstream.name);
        tracing::debug!(emitter = %upstream.name, receptor = %self.name, "unsubscribed");
    }

    /// Deliver an event into this cell's input pipe
    ///
    /// Fails like a fresh lookup once the cell is gone. While the
    /// cell lives the send is bounded-wait; if the cell's context is
    /// cancelled while waiting, the event is dropped silently.
    pub(crate) async fn push(&self, event: Event) -> Result<()> {
        if self.gone.load(Ordering::SeqCst) {
            return Err(crate::error::MeshError::UnknownCell(self.name.clone()));
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            delivered = self.input.emit_event(event) => delivered,
        }
    }

    /// Fan out one event to every current subscriber
    ///
    /// Appends this cell's name to the hop path, then pushes a clone
    /// to each subscriber. Subscribers that terminated concurrently
    /// are tolerated; every subscriber is attempted and the first
    /// push error is returned.
    pub(crate) async fn broadcast(&self, mut event: Event) -> Result<()> {
        event.append_emitter(&self.name);
        let subscribers: Vec<Arc<CellCore>> = {
            let fan_out = self.fan_out.read().await;
            fan_out.values().cloned().collect()
        };
        let mut first_err = None;
        for subscriber in subscribers {
            if let Err(err) = subscriber.push(event.clone()).await {
                tracing::warn!(
                    cell = %self.name,
                    subscriber = %subscriber.name,
                    error = %err,
                    "fan-out push failed"
                );
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Sever every edge touching this cell, in both directions
    ///
    /// After this no further events can enter; runs before the mesh
    /// erases the name.
    async fn detach(self: &Arc<Self>) {
        let upstreams: Vec<Weak<CellCore>> = {
            let mut fan_in = self.fan_in.lock().await;
            fan_in.drain().map(|(_, upstream)| upstream).collect()
        };
        for upstream in upstreams {
            if let Some(upstream) = upstream.upgrade() {
                upstream.fan_out.write().await.remove(&self.name);
            }
        }
        let subscribers: Vec<Arc<CellCore>> = {
            let mut fan_out = self.fan_out.write().await;
            fan_out.drain().map(|(_, subscriber)| subscriber).collect()
        };
        for subscriber in subscribers {
            subscriber.fan_in.lock().await.remove(&self.name);
        }
    }

    pub(crate) fn mark_gone(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) async fn fan_out_len(&self) -> usize {
        self.fan_out.read().await.len()
    }

    #[cfg(test)]
    pub(crate) async fn fan_in_len(&self) -> usize {
        self.fan_in.lock().await.len()
    }
}

/// Backend task hosting a cell's behavior
///
/// When the behavior ends the cell notifies its subscribers, severs
/// its edges, and deregisters from the mesh, in that order.
async fn run_cell(core: Arc<CellCore>, behavior: Box<dyn Behavior>, receptor: Receptor) {
    let cell = Cell {
        inner: CellRef::Mesh(core.clone()),
    };
    let emitter = Emitter {
        inner: CellRef::Mesh(core.clone()),
    };
    tracing::debug!(cell = %core.name, "cell started");

    let notice = match behavior.go(cell, receptor, emitter).await {
        Ok(()) => {
            tracing::debug!(cell = %core.name, "cell terminated");
            Event::with_payload(
                TOPIC_TERMINATED,
                CellTerminated {
                    cell_name: core.name.clone(),
                },
            )
        }
        Err(err) => {
            tracing::warn!(cell = %core.name, error = %err, "cell behavior failed");
            Event::with_payload(
                TOPIC_ERROR,
                CellFailed {
                    cell_name: core.name.clone(),
                    error: err.to_string(),
                },
            )
        }
    };
    if let Ok(notice) = notice {
        // Best effort; subscribers may already be exiting.
        let _ = core.broadcast(notice).await;
    }

    core.detach().await;
    match core.mesh.upgrade() {
        Some(mesh) => mesh.drop_cell(&core.name).await,
        None => core.mark_gone(),
    }
}

/// Reference to the structure backing a behavior's capability
/// handles: a mesh cell, or the testbed's single stubbed cell.
#[derive(Clone)]
enum CellRef {
    Mesh(Arc<CellCore>),
    Testbed(Arc<TestbedCore>),
}

/// A behavior's view of its own cell
#[derive(Clone)]
pub struct Cell {
    inner: CellRef,
}

impl Cell {
    pub(crate) fn testbed(core: Arc<TestbedCore>) -> Cell {
        Cell {
            inner: CellRef::Testbed(core),
        }
    }

    /// The registered name of the cell running the behavior
    pub fn name(&self) -> &str {
        match &self.inner {
            CellRef::Mesh(core) => &core.name,
            CellRef::Testbed(_) => TestbedCore::CELL_NAME,
        }
    }

    /// The cancellation context to observe
    pub fn context(&self) -> &CancellationToken {
        match &self.inner {
            CellRef::Mesh(core) => &core.cancel,
            CellRef::Testbed(core) => &core.cancel,
        }
    }

    /// The surrounding mesh
    ///
    /// Inside a testbed this is a stub whose every operation fails
    /// cleanly, so behaviors depending on the mesh are flagged.
    pub fn mesh(&self) -> Mesh {
        match &self.inner {
            CellRef::Mesh(core) => Mesh::from_weak(&core.mesh),
            CellRef::Testbed(_) => Mesh::stub(),
        }
    }
}

/// A behavior's outbound side: fan-out to every subscribed cell
///
/// In a testbed the same handle captures emitted events into the
/// sink instead of broadcasting.
#[derive(Clone)]
pub struct Emitter {
    inner: CellRef,
}

impl Emitter {
    pub(crate) fn testbed(core: Arc<TestbedCore>) -> Emitter {
        Emitter {
            inner: CellRef::Testbed(core),
        }
    }

    /// Construct an event without payload and emit it
    pub async fn emit(&self, topic: &str) -> Result<()> {
        self.emit_event(Event::new(topic)?).await
    }

    /// Construct an event with a payload and emit it
    pub async fn emit_with(&self, topic: &str, payload: impl Serialize) -> Result<()> {
        self.emit_event(Event::with_payload(topic, payload)?).await
    }

    /// Emit an event to every currently subscribed cell
    pub async fn emit_event(&self, event: Event) -> Result<()> {
        match &self.inner {
            CellRef::Mesh(core) => core.broadcast(event).await,
            CellRef::Testbed(core) => {
                core.capture(event);
                Ok(())
            }
        }
    }
}
