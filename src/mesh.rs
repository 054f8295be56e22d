//! Mesh: registry and wiring authority over a set of cells
//!
//! The mesh owns the name→cell map, starts cells, maintains the
//! subscription graph by name, and is the front door for injecting
//! events from outside. All cells share a cancellation context rooted
//! at the mesh.

use crate::behavior::Behavior;
use crate::cell::CellCore;
use crate::error::{MeshError, Result};
use crate::event::Event;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Live registry shared by all handles onto one mesh
pub(crate) struct MeshInner {
    cancel: CancellationToken,
    cells: RwLock<HashMap<String, Arc<CellCore>>>,
}

impl MeshInner {
    /// Erase a terminated cell's name and invalidate its emitter
    /// handles, atomically with respect to the registry lock
    pub(crate) async fn drop_cell(&self, name: &str) {
        let mut cells = self.cells.write().await;
        if let Some(core) = cells.remove(name) {
            core.mark_gone();
            tracing::debug!(cell = %name, "cell dropped");
        }
    }
}

impl Drop for MeshInner {
    fn drop(&mut self) {
        // Last handle gone: wind down all cells.
        self.cancel.cancel();
    }
}

#[derive(Clone)]
enum MeshRef {
    Live(Arc<MeshInner>),
    /// Every operation fails deterministically; handed to behaviors
    /// running under the testbed (and when the registry is gone)
    Stub,
}

/// A closed network of cells communicating along subscription edges
///
/// Cheap to clone; all clones address the same registry. Cells are
/// started with [`Mesh::go`], wired by name with [`Mesh::subscribe`],
/// and fed from outside with [`Mesh::emit`]. Dropping the last handle
/// cancels the mesh context and with it every cell.
///
/// Subscription edges may form cycles; a behavior that blindly
/// re-emits every event into a cycle will spin. The hop path
/// ([`Event::emitters`]) is available to guard against that.
#[derive(Clone)]
pub struct Mesh {
    inner: MeshRef,
}

impl Mesh {
    /// Create a mesh with its own cancellation context
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Create a mesh whose context descends from the given token, so
    /// cancelling it terminates all cells
    pub fn with_token(token: CancellationToken) -> Self {
        Mesh {
            inner: MeshRef::Live(Arc::new(MeshInner {
                cancel: token.child_token(),
                cells: RwLock::new(HashMap::new()),
            })),
        }
    }

    pub(crate) fn stub() -> Self {
        Mesh {
            inner: MeshRef::Stub,
        }
    }

    pub(crate) fn from_weak(weak: &Weak<MeshInner>) -> Self {
        match weak.upgrade() {
            Some(inner) => Mesh {
                inner: MeshRef::Live(inner),
            },
            None => Self::stub(),
        }
    }

    /// Cancel the mesh context, terminating all cells
    pub fn shutdown(&self) {
        if let MeshRef::Live(inner) = &self.inner {
            inner.cancel.cancel();
        }
    }

    /// Start a cell under the given unique name, running the behavior
    /// on its own task
    pub async fn go(&self, name: impl Into<String>, behavior: impl Behavior) -> Result<()> {
        let name = name.into();
        let inner = match &self.inner {
            MeshRef::Live(inner) => inner,
            MeshRef::Stub => return Err(MeshError::NameInUse(name)),
        };
        let mut cells = inner.cells.write().await;
        if cells.contains_key(&name) {
            return Err(MeshError::NameInUse(name));
        }
        let core = CellCore::spawn(
            name.clone(),
            inner.cancel.child_token(),
            Arc::downgrade(inner),
            behavior,
        );
        cells.insert(name, core);
        Ok(())
    }

    /// Subscribe the receptor cell to the emitter cell, both by name
    ///
    /// Everything the emitter cell emits afterwards is delivered to
    /// the receptor cell. Idempotent.
    pub async fn subscribe(&self, emitter_name: &str, receptor_name: &str) -> Result<()> {
        let (emitter, receptor) = self.edge(emitter_name, receptor_name).await?;
        receptor.subscribe_to(&emitter).await;
        Ok(())
    }

    /// Remove the subscription of the receptor cell to the emitter
    /// cell. Removing an absent edge is not an error.
    pub async fn unsubscribe(&self, emitter_name: &str, receptor_name: &str) -> Result<()> {
        let (emitter, receptor) = self.edge(emitter_name, receptor_name).await?;
        receptor.unsubscribe_from(&emitter).await;
        Ok(())
    }

    async fn edge(
        &self,
        emitter_name: &str,
        receptor_name: &str,
    ) -> Result<(Arc<CellCore>, Arc<CellCore>)> {
        let inner = match &self.inner {
            MeshRef::Live(inner) => inner,
            MeshRef::Stub => {
                return Err(MeshError::UnknownEmitterCell(emitter_name.to_string()));
            }
        };
        let cells = inner.cells.read().await;
        let emitter = cells
            .get(emitter_name)
            .ok_or_else(|| MeshError::UnknownEmitterCell(emitter_name.to_string()))?;
        let receptor = cells
            .get(receptor_name)
            .ok_or_else(|| MeshError::UnknownReceptorCell(receptor_name.to_string()))?;
        Ok((emitter.clone(), receptor.clone()))
    }

    /// Construct an event and inject it into the named cell
    pub async fn emit(&self, name: &str, topic: &str) -> Result<()> {
        self.emit_event(name, Event::new(topic)?).await
    }

    /// Construct an event with a payload and inject it into the
    /// named cell
    pub async fn emit_with(&self, name: &str, topic: &str, payload: impl Serialize) -> Result<()> {
        self.emit_event(name, Event::with_payload(topic, payload)?)
            .await
    }

    /// Inject an event into the named cell's input stream
    ///
    /// The hop path is initialized to the root marker. Fails if the
    /// name is unknown, or with a timeout if the cell does not take
    /// the event within the push budget.
    pub async fn emit_event(&self, name: &str, mut event: Event) -> Result<()> {
        let cell = self.cell(name).await?;
        event.init_emitters();
        cell.push(event).await
    }

    /// A handle emitting into the named cell without repeated lookup
    ///
    /// Observationally equivalent to [`Mesh::emit`] while the cell
    /// lives; once the cell is gone the handle fails with the same
    /// error a fresh lookup would produce.
    pub async fn emitter(&self, name: &str) -> Result<NamedEmitter> {
        let cell = self.cell(name).await?;
        Ok(NamedEmitter { cell })
    }

    async fn cell(&self, name: &str) -> Result<Arc<CellCore>> {
        let inner = match &self.inner {
            MeshRef::Live(inner) => inner,
            MeshRef::Stub => return Err(MeshError::UnknownCell(name.to_string())),
        };
        let cells = inner.cells.read().await;
        cells
            .get(name)
            .cloned()
            .ok_or_else(|| MeshError::UnknownCell(name.to_string()))
    }
}

impl Default for Mesh {
    fn default() -> Self {
        Self::new()
    }
}

/// Cached handle emitting into one cell, bypassing the name lookup
#[derive(Clone, Debug)]
pub struct NamedEmitter {
    cell: Arc<CellCore>,
}

impl NamedEmitter {
    /// Construct an event and inject it into the cell
    pub async fn emit(&self, topic: &str) -> Result<()> {
        self.emit_event(Event::new(topic)?).await
    }

    /// Construct an event with a payload and inject it into the cell
    pub async fn emit_with(&self, topic: &str, payload: impl Serialize) -> Result<()> {
        self.emit_event(Event::with_payload(topic, payload)?).await
    }

    /// Inject an event into the cell's input stream
    pub async fn emit_event(&self, mut event: Event) -> Result<()> {
        event.init_emitters();
        self.cell.push(event).await
    }
}
