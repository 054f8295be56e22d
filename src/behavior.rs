//! Behavior capability and adapters
//!
//! A behavior is the user-supplied loop a cell runs: it pulls input
//! events from its receptor and emits output events to its
//! subscribers, observing the cell's cancellation context.

use crate::cell::{Cell, Emitter};
use crate::error::Result;
use crate::event::Event;
use crate::stream::Receptor;
use async_trait::async_trait;
use std::future::Future;

/// What a cell runs
///
/// `go` is started on the cell's own task and consumes the behavior.
/// The expected shape is a select loop:
///
/// ```rust
/// # use cellmesh::{Cell, Emitter, Receptor, Result};
/// # async fn example(cell: Cell, mut receptor: Receptor, emitter: Emitter) -> Result<()> {
/// loop {
///     tokio::select! {
///         _ = cell.context().cancelled() => return Ok(()),
///         pulled = receptor.pull() => {
///             let Some(event) = pulled else { return Ok(()) };
///             emitter.emit_event(event).await?;
///         }
///     }
/// }
/// # }
/// ```
///
/// Returning `Ok` terminates the cell normally, returning an error
/// terminates it abnormally; either way its subscribers are notified.
/// Cancellation is not an error: return `Ok(())`.
#[async_trait]
pub trait Behavior: Send + 'static {
    /// Run the behavior until it decides to stop or the cell's
    /// context is cancelled
    async fn go(self: Box<Self>, cell: Cell, receptor: Receptor, emitter: Emitter) -> Result<()>;
}

/// Function adapter for behaviors needing no state of their own
///
/// ```rust
/// use cellmesh::{BehaviorFn, Cell, Emitter, Mesh, Receptor};
///
/// # async fn example() -> cellmesh::Result<()> {
/// let mesh = Mesh::new();
/// mesh.go("sig", BehaviorFn(|cell: Cell, mut receptor: Receptor, _emitter: Emitter| async move {
///     loop {
///         tokio::select! {
///             _ = cell.context().cancelled() => return Ok(()),
///             _ = receptor.pull() => {}
///         }
///     }
/// }))
/// .await?;
/// # Ok(())
/// # }
/// ```
pub struct BehaviorFn<F>(pub F);

#[async_trait]
impl<F, Fut> Behavior for BehaviorFn<F>
where
    F: FnOnce(Cell, Receptor, Emitter) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn go(self: Box<Self>, cell: Cell, receptor: Receptor, emitter: Emitter) -> Result<()> {
        (self.0)(cell, receptor, emitter).await
    }
}

/// Per-event processing capability used by [`RequestBehavior`]
#[async_trait]
pub trait Handler: Send + 'static {
    /// Process one received event
    async fn on_event(&mut self, cell: Cell, event: Event, out: Emitter) -> Result<()>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: FnMut(Cell, Event, Emitter) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn on_event(&mut self, cell: Cell, event: Event, out: Emitter) -> Result<()> {
        (self)(cell, event, out).await
    }
}

/// Behavior driving the standard select loop and delegating each
/// received event to a [`Handler`]
///
/// The loop exits cleanly on cancellation; a handler error ends the
/// cell abnormally.
pub struct RequestBehavior<H> {
    handler: H,
}

impl<H: Handler> RequestBehavior<H> {
    /// Create a behavior from a per-event handler
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: Handler> Behavior for RequestBehavior<H> {
    async fn go(
        self: Box<Self>,
        cell: Cell,
        mut receptor: Receptor,
        emitter: Emitter,
    ) -> Result<()> {
        let mut handler = self.handler;
        loop {
            tokio::select! {
                _ = cell.context().cancelled() => return Ok(()),
                pulled = receptor.pull() => {
                    let Some(event) = pulled else { return Ok(()) };
                    handler
                        .on_event(cell.clone(), event, emitter.clone())
                        .await?;
                }
            }
        }
    }
}
