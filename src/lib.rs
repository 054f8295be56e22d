//! # cellmesh
//!
//! In-process event routing across a mesh of concurrently running
//! cells.
//!
//! ## Overview
//!
//! A [`Mesh`] is a closed network of named *cells*. Each cell runs a
//! user-supplied [`Behavior`] on its own task: a loop that pulls
//! input events, does its work, and emits output events. Cells are
//! wired by name into a directed subscription graph (cycles allowed);
//! everything a cell emits fans out to the input streams of its
//! current subscribers with bounded-wait backpressure. When a cell
//! terminates, normally or with an error, its subscribers are told.
//!
//! ## Quick Start
//!
//! ```rust
//! use cellmesh::{BehaviorFn, Cell, Emitter, Event, Mesh, Receptor, RequestBehavior};
//!
//! # async fn example() -> cellmesh::Result<()> {
//! let mesh = Mesh::new();
//!
//! // A cell forwarding the upper-cased topic of every event.
//! mesh.go("up", BehaviorFn(|cell: Cell, mut receptor: Receptor, emitter: Emitter| async move {
//!     loop {
//!         tokio::select! {
//!             _ = cell.context().cancelled() => return Ok(()),
//!             pulled = receptor.pull() => {
//!                 let Some(event) = pulled else { return Ok(()) };
//!                 emitter.emit(&event.topic().to_uppercase()).await?;
//!             }
//!         }
//!     }
//! }))
//! .await?;
//!
//! // A per-event cell, wired as a subscriber of "up".
//! mesh.go("printer", RequestBehavior::new(
//!     |_cell: Cell, event: Event, _out: Emitter| async move {
//!         println!("{event}");
//!         Ok(())
//!     },
//! ))
//! .await?;
//! mesh.subscribe("up", "printer").await?;
//!
//! // Feed the mesh from outside.
//! mesh.emit("up", "one").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **[`Event`]** — immutable `(timestamp, emitters path, topic,
//!   encoded payload)` record; payloads are opaque JSON
//! - **[`Mesh`]** — registry and wiring authority; cells share a
//!   cancellation context rooted here
//! - **[`Behavior`]** — the capability a cell runs, with
//!   [`BehaviorFn`] and [`RequestBehavior`] adapters
//! - **[`Testbed`]** — single-cell harness with a stubbed mesh for
//!   unit-testing one behavior in isolation

pub mod behavior;
pub mod cell;
pub mod error;
pub mod event;
pub mod mesh;
pub mod sink;
pub mod stream;
pub mod testbed;

// Re-export core types
pub use behavior::{Behavior, BehaviorFn, Handler, RequestBehavior};
pub use cell::{Cell, Emitter};
pub use error::{MeshError, Result};
pub use event::{
    CellFailed, CellTerminated, Event, ROOT_EMITTER, TOPIC_ERROR, TOPIC_TERMINATED,
    TOPIC_TESTBED_ERROR, TOPIC_TESTBED_TERMINATED,
};
pub use mesh::{Mesh, NamedEmitter};
pub use sink::EventSink;
pub use stream::Receptor;
pub use testbed::{Evaluator, Testbed, TestbedEmitter, TestbedError};
