//! # Path-mapped file manager
//!
//! Maps a hierarchical namespace of `(filesystem, path)` pairs onto blobs in
//! a [`PhysicalStore`](pathmapped_core::PhysicalStore), sharing blobs between
//! paths with identical content and reclaiming them once unreferenced.
//!
//! ## Layers
//! 1. `engine`   – index algorithms (insert, delete, copy, traverse) over a
//!    [`PathDb`](pathmapped_core::PathDb).
//! 2. `writer`   – the write-commit stream: bytes go to the physical store,
//!    metadata is committed only on a successful finish.
//! 3. `gc`       – the sweeper draining the reclaim queue.
//! 4. `manager`  – the façade ([`FileManager`]) that applications use.
//!
//! `deferred` runs best-effort bookkeeping inline or in the background and
//! `measured` wraps any `PathDb` with timing spans.

pub mod deferred;
pub mod engine;
pub mod gc;
pub mod manager;
pub mod measured;
pub mod writer;

pub use deferred::Deferred;
pub use engine::{Committed, DeleteOutcome, PathEngine};
pub use gc::{GcReport, Sweeper};
pub use manager::{FileManager, ListOptions};
pub use measured::MeasuredPathDb;
pub use writer::{PathWriter, WriterState};
