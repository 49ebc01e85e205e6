//! Tessera History - Snapshot store, invertible deltas and undo/redo
//!
//! This crate implements the history engine:
//! - Element and app state deltas with inversion and rebasing
//! - A snapshot store turning commits into durable or ephemeral increments
//! - Undo/redo stacks that fold through entries without visible effect

pub mod delta;
pub mod history;
pub mod store;

pub use delta::*;
pub use history::*;
pub use store::*;
