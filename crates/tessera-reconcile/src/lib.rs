//! Tessera Reconcile - Deterministic merge of replica element sequences
//!
//! This crate implements the reconciler:
//! - Whole-element last-writer-wins by version, then nonce
//! - Protection of elements under in-progress local gestures
//! - Convergent ordering and index repair of the merged sequence

pub mod reconcile;

pub use reconcile::*;
