//! Tessera Order - Keeping array order and fractional indices in sync
//!
//! This crate implements the sequence side of the order-key engine:
//! - Validation of the ordering invariant
//! - Ordering by fractional index
//! - Minimal repair of broken indices
//! - Rekeying of moved elements
//! - Z-order moves

pub mod indices;
pub mod zindex;

pub use indices::*;
pub use zindex::*;
