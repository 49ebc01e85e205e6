//! Tessera Core - Fundamental types and primitives
//!
//! This crate defines the core types shared by the ordering, reconciliation
//! and history engines:
//! - Identifiers (ElementId)
//! - Fractional order keys (OrderKey) and key generation
//! - Versioned elements and their mutation API
//! - Local editing state consulted during reconciliation
//! - Error types

pub mod id;
pub mod key;
pub mod element;
pub mod editing;
pub mod error;

pub use id::*;
pub use key::*;
pub use element::*;
pub use editing::*;
pub use error::*;
