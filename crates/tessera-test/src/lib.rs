//! Tessera Test Harness - Convergence fuzzing and property helpers
//!
//! This crate provides:
//! - Multi-replica sync fuzzing
//! - Ordering, identity and monotonicity property checks
//! - Benchmarks for key generation, repair and reconciliation

pub mod sync_fuzzer;

pub use sync_fuzzer::*;
