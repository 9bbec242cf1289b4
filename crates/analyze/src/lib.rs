//! sprocket-analyze: dependency resolution for entity batches.
//!
//! Builds a directed graph over entity definitions from their declared
//! references and produces a deterministic emission order, so generated
//! definitions only ever reference already-emitted objects. Runs once
//! per batch, ahead of per-action compilation.

pub mod graph;

pub use graph::{resolve_order, DepGraph, ResolveError};
