//! sprocket-core: action compiler core library.
//!
//! Provides the typed AST for declarative business actions, the builder
//! that turns raw step lists (YAML already parsed to `serde_json::Value`)
//! into that AST, the lexical scope model threaded through compilation,
//! and the read-only type/service registries the compiler consumes.
//!
//! # Public API
//!
//! Key types are re-exported at the crate root for convenience:
//!
//! - [`build_action()`] / [`build_steps()`] -- raw JSON to typed AST
//! - [`Action`], [`Step`], [`Expr`] -- the AST
//! - [`Scope`] -- variable bindings during compilation
//! - [`TypeRegistry`], [`ServiceRegistry`] -- caller-supplied lookup context
//! - [`CompileError`] -- the shared error taxonomy

pub mod ast;
pub mod build;
pub mod error;
pub mod registry;
pub mod scope;

// ── Convenience re-exports: key types ────────────────────────────────

pub use ast::{snake_ident, Action, CallService, EntityDef, Expr, Literal, Param, Projection, Step};
pub use error::CompileError;
pub use registry::{ScalarType, Service, ServiceOperation, ServiceRegistry, TypeRegistry};
pub use scope::{Binding, Scope, VarType};

// ── Convenience re-exports: builder entry points ─────────────────────

pub use build::{build_action, build_steps};
