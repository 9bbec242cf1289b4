//! Lexical scope threaded through step compilation.
//!
//! A scope is an ordered name -> binding map. Child scopes (conditional
//! branches, loop bodies, callbacks) start as clones of the parent, so
//! they see parent bindings and may shadow them, but nothing they bind
//! leaks back out -- the caller keeps compiling with its own scope.

use crate::error::CompileError;

/// The resolved type of a bound variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarType {
    /// A scalar of the named registry type, e.g. `integer`.
    Scalar(String),
    /// A whole entity row, carrying the Trinity identity columns.
    Entity(String),
    /// An untyped JSONB value (loop bindings, callback payloads).
    Json,
}

impl VarType {
    /// Human-readable rendering used in mismatch errors.
    pub fn describe(&self) -> String {
        match self {
            VarType::Scalar(t) => t.clone(),
            VarType::Entity(e) => format!("row of {}", e),
            VarType::Json => "jsonb".to_string(),
        }
    }
}

/// One scope entry: the emitted SQL name and the resolved type.
#[derive(Debug, Clone)]
pub struct Binding {
    pub sql_name: String,
    pub ty: VarType,
}

/// Ordered variable bindings. Lookup scans newest-first so shadowing
/// declarations win.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: Vec<(String, Binding)>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    /// A child scope seeded from this one.
    pub fn child(&self) -> Scope {
        self.clone()
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: Binding) {
        self.vars.push((name.into(), binding));
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }

    /// Resolve or fail with [`CompileError::UnresolvedVariable`].
    pub fn resolve(&self, name: &str) -> Result<&Binding, CompileError> {
        self.get(name).ok_or_else(|| CompileError::UnresolvedVariable {
            name: name.to_string(),
        })
    }

    /// The most recently bound entity-typed variable, if any. Used as
    /// the default trigger row for `call_service` steps.
    pub fn latest_entity(&self) -> Option<(&str, &Binding)> {
        self.vars
            .iter()
            .rev()
            .find(|(_, b)| matches!(b.ty, VarType::Entity(_)))
            .map(|(n, b)| (n.as_str(), b))
    }
}
