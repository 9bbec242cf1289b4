//! The shared compile-time error taxonomy.
//!
//! Every error is fatal to the action being compiled; the batch driver
//! in the codegen crate collects failures and keeps going, so one bad
//! action never blocks its siblings.

use serde::Serialize;

/// All errors the builder and compilers can produce for a single action.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
pub enum CompileError {
    /// A step or construct is structurally malformed. `path` qualifies
    /// the location inside nested step lists, e.g. `steps[2].then[0]`.
    #[error("{path}: {message}")]
    Schema { path: String, message: String },

    /// A raw step object whose key is not a recognized step kind.
    #[error("{path}: unknown step kind '{key}'")]
    UnknownStepKind { path: String, key: String },

    /// A scalar type name missing from the type registry.
    #[error("unknown type '{type_name}' for '{field}'")]
    UnknownType { field: String, type_name: String },

    /// An operator name missing from the expression operator table.
    #[error("unknown operator '{name}'")]
    UnknownOperator { name: String },

    /// A `$name` reference with no binding in the current scope.
    #[error("unresolved variable '{name}'")]
    UnresolvedVariable { name: String },

    /// Redeclaration of a name with a different type. Redeclaring with
    /// the same type is a warning, not an error.
    #[error("duplicate declaration of '{name}': already '{existing}', redeclared as '{requested}'")]
    DuplicateDeclaration {
        name: String,
        existing: String,
        requested: String,
    },

    /// A variable reused with an incompatible type, e.g. a `query` into
    /// a target that was declared with a different type.
    #[error("type mismatch for '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    /// A `call_service` step naming a service the registry does not know.
    #[error("unknown service '{name}'")]
    UnknownService { name: String },

    /// A `call_service` step naming an operation its service does not offer.
    #[error("unknown operation '{operation}' on service '{service}'")]
    UnknownOperation { service: String, operation: String },
}

impl CompileError {
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        CompileError::Schema {
            path: path.into(),
            message: message.into(),
        }
    }
}
