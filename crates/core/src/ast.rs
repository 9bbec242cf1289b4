//! Shared AST types for the action compiler.
//!
//! These types are produced by the builder and consumed throughout
//! compilation. They are immutable once constructed; step order within a
//! container is significant and preserved.

use std::collections::BTreeMap;

// ──────────────────────────────────────────────
// Actions
// ──────────────────────────────────────────────

/// A named business action: one primary procedure plus zero or more
/// callback procedures (one pair per `call_service` step).
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub description: Option<String>,
    pub params: Vec<Param>,
    /// Declared return type name, resolved against the type registry.
    pub returns: Option<String>,
    pub steps: Vec<Step>,
}

/// An input parameter of an [`Action`].
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub type_name: String,
}

// ──────────────────────────────────────────────
// Steps
// ──────────────────────────────────────────────

/// The smallest AST unit, one operation in an action body.
///
/// The step compiler matches exhaustively over this enum; adding a
/// variant without a corresponding compile arm is a build failure there.
#[derive(Debug, Clone)]
pub enum Step {
    Declare {
        name: String,
        type_name: String,
        initial: Option<Expr>,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Query {
        into: String,
        select: Projection,
        from: String,
        where_clause: Option<String>,
    },
    Conditional {
        /// `(condition, body)` pairs in source order: `if` plus `elseif`s.
        branches: Vec<(Expr, Vec<Step>)>,
        else_steps: Vec<Step>,
    },
    Loop {
        binding: String,
        iterable: Expr,
        body: Vec<Step>,
    },
    Insert {
        entity: String,
        fields: BTreeMap<String, Expr>,
        into: Option<String>,
    },
    Update {
        entity: String,
        set: BTreeMap<String, Expr>,
        where_clause: String,
    },
    CallService(CallService),
    Return {
        value: Option<Expr>,
    },
    FunctionCall {
        name: String,
        args: Vec<Expr>,
        into: Option<String>,
    },
}

/// An external-service call step. Compiles to an idempotent job enqueue,
/// never to an inline call; `on_success`/`on_failure` become standalone
/// callback procedures.
#[derive(Debug, Clone)]
pub struct CallService {
    pub service: String,
    pub operation: String,
    /// Input payload mapping, expression-compiled field by field.
    pub input: BTreeMap<String, Expr>,
    /// Always true today; kept so the builder rejects `async: false`
    /// explicitly rather than silently compiling a blocking call.
    pub async_mode: bool,
    /// Step-level override; falls back to the service registry default.
    pub timeout: Option<u32>,
    /// Step-level override; falls back to the service registry default.
    pub max_retries: Option<u32>,
    /// `$var` naming the triggering entity row; defaults to the most
    /// recently bound entity variable in scope.
    pub correlation_field: Option<String>,
    pub on_success: Vec<Step>,
    pub on_failure: Vec<Step>,
}

/// Projection of a `query` step.
#[derive(Debug, Clone)]
pub enum Projection {
    /// `select: "*"` -- the whole row.
    All,
    /// A single named column.
    Column(String),
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

/// An expression embedded in a step: a literal, a `$name` / `$name.field`
/// variable path, or an operator application keyed by operator name.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    Var {
        name: String,
        field: Option<String>,
    },
    Op {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    /// Kept as source text so rendering is byte-stable.
    Float(String),
    Str(String),
}

// ──────────────────────────────────────────────
// Entities
// ──────────────────────────────────────────────

/// A compiled-against entity definition. Each entity table carries the
/// three identity facets (`pk_<entity>` integer surrogate, `id` UUID,
/// `identifier` slug) plus a `data` JSONB payload for the declared fields.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: String,
    /// Database schema the entity table lives in, e.g. `crm`.
    pub schema: String,
    /// Declared field name -> scalar type name.
    pub fields: BTreeMap<String, String>,
    /// Names of entities this definition references; consumed by the
    /// dependency resolver to fix emission order.
    pub references: Vec<String>,
}

/// Lowercased table-style rendering of an entity name,
/// e.g. `OrderLine` -> `order_line`.
pub fn snake_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

impl EntityDef {
    /// Lowercased table-style name, e.g. `Order` -> `order`.
    pub fn snake_name(&self) -> String {
        snake_ident(&self.name)
    }

    /// Fully qualified table name, e.g. `crm.tb_order`.
    pub fn table(&self) -> String {
        format!("{}.tb_{}", self.schema, self.snake_name())
    }

    /// Integer surrogate-key column, e.g. `pk_order`.
    pub fn pk_column(&self) -> String {
        format!("pk_{}", self.snake_name())
    }
}
