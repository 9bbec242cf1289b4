//! Read-only type and service registries.
//!
//! Both registries are caller-supplied context passed explicitly into
//! the compiler's entry points; the compiler never mutates them and
//! never reaches for global state, so compilation stays referentially
//! transparent and testable in isolation.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CompileError;

// ──────────────────────────────────────────────
// Scalar types
// ──────────────────────────────────────────────

/// One scalar type entry: how a DSL type name lands in the database.
#[derive(Debug, Clone)]
pub struct ScalarType {
    /// Native column type, e.g. `TEXT`, `NUMERIC(12,2)`.
    pub native_type: String,
    /// Validation constraint template with `{column}` placeholder, if any.
    pub constraint_template: Option<String>,
    /// Default value rendering, if any.
    pub default_value: Option<String>,
}

impl ScalarType {
    fn plain(native_type: &str) -> Self {
        ScalarType {
            native_type: native_type.to_string(),
            constraint_template: None,
            default_value: None,
        }
    }
}

/// Scalar type name -> native mapping. Pure lookup.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, ScalarType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// The built-in scalar set every deployment starts from.
    pub fn standard() -> Self {
        let mut reg = TypeRegistry::new();
        reg.insert("text", ScalarType::plain("TEXT"));
        reg.insert("integer", ScalarType::plain("INTEGER"));
        reg.insert("bigint", ScalarType::plain("BIGINT"));
        reg.insert("boolean", ScalarType::plain("BOOLEAN"));
        reg.insert("numeric", ScalarType::plain("NUMERIC(18,6)"));
        reg.insert("timestamp", ScalarType::plain("TIMESTAMPTZ"));
        reg.insert("date", ScalarType::plain("DATE"));
        reg.insert("jsonb", ScalarType::plain("JSONB"));
        reg.insert("uuid", ScalarType::plain("UUID"));
        reg.insert(
            "email",
            ScalarType {
                native_type: "TEXT".to_string(),
                constraint_template: Some("CHECK ({column} ~ '^[^@]+@[^@]+$')".to_string()),
                default_value: None,
            },
        );
        reg
    }

    pub fn insert(&mut self, name: impl Into<String>, ty: ScalarType) {
        self.types.insert(name.into(), ty);
    }

    /// Resolve a type name; `field` names the declaration site so the
    /// error points at the offending spot.
    pub fn resolve(&self, field: &str, type_name: &str) -> Result<&ScalarType, CompileError> {
        self.types
            .get(type_name)
            .ok_or_else(|| CompileError::UnknownType {
                field: field.to_string(),
                type_name: type_name.to_string(),
            })
    }
}

// ──────────────────────────────────────────────
// Services
// ──────────────────────────────────────────────

/// One operation an external service offers.
#[derive(Debug, Clone)]
pub struct ServiceOperation {
    pub name: String,
    pub input_schema: Value,
    pub output_schema: Value,
    /// Seconds a worker may spend on one attempt.
    pub default_timeout: u32,
    pub default_max_retries: u32,
}

impl ServiceOperation {
    pub fn new(name: &str) -> Self {
        ServiceOperation {
            name: name.to_string(),
            input_schema: Value::Null,
            output_schema: Value::Null,
            default_timeout: 30,
            default_max_retries: 3,
        }
    }
}

/// A registered external service and its operations.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    operations: BTreeMap<String, ServiceOperation>,
}

impl Service {
    pub fn new(name: &str, operations: Vec<ServiceOperation>) -> Self {
        Service {
            name: name.to_string(),
            operations: operations
                .into_iter()
                .map(|op| (op.name.clone(), op))
                .collect(),
        }
    }

    pub fn operation(&self, name: &str) -> Result<&ServiceOperation, CompileError> {
        self.operations
            .get(name)
            .ok_or_else(|| CompileError::UnknownOperation {
                service: self.name.clone(),
                operation: name.to_string(),
            })
    }
}

/// Service name -> service definition. Pure lookup.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Service>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<Service>) -> Self {
        ServiceRegistry {
            services: services.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Service, CompileError> {
        self.services
            .get(name)
            .ok_or_else(|| CompileError::UnknownService {
                name: name.to_string(),
            })
    }
}
