//! sprocket-codegen: actions to PL/pgSQL procedures and job orchestration.
//!
//! Entry points:
//!
//! - [`compile_action()`] -- one [`Action`] to one primary procedure plus
//!   its callback procedures
//! - [`compile_batch()`] -- a batch of actions with partial-failure
//!   collection and deterministic entity emission order
//! - [`write_artifacts()`] -- render a batch report to `.sql` files
//!
//! Compilation is purely transformational: same AST and registries in,
//! byte-identical SQL out. Registries and entity definitions are passed
//! in as an explicit [`CompileCtx`]; nothing here reaches for global
//! state or blocks on I/O (except `write_artifacts`, which only writes).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sprocket_analyze::{resolve_order, ResolveError};
use sprocket_core::{
    Action, Binding, CompileError, EntityDef, Scope, ServiceRegistry, TypeRegistry, VarType,
};

mod callback;
mod ddl;
mod emit;
mod expr;
mod service;
mod steps;

pub use ddl::{job_run_table_ddl, mutation_support_ddl, runtime_ddl};
pub use expr::{compile_expr, compile_template};

use emit::ProcedureDef;
use steps::StepCompiler;

// ──────────────────────────────────────────────
// Context and outputs
// ──────────────────────────────────────────────

/// Everything the compiler consumes, passed explicitly and read-only.
pub struct CompileCtx<'a> {
    pub types: &'a TypeRegistry,
    pub services: &'a ServiceRegistry,
    pub entities: &'a BTreeMap<String, EntityDef>,
    /// Schema generated procedures (and callbacks) are created in.
    pub proc_schema: String,
}

/// One rendered procedure.
#[derive(Debug, Clone)]
pub struct CompiledProcedure {
    pub schema: String,
    pub name: String,
    pub sql: String,
}

/// A fully compiled action: the primary procedure first, then callback
/// procedures in generation order.
#[derive(Debug, Clone)]
pub struct CompiledAction {
    pub name: String,
    pub procedures: Vec<CompiledProcedure>,
    pub warnings: Vec<String>,
}

/// One action that failed to compile within a batch.
#[derive(Debug)]
pub struct BatchFailure {
    pub action: String,
    pub error: CompileError,
}

/// Outcome of a batch run. A failing action never aborts its siblings;
/// all failures are collected and reported together.
#[derive(Debug)]
pub struct BatchReport {
    /// Entity emission order fixed by the dependency resolver.
    pub entity_order: Vec<String>,
    pub actions: Vec<CompiledAction>,
    pub failures: Vec<BatchFailure>,
}

// ──────────────────────────────────────────────
// Entry points
// ──────────────────────────────────────────────

/// Compile one action. Any error is fatal to this action: no partial
/// artifact is produced.
pub fn compile_action(action: &Action, ctx: &CompileCtx<'_>) -> Result<CompiledAction, CompileError> {
    if let Some(returns) = &action.returns {
        ctx.types.resolve("returns", returns)?;
    }

    let mut scope = Scope::new();
    let mut params = Vec::with_capacity(action.params.len());
    for param in &action.params {
        let scalar = ctx.types.resolve(&param.name, &param.type_name)?;
        let sql_name = format!("p_{}", param.name);
        params.push(format!("{} {}", sql_name, scalar.native_type));
        let ty = if param.type_name == "jsonb" {
            VarType::Json
        } else {
            VarType::Scalar(param.type_name.clone())
        };
        scope.bind(&param.name, Binding { sql_name, ty });
    }

    let mut compiler = StepCompiler::new(ctx, &action.name);
    let block = compiler.compile_steps(&action.steps, &mut scope)?;

    let mut body = block.body;
    if !block.returned {
        body.push(implicit_return(&action.name));
    }

    let def = ProcedureDef {
        schema: ctx.proc_schema.clone(),
        name: action.name.clone(),
        comments: action.description.iter().cloned().collect(),
        params,
        decls: block.decls,
        body,
    };

    let mut procedures = vec![CompiledProcedure {
        schema: ctx.proc_schema.clone(),
        name: action.name.clone(),
        sql: def.render(),
    }];
    procedures.extend(compiler.callbacks);

    Ok(CompiledAction {
        name: action.name.clone(),
        procedures,
        warnings: compiler.warnings,
    })
}

/// Compile a batch. The dependency resolver runs once, up front; a
/// cycle is fatal to the whole batch since no emission order exists.
pub fn compile_batch(
    actions: &[Action],
    ctx: &CompileCtx<'_>,
) -> Result<BatchReport, ResolveError> {
    let entities: Vec<EntityDef> = ctx.entities.values().cloned().collect();
    let entity_order = resolve_order(&entities)?;

    let mut report = BatchReport {
        entity_order,
        actions: Vec::new(),
        failures: Vec::new(),
    };
    for action in actions {
        match compile_action(action, ctx) {
            Ok(compiled) => report.actions.push(compiled),
            Err(error) => report.failures.push(BatchFailure {
                action: action.name.clone(),
                error,
            }),
        }
    }
    Ok(report)
}

/// Write a batch report to `dir`: the runtime support DDL first, then
/// one file per compiled action holding its procedures. Returns the
/// written paths in apply order.
pub fn write_artifacts(report: &BatchReport, dir: &Path) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(report.actions.len() + 1);

    let runtime = dir.join("000_runtime.sql");
    fs::write(&runtime, runtime_ddl())?;
    written.push(runtime);

    for action in &report.actions {
        let path = dir.join(format!("{}.sql", action.name));
        let mut out = String::new();
        for (i, proc) in action.procedures.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&proc.sql);
        }
        fs::write(&path, out)?;
        written.push(path);
    }
    Ok(written)
}

/// The tagged-success fall-through every procedure ends with when no
/// explicit `return` was reached.
pub(crate) fn implicit_return(proc_name: &str) -> String {
    format!(
        "RETURN app.log_and_return_mutation('{}', 'success', NULL::jsonb);",
        proc_name.replace('\'', "''")
    )
}

// ──────────────────────────────────────────────
// Shared test fixtures
// ──────────────────────────────────────────────
