//! The central recursive step compiler.
//!
//! `StepCompiler` walks a step list, threading a [`Scope`] through, and
//! emits PL/pgSQL into a [`Block`]. Dispatch over [`Step`] is exhaustive,
//! so a new variant without a compile arm fails the build here. Callback
//! procedures produced along the way (one pair per `call_service` step)
//! accumulate on the compiler and are collected by the caller.

use std::collections::BTreeMap;

use sprocket_core::{
    Binding, CompileError, EntityDef, Expr, Projection, Scope, Step, VarType,
};

use crate::emit::{push_nested, Block};
use crate::expr::{compile_expr, compile_template, quote_str};
use crate::service::compile_call_service;
use crate::{CompileCtx, CompiledProcedure};

pub(crate) struct StepCompiler<'a> {
    pub ctx: &'a CompileCtx<'a>,
    /// Name of the procedure being compiled; used for the result
    /// convention and to prefix callback procedure names.
    pub proc_name: String,
    /// Position counter for `call_service` steps within this procedure.
    pub svc_index: u32,
    pub callbacks: Vec<CompiledProcedure>,
    pub warnings: Vec<String>,
}

impl<'a> StepCompiler<'a> {
    pub fn new(ctx: &'a CompileCtx<'a>, proc_name: &str) -> Self {
        StepCompiler {
            ctx,
            proc_name: proc_name.to_string(),
            svc_index: 0,
            callbacks: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Compile a step list into a block. Stops at the first step that
    /// guarantees a return; remaining siblings are dead code and are
    /// flagged, not silently dropped.
    pub fn compile_steps(
        &mut self,
        steps: &[Step],
        scope: &mut Scope,
    ) -> Result<Block, CompileError> {
        let mut block = Block::new();
        for (i, step) in steps.iter().enumerate() {
            self.compile_step(step, scope, &mut block)?;
            if block.returned {
                let remaining = steps.len() - i - 1;
                if remaining > 0 {
                    self.warnings.push(format!(
                        "{}: {} unreachable step(s) after return",
                        self.proc_name, remaining
                    ));
                }
                break;
            }
        }
        Ok(block)
    }

    fn compile_step(
        &mut self,
        step: &Step,
        scope: &mut Scope,
        block: &mut Block,
    ) -> Result<(), CompileError> {
        match step {
            Step::Declare {
                name,
                type_name,
                initial,
            } => self.compile_declare(name, type_name, initial.as_ref(), scope, block),
            Step::Assign { name, value } => {
                let binding = scope.resolve(name)?;
                let target = binding.sql_name.clone();
                let sql = compile_expr(value, scope)?;
                block.push(format!("{} := {};", target, sql));
                Ok(())
            }
            Step::Query {
                into,
                select,
                from,
                where_clause,
            } => self.compile_query(into, select, from, where_clause.as_deref(), scope, block),
            Step::Conditional {
                branches,
                else_steps,
            } => self.compile_conditional(branches, else_steps, scope, block),
            Step::Loop {
                binding,
                iterable,
                body,
            } => self.compile_loop(binding, iterable, body, scope, block),
            Step::Insert {
                entity,
                fields,
                into,
            } => self.compile_insert(entity, fields, into.as_deref(), scope, block),
            Step::Update {
                entity,
                set,
                where_clause,
            } => self.compile_update(entity, set, where_clause, scope, block),
            Step::CallService(call) => compile_call_service(self, call, scope, block),
            Step::Return { value } => {
                let payload = match value {
                    Some(expr) => format!("to_jsonb({})", compile_expr(expr, scope)?),
                    None => "NULL::jsonb".to_string(),
                };
                block.push(format!(
                    "RETURN app.log_and_return_mutation({}, 'success', {});",
                    quote_str(&self.proc_name),
                    payload
                ));
                block.returned = true;
                Ok(())
            }
            Step::FunctionCall { name, args, into } => {
                self.compile_function_call(name, args, into.as_deref(), scope, block)
            }
        }
    }

    // ──────────────────────────────────────────────
    // Individual step kinds
    // ──────────────────────────────────────────────

    fn compile_declare(
        &mut self,
        name: &str,
        type_name: &str,
        initial: Option<&Expr>,
        scope: &mut Scope,
        block: &mut Block,
    ) -> Result<(), CompileError> {
        if let Some(existing) = scope.get(name) {
            let requested = VarType::Scalar(type_name.to_string());
            if existing.ty == requested {
                // Idempotent redeclaration.
                self.warnings.push(format!(
                    "{}: '{}' redeclared with the same type",
                    self.proc_name, name
                ));
                return Ok(());
            }
            return Err(CompileError::DuplicateDeclaration {
                name: name.to_string(),
                existing: existing.ty.describe(),
                requested: requested.describe(),
            });
        }

        let scalar = self.ctx.types.resolve(name, type_name)?;
        let sql_name = format!("v_{}", name);
        let decl = match initial {
            Some(expr) => format!(
                "{} {} := {};",
                sql_name,
                scalar.native_type,
                compile_expr(expr, scope)?
            ),
            None => format!("{} {};", sql_name, scalar.native_type),
        };
        block.decls.push(decl);
        scope.bind(
            name,
            Binding {
                sql_name,
                ty: VarType::Scalar(type_name.to_string()),
            },
        );
        Ok(())
    }

    fn compile_query(
        &mut self,
        into: &str,
        select: &Projection,
        from: &str,
        where_clause: Option<&str>,
        scope: &mut Scope,
        block: &mut Block,
    ) -> Result<(), CompileError> {
        let entity = self.entity(from, "query")?;
        let where_sql = match where_clause {
            Some(raw) => Some(compile_template(raw, scope)?),
            None => None,
        };

        let (select_sql, inferred) = match select {
            Projection::All => ("*".to_string(), VarType::Entity(entity.name.clone())),
            Projection::Column(col) => {
                let (sql, type_name) = self.column_projection(entity, col)?;
                (sql, VarType::Scalar(type_name))
            }
        };

        let sql_name = match scope.get(into) {
            Some(existing) => {
                if existing.ty != inferred {
                    return Err(CompileError::TypeMismatch {
                        name: into.to_string(),
                        expected: existing.ty.describe(),
                        found: inferred.describe(),
                    });
                }
                existing.sql_name.clone()
            }
            None => {
                // Implicit declaration, typed from the projection.
                let sql_name = format!("v_{}", into);
                let decl = match &inferred {
                    VarType::Entity(_) => format!("{} {}%ROWTYPE;", sql_name, entity.table()),
                    VarType::Scalar(t) => {
                        let scalar = self.ctx.types.resolve(into, t)?;
                        format!("{} {};", sql_name, scalar.native_type)
                    }
                    VarType::Json => format!("{} JSONB;", sql_name),
                };
                block.decls.push(decl);
                scope.bind(
                    into,
                    Binding {
                        sql_name: sql_name.clone(),
                        ty: inferred,
                    },
                );
                sql_name
            }
        };

        let mut stmt = format!(
            "SELECT {} INTO {} FROM {}",
            select_sql,
            sql_name,
            entity.table()
        );
        if let Some(w) = where_sql {
            stmt.push_str(&format!(" WHERE {}", w));
        }
        stmt.push(';');
        block.push(stmt);
        Ok(())
    }

    /// Select expression and scalar type for a single-column projection.
    /// The Trinity columns are real columns; every declared field reads
    /// the data payload, cast back to its registered native type.
    fn column_projection(
        &self,
        entity: &EntityDef,
        col: &str,
    ) -> Result<(String, String), CompileError> {
        if col == "pk" || col == entity.pk_column() {
            return Ok((entity.pk_column(), "integer".to_string()));
        }
        match col {
            "id" => Ok(("id".to_string(), "uuid".to_string())),
            "identifier" => Ok(("identifier".to_string(), "text".to_string())),
            _ => match entity.fields.get(col) {
                Some(type_name) => {
                    let scalar = self.ctx.types.resolve(col, type_name)?;
                    Ok((
                        format!("(data ->> '{}')::{}", col, scalar.native_type),
                        type_name.clone(),
                    ))
                }
                None => Ok((format!("(data ->> '{}')", col), "text".to_string())),
            },
        }
    }

    fn compile_conditional(
        &mut self,
        branches: &[(Expr, Vec<Step>)],
        else_steps: &[Step],
        scope: &mut Scope,
        block: &mut Block,
    ) -> Result<(), CompileError> {
        let mut all_return = !branches.is_empty();

        for (i, (cond, body)) in branches.iter().enumerate() {
            let cond_sql = compile_expr(cond, scope)?;
            let keyword = if i == 0 { "IF" } else { "ELSIF" };
            block.push(format!("{} {} THEN", keyword, cond_sql));
            let mut child = scope.child();
            let branch = self.compile_steps(body, &mut child)?;
            all_return = all_return && branch.returned;
            push_nested(&mut block.body, branch, 1);
        }

        if else_steps.is_empty() {
            // No else arm: the fall-through path does not return.
            all_return = false;
        } else {
            block.push("ELSE");
            let mut child = scope.child();
            let branch = self.compile_steps(else_steps, &mut child)?;
            all_return = all_return && branch.returned;
            push_nested(&mut block.body, branch, 1);
        }
        block.push("END IF;");

        if all_return {
            block.returned = true;
        }
        Ok(())
    }

    fn compile_loop(
        &mut self,
        binding: &str,
        iterable: &Expr,
        body: &[Step],
        scope: &mut Scope,
        block: &mut Block,
    ) -> Result<(), CompileError> {
        // Resolved once, before the binding exists.
        let iter_sql = compile_expr(iterable, scope)?;
        let sql_name = format!("v_{}", binding);

        let mut child = scope.child();
        child.bind(
            binding,
            Binding {
                sql_name: sql_name.clone(),
                ty: VarType::Json,
            },
        );
        let body_block = self.compile_steps(body, &mut child)?;

        // The loop variable lives in its own nested block so it stays
        // invisible to the surrounding code.
        block.push("DECLARE");
        block.push(format!("    {} JSONB;", sql_name));
        block.push("BEGIN");
        block.push(format!(
            "    FOR {} IN SELECT * FROM jsonb_array_elements({}) LOOP",
            sql_name, iter_sql
        ));
        push_nested(&mut block.body, body_block, 2);
        block.push("    END LOOP;");
        block.push("END;");
        Ok(())
    }

    fn compile_insert(
        &mut self,
        entity_name: &str,
        fields: &BTreeMap<String, Expr>,
        into: Option<&str>,
        scope: &mut Scope,
        block: &mut Block,
    ) -> Result<(), CompileError> {
        let entity = self.entity(entity_name, "insert")?;
        let table = entity.table();
        let payload = jsonb_object(fields, scope)?;

        match into {
            None => {
                block.push(format!("INSERT INTO {} (data) VALUES ({});", table, payload));
            }
            Some(name) => {
                let expected = VarType::Entity(entity.name.clone());
                let sql_name = match scope.get(name) {
                    Some(existing) => {
                        if existing.ty != expected {
                            return Err(CompileError::TypeMismatch {
                                name: name.to_string(),
                                expected: existing.ty.describe(),
                                found: expected.describe(),
                            });
                        }
                        existing.sql_name.clone()
                    }
                    None => {
                        let sql_name = format!("v_{}", name);
                        block.decls.push(format!("{} {}%ROWTYPE;", sql_name, table));
                        scope.bind(
                            name,
                            Binding {
                                sql_name: sql_name.clone(),
                                ty: expected,
                            },
                        );
                        sql_name
                    }
                };
                block.push(format!(
                    "INSERT INTO {} (data) VALUES ({}) RETURNING * INTO {};",
                    table, payload, sql_name
                ));
            }
        }
        Ok(())
    }

    fn compile_update(
        &mut self,
        entity_name: &str,
        set: &BTreeMap<String, Expr>,
        where_clause: &str,
        scope: &mut Scope,
        block: &mut Block,
    ) -> Result<(), CompileError> {
        let entity = self.entity(entity_name, "update")?;
        let payload = jsonb_object(set, scope)?;
        let where_sql = compile_template(where_clause, scope)?;
        block.push(format!(
            "UPDATE {} SET data = data || {} WHERE {};",
            entity.table(),
            payload,
            where_sql
        ));
        Ok(())
    }

    fn compile_function_call(
        &mut self,
        name: &str,
        args: &[Expr],
        into: Option<&str>,
        scope: &mut Scope,
        block: &mut Block,
    ) -> Result<(), CompileError> {
        let rendered = args
            .iter()
            .map(|a| compile_expr(a, scope))
            .collect::<Result<Vec<_>, _>>()?;
        let call = format!("{}({})", name, rendered.join(", "));

        match into {
            None => block.push(format!("PERFORM {};", call)),
            Some(target) => {
                let sql_name = match scope.get(target) {
                    Some(existing) => existing.sql_name.clone(),
                    None => {
                        // Result type is the callee's business; bind as JSONB.
                        let sql_name = format!("v_{}", target);
                        block.decls.push(format!("{} JSONB;", sql_name));
                        scope.bind(
                            target,
                            Binding {
                                sql_name: sql_name.clone(),
                                ty: VarType::Json,
                            },
                        );
                        sql_name
                    }
                };
                block.push(format!("SELECT {} INTO {};", call, sql_name));
            }
        }
        Ok(())
    }

    pub(crate) fn entity(&self, name: &str, site: &str) -> Result<&'a EntityDef, CompileError> {
        self.ctx
            .entities
            .get(name)
            .ok_or_else(|| CompileError::schema(site, format!("unknown entity '{}'", name)))
    }
}

/// Render a field -> expression mapping as a `jsonb_build_object(..)`
/// call. The map is a BTreeMap, so key order (and output) is stable.
pub(crate) fn jsonb_object(
    fields: &BTreeMap<String, Expr>,
    scope: &Scope,
) -> Result<String, CompileError> {
    if fields.is_empty() {
        return Ok("'{}'::jsonb".to_string());
    }
    let mut parts = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        parts.push(format!("{}, {}", quote_str(key), compile_expr(value, scope)?));
    }
    Ok(format!("jsonb_build_object({})", parts.join(", ")))
}
