//! `call_service` compilation: idempotent job enqueue plus callback
//! generation.
//!
//! A service call never compiles to an inline invocation. It compiles to
//! "schedule work": build a deterministic job identifier, insert a job
//! row that is a no-op on conflict, and bind the job id so the caller's
//! result payload can report it. The external worker performs the call
//! and later invokes one of the generated callback procedures.

use sprocket_core::{Binding, CallService, CompileError, Scope, VarType};

use crate::callback::compile_callback;
use crate::emit::Block;
use crate::steps::{jsonb_object, StepCompiler};

pub(crate) fn compile_call_service(
    compiler: &mut StepCompiler<'_>,
    call: &CallService,
    scope: &mut Scope,
    block: &mut Block,
) -> Result<(), CompileError> {
    let operation = compiler
        .ctx
        .services
        .get(&call.service)?
        .operation(&call.operation)?;

    // Step-level overrides win over the registry defaults.
    let timeout = call.timeout.unwrap_or(operation.default_timeout);
    let max_attempts = call.max_retries.unwrap_or(operation.default_max_retries);

    let (trigger_name, trigger_sql, entity_name) = resolve_trigger(call, scope)?;
    let entity = compiler.entity(&entity_name, "call_service")?;
    let payload = jsonb_object(&call.input, scope)?;

    compiler.svc_index += 1;
    let index = compiler.svc_index;

    // One job variable per (service, operation); a second call for the
    // same pair reuses the binding instead of redeclaring it.
    let bind_name = format!("job_{}_{}", call.service, call.operation);
    let (key_var, job_var) = match scope.get(&bind_name) {
        Some(existing) => {
            let job_var = existing.sql_name.clone();
            (format!("{}_key", job_var), job_var)
        }
        None => {
            let job_var = format!("v_job_{}_{}", call.service, call.operation);
            let key_var = format!("{}_key", job_var);
            block.decls.push(format!("{} TEXT;", key_var));
            block.decls.push(format!("{} BIGINT;", job_var));
            scope.bind(
                &bind_name,
                Binding {
                    sql_name: job_var.clone(),
                    ty: VarType::Scalar("bigint".to_string()),
                },
            );
            (key_var, job_var)
        }
    };

    // Deterministic identifier: same logical trigger, same job row.
    block.push(format!(
        "{} := '{}:' || {}.id::text || ':{}:{}';",
        key_var, entity_name, trigger_sql, call.service, call.operation
    ));
    block.push(
        "INSERT INTO jobs.tb_job_run (identifier, service_name, operation, input_data, \
         status, attempts, max_attempts, timeout_seconds, correlation_id, entity_type, entity_pk)"
            .to_string(),
    );
    block.push(format!(
        "VALUES ({}, '{}', '{}', {}, 'pending', 0, {}, {}, {}.id, '{}', {}.{})",
        key_var,
        call.service,
        call.operation,
        payload,
        max_attempts,
        timeout,
        trigger_sql,
        entity_name,
        trigger_sql,
        entity.pk_column()
    ));
    block.push("ON CONFLICT (identifier) DO NOTHING;".to_string());
    // Re-select covers the conflict path: the existing row's id is reused.
    block.push(format!(
        "SELECT id INTO {} FROM jobs.tb_job_run WHERE identifier = {};",
        job_var, key_var
    ));

    for (suffix, steps) in [("success", &call.on_success), ("failure", &call.on_failure)] {
        if steps.is_empty() {
            continue;
        }
        let name = format!("{}_svc{}_{}", compiler.proc_name, index, suffix);
        let (proc, nested, warnings) =
            compile_callback(compiler.ctx, &name, &trigger_name, entity, steps)?;
        compiler.callbacks.push(proc);
        compiler.callbacks.extend(nested);
        compiler.warnings.extend(warnings);
    }
    Ok(())
}

/// The entity row the job correlates with: the step's `correlation_field`
/// when given, otherwise the most recently bound entity variable.
fn resolve_trigger(
    call: &CallService,
    scope: &Scope,
) -> Result<(String, String, String), CompileError> {
    match &call.correlation_field {
        Some(raw) => {
            let name = raw.trim_start_matches('$');
            let binding = scope.resolve(name)?;
            match &binding.ty {
                VarType::Entity(entity) => {
                    Ok((name.to_string(), binding.sql_name.clone(), entity.clone()))
                }
                other => Err(CompileError::TypeMismatch {
                    name: name.to_string(),
                    expected: "an entity row".to_string(),
                    found: other.describe(),
                }),
            }
        }
        None => {
            let (name, binding) = scope.latest_entity().ok_or_else(|| {
                CompileError::schema(
                    "call_service",
                    "no entity variable in scope to correlate the job with",
                )
            })?;
            match &binding.ty {
                VarType::Entity(entity) => {
                    Ok((name.to_string(), binding.sql_name.clone(), entity.clone()))
                }
                other => Err(CompileError::TypeMismatch {
                    name: name.to_string(),
                    expected: "an entity row".to_string(),
                    found: other.describe(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{ctx_fixture, CtxFixture};
    use crate::CompileCtx;
    use sprocket_core::build_steps;
    use serde_json::json;

    #[derive(Debug)]
    struct Compiled {
        block: Block,
        callbacks: Vec<crate::CompiledProcedure>,
    }

    fn compile(raw: serde_json::Value) -> Result<Compiled, CompileError> {
        let CtxFixture { types, services, entities } = ctx_fixture();
        let ctx = CompileCtx {
            types: &types,
            services: &services,
            entities: &entities,
            proc_schema: "crm".to_string(),
        };
        let steps = build_steps(raw.as_array().unwrap(), "steps")?;
        let mut compiler = StepCompiler::new(&ctx, "place_order");
        let mut scope = Scope::new();
        let block = compiler.compile_steps(&steps, &mut scope)?;
        Ok(Compiled {
            block,
            callbacks: compiler.callbacks,
        })
    }

    fn charge_call(extra: serde_json::Value) -> serde_json::Value {
        let mut call = json!({
            "service": "stripe",
            "operation": "create_charge",
            "input": {"amount": "$order.total"}
        });
        for (k, v) in extra.as_object().unwrap() {
            call.as_object_mut().unwrap().insert(k.clone(), v.clone());
        }
        json!([
            {"insert": {"entity": "Order", "fields": {"total": 100}, "into": "order"}},
            {"call_service": call}
        ])
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let out = compile(charge_call(json!({}))).unwrap();
        let body = out.block.body.join("\n");
        assert!(body.contains(
            "v_job_stripe_create_charge_key := 'Order:' || v_order.id::text || ':stripe:create_charge';"
        ));
        assert!(body.contains("ON CONFLICT (identifier) DO NOTHING;"));
        assert!(body.contains(
            "SELECT id INTO v_job_stripe_create_charge FROM jobs.tb_job_run WHERE identifier = v_job_stripe_create_charge_key;"
        ));
        assert!(out
            .block
            .decls
            .contains(&"v_job_stripe_create_charge BIGINT;".to_string()));
    }

    #[test]
    fn test_registry_defaults_used_without_overrides() {
        let out = compile(charge_call(json!({}))).unwrap();
        let body = out.block.body.join("\n");
        // stripe.create_charge defaults: max_retries 3, timeout 30.
        assert!(body.contains("'pending', 0, 3, 30,"));
    }

    #[test]
    fn test_step_overrides_win_over_registry_defaults() {
        let out = compile(charge_call(json!({"timeout": 120, "max_retries": 7}))).unwrap();
        let body = out.block.body.join("\n");
        assert!(body.contains("'pending', 0, 7, 120,"));
    }

    #[test]
    fn test_partial_override_falls_back_per_field() {
        let out = compile(charge_call(json!({"timeout": 120}))).unwrap();
        let body = out.block.body.join("\n");
        assert!(body.contains("'pending', 0, 3, 120,"));
    }

    #[test]
    fn test_input_payload_expression_compiled() {
        let out = compile(charge_call(json!({}))).unwrap();
        let body = out.block.body.join("\n");
        assert!(body.contains("jsonb_build_object('amount', (v_order.data ->> 'total'))"));
    }

    #[test]
    fn test_correlation_defaults_to_latest_entity() {
        let out = compile(json!([
            {"insert": {"entity": "Customer", "fields": {"name": "a"}, "into": "customer"}},
            {"insert": {"entity": "Order", "fields": {"total": 1}, "into": "order"}},
            {"call_service": {"service": "stripe", "operation": "create_charge", "input": {}}}
        ]))
        .unwrap();
        let body = out.block.body.join("\n");
        assert!(body.contains("'Order:' || v_order.id::text"));
        assert!(body.contains("'Order', v_order.pk_order)"));
    }

    #[test]
    fn test_explicit_correlation_field() {
        let out = compile(json!([
            {"insert": {"entity": "Customer", "fields": {"name": "a"}, "into": "customer"}},
            {"insert": {"entity": "Order", "fields": {"total": 1}, "into": "order"}},
            {"call_service": {"service": "mailer", "operation": "send_email",
                              "input": {}, "correlation_field": "$customer"}}
        ]))
        .unwrap();
        let body = out.block.body.join("\n");
        assert!(body.contains("'Customer:' || v_customer.id::text || ':mailer:send_email'"));
        assert!(body.contains("'Customer', v_customer.pk_customer)"));
    }

    #[test]
    fn test_no_entity_in_scope_fails() {
        let err = compile(json!([
            {"call_service": {"service": "stripe", "operation": "create_charge", "input": {}}}
        ]))
        .unwrap_err();
        assert!(matches!(err, CompileError::Schema { .. }));
    }

    #[test]
    fn test_unknown_service_and_operation_surface() {
        let err = compile(json!([
            {"insert": {"entity": "Order", "fields": {}, "into": "order"}},
            {"call_service": {"service": "unknownsvc", "operation": "x", "input": {}}}
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownService {
                name: "unknownsvc".to_string()
            }
        );

        let err = compile(json!([
            {"insert": {"entity": "Order", "fields": {}, "into": "order"}},
            {"call_service": {"service": "stripe", "operation": "refund", "input": {}}}
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownOperation {
                service: "stripe".to_string(),
                operation: "refund".to_string(),
            }
        );
    }

    #[test]
    fn test_callbacks_named_by_action_and_position() {
        let out = compile(charge_call(json!({
            "on_success": [{"update": {"entity": "Order",
                                       "set": {"status": "paid"},
                                       "where": "pk_order = $order.pk"}}],
            "on_failure": [{"update": {"entity": "Order",
                                       "set": {"status": "failed"},
                                       "where": "pk_order = $order.pk"}}]
        })))
        .unwrap();
        let names: Vec<&str> = out.callbacks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["place_order_svc1_success", "place_order_svc1_failure"]);
    }

    #[test]
    fn test_empty_callback_lists_generate_nothing() {
        let out = compile(charge_call(json!({}))).unwrap();
        assert!(out.callbacks.is_empty());
    }

    #[test]
    fn test_second_call_same_pair_reuses_job_binding() {
        let out = compile(json!([
            {"insert": {"entity": "Order", "fields": {"total": 1}, "into": "order"}},
            {"call_service": {"service": "stripe", "operation": "create_charge", "input": {}}},
            {"call_service": {"service": "stripe", "operation": "create_charge", "input": {}}}
        ]))
        .unwrap();
        let decls: Vec<_> = out
            .block
            .decls
            .iter()
            .filter(|d| d.contains("v_job_stripe_create_charge "))
            .collect();
        assert_eq!(decls.len(), 1);
    }
}
