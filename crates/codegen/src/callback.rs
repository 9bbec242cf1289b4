//! Callback procedure generation.
//!
//! Each non-empty `on_success`/`on_failure` list becomes a standalone
//! procedure with signature `(p_job_id BIGINT, p_payload JSONB)`. The
//! procedure reloads the triggering entity row through the job record,
//! seeds a fresh scope with that row plus the outcome payload, and runs
//! the ordinary step compiler on the nested list. Nested steps keep the
//! full vocabulary, including further `call_service` steps.

use sprocket_core::{Binding, CompileError, EntityDef, Scope, Step, VarType};

use crate::emit::ProcedureDef;
use crate::steps::StepCompiler;
use crate::{implicit_return, CompileCtx, CompiledProcedure};

/// Compile one callback body. Returns the procedure, any callbacks its
/// own nested `call_service` steps produced, and accumulated warnings.
pub(crate) fn compile_callback(
    ctx: &CompileCtx<'_>,
    name: &str,
    trigger_name: &str,
    entity: &EntityDef,
    steps: &[Step],
) -> Result<(CompiledProcedure, Vec<CompiledProcedure>, Vec<String>), CompileError> {
    let mut compiler = StepCompiler::new(ctx, name);
    let entity_var = format!("v_{}", trigger_name);

    // Fresh scope: only the reloaded trigger row and the worker payload.
    let mut scope = Scope::new();
    scope.bind(
        trigger_name,
        Binding {
            sql_name: entity_var.clone(),
            ty: VarType::Entity(entity.name.clone()),
        },
    );
    scope.bind(
        "payload",
        Binding {
            sql_name: "p_payload".to_string(),
            ty: VarType::Json,
        },
    );

    let block = compiler.compile_steps(steps, &mut scope)?;

    let mut decls = vec![
        "v_job jobs.tb_job_run%ROWTYPE;".to_string(),
        format!("{} {}%ROWTYPE;", entity_var, entity.table()),
    ];
    decls.extend(block.decls);

    let mut body = vec![
        "SELECT * INTO v_job FROM jobs.tb_job_run WHERE id = p_job_id;".to_string(),
        format!(
            "SELECT * INTO {} FROM {} WHERE {} = v_job.entity_pk;",
            entity_var,
            entity.table(),
            entity.pk_column()
        ),
    ];
    body.extend(block.body);
    if !block.returned {
        body.push(implicit_return(name));
    }

    let def = ProcedureDef {
        schema: ctx.proc_schema.clone(),
        name: name.to_string(),
        comments: vec![format!(
            "Invoked once by the worker on a terminal job outcome for {}.",
            entity.name
        )],
        params: vec![
            "p_job_id BIGINT".to_string(),
            "p_payload JSONB DEFAULT NULL".to_string(),
        ],
        decls,
        body,
    };

    let proc = CompiledProcedure {
        schema: ctx.proc_schema.clone(),
        name: name.to_string(),
        sql: def.render(),
    };
    Ok((proc, compiler.callbacks, compiler.warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_support::{ctx_fixture, CtxFixture};
    use sprocket_core::build_steps;
    use serde_json::json;

    fn compile(
        raw: serde_json::Value,
    ) -> Result<(CompiledProcedure, Vec<CompiledProcedure>), CompileError> {
        let CtxFixture { types, services, entities } = ctx_fixture();
        let ctx = CompileCtx {
            types: &types,
            services: &services,
            entities: &entities,
            proc_schema: "crm".to_string(),
        };
        let steps = build_steps(raw.as_array().unwrap(), "on_success")?;
        let entity = entities.get("Order").unwrap();
        let (proc, nested, _) =
            compile_callback(&ctx, "place_order_svc1_success", "order", entity, &steps)?;
        Ok((proc, nested))
    }

    #[test]
    fn test_callback_reloads_trigger_row() {
        let (proc, _) = compile(json!([
            {"update": {"entity": "Order", "set": {"status": "paid"},
                        "where": "pk_order = $order.pk"}}
        ]))
        .unwrap();
        assert!(proc.sql.contains("CREATE OR REPLACE FUNCTION crm.place_order_svc1_success("));
        assert!(proc.sql.contains("p_job_id BIGINT"));
        assert!(proc.sql.contains("p_payload JSONB DEFAULT NULL"));
        assert!(proc
            .sql
            .contains("SELECT * INTO v_job FROM jobs.tb_job_run WHERE id = p_job_id;"));
        assert!(proc
            .sql
            .contains("SELECT * INTO v_order FROM crm.tb_order WHERE pk_order = v_job.entity_pk;"));
        assert!(proc.sql.contains(
            "UPDATE crm.tb_order SET data = data || jsonb_build_object('status', 'paid') WHERE pk_order = v_order.pk_order;"
        ));
    }

    #[test]
    fn test_payload_bound_in_fresh_scope() {
        let (proc, _) = compile(json!([
            {"update": {"entity": "Order",
                        "set": {"charge_id": "$payload.charge_id"},
                        "where": "pk_order = $order.pk"}}
        ]))
        .unwrap();
        assert!(proc.sql.contains("(p_payload ->> 'charge_id')"));
    }

    #[test]
    fn test_outer_variables_not_visible() {
        // "total" was bound in the action body, not here.
        let err = compile(json!([
            {"assign": {"name": "total", "value": 1}}
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedVariable {
                name: "total".to_string()
            }
        );
    }

    #[test]
    fn test_implicit_success_return_appended() {
        let (proc, _) = compile(json!([
            {"update": {"entity": "Order", "set": {"status": "paid"},
                        "where": "pk_order = $order.pk"}}
        ]))
        .unwrap();
        assert!(proc.sql.contains(
            "RETURN app.log_and_return_mutation('place_order_svc1_success', 'success', NULL::jsonb);"
        ));
    }

    #[test]
    fn test_nested_call_service_recurses() {
        let (proc, nested) = compile(json!([
            {"call_service": {"service": "mailer", "operation": "send_email",
                              "input": {"to": "$order.customer_email"},
                              "on_success": [{"update": {"entity": "Order",
                                                         "set": {"notified": true},
                                                         "where": "pk_order = $order.pk"}}]}}
        ]))
        .unwrap();
        assert!(proc.sql.contains("'Order:' || v_order.id::text || ':mailer:send_email'"));
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].name, "place_order_svc1_success_svc1_success");
    }
}
