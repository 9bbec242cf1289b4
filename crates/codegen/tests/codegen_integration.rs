//! End-to-end compilation scenarios over the public API.

use std::collections::BTreeMap;

use serde_json::json;
use sprocket_codegen::{compile_action, compile_batch, write_artifacts, CompileCtx};
use sprocket_core::{
    build_action, CompileError, EntityDef, Service, ServiceOperation, ServiceRegistry,
    TypeRegistry,
};

fn entities() -> BTreeMap<String, EntityDef> {
    let mut out = BTreeMap::new();
    out.insert(
        "Customer".to_string(),
        EntityDef {
            name: "Customer".to_string(),
            schema: "crm".to_string(),
            fields: [("name".to_string(), "text".to_string())].into_iter().collect(),
            references: vec![],
        },
    );
    out.insert(
        "Order".to_string(),
        EntityDef {
            name: "Order".to_string(),
            schema: "crm".to_string(),
            fields: [
                ("total".to_string(), "numeric".to_string()),
                ("status".to_string(), "text".to_string()),
            ]
            .into_iter()
            .collect(),
            references: vec!["Customer".to_string()],
        },
    );
    out
}

fn services() -> ServiceRegistry {
    ServiceRegistry::new(vec![Service::new(
        "stripe",
        vec![ServiceOperation::new("create_charge")],
    )])
}

fn place_order_raw() -> serde_json::Value {
    json!({
        "name": "place_order",
        "description": "Create an order and charge it asynchronously",
        "params": [
            {"name": "customer_id", "type": "uuid"},
            {"name": "total", "type": "numeric"}
        ],
        "steps": [
            {"insert": {"entity": "Order",
                        "fields": {"total": "$total", "status": "new"},
                        "into": "order"}},
            {"call_service": {
                "service": "stripe",
                "operation": "create_charge",
                "input": {"amount": "$order.total", "customer": "$customer_id"},
                "on_success": [
                    {"update": {"entity": "Order", "set": {"status": "paid"},
                                "where": "pk_order = $order.pk"}}
                ],
                "on_failure": [
                    {"update": {"entity": "Order", "set": {"status": "payment_failed"},
                                "where": "pk_order = $order.pk"}}
                ]
            }},
            {"return": "$order.id"}
        ]
    })
}

#[test]
fn test_place_order_end_to_end() {
    let types = TypeRegistry::standard();
    let services = services();
    let entities = entities();
    let ctx = CompileCtx {
        types: &types,
        services: &services,
        entities: &entities,
        proc_schema: "crm".to_string(),
    };

    let action = build_action(&place_order_raw()).unwrap();
    let compiled = compile_action(&action, &ctx).unwrap();

    let names: Vec<&str> = compiled.procedures.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["place_order", "place_order_svc1_success", "place_order_svc1_failure"]
    );

    let main = &compiled.procedures[0].sql;
    assert!(main.contains("CREATE OR REPLACE FUNCTION crm.place_order("));
    assert!(main.contains("p_customer_id UUID"));
    assert!(main.contains("p_total NUMERIC(18,6)"));
    assert!(main.contains(
        "INSERT INTO crm.tb_order (data) VALUES (jsonb_build_object('status', 'new', 'total', p_total)) RETURNING * INTO v_order;"
    ));
    assert!(main.contains("'Order:' || v_order.id::text || ':stripe:create_charge'"));
    assert!(main.contains("jsonb_build_object('amount', (v_order.data ->> 'total'), 'customer', p_customer_id)"));
    assert!(main.contains("ON CONFLICT (identifier) DO NOTHING;"));
    assert!(main.contains("RETURN app.log_and_return_mutation('place_order', 'success', to_jsonb(v_order.id));"));

    let success = &compiled.procedures[1].sql;
    assert!(success.contains("CREATE OR REPLACE FUNCTION crm.place_order_svc1_success("));
    assert!(success.contains("SELECT * INTO v_job FROM jobs.tb_job_run WHERE id = p_job_id;"));
    assert!(success.contains("SELECT * INTO v_order FROM crm.tb_order WHERE pk_order = v_job.entity_pk;"));
    assert!(success.contains(
        "UPDATE crm.tb_order SET data = data || jsonb_build_object('status', 'paid') WHERE pk_order = v_order.pk_order;"
    ));

    let failure = &compiled.procedures[2].sql;
    assert!(failure.contains("jsonb_build_object('status', 'payment_failed')"));
}

#[test]
fn test_compilation_is_deterministic() {
    let types = TypeRegistry::standard();
    let services = services();
    let entities = entities();
    let ctx = CompileCtx {
        types: &types,
        services: &services,
        entities: &entities,
        proc_schema: "crm".to_string(),
    };
    let action = build_action(&place_order_raw()).unwrap();

    let first = compile_action(&action, &ctx).unwrap();
    let second = compile_action(&action, &ctx).unwrap();
    for (a, b) in first.procedures.iter().zip(&second.procedures) {
        assert_eq!(a.sql, b.sql);
    }
}

#[test]
fn test_batch_collects_failures_and_orders_entities() {
    let types = TypeRegistry::standard();
    let services = services();
    let entities = entities();
    let ctx = CompileCtx {
        types: &types,
        services: &services,
        entities: &entities,
        proc_schema: "crm".to_string(),
    };

    let good = build_action(&place_order_raw()).unwrap();
    let bad = build_action(&json!({
        "name": "broken_action",
        "params": [{"name": "amount", "type": "moneyz"}],
        "steps": [{"return": null}]
    }))
    .unwrap();

    let report = compile_batch(&[bad, good], &ctx).unwrap();
    // Customer has no references, Order depends on it.
    assert_eq!(report.entity_order, vec!["Customer", "Order"]);
    assert_eq!(report.actions.len(), 1);
    assert_eq!(report.actions[0].name, "place_order");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].action, "broken_action");
    assert_eq!(
        report.failures[0].error,
        CompileError::UnknownType {
            field: "amount".to_string(),
            type_name: "moneyz".to_string(),
        }
    );
}

#[test]
fn test_write_artifacts_layout() {
    let types = TypeRegistry::standard();
    let services = services();
    let entities = entities();
    let ctx = CompileCtx {
        types: &types,
        services: &services,
        entities: &entities,
        proc_schema: "crm".to_string(),
    };
    let action = build_action(&place_order_raw()).unwrap();
    let report = compile_batch(&[action], &ctx).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let written = write_artifacts(&report, dir.path()).unwrap();
    let names: Vec<String> = written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["000_runtime.sql", "place_order.sql"]);

    let runtime = std::fs::read_to_string(&written[0]).unwrap();
    assert!(runtime.contains("CREATE TABLE IF NOT EXISTS jobs.tb_job_run"));
    assert!(runtime.contains("app.log_and_return_mutation"));

    let sql = std::fs::read_to_string(&written[1]).unwrap();
    assert!(sql.contains("crm.place_order("));
    assert!(sql.contains("crm.place_order_svc1_success("));
    assert!(sql.contains("crm.place_order_svc1_failure("));
}
