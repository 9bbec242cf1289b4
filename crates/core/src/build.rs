//! AST builder: raw step lists to typed [`Step`] sequences.
//!
//! Input is `serde_json::Value` as produced by any YAML/JSON front end;
//! parsing the source text is not this crate's concern. The builder
//! validates structure only -- recognized step kinds, required fields,
//! recursively built nested lists -- and defers all type resolution to
//! compilation. Nested failures carry a path like `steps[2].then[0]` so
//! malformed steps fail at their own depth.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::ast::{Action, CallService, Expr, Literal, Param, Projection, Step};
use crate::error::CompileError;

/// Step-object keys the builder recognizes, in dispatch order.
const STEP_KINDS: &[&str] = &[
    "declare",
    "assign",
    "query",
    "if",
    "foreach",
    "insert",
    "update",
    "call_service",
    "return",
    "call_function",
];

// ──────────────────────────────────────────────
// Entry points
// ──────────────────────────────────────────────

/// Build a whole [`Action`] from its raw object form.
pub fn build_action(raw: &Value) -> Result<Action, CompileError> {
    let obj = as_object(raw, "action")?;
    let name = require_str(obj, "name", "action")?;
    let description = optional_str(obj, "description", "action")?;
    let returns = optional_str(obj, "returns", "action")?;

    let mut params = Vec::new();
    if let Some(raw_params) = obj.get("params") {
        let list = raw_params.as_array().ok_or_else(|| {
            CompileError::schema("action.params", "expected a list of parameters")
        })?;
        for (i, p) in list.iter().enumerate() {
            let path = format!("action.params[{}]", i);
            let pobj = as_object(p, &path)?;
            params.push(Param {
                name: require_str(pobj, "name", &path)?,
                type_name: require_str(pobj, "type", &path)?,
            });
        }
    }

    let raw_steps = obj
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| CompileError::schema("action", "missing required field 'steps'"))?;
    let steps = build_steps(raw_steps, "steps")?;

    Ok(Action {
        name,
        description,
        params,
        returns,
        steps,
    })
}

/// Build an ordered step sequence; `path` prefixes error locations.
pub fn build_steps(raw: &[Value], path: &str) -> Result<Vec<Step>, CompileError> {
    raw.iter()
        .enumerate()
        .map(|(i, step)| build_step(step, &format!("{}[{}]", path, i)))
        .collect()
}

// ──────────────────────────────────────────────
// Step dispatch
// ──────────────────────────────────────────────

fn build_step(raw: &Value, path: &str) -> Result<Step, CompileError> {
    let obj = as_object(raw, path)?;

    let kind = STEP_KINDS.iter().find(|k| obj.contains_key(**k));
    let kind = match kind {
        Some(k) => *k,
        None => {
            // Name the raw key so the author sees what was written.
            let key = obj.keys().next().cloned().unwrap_or_default();
            return Err(CompileError::UnknownStepKind {
                path: path.to_string(),
                key,
            });
        }
    };

    match kind {
        "declare" => build_declare(obj, path),
        "assign" => build_assign(obj, path),
        "query" => build_query(obj, path),
        "if" => build_conditional(obj, path),
        "foreach" => build_loop(obj, path),
        "insert" => build_insert(obj, path),
        "update" => build_update(obj, path),
        "call_service" => build_call_service(obj, path),
        "return" => build_return(obj, path),
        "call_function" => build_function_call(obj, path),
        _ => unreachable!("kind comes from STEP_KINDS"),
    }
}

fn build_declare(
    obj: &serde_json::Map<String, Value>,
    path: &str,
) -> Result<Step, CompileError> {
    let body = as_object(&obj["declare"], path)?;
    let initial = match body.get("initial") {
        Some(v) => Some(build_expr(v, path)?),
        None => None,
    };
    Ok(Step::Declare {
        name: require_str(body, "name", path)?,
        type_name: require_str(body, "type", path)?,
        initial,
    })
}

fn build_assign(obj: &serde_json::Map<String, Value>, path: &str) -> Result<Step, CompileError> {
    let body = as_object(&obj["assign"], path)?;
    let raw_value = body
        .get("value")
        .ok_or_else(|| CompileError::schema(path, "missing required field 'value'"))?;
    Ok(Step::Assign {
        name: require_str(body, "name", path)?,
        value: build_expr(raw_value, path)?,
    })
}

fn build_query(obj: &serde_json::Map<String, Value>, path: &str) -> Result<Step, CompileError> {
    let body = as_object(&obj["query"], path)?;
    let select = match body.get("select") {
        Some(Value::String(s)) if s == "*" => Projection::All,
        Some(Value::String(s)) => Projection::Column(s.clone()),
        Some(_) => {
            return Err(CompileError::schema(
                path,
                "'select' must be '*' or a single column name",
            ))
        }
        None => Projection::All,
    };
    Ok(Step::Query {
        into: require_str(body, "into", path)?,
        select,
        from: require_str(body, "from", path)?,
        where_clause: optional_str(body, "where", path)?,
    })
}

fn build_conditional(
    obj: &serde_json::Map<String, Value>,
    path: &str,
) -> Result<Step, CompileError> {
    let mut branches = Vec::new();

    let cond = build_expr(&obj["if"], path)?;
    let then_steps = nested_steps(obj.get("then"), &format!("{}.then", path))?;
    branches.push((cond, then_steps));

    if let Some(raw_elseifs) = obj.get("elseif") {
        let list = raw_elseifs
            .as_array()
            .ok_or_else(|| CompileError::schema(path, "'elseif' must be a list"))?;
        for (i, branch) in list.iter().enumerate() {
            let branch_path = format!("{}.elseif[{}]", path, i);
            let bobj = as_object(branch, &branch_path)?;
            let cond_raw = bobj
                .get("if")
                .ok_or_else(|| CompileError::schema(&branch_path, "missing required field 'if'"))?;
            let cond = build_expr(cond_raw, &branch_path)?;
            let body = nested_steps(bobj.get("then"), &format!("{}.then", branch_path))?;
            branches.push((cond, body));
        }
    }

    let else_steps = nested_steps(obj.get("else"), &format!("{}.else", path))?;

    Ok(Step::Conditional {
        branches,
        else_steps,
    })
}

fn build_loop(obj: &serde_json::Map<String, Value>, path: &str) -> Result<Step, CompileError> {
    let body = as_object(&obj["foreach"], path)?;
    let iterable_raw = body
        .get("in")
        .ok_or_else(|| CompileError::schema(path, "missing required field 'in'"))?;
    let steps_raw = body
        .get("steps")
        .ok_or_else(|| CompileError::schema(path, "missing required field 'steps'"))?;
    let steps_list = steps_raw
        .as_array()
        .ok_or_else(|| CompileError::schema(path, "'steps' must be a list"))?;
    Ok(Step::Loop {
        binding: require_str(body, "binding", path)?,
        iterable: build_expr(iterable_raw, path)?,
        body: build_steps(steps_list, &format!("{}.steps", path))?,
    })
}

fn build_insert(obj: &serde_json::Map<String, Value>, path: &str) -> Result<Step, CompileError> {
    let body = as_object(&obj["insert"], path)?;
    Ok(Step::Insert {
        entity: require_str(body, "entity", path)?,
        fields: build_expr_map(body.get("fields"), "fields", path)?,
        into: optional_str(body, "into", path)?,
    })
}

fn build_update(obj: &serde_json::Map<String, Value>, path: &str) -> Result<Step, CompileError> {
    let body = as_object(&obj["update"], path)?;
    let set = build_expr_map(body.get("set"), "set", path)?;
    if set.is_empty() {
        return Err(CompileError::schema(path, "'set' must name at least one field"));
    }
    // No where clause means a full-table mutation; refuse it here rather
    // than letting it reach a database.
    let where_clause = require_str(body, "where", path)?;
    Ok(Step::Update {
        entity: require_str(body, "entity", path)?,
        set,
        where_clause,
    })
}

fn build_call_service(
    obj: &serde_json::Map<String, Value>,
    path: &str,
) -> Result<Step, CompileError> {
    let body = as_object(&obj["call_service"], path)?;

    let async_mode = match body.get("async") {
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(CompileError::schema(path, "'async' must be a boolean")),
        None => true,
    };
    if !async_mode {
        return Err(CompileError::schema(
            path,
            "synchronous service calls are not supported; call_service always enqueues a job",
        ));
    }

    let on_success = nested_steps(body.get("on_success"), &format!("{}.on_success", path))?;
    let on_failure = nested_steps(body.get("on_failure"), &format!("{}.on_failure", path))?;

    Ok(Step::CallService(CallService {
        service: require_str(body, "service", path)?,
        operation: require_str(body, "operation", path)?,
        input: build_expr_map(body.get("input"), "input", path)?,
        async_mode,
        timeout: optional_u32(body, "timeout", path)?,
        max_retries: optional_u32(body, "max_retries", path)?,
        correlation_field: optional_str(body, "correlation_field", path)?,
        on_success,
        on_failure,
    }))
}

fn build_return(obj: &serde_json::Map<String, Value>, path: &str) -> Result<Step, CompileError> {
    let value = match &obj["return"] {
        Value::Null => None,
        v => Some(build_expr(v, path)?),
    };
    Ok(Step::Return { value })
}

fn build_function_call(
    obj: &serde_json::Map<String, Value>,
    path: &str,
) -> Result<Step, CompileError> {
    let body = as_object(&obj["call_function"], path)?;
    let mut args = Vec::new();
    if let Some(raw_args) = body.get("args") {
        let list = raw_args
            .as_array()
            .ok_or_else(|| CompileError::schema(path, "'args' must be a list"))?;
        for arg in list {
            args.push(build_expr(arg, path)?);
        }
    }
    Ok(Step::FunctionCall {
        name: require_str(body, "name", path)?,
        args,
        into: optional_str(body, "into", path)?,
    })
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

/// Build an expression from its raw value form. Strings starting with
/// `$` are variable paths; single-key objects are operator applications;
/// everything else is a literal.
pub fn build_expr(raw: &Value, path: &str) -> Result<Expr, CompileError> {
    match raw {
        Value::Null => Ok(Expr::Literal(Literal::Null)),
        Value::Bool(b) => Ok(Expr::Literal(Literal::Bool(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Expr::Literal(Literal::Int(i)))
            } else {
                Ok(Expr::Literal(Literal::Float(n.to_string())))
            }
        }
        Value::String(s) => {
            if let Some(stripped) = s.strip_prefix('$') {
                let (name, field) = match stripped.split_once('.') {
                    Some((n, f)) => (n.to_string(), Some(f.to_string())),
                    None => (stripped.to_string(), None),
                };
                if name.is_empty() {
                    return Err(CompileError::schema(path, "empty variable reference '$'"));
                }
                Ok(Expr::Var { name, field })
            } else {
                Ok(Expr::Literal(Literal::Str(s.clone())))
            }
        }
        Value::Object(obj) => {
            if obj.len() != 1 {
                return Err(CompileError::schema(
                    path,
                    "operator expression must have exactly one key",
                ));
            }
            let (op, raw_args) = match obj.iter().next() {
                Some(entry) => entry,
                None => {
                    return Err(CompileError::schema(
                        path,
                        "operator expression must have exactly one key",
                    ))
                }
            };
            let args = match raw_args {
                Value::Array(list) => list
                    .iter()
                    .map(|a| build_expr(a, path))
                    .collect::<Result<Vec<_>, _>>()?,
                single => vec![build_expr(single, path)?],
            };
            Ok(Expr::Op {
                name: op.clone(),
                args,
            })
        }
        Value::Array(_) => Err(CompileError::schema(
            path,
            "a bare list is not a valid expression",
        )),
    }
}

// ──────────────────────────────────────────────
// Raw-value helpers
// ──────────────────────────────────────────────

fn as_object<'a>(
    raw: &'a Value,
    path: &str,
) -> Result<&'a serde_json::Map<String, Value>, CompileError> {
    raw.as_object()
        .ok_or_else(|| CompileError::schema(path, "expected a mapping"))
}

fn require_str(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<String, CompileError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(CompileError::schema(
            path,
            format!("field '{}' must be a string", key),
        )),
        None => Err(CompileError::schema(
            path,
            format!("missing required field '{}'", key),
        )),
    }
}

fn optional_str(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<String>, CompileError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(CompileError::schema(
            path,
            format!("field '{}' must be a string", key),
        )),
    }
}

fn optional_u32(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<Option<u32>, CompileError> {
    match obj.get(key) {
        Some(v) => {
            let n = v.as_u64().and_then(|n| u32::try_from(n).ok());
            n.map(Some).ok_or_else(|| {
                CompileError::schema(path, format!("field '{}' must be a non-negative integer", key))
            })
        }
        None => Ok(None),
    }
}

fn build_expr_map(
    raw: Option<&Value>,
    key: &str,
    path: &str,
) -> Result<BTreeMap<String, Expr>, CompileError> {
    let mut out = BTreeMap::new();
    if let Some(raw) = raw {
        let obj = raw
            .as_object()
            .ok_or_else(|| CompileError::schema(path, format!("'{}' must be a mapping", key)))?;
        for (field, value) in obj {
            out.insert(field.clone(), build_expr(value, path)?);
        }
    }
    Ok(out)
}

fn nested_steps(raw: Option<&Value>, path: &str) -> Result<Vec<Step>, CompileError> {
    match raw {
        Some(Value::Array(list)) => build_steps(list, path),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(_) => Err(CompileError::schema(path, "expected a list of steps")),
    }
}
