//! Expression compilation: variable paths, literals, and the operator
//! table.
//!
//! The compiler here is stateless beyond the [`Scope`] it is handed, so
//! every step kind reuses it without shared mutable state. `$name.field`
//! access on entity-typed variables follows the Trinity resolution rule:
//! `pk` selects the integer surrogate key (joins), `id` the public UUID,
//! `identifier` the human-readable slug, and any other field reads the
//! entity's JSONB data payload.

use sprocket_core::{snake_ident, CompileError, Expr, Literal, Scope, VarType};

/// Compile an expression into a SQL fragment.
pub fn compile_expr(expr: &Expr, scope: &Scope) -> Result<String, CompileError> {
    match expr {
        Expr::Literal(lit) => Ok(render_literal(lit)),
        Expr::Var { name, field } => resolve_var(name, field.as_deref(), scope),
        Expr::Op { name, args } => {
            let rendered = args
                .iter()
                .map(|a| compile_expr(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            render_op(name, &rendered)
        }
    }
}

/// Compile a raw where-clause template, substituting every `$name` /
/// `$name.field` token with its resolved SQL reference. All other text
/// passes through untouched.
pub fn compile_template(template: &str, scope: &Scope) -> Result<String, CompileError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some(&(_, nc)) = chars.peek() {
            if nc.is_alphanumeric() || nc == '_' {
                name.push(nc);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            out.push('$');
            continue;
        }
        let mut field = None;
        if let Some(&(_, '.')) = chars.peek() {
            // Only consume the dot if an identifier follows it.
            let mut lookahead = chars.clone();
            lookahead.next();
            let mut f = String::new();
            while let Some(&(_, fc)) = lookahead.peek() {
                if fc.is_alphanumeric() || fc == '_' {
                    f.push(fc);
                    lookahead.next();
                } else {
                    break;
                }
            }
            if !f.is_empty() {
                chars = lookahead;
                field = Some(f);
            }
        }
        out.push_str(&resolve_var(&name, field.as_deref(), scope)?);
    }
    Ok(out)
}

/// Resolve a `$name` / `$name.field` path against the scope.
pub fn resolve_var(
    name: &str,
    field: Option<&str>,
    scope: &Scope,
) -> Result<String, CompileError> {
    let binding = scope.resolve(name)?;
    let var = &binding.sql_name;
    match field {
        None => Ok(var.clone()),
        Some(f) => match &binding.ty {
            VarType::Entity(entity) => Ok(match f {
                "pk" => format!("{}.pk_{}", var, snake_ident(entity)),
                "id" => format!("{}.id", var),
                "identifier" => format!("{}.identifier", var),
                other => format!("({}.data ->> '{}')", var, other),
            }),
            VarType::Json => Ok(format!("({} ->> '{}')", var, f)),
            VarType::Scalar(t) => Err(CompileError::TypeMismatch {
                name: name.to_string(),
                expected: "a row or jsonb variable".to_string(),
                found: t.clone(),
            }),
        },
    }
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(true) => "TRUE".to_string(),
        Literal::Bool(false) => "FALSE".to_string(),
        Literal::Int(n) => n.to_string(),
        Literal::Float(text) => text.clone(),
        Literal::Str(s) => quote_str(s),
    }
}

/// Single-quote a string literal, doubling embedded quotes.
pub(crate) fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// The operator table: each entry renders its target syntax. Unknown
/// names fail rather than passing through.
fn render_op(name: &str, args: &[String]) -> Result<String, CompileError> {
    let binary = |sql_op: &str| -> Result<String, CompileError> {
        if args.len() != 2 {
            return Err(CompileError::schema(
                "expression",
                format!("operator '{}' takes exactly two operands", name),
            ));
        }
        Ok(format!("({} {} {})", args[0], sql_op, args[1]))
    };
    // Variadic operators still need operands; an empty argument list
    // would render invalid SQL that only fails at apply time.
    let at_least = |min: usize| -> Result<(), CompileError> {
        if args.len() < min {
            return Err(CompileError::schema(
                "expression",
                format!("operator '{}' takes at least {} operand(s)", name, min),
            ));
        }
        Ok(())
    };

    match name {
        "concat" => {
            at_least(2)?;
            Ok(args.join(" || "))
        }
        "coalesce" => {
            at_least(1)?;
            Ok(format!("COALESCE({})", args.join(", ")))
        }
        "eq" => binary("="),
        "neq" => binary("<>"),
        "lt" => binary("<"),
        "lte" => binary("<="),
        "gt" => binary(">"),
        "gte" => binary(">="),
        "and" => {
            at_least(2)?;
            Ok(format!("({})", args.join(" AND ")))
        }
        "or" => {
            at_least(2)?;
            Ok(format!("({})", args.join(" OR ")))
        }
        "not" => {
            if args.len() != 1 {
                return Err(CompileError::schema(
                    "expression",
                    "operator 'not' takes exactly one operand",
                ));
            }
            Ok(format!("NOT ({})", args[0]))
        }
        other => Err(CompileError::UnknownOperator {
            name: other.to_string(),
        }),
    }
}
