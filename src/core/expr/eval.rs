//! Asynchronous evaluation of parsed templates.
//!
//! Path references recurse through the document's read path, so nested
//! expressions evaluate (and cache) on demand. Resolver calls are awaited;
//! they are the only suspension points.

use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use serde_json::Value;

use crate::core::coerce::{self, Num};
use crate::core::document::{AccessCtx, DocumentInner, read_owned};
use crate::core::expr::ast::{BinOp, Builtin, Expr, Span, Template};
use crate::core::path;
use crate::errors::Error;

/// Evaluation context for one expression entry.
pub(crate) struct EvalScope<'a> {
    pub inner: &'a Rc<DocumentInner>,
    /// Prefix of the expression key's parent; relative references resolve
    /// against it.
    pub scope: &'a str,
    /// Storage path of the entry being computed, for error reporting.
    pub entry_path: &'a str,
    /// Burst context carrying the frame and this entry's dependency sink.
    pub access: &'a AccessCtx,
}

/// Evaluate a template. A bare single-span template preserves the referenced
/// value's type; anything else concatenates left-to-right into a string.
pub(crate) async fn eval_template(
    scope: &EvalScope<'_>,
    template: &Template,
) -> Result<Value, Error> {
    if let Some(expr) = template.as_bare() {
        return eval_expr(scope, expr, false).await;
    }
    let mut out = String::new();
    for span in &template.spans {
        match span {
            Span::Text(text) => out.push_str(text),
            Span::Expr(expr) => {
                let value = eval_expr(scope, expr, false).await?;
                out.push_str(&coerce::to_display(&value));
            }
        }
    }
    Ok(Value::String(out))
}

/// Evaluate one expression. `fresh` is set inside a `fresh(...)` marker and
/// forces expression reads underneath to bypass the cache.
fn eval_expr<'a>(
    scope: &'a EvalScope<'a>,
    expr: &'a Expr,
    fresh: bool,
) -> LocalBoxFuture<'a, Result<Value, Error>> {
    async move {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path { absolute, segments } => {
                let rel = segments.join(".");
                let target = if *absolute {
                    rel
                } else {
                    path::join(scope.scope, &rel)
                };
                let access = scope.access.clone().with_fresh(fresh);
                read_owned(scope.inner, target, access).await
            }
            Expr::Builtin {
                builtin: Builtin::Fresh,
                arg,
            } => {
                // The enclosing entry must re-evaluate on every future read.
                scope.access.mark_uncacheable();
                eval_expr(scope, arg, true).await
            }
            Expr::Builtin { builtin, arg } => {
                let value = eval_expr(scope, arg, fresh).await?;
                apply_builtin(*builtin, &value, scope.entry_path)
            }
            Expr::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval_expr(scope, arg, fresh).await?);
                }
                let resolver = scope
                    .inner
                    .resolvers()
                    .get(name)
                    .ok_or_else(|| Error::ResolverNotFound { name: name.clone() })?;
                match resolver.call(values).await {
                    Ok(value) => Ok(value),
                    Err(source) => {
                        let err = Error::Resolver {
                            name: name.clone(),
                            path: scope.entry_path.to_string(),
                            message: format!("{source:#}"),
                        };
                        scope.inner.dispose_site(err, scope.entry_path)
                    }
                }
            }
            Expr::Neg(operand) => {
                let value = eval_expr(scope, operand, fresh).await?;
                Ok(match coerce::to_number(&value) {
                    Some(Num::Int(i)) => match i.checked_neg() {
                        Some(neg) => Value::from(neg),
                        None => Num::Float(-(i as f64)).into_value(),
                    },
                    Some(Num::Float(f)) => Num::Float(-f).into_value(),
                    None => Value::Null,
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = eval_expr(scope, lhs, fresh).await?;
                let right = eval_expr(scope, rhs, fresh).await?;
                Ok(apply_binary(*op, &left, &right))
            }
        }
    }
    .boxed_local()
}

/// `+` concatenates when either side is a string; everything else follows
/// numeric coercion with IEEE-754 semantics, surfacing non-finite and
/// non-numeric results as null.
fn apply_binary(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    if op == BinOp::Add && (lhs.is_string() || rhs.is_string()) {
        return Value::String(format!(
            "{}{}",
            coerce::to_display(lhs),
            coerce::to_display(rhs)
        ));
    }
    match (coerce::to_number(lhs), coerce::to_number(rhs)) {
        (Some(left), Some(right)) => numeric(op, left, right),
        _ => Value::Null,
    }
}

fn numeric(op: BinOp, lhs: Num, rhs: Num) -> Value {
    // Integer results stay exact where possible; division is always float.
    if let (Num::Int(x), Num::Int(y)) = (lhs, rhs) {
        let exact = match op {
            BinOp::Add => x.checked_add(y),
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::Rem if y != 0 => x.checked_rem(y),
            BinOp::Rem | BinOp::Div => None,
        };
        if let Some(value) = exact {
            return Value::from(value);
        }
    }
    let (x, y) = (lhs.as_f64(), rhs.as_f64());
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::Rem => x % y,
    };
    Num::Float(result).into_value()
}

fn apply_builtin(builtin: Builtin, value: &Value, entry_path: &str) -> Result<Value, Error> {
    match builtin {
        Builtin::Bool => Ok(Value::Bool(coerce::to_bool(value))),
        Builtin::Int => coerce::to_int(value)
            .map(Value::from)
            .ok_or_else(|| conversion_error(value, "int", entry_path)),
        Builtin::Float => coerce::to_number(value)
            .map(|n| Num::Float(n.as_f64()).into_value())
            .ok_or_else(|| conversion_error(value, "float", entry_path)),
        Builtin::Json => match value {
            Value::String(source) => {
                serde_json::from_str(source).map_err(|e| Error::Validation {
                    path: entry_path.to_string(),
                    message: format!("invalid JSON: {e}"),
                })
            }
            // Already-structured values pass through.
            other => Ok(other.clone()),
        },
        // Handled before argument evaluation.
        Builtin::Fresh => Ok(value.clone()),
    }
}

fn conversion_error(value: &Value, target: &str, entry_path: &str) -> Error {
    Error::Validation {
        path: entry_path.to_string(),
        message: format!("cannot convert {} to {target}", value_kind(value)),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
