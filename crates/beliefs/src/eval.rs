use volition_core::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::context::BeliefContext;
use crate::error::EvalError;

/// Evaluate a parsed belief query expression against a context. Evaluation is
/// pure: the context is never mutated.
pub fn eval(expr: &Expr, ctx: &BeliefContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n) => Ok(Value::F64(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Symbol(path) => ctx
            .fact(path)
            .ok_or_else(|| EvalError::UnknownSymbol(path.clone())),
        Expr::Unary { op, expr } => {
            let value = eval(expr, ctx)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnaryOp::Neg => numeric(&value)
                    .map(|n| Value::F64(-n))
                    .ok_or_else(|| EvalError::Type("cannot negate a non-number".into())),
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, ctx),
        Expr::Call { func, args } => eval_call(func, args, ctx),
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    ctx: &BeliefContext,
) -> Result<Value, EvalError> {
    // Short-circuit the logical operators before touching the right side.
    match op {
        BinaryOp::And => {
            let l = eval(lhs, ctx)?;
            if !l.is_truthy() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(eval(rhs, ctx)?.is_truthy()));
        }
        BinaryOp::Or => {
            let l = eval(lhs, ctx)?;
            if l.is_truthy() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(eval(rhs, ctx)?.is_truthy()));
        }
        _ => {}
    }

    let l = eval(lhs, ctx)?;
    let r = eval(rhs, ctx)?;
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let (a, b) = both_numeric(&l, &r)?;
            let out = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                _ => a / b,
            };
            Ok(Value::F64(out))
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let (a, b) = both_numeric(&l, &r)?;
            let out = match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            };
            Ok(Value::Bool(out))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    }
}

fn eval_call(func: &str, args: &[Expr], ctx: &BeliefContext) -> Result<Value, EvalError> {
    let arity = |expected: usize| -> Result<(), EvalError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(EvalError::Arity {
                func: func.to_string(),
                expected,
                got: args.len(),
            })
        }
    };
    match func {
        // has(path): the belief path resolves to something.
        "has" => {
            arity(1)?;
            let path = symbol_arg(func, &args[0])?;
            Ok(Value::Bool(
                ctx.fact(path).is_some() || ctx.message(path).is_some(),
            ))
        }
        // count(resource): current count of the named resource.
        "count" => {
            arity(1)?;
            let name = symbol_arg(func, &args[0])?;
            let resource = ctx
                .resource(name)
                .ok_or_else(|| EvalError::UnknownSymbol(name.to_string()))?;
            Ok(Value::I64(resource.count()))
        }
        // valid(resource): the named resource is within its bounds.
        "valid" => {
            arity(1)?;
            let name = symbol_arg(func, &args[0])?;
            let resource = ctx
                .resource(name)
                .ok_or_else(|| EvalError::UnknownSymbol(name.to_string()))?;
            Ok(Value::Bool(resource.is_valid()))
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

fn symbol_arg<'a>(func: &str, arg: &'a Expr) -> Result<&'a str, EvalError> {
    match arg {
        Expr::Symbol(name) => Ok(name),
        Expr::Str(name) => Ok(name),
        _ => Err(EvalError::Type(format!(
            "{func}() expects a belief name argument"
        ))),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn both_numeric(l: &Value, r: &Value) -> Result<(f64, f64), EvalError> {
    match (numeric(l), numeric(r)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(EvalError::Type(
            "arithmetic/comparison needs numeric operands".into(),
        )),
    }
}

/// Equality across the value variants a query can produce: numerics compare
/// widened, otherwise the variants must match.
fn loose_eq(l: &Value, r: &Value) -> bool {
    if let (Some(a), Some(b)) = (numeric(l), numeric(r)) {
        return a == b;
    }
    match (l, r) {
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Id(a), Value::Id(b)) => a == b,
        _ => false,
    }
}
