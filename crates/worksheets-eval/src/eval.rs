//! Expression evaluation against a live worksheet.

use worksheets_common::{Number, RoundingMode, Slice, SliceElement, Value, WorksheetError, WorksheetErrorKind, WsId};
use worksheets_parse::{Expr, ExprKind};

use crate::graph::WorksheetGraph;

pub(crate) struct Evaluator<'g> {
    graph: &'g WorksheetGraph,
    ws: WsId,
}

fn eval_err(msg: impl Into<String>) -> WorksheetError {
    WorksheetError::new(WorksheetErrorKind::Eval).with_message(msg)
}

impl<'g> Evaluator<'g> {
    pub fn new(graph: &'g WorksheetGraph, ws: WsId) -> Self {
        Evaluator { graph, ws }
    }

    /// Evaluate `expr`. `round` carries the rounding mode supplied by an
    /// enclosing `round` clause; only a division consumes it.
    pub fn eval(&self, expr: &Expr, round: Option<RoundingMode>) -> Result<Value, WorksheetError> {
        match &expr.kind {
            ExprKind::Literal(v) => Ok(v.clone()),
            ExprKind::Ident(name) => self.field(name),
            ExprKind::Selector(path) => self.eval_path(path),
            ExprKind::Round { mode, expr } => self.eval(expr, Some(*mode)),
            ExprKind::UnaryOp { op, expr } => {
                let v = self.eval(expr, round)?;
                match op.as_str() {
                    "!" => v.op_not(),
                    "-" => v.op_neg(),
                    other => Err(eval_err(format!("unknown unary operator '{other}'"))),
                }
            }
            ExprKind::BinaryOp { op, left, right } => self.eval_binary(op, left, right, round),
            ExprKind::Call { name, args } => self.eval_call(name, args),
        }
    }

    fn eval_binary(
        &self,
        op: &str,
        left: &Expr,
        right: &Expr,
        round: Option<RoundingMode>,
    ) -> Result<Value, WorksheetError> {
        let l = self.eval(left, None)?;
        let r = self.eval(right, None)?;
        match op {
            "+" => l.op_plus(&r),
            "-" => l.op_minus(&r),
            "*" => l.op_times(&r),
            "/" => l.op_div(&r, round),
            "&&" => l.op_and(&r),
            "||" => l.op_or(&r),
            "==" => Ok(l.op_eq(&r)),
            "!=" => l.op_eq(&r).op_not(),
            "<" | "<=" | ">" | ">=" => match l.op_cmp(&r)? {
                None => Ok(Value::Undefined),
                Some(ordering) => {
                    let keep = match op {
                        "<" => ordering.is_lt(),
                        "<=" => ordering.is_le(),
                        ">" => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    };
                    Ok(Value::Bool(keep))
                }
            },
            "in" => l.op_in(&r),
            other => Err(eval_err(format!("unknown operator '{other}'"))),
        }
    }

    /* ───────────────────── selectors & projection ───────────────────── */

    /// Current value of a field on the evaluation worksheet.
    fn field(&self, name: &str) -> Result<Value, WorksheetError> {
        self.graph.get(self.ws, name)
    }

    /// Walk a selector path, mapping the remaining tail over slice elements
    /// (so `children.amount` over a slice of worksheets yields a slice of
    /// amounts) and short-circuiting on any undefined intermediate.
    pub fn eval_path(&self, segments: &[String]) -> Result<Value, WorksheetError> {
        let first = self.field(&segments[0])?;
        self.walk(first, &segments[1..])
    }

    fn walk(&self, value: Value, rest: &[String]) -> Result<Value, WorksheetError> {
        if rest.is_empty() {
            return Ok(value);
        }
        match value {
            Value::Undefined => Ok(Value::Undefined),
            Value::Worksheet(child) => Evaluator::new(self.graph, child).eval_path(rest),
            Value::Slice(slice) => {
                let mut elements = Vec::with_capacity(slice.elements.len());
                for element in &slice.elements {
                    elements.push(SliceElement {
                        rank: element.rank,
                        value: self.walk(element.value.clone(), rest)?,
                    });
                }
                // The projected slice needs an identity that is stable
                // across recomputations (or the identity rule would see a
                // fresh slice every time) but distinct from the source's,
                // so a persisted projection never collides with the slice
                // it was projected from.
                let id = uuid::Uuid::new_v5(&slice.id, rest.join(".").as_bytes());
                Ok(Value::Slice(Slice::from_parts(id, slice.last_rank, elements)))
            }
            other => Err(eval_err(format!(
                "cannot select '{}' on {}",
                rest[0],
                other.kind_name()
            ))),
        }
    }

    /* ─────────────────────────── builtins ────────────────────────── */

    fn eval_call(&self, name: &str, args: &[Expr]) -> Result<Value, WorksheetError> {
        match name {
            "sum" => {
                let [arg] = args else {
                    return Err(eval_err("sum takes exactly one argument"));
                };
                match self.eval(arg, None)? {
                    Value::Undefined => Ok(Value::Undefined),
                    Value::Slice(slice) => {
                        let mut total = Number::from_int(0);
                        for value in slice.values() {
                            match value {
                                Value::Undefined => return Ok(Value::Undefined),
                                Value::Number(n) => total = total.plus(n)?,
                                other => {
                                    return Err(eval_err(format!(
                                        "sum over {} elements",
                                        other.kind_name()
                                    )));
                                }
                            }
                        }
                        Ok(Value::Number(total))
                    }
                    other => Err(eval_err(format!("sum needs a slice, got {}", other.kind_name()))),
                }
            }
            "len" => {
                let [arg] = args else {
                    return Err(eval_err("len takes exactly one argument"));
                };
                match self.eval(arg, None)? {
                    Value::Undefined => Ok(Value::Undefined),
                    Value::Slice(slice) => Ok(Value::int(slice.len() as i64)),
                    Value::Text(text) => Ok(Value::int(text.chars().count() as i64)),
                    other => Err(eval_err(format!(
                        "len needs a slice or text, got {}",
                        other.kind_name()
                    ))),
                }
            }
            "substr" => {
                let [text, start, end] = args else {
                    return Err(eval_err("substr takes text, start, end"));
                };
                let (text, start, end) = (
                    self.eval(text, None)?,
                    self.eval(start, None)?,
                    self.eval(end, None)?,
                );
                if text.is_undefined() || start.is_undefined() || end.is_undefined() {
                    return Ok(Value::Undefined);
                }
                let Value::Text(text) = text else {
                    return Err(eval_err(format!(
                        "substr needs text, got {}",
                        text.kind_name()
                    )));
                };
                let start = char_index(&start)?;
                let end = char_index(&end)?;
                let chars: Vec<char> = text.chars().collect();
                let start = start.min(chars.len());
                let end = end.clamp(start, chars.len());
                Ok(Value::Text(chars[start..end].iter().collect()))
            }
            other => Err(eval_err(format!("unknown function '{other}'"))),
        }
    }
}

fn char_index(value: &Value) -> Result<usize, WorksheetError> {
    match value {
        Value::Number(n) if n.scale == 0 => Ok(n.mantissa.max(0) as usize),
        other => Err(eval_err(format!(
            "substr index must be number[0], got {}",
            other.kind_name()
        ))),
    }
}
