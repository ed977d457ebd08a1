//! Row-selection predicates.
//!
//! A predicate is a JSON-logic-style expression compiled once per shard and
//! evaluated per row. Variables name record fields through the fixed
//! `keys.` selector prefix; two synthesized columns are always available:
//! `rowid` (the current local row index) and `mpiid` (the current peer
//! rank). Any other free variable is rejected at compile time.
//!
//! ```json
//! {"and": [{">": [{"var": "keys.score"}, 10]}, {"has": "name"}]}
//! ```

use std::cmp::Ordering;

use thiserror::Error;

use crate::shardlines::values::{JsonObject, JsonValue};

/// Selector prefix for record fields.
pub const SELECTOR_PREFIX: &str = "keys.";

const ROWID: &str = "rowid";
const PEER_RANK: &str = "mpiid";

pub type PredicateResult<T> = Result<T, PredicateError>;

#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("unknown selector '{name}': expected 'keys.<column>', 'rowid', or 'mpiid'")]
    UnknownSelector { name: String },

    #[error("malformed predicate: {reason}")]
    Malformed { reason: String },

    #[error("cannot order {lhs} against {rhs}")]
    Incomparable {
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("expected a boolean, found {found}")]
    NotABool { found: &'static str },
}

impl PredicateError {
    fn malformed(reason: impl Into<String>) -> Self {
        PredicateError::Malformed {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(JsonValue),
    Column(String),
    RowId,
    PeerRank,
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    All(Vec<Expr>),
    Any(Vec<Expr>),
    Not(Box<Expr>),
    In(Box<Expr>, Vec<JsonValue>),
    Has(String),
}

/// A compiled predicate, ready for per-row evaluation.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    root: Expr,
}

impl CompiledPredicate {
    /// Compile a raw JSON-logic expression. Selector errors surface here,
    /// before the first row is visited.
    pub fn compile(raw: &serde_json::Value) -> PredicateResult<Self> {
        Ok(CompiledPredicate {
            root: parse_expr(raw)?,
        })
    }

    /// Evaluate against one record. Non-boolean results and ordering of
    /// incomparable values are errors, fatal on the evaluating peer.
    pub fn eval(&self, rank: u32, row_index: u64, record: &JsonObject) -> PredicateResult<bool> {
        let ctx = EvalContext {
            rank,
            row_index,
            record,
        };
        match eval_expr(&self.root, &ctx)? {
            JsonValue::Bool(b) => Ok(b),
            other => Err(PredicateError::NotABool {
                found: other.type_name(),
            }),
        }
    }
}

struct EvalContext<'a> {
    rank: u32,
    row_index: u64,
    record: &'a JsonObject,
}

fn parse_expr(raw: &serde_json::Value) -> PredicateResult<Expr> {
    use serde_json::Value;

    match raw {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            Ok(Expr::Literal(literal(raw)?))
        }
        Value::Array(_) => Err(PredicateError::malformed(
            "bare arrays are only valid as the right-hand side of 'in'",
        )),
        Value::Object(fields) => {
            let (op, operands) = match fields.iter().next() {
                Some((key, value)) if fields.len() == 1 => (key.as_str(), value),
                _ => {
                    return Err(PredicateError::malformed(
                        "an operation must be an object with exactly one operator key",
                    ))
                }
            };
            match op {
                "var" => parse_var(operands),
                "==" => parse_compare(CmpOp::Eq, operands),
                "!=" => parse_compare(CmpOp::Ne, operands),
                "<" => parse_compare(CmpOp::Lt, operands),
                "<=" => parse_compare(CmpOp::Le, operands),
                ">" => parse_compare(CmpOp::Gt, operands),
                ">=" => parse_compare(CmpOp::Ge, operands),
                "and" => Ok(Expr::All(parse_list(operands)?)),
                "or" => Ok(Expr::Any(parse_list(operands)?)),
                "not" | "!" => {
                    let inner = match operands {
                        Value::Array(items) if items.len() == 1 => parse_expr(&items[0])?,
                        other => parse_expr(other)?,
                    };
                    Ok(Expr::Not(Box::new(inner)))
                }
                "in" => parse_in(operands),
                "has" => match operands {
                    Value::String(column) => Ok(Expr::Has(column.clone())),
                    _ => Err(PredicateError::malformed("'has' expects a column name")),
                },
                other => Err(PredicateError::malformed(format!(
                    "unsupported operator '{other}'"
                ))),
            }
        }
    }
}

fn parse_var(operands: &serde_json::Value) -> PredicateResult<Expr> {
    let name = operands
        .as_str()
        .ok_or_else(|| PredicateError::malformed("'var' expects a selector string"))?;
    if let Some(column) = name.strip_prefix(SELECTOR_PREFIX) {
        return Ok(Expr::Column(column.to_string()));
    }
    match name {
        ROWID => Ok(Expr::RowId),
        PEER_RANK => Ok(Expr::PeerRank),
        other => Err(PredicateError::UnknownSelector {
            name: other.to_string(),
        }),
    }
}

fn parse_compare(op: CmpOp, operands: &serde_json::Value) -> PredicateResult<Expr> {
    match operands.as_array() {
        Some(items) if items.len() == 2 => Ok(Expr::Compare(
            op,
            Box::new(parse_expr(&items[0])?),
            Box::new(parse_expr(&items[1])?),
        )),
        _ => Err(PredicateError::malformed(
            "a comparison expects exactly two operands",
        )),
    }
}

fn parse_list(operands: &serde_json::Value) -> PredicateResult<Vec<Expr>> {
    let items = operands
        .as_array()
        .ok_or_else(|| PredicateError::malformed("'and'/'or' expect an operand list"))?;
    items.iter().map(parse_expr).collect()
}

fn parse_in(operands: &serde_json::Value) -> PredicateResult<Expr> {
    let items = match operands.as_array() {
        Some(items) if items.len() == 2 => items,
        _ => {
            return Err(PredicateError::malformed(
                "'in' expects [expression, candidate-list]",
            ))
        }
    };
    let candidates = items[1]
        .as_array()
        .ok_or_else(|| PredicateError::malformed("'in' candidates must be a literal array"))?
        .iter()
        .map(literal)
        .collect::<PredicateResult<Vec<_>>>()?;
    Ok(Expr::In(Box::new(parse_expr(&items[0])?), candidates))
}

fn literal(raw: &serde_json::Value) -> PredicateResult<JsonValue> {
    serde_json::from_value(raw.clone())
        .map_err(|e| PredicateError::malformed(format!("invalid literal: {e}")))
}

fn eval_expr(expr: &Expr, ctx: &EvalContext) -> PredicateResult<JsonValue> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Column(column) => Ok(ctx
            .record
            .get(column)
            .cloned()
            .unwrap_or(JsonValue::Null)),
        Expr::RowId => Ok(JsonValue::UInt(ctx.row_index)),
        Expr::PeerRank => Ok(JsonValue::UInt(ctx.rank as u64)),
        Expr::Compare(op, lhs, rhs) => {
            let lv = eval_expr(lhs, ctx)?;
            let rv = eval_expr(rhs, ctx)?;
            let outcome = match op {
                CmpOp::Eq => lv == rv,
                CmpOp::Ne => lv != rv,
                CmpOp::Lt => order(&lv, &rv)? == Ordering::Less,
                CmpOp::Le => order(&lv, &rv)? != Ordering::Greater,
                CmpOp::Gt => order(&lv, &rv)? == Ordering::Greater,
                CmpOp::Ge => order(&lv, &rv)? != Ordering::Less,
            };
            Ok(JsonValue::Bool(outcome))
        }
        Expr::All(operands) => {
            for operand in operands {
                if !truthy(eval_expr(operand, ctx)?)? {
                    return Ok(JsonValue::Bool(false));
                }
            }
            Ok(JsonValue::Bool(true))
        }
        Expr::Any(operands) => {
            for operand in operands {
                if truthy(eval_expr(operand, ctx)?)? {
                    return Ok(JsonValue::Bool(true));
                }
            }
            Ok(JsonValue::Bool(false))
        }
        Expr::Not(inner) => Ok(JsonValue::Bool(!truthy(eval_expr(inner, ctx)?)?)),
        Expr::In(needle, candidates) => {
            let value = eval_expr(needle, ctx)?;
            Ok(JsonValue::Bool(candidates.iter().any(|c| *c == value)))
        }
        Expr::Has(column) => Ok(JsonValue::Bool(ctx.record.contains_key(column))),
    }
}

fn truthy(value: JsonValue) -> PredicateResult<bool> {
    match value {
        JsonValue::Bool(b) => Ok(b),
        other => Err(PredicateError::NotABool {
            found: other.type_name(),
        }),
    }
}

/// Ordering for `< <= > >=`: numerics order across signedness and against
/// doubles by numeric value; strings order lexicographically. Anything
/// else is an evaluation error.
fn order(lhs: &JsonValue, rhs: &JsonValue) -> PredicateResult<Ordering> {
    use JsonValue::*;

    let incomparable = || PredicateError::Incomparable {
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    };

    match (lhs, rhs) {
        (Int(a), Int(b)) => Ok(a.cmp(b)),
        (UInt(a), UInt(b)) => Ok(a.cmp(b)),
        (Int(a), UInt(b)) => {
            if *a < 0 {
                Ok(Ordering::Less)
            } else {
                Ok((*a as u64).cmp(b))
            }
        }
        (UInt(a), Int(b)) => {
            if *b < 0 {
                Ok(Ordering::Greater)
            } else {
                Ok(a.cmp(&(*b as u64)))
            }
        }
        (Double(a), Double(b)) => a.partial_cmp(b).ok_or_else(incomparable),
        (Int(a), Double(b)) => (*a as f64).partial_cmp(b).ok_or_else(incomparable),
        (UInt(a), Double(b)) => (*a as f64).partial_cmp(b).ok_or_else(incomparable),
        (Double(a), Int(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(incomparable),
        (Double(a), UInt(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(incomparable),
        (Str(a), Str(b)) => Ok(a.cmp(b)),
        _ => Err(incomparable()),
    }
}
