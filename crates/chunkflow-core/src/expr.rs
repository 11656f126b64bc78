//! Row predicates evaluated batch-at-a-time.
//!
//! Simple predicates have the form `column OP literal` where
//! OP ∈ {==, !=, <, <=, >, >=}. They double as source-level filter hints.
//! Anything more elaborate is expressed as a closure over the batch.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{RowBatch, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CmpOp::Eq => ord == Ordering::Equal,
            CmpOp::Ne => ord != Ordering::Equal,
            CmpOp::Lt => ord == Ordering::Less,
            CmpOp::Le => ord != Ordering::Greater,
            CmpOp::Gt => ord == Ordering::Greater,
            CmpOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Parsed `column OP literal`.
#[derive(Debug, Clone, PartialEq)]
pub struct SimplePredicate {
    pub column: String,
    pub op: CmpOp,
    literal: Literal,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    /// Unquoted token; compared numerically when both sides are numbers.
    Bare(String),
    /// Quoted token; always compared as text.
    Quoted(String),
}

impl Literal {
    fn text(&self) -> &str {
        match self {
            Literal::Bare(s) | Literal::Quoted(s) => s,
        }
    }

    fn number(&self) -> Option<f64> {
        match self {
            Literal::Bare(s) => s.parse::<f64>().ok().filter(|v| !v.is_nan()),
            Literal::Quoted(_) => None,
        }
    }

    fn integer(&self) -> Option<i64> {
        match self {
            Literal::Bare(s) => s.parse::<i64>().ok(),
            Literal::Quoted(_) => None,
        }
    }
}

impl SimplePredicate {
    /// Parse a simple predicate like "quantity > 30" or "flag == 'A'".
    pub fn parse(expr: &str) -> Result<Self> {
        // Two-character operators first so "<=" is not read as "<".
        let ops = [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
        ];

        for (sym, op) in ops {
            if let Some(pos) = expr.find(sym) {
                let column = expr[..pos].trim().to_string();
                let raw = expr[pos + sym.len()..].trim();
                if column.is_empty() || raw.is_empty() {
                    break;
                }
                return Ok(Self {
                    column,
                    op,
                    literal: parse_literal(raw),
                });
            }
        }

        Err(Error::Config(format!("unparseable predicate: {expr}")))
    }

    /// Evaluate against every row of `batch`.
    pub fn evaluate(&self, batch: &RowBatch) -> Result<Vec<bool>> {
        let col = batch
            .column(&self.column)
            .ok_or_else(|| Error::NotFound(format!("column '{}'", self.column)))?;
        col.values.iter().map(|v| self.eval_value(v)).collect()
    }

    fn eval_value(&self, val: &Scalar) -> Result<bool> {
        use Scalar::*;

        let lit = &self.literal;
        let ord = match val {
            // Null comparisons are false
            Null => return Ok(false),
            Bool(b) => {
                let want = lit.text().parse::<bool>().map_err(|_| {
                    Error::Config(format!("cannot compare boolean with '{}'", lit.text()))
                })?;
                match self.op {
                    CmpOp::Eq => return Ok(*b == want),
                    CmpOp::Ne => return Ok(*b != want),
                    op => {
                        return Err(Error::Config(format!(
                            "unsupported op '{}' for boolean column '{}'",
                            op.symbol(),
                            self.column
                        )))
                    }
                }
            }
            I32(_) | I64(_) => match (val.as_i64(), lit.integer()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => numeric_cmp(val, lit),
            },
            F32(_) | F64(_) => {
                if val.is_missing() {
                    return Ok(false);
                }
                numeric_cmp(val, lit)
            }
            Str(s) => match (s.trim().parse::<f64>().ok(), lit.number()) {
                (Some(x), Some(y)) if !x.is_nan() => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => s.as_str().cmp(lit.text()),
            },
            Bin(_) => {
                return Err(Error::Schema(format!(
                    "cannot filter on binary column '{}'",
                    self.column
                )))
            }
        };
        Ok(self.op.holds(ord))
    }
}

/// Numbers against a numeric literal compare by value; against anything
/// else they compare by their text, the same way a string column would.
fn numeric_cmp(val: &Scalar, lit: &Literal) -> Ordering {
    match (val.as_f64(), lit.number()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Less),
        _ => val.to_string().as_str().cmp(lit.text()),
    }
}

fn parse_literal(raw: &str) -> Literal {
    for q in ['\'', '"'] {
        if raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q) {
            return Literal::Quoted(raw[1..raw.len() - 1].to_string());
        }
    }
    Literal::Bare(raw.to_string())
}

impl fmt::Display for SimplePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.literal {
            Literal::Bare(s) => write!(f, "{} {} {}", self.column, self.op.symbol(), s),
            Literal::Quoted(s) => write!(f, "{} {} '{}'", self.column, self.op.symbol(), s),
        }
    }
}

/// Closure form: one keep/drop flag per row.
pub type RowMaskFn = dyn Fn(&RowBatch) -> Result<Vec<bool>> + Send + Sync;

/// Row predicate used by the filter operator.
#[derive(Clone)]
pub enum Predicate {
    Simple(SimplePredicate),
    Custom(Arc<RowMaskFn>),
}

impl Predicate {
    pub fn parse(expr: &str) -> Result<Self> {
        SimplePredicate::parse(expr).map(Predicate::Simple)
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&RowBatch) -> Result<Vec<bool>> + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    /// Columns the predicate reads, when known up front.
    pub fn referenced_column(&self) -> Option<&str> {
        match self {
            Predicate::Simple(p) => Some(&p.column),
            Predicate::Custom(_) => None,
        }
    }

    pub fn evaluate(&self, batch: &RowBatch) -> Result<Vec<bool>> {
        let mask = match self {
            Predicate::Simple(p) => p.evaluate(batch)?,
            Predicate::Custom(f) => f(batch)?,
        };
        if mask.len() != batch.num_rows() {
            return Err(Error::Invariant(format!(
                "predicate returned {} flags for {} rows",
                mask.len(),
                batch.num_rows()
            )));
        }
        Ok(mask)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Simple(p) => write!(f, "Predicate({p})"),
            Predicate::Custom(_) => write!(f, "Predicate(<fn>)"),
        }
    }
}

impl From<SimplePredicate> for Predicate {
    fn from(p: SimplePredicate) -> Self {
        Predicate::Simple(p)
    }
}
