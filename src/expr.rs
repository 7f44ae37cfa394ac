use crate::error::FakeError;
use crate::model::{compare_cells, Cell, Row};
use crate::store::Session;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

/// Everything an expression may read during evaluation. `values` is only
/// present while applying an ON DUPLICATE KEY UPDATE clause and carries the
/// row that would have been inserted; it never reaches persisted data.
pub struct EvalContext<'a> {
    pub row: &'a Row,
    pub values: Option<&'a Row>,
    pub session: &'a Session,
}

impl<'a> EvalContext<'a> {
    pub fn new(row: &'a Row, session: &'a Session) -> Self {
        Self {
            row,
            values: None,
            session,
        }
    }

    pub fn with_values(row: &'a Row, values: Option<&'a Row>, session: &'a Session) -> Self {
        Self {
            row,
            values,
            session,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
    allow_fallthrough: bool,
}

impl ColumnRef {
    pub fn new(table: Option<String>, column: String) -> Self {
        Self {
            table,
            column,
            allow_fallthrough: false,
        }
    }

    pub fn bare(column: impl Into<String>) -> Self {
        Self::new(None, column.into())
    }

    /// Allow evaluation to fall back to NULL when the column is absent from
    /// the row, instead of failing the lookup. ORDER BY marks bare,
    /// unqualified references this way so sorting can reach across rows that
    /// do not carry the column.
    pub fn allow_fallthrough(&mut self) {
        self.allow_fallthrough = true;
    }

    pub fn fallthrough_allowed(&self) -> bool {
        self.allow_fallthrough
    }

    fn lookup(&self, row: &Row) -> Option<Cell> {
        if let Some(table) = &self.table {
            let qualified = format!("{table}.{}", self.column);
            if let Some(v) = row.get(&qualified) {
                return Some(v.clone());
            }
        }
        if let Some(v) = row.get(&self.column) {
            return Some(v.clone());
        }
        // Column names are case-insensitive in MySQL.
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(&self.column))
            .map(|(_, v)| v.clone())
    }

    pub fn evaluate(&self, row: &Row) -> Result<Cell, FakeError> {
        match self.lookup(row) {
            Some(v) => Ok(v),
            None if self.allow_fallthrough => Ok(Cell::Null),
            None => Err(FakeError::NotFound(format!(
                "Column not found: {}",
                self.name()
            ))),
        }
    }

    pub fn name(&self) -> String {
        match &self.table {
            Some(t) => format!("{t}.{}", self.column),
            None => self.column.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Eq => "=",
            BinOp::NotEq => "<>",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Modulo => "%",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Cell),
    Column(ColumnRef),
    /// `VALUES(col)` inside ON DUPLICATE KEY UPDATE.
    Values(String),
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TriBool {
    True,
    False,
    Unknown,
}

impl TriBool {
    fn and(self, other: TriBool) -> TriBool {
        match (self, other) {
            (TriBool::False, _) | (_, TriBool::False) => TriBool::False,
            (TriBool::True, b) => b,
            (TriBool::Unknown, _) => TriBool::Unknown,
        }
    }

    fn or(self, other: TriBool) -> TriBool {
        match (self, other) {
            (TriBool::True, _) | (_, TriBool::True) => TriBool::True,
            (TriBool::False, b) => b,
            (TriBool::Unknown, _) => TriBool::Unknown,
        }
    }

    fn not(self) -> TriBool {
        match self {
            TriBool::True => TriBool::False,
            TriBool::False => TriBool::True,
            TriBool::Unknown => TriBool::Unknown,
        }
    }

    fn is_true(self) -> bool {
        matches!(self, TriBool::True)
    }

    fn from_bool(b: bool) -> TriBool {
        if b {
            TriBool::True
        } else {
            TriBool::False
        }
    }

    fn to_cell(self) -> Cell {
        match self {
            TriBool::True => Cell::Int(1),
            TriBool::False => Cell::Int(0),
            TriBool::Unknown => Cell::Null,
        }
    }
}

impl Expr {
    /// Evaluate to a value. Comparison and boolean operators produce MySQL's
    /// 1/0/NULL.
    pub fn evaluate(&self, ctx: &EvalContext) -> Result<Cell, FakeError> {
        match self {
            Expr::Literal(cell) => Ok(cell.clone()),
            Expr::Column(col) => col.evaluate(ctx.row),
            Expr::Values(column) => {
                let Some(values) = ctx.values else {
                    return Err(FakeError::Invalid(
                        "VALUES() is only valid in ON DUPLICATE KEY UPDATE".into(),
                    ));
                };
                Ok(values
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(column))
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Cell::Null))
            }
            Expr::Binary { left, op, right } => match op {
                BinOp::Plus | BinOp::Minus | BinOp::Multiply | BinOp::Divide | BinOp::Modulo => {
                    let l = left.evaluate(ctx)?;
                    let r = right.evaluate(ctx)?;
                    arithmetic(&l, *op, &r)
                }
                _ => Ok(self.evaluate_tri(ctx)?.to_cell()),
            },
            Expr::Neg(inner) => match inner.evaluate(ctx)? {
                Cell::Null => Ok(Cell::Null),
                Cell::Int(i) => Ok(Cell::Int(-i)),
                Cell::Float(f) => Ok(Cell::Float(-f)),
                other => Err(FakeError::Invalid(format!("cannot negate {other}"))),
            },
            _ => Ok(self.evaluate_tri(ctx)?.to_cell()),
        }
    }

    /// Evaluate as a WHERE-style condition: true iff the value is truthy.
    pub fn passes(&self, ctx: &EvalContext) -> Result<bool, FakeError> {
        Ok(self.evaluate_tri(ctx)?.is_true())
    }

    fn evaluate_tri(&self, ctx: &EvalContext) -> Result<TriBool, FakeError> {
        match self {
            Expr::Binary { left, op, right } => match op {
                BinOp::And => Ok(left.evaluate_tri(ctx)?.and(right.evaluate_tri(ctx)?)),
                BinOp::Or => Ok(left.evaluate_tri(ctx)?.or(right.evaluate_tri(ctx)?)),
                BinOp::Plus | BinOp::Minus | BinOp::Multiply | BinOp::Divide | BinOp::Modulo => {
                    Ok(truthy(&self.evaluate(ctx)?))
                }
                _ => {
                    let l = left.evaluate(ctx)?;
                    let r = right.evaluate(ctx)?;
                    if l.is_null() || r.is_null() {
                        return Ok(TriBool::Unknown);
                    }
                    let cmp = compare_for_predicate(&l, &r);
                    let ok = match op {
                        BinOp::Eq => cmp == Ordering::Equal,
                        BinOp::NotEq => cmp != Ordering::Equal,
                        BinOp::Gt => cmp == Ordering::Greater,
                        BinOp::Lt => cmp == Ordering::Less,
                        BinOp::GtEq => cmp != Ordering::Less,
                        BinOp::LtEq => cmp != Ordering::Greater,
                        _ => unreachable!("arithmetic handled above"),
                    };
                    Ok(TriBool::from_bool(ok))
                }
            },
            Expr::Not(inner) => Ok(inner.evaluate_tri(ctx)?.not()),
            Expr::IsNull { expr, negated } => {
                let v = expr.evaluate(ctx)?;
                let base = TriBool::from_bool(v.is_null());
                Ok(if *negated { base.not() } else { base })
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                if list.is_empty() {
                    return Err(FakeError::Invalid("IN (...) list cannot be empty".into()));
                }
                let needle = expr.evaluate(ctx)?;
                if needle.is_null() {
                    return Ok(TriBool::Unknown);
                }
                let mut has_null = false;
                for item in list {
                    let v = item.evaluate(ctx)?;
                    if v.is_null() {
                        has_null = true;
                        continue;
                    }
                    if compare_for_predicate(&needle, &v) == Ordering::Equal {
                        return Ok(TriBool::from_bool(!*negated));
                    }
                }
                let base = if has_null {
                    TriBool::Unknown
                } else {
                    TriBool::False
                };
                Ok(if *negated { base.not() } else { base })
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let v = expr.evaluate(ctx)?;
                let lo = low.evaluate(ctx)?;
                let hi = high.evaluate(ctx)?;
                if v.is_null() || lo.is_null() || hi.is_null() {
                    return Ok(TriBool::Unknown);
                }
                let ge_lo = compare_for_predicate(&v, &lo) != Ordering::Less;
                let le_hi = compare_for_predicate(&v, &hi) != Ordering::Greater;
                let base = TriBool::from_bool(ge_lo && le_hi);
                Ok(if *negated { base.not() } else { base })
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let v = expr.evaluate(ctx)?;
                let pat = pattern.evaluate(ctx)?;
                if v.is_null() || pat.is_null() {
                    return Ok(TriBool::Unknown);
                }
                let base = TriBool::from_bool(like_matches(&pat.to_string(), &v.to_string()));
                Ok(if *negated { base.not() } else { base })
            }
            other => Ok(truthy(&other.evaluate(ctx)?)),
        }
    }

    /// The name under which this expression's pre-evaluated result is stored
    /// on a row for ORDER BY.
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// The bare column reference inside, if this is exactly one.
    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_column_mut(&mut self) -> Option<&mut ColumnRef> {
        match self {
            Expr::Column(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Cell::Text(s)) => write!(f, "'{s}'"),
            Expr::Literal(cell) => write!(f, "{cell}"),
            Expr::Column(c) => write!(f, "{}", c.name()),
            Expr::Values(col) => write!(f, "VALUES({col})"),
            Expr::Binary { left, op, right } => write!(f, "{left} {op} {right}"),
            Expr::Not(e) => write!(f, "NOT {e}"),
            Expr::Neg(e) => write!(f, "-{e}"),
            Expr::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "{expr} IS NOT NULL")
                } else {
                    write!(f, "{expr} IS NULL")
                }
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let items: Vec<String> = list.iter().map(|e| e.to_string()).collect();
                if *negated {
                    write!(f, "{expr} NOT IN ({})", items.join(", "))
                } else {
                    write!(f, "{expr} IN ({})", items.join(", "))
                }
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                if *negated {
                    write!(f, "{expr} NOT BETWEEN {low} AND {high}")
                } else {
                    write!(f, "{expr} BETWEEN {low} AND {high}")
                }
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                if *negated {
                    write!(f, "{expr} NOT LIKE {pattern}")
                } else {
                    write!(f, "{expr} LIKE {pattern}")
                }
            }
        }
    }
}

fn truthy(cell: &Cell) -> TriBool {
    match cell {
        Cell::Null => TriBool::Unknown,
        Cell::Int(i) => TriBool::from_bool(*i != 0),
        Cell::Float(fl) => TriBool::from_bool(*fl != 0.0),
        Cell::Bool(b) => TriBool::from_bool(*b),
        // MySQL coerces strings to their leading numeric value.
        Cell::Text(s) => TriBool::from_bool(s.parse::<f64>().map(|v| v != 0.0).unwrap_or(false)),
    }
}

/// Predicate comparison: coerce text against numbers where possible, as the
/// server does for WHERE, then fall back to the value-model comparison.
fn compare_for_predicate(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (Cell::Text(s), other) if other.is_numeric() => match s.parse::<f64>() {
            Ok(parsed) => parsed
                .partial_cmp(&other.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
            Err(_) => compare_cells(a, b),
        },
        (other, Cell::Text(s)) if other.is_numeric() => match s.parse::<f64>() {
            Ok(parsed) => other
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&parsed)
                .unwrap_or(Ordering::Equal),
            Err(_) => compare_cells(a, b),
        },
        _ => compare_cells(a, b),
    }
}

fn arithmetic(l: &Cell, op: BinOp, r: &Cell) -> Result<Cell, FakeError> {
    if l.is_null() || r.is_null() {
        return Ok(Cell::Null);
    }
    if let (Cell::Int(a), Cell::Int(b)) = (l, r) {
        match op {
            BinOp::Plus => return Ok(Cell::Int(a.wrapping_add(*b))),
            BinOp::Minus => return Ok(Cell::Int(a.wrapping_sub(*b))),
            BinOp::Multiply => return Ok(Cell::Int(a.wrapping_mul(*b))),
            BinOp::Modulo if *b != 0 => return Ok(Cell::Int(a % b)),
            BinOp::Modulo => return Ok(Cell::Null),
            BinOp::Divide => {} // integer division promotes to float below
            _ => {}
        }
    }
    let (Some(a), Some(b)) = (numeric(l), numeric(r)) else {
        return Err(FakeError::Invalid(format!(
            "non-numeric operand in arithmetic: {l} {op} {r}"
        )));
    };
    let out = match op {
        BinOp::Plus => a + b,
        BinOp::Minus => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide => {
            if b == 0.0 {
                return Ok(Cell::Null);
            }
            a / b
        }
        BinOp::Modulo => {
            if b == 0.0 {
                return Ok(Cell::Null);
            }
            a % b
        }
        _ => unreachable!(),
    };
    Ok(Cell::Float(out))
}

fn numeric(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Text(s) => s.parse::<f64>().ok(),
        other => other.as_f64(),
    }
}

/// MySQL LIKE, case-insensitively, via a compiled regex.
pub fn like_matches(pattern: &str, value: &str) -> bool {
    let to_regex = |pat: &str| {
        let mut out = String::with_capacity(pat.len() * 2);
        for ch in pat.chars() {
            match ch {
                '%' => out.push_str(".*"),
                '_' => out.push('.'),
                other => out.push_str(&regex::escape(&other.to_string())),
            }
        }
        out
    };
    let re = format!("(?is)^{}$", to_regex(pattern));
    Regex::new(&re).ok().is_some_and(|r| r.is_match(value))
}
