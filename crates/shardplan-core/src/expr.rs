//! Scalar expressions evaluated per tuple.
//!
//! Attribute references start out *named* (as produced by the front end) and
//! are normalized to *positional* references (`Column`) relative to the
//! immediate child's scheme by the rewrite rules. Every expression that reaches
//! the wire compiler must be positional.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{Error, Result};
use crate::schema::{DataType, Scheme};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Literal {
    pub fn data_type(&self) -> DataType {
        match self {
            Literal::Int(v) if i32::try_from(*v).is_ok() => DataType::Int32,
            Literal::Int(_) => DataType::Int64,
            Literal::Float(_) => DataType::Float64,
            Literal::Str(_) => DataType::Utf8,
            Literal::Bool(_) => DataType::Boolean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Negate,
    Abs,
    Sqrt,
}

impl UnaryOp {
    pub fn wire_name(self) -> &'static str {
        match self {
            UnaryOp::Not => "NOT",
            UnaryOp::Negate => "NEGATE",
            UnaryOp::Abs => "ABS",
            UnaryOp::Sqrt => "SQRT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Times,
    Divide,
}

impl BinaryOp {
    pub fn wire_name(self) -> &'static str {
        match self {
            BinaryOp::Eq => "EQ",
            BinaryOp::Neq => "NEQ",
            BinaryOp::Lt => "LT",
            BinaryOp::LtEq => "LTEQ",
            BinaryOp::Gt => "GT",
            BinaryOp::GtEq => "GTEQ",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Plus => "PLUS",
            BinaryOp::Minus => "MINUS",
            BinaryOp::Times => "TIMES",
            BinaryOp::Divide => "DIVIDE",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Times => "*",
            BinaryOp::Divide => "/",
        }
    }

    pub fn is_predicate(self) -> bool {
        !matches!(
            self,
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Times | BinaryOp::Divide
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Attribute reference by name (front-end form).
    Named(String),
    /// Attribute reference by position in the child scheme.
    Column(usize),
    /// Reference to a state column of a `StatefulApply`.
    State(usize),
    Literal(Literal),
    Unary {
        op: UnaryOp,
        input: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cast {
        input: Box<Expr>,
        to: DataType,
    },
    /// Two-way CASE: `CASE WHEN when THEN then ELSE otherwise END`.
    Case {
        when: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Placeholder inside an aggregate finalizer: the n-th merge aggregate of
    /// the logical aggregate being finalized.
    MergeSlot(usize),
}

pub fn col(pos: usize) -> Expr {
    Expr::Column(pos)
}

pub fn named(name: impl Into<String>) -> Expr {
    Expr::Named(name.into())
}

pub fn lit_int(v: i64) -> Expr {
    Expr::Literal(Literal::Int(v))
}

pub fn lit_str(v: impl Into<String>) -> Expr {
    Expr::Literal(Literal::Str(v.into()))
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Eq, left, right)
}

pub fn and(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::And, left, right)
}

pub fn cast(input: Expr, to: DataType) -> Expr {
    Expr::Cast {
        input: Box::new(input),
        to,
    }
}

/// AND together a list of predicates; `None` for an empty list.
pub fn conjoin(preds: Vec<Expr>) -> Option<Expr> {
    let mut iter = preds.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, and))
}

impl Expr {
    pub fn for_each_child(&self, f: &mut impl FnMut(&Expr)) {
        match self {
            Expr::Named(_)
            | Expr::Column(_)
            | Expr::State(_)
            | Expr::Literal(_)
            | Expr::MergeSlot(_) => {}
            Expr::Unary { input, .. } | Expr::Cast { input, .. } => f(input),
            Expr::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            Expr::Case {
                when,
                then,
                otherwise,
            } => {
                f(when);
                f(then);
                f(otherwise);
            }
        }
    }

    pub fn for_each_child_mut(
        &mut self,
        f: &mut impl FnMut(&mut Expr) -> Result<()>,
    ) -> Result<()> {
        match self {
            Expr::Named(_)
            | Expr::Column(_)
            | Expr::State(_)
            | Expr::Literal(_)
            | Expr::MergeSlot(_) => Ok(()),
            Expr::Unary { input, .. } | Expr::Cast { input, .. } => f(input),
            Expr::Binary { left, right, .. } => {
                f(left)?;
                f(right)
            }
            Expr::Case {
                when,
                then,
                otherwise,
            } => {
                f(when)?;
                f(then)?;
                f(otherwise)
            }
        }
    }

    /// Split a conjunction into its individual predicates, left to right.
    pub fn conjuncts(&self) -> Vec<Expr> {
        match self {
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
            } => {
                let mut out = left.conjuncts();
                out.extend(right.conjuncts());
                out
            }
            other => vec![other.clone()],
        }
    }

    /// Positions of all `Column` references, ascending.
    pub fn accessed_columns(&self) -> BTreeSet<usize> {
        fn walk(e: &Expr, acc: &mut BTreeSet<usize>) {
            if let Expr::Column(p) = e {
                acc.insert(*p);
            }
            e.for_each_child(&mut |c| walk(c, acc));
        }
        let mut acc = BTreeSet::new();
        walk(self, &mut acc);
        acc
    }

    /// Resolve every named reference against `scheme`.
    pub fn to_positional(&self, scheme: &Scheme) -> Result<Expr> {
        let mut out = self.clone();
        out.make_positional(scheme)?;
        Ok(out)
    }

    fn make_positional(&mut self, scheme: &Scheme) -> Result<()> {
        if let Expr::Named(name) = self {
            *self = Expr::Column(scheme.resolve(name)?);
            return Ok(());
        }
        self.for_each_child_mut(&mut |c| c.make_positional(scheme))
    }

    /// Position referenced by a bare attribute reference, if this is one.
    pub fn column_position(&self, scheme: &Scheme) -> Option<usize> {
        match self {
            Expr::Column(p) => Some(*p),
            Expr::Named(n) => scheme.index_of(n),
            _ => None,
        }
    }

    pub fn is_attribute_ref(&self) -> bool {
        matches!(self, Expr::Column(_) | Expr::Named(_))
    }

    /// `Some((l, r))` when this is `$l = $r` over two positional columns.
    pub fn column_equality(&self) -> Option<(usize, usize)> {
        match self {
            Expr::Binary {
                op: BinaryOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Expr::Column(l), Expr::Column(r)) => Some((*l, *r)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Shift every column reference down by `offset` (right side of a join).
    pub fn rebase(&mut self, offset: usize) -> Result<()> {
        if let Expr::Column(p) = self {
            let old = *p;
            *p = old.checked_sub(offset).ok_or_else(|| {
                Error::Invariant(format!("cannot rebase column ${old} by {offset}"))
            })?;
            return Ok(());
        }
        self.for_each_child_mut(&mut |c| c.rebase(offset))
    }

    /// Renumber column references through `map`; unmapped columns are an error.
    pub fn reindex(&mut self, map: &BTreeMap<usize, usize>) -> Result<()> {
        if let Expr::Column(p) = self {
            let old = *p;
            *p = *map
                .get(&old)
                .ok_or_else(|| Error::Invariant(format!("column ${old} missing from reindex map")))?;
            return Ok(());
        }
        self.for_each_child_mut(&mut |c| c.reindex(map))
    }

    /// Replace each `Column(i)` with `replacement(i)`.
    pub fn substitute(&self, replacement: &dyn Fn(usize) -> Result<Expr>) -> Result<Expr> {
        let mut out = self.clone();
        out.substitute_in_place(replacement)?;
        Ok(out)
    }

    fn substitute_in_place(&mut self, replacement: &dyn Fn(usize) -> Result<Expr>) -> Result<()> {
        if let Expr::Column(p) = self {
            *self = replacement(*p)?;
            return Ok(());
        }
        self.for_each_child_mut(&mut |c| c.substitute_in_place(replacement))
    }

    /// Turn `MergeSlot(k)` into `Column(offsets[k])`.
    pub fn resolve_merge_slots(&self, offsets: &[usize]) -> Result<Expr> {
        let mut out = self.clone();
        out.resolve_slots_in_place(offsets)?;
        Ok(out)
    }

    fn resolve_slots_in_place(&mut self, offsets: &[usize]) -> Result<()> {
        if let Expr::MergeSlot(k) = self {
            let slot = *k;
            let pos = offsets.get(slot).ok_or_else(|| {
                Error::Invariant(format!("finalizer slot {slot} has no merge aggregate"))
            })?;
            *self = Expr::Column(*pos);
            return Ok(());
        }
        self.for_each_child_mut(&mut |c| c.resolve_slots_in_place(offsets))
    }

    pub fn data_type(&self, scheme: &Scheme, state: Option<&Scheme>) -> Result<DataType> {
        match self {
            Expr::Column(p) => Ok(scheme.try_field(*p)?.data_type),
            Expr::Named(n) => Ok(scheme.try_field(scheme.resolve(n)?)?.data_type),
            Expr::State(p) => {
                let state = state.ok_or_else(|| {
                    Error::Schema(format!("state reference @{p} outside a stateful apply"))
                })?;
                Ok(state.try_field(*p)?.data_type)
            }
            Expr::Literal(l) => Ok(l.data_type()),
            Expr::Unary { op, input } => match op {
                UnaryOp::Not => Ok(DataType::Boolean),
                UnaryOp::Sqrt => Ok(DataType::Float64),
                UnaryOp::Negate | UnaryOp::Abs => input.data_type(scheme, state),
            },
            Expr::Binary { op, left, right } => {
                if op.is_predicate() {
                    Ok(DataType::Boolean)
                } else {
                    let l = left.data_type(scheme, state)?;
                    let r = right.data_type(scheme, state)?;
                    Ok(l.widen(r))
                }
            }
            Expr::Cast { to, .. } => Ok(*to),
            Expr::Case { then, .. } => then.data_type(scheme, state),
            Expr::MergeSlot(k) => Err(Error::Invariant(format!(
                "unresolved finalizer slot {k}"
            ))),
        }
    }
}

fn fmt_operand(e: &Expr, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if matches!(e, Expr::Binary { .. }) {
        write!(f, "({e})")
    } else {
        write!(f, "{e}")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Named(n) => write!(f, "{n}"),
            Expr::Column(p) => write!(f, "${p}"),
            Expr::State(p) => write!(f, "@{p}"),
            Expr::Literal(Literal::Int(v)) => write!(f, "{v}"),
            Expr::Literal(Literal::Float(v)) => write!(f, "{v:?}"),
            Expr::Literal(Literal::Str(s)) => write!(f, "'{s}'"),
            Expr::Literal(Literal::Bool(b)) => write!(f, "{b}"),
            Expr::Unary { op, input } => match op {
                UnaryOp::Not => {
                    write!(f, "NOT ")?;
                    fmt_operand(input, f)
                }
                UnaryOp::Negate => {
                    write!(f, "-")?;
                    fmt_operand(input, f)
                }
                UnaryOp::Abs => write!(f, "ABS({input})"),
                UnaryOp::Sqrt => write!(f, "SQRT({input})"),
            },
            Expr::Binary { op, left, right } => {
                fmt_operand(left, f)?;
                write!(f, " {} ", op.symbol())?;
                fmt_operand(right, f)
            }
            Expr::Cast { input, to } => write!(f, "CAST({input} AS {})", to.wire_name()),
            Expr::Case {
                when,
                then,
                otherwise,
            } => write!(f, "CASE WHEN {when} THEN {then} ELSE {otherwise} END"),
            Expr::MergeSlot(k) => write!(f, "#merge{k}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    fn scheme() -> Scheme {
        Scheme::new(vec![
            Field::new("x", DataType::Int64),
            Field::new("y", DataType::Int32),
            Field::new("name", DataType::Utf8),
        ])
    }

    #[test]
    fn conjuncts_flatten_nested_ands() {
        let e = and(and(eq(col(0), col(1)), eq(col(1), lit_int(3))), eq(col(2), col(0)));
        let parts = e.conjuncts();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], eq(col(2), col(0)));
        assert_eq!(conjoin(parts).unwrap().conjuncts().len(), 3);
        assert!(conjoin(vec![]).is_none());
    }

    #[test]
    fn positional_resolution() {
        let e = eq(named("y"), named("x")).to_positional(&scheme()).unwrap();
        assert_eq!(e, eq(col(1), col(0)));
        assert_eq!(e.column_equality(), Some((1, 0)));
        assert!(named("zz").to_positional(&scheme()).is_err());
    }

    #[test]
    fn rebase_and_reindex() {
        let mut e = eq(col(4), col(5));
        e.rebase(3).unwrap();
        assert_eq!(e, eq(col(1), col(2)));
        let map = BTreeMap::from([(1, 0), (2, 7)]);
        e.reindex(&map).unwrap();
        assert_eq!(e.accessed_columns().into_iter().collect::<Vec<_>>(), vec![0, 7]);
        assert!(col(1).rebase(2).is_err());
    }

    #[test]
    fn types_follow_operands() {
        let s = scheme();
        let sum = binary(BinaryOp::Plus, col(0), col(1));
        assert_eq!(sum.data_type(&s, None).unwrap(), DataType::Int64);
        assert_eq!(eq(col(0), col(1)).data_type(&s, None).unwrap(), DataType::Boolean);
        assert_eq!(lit_int(1 << 40).data_type(&s, None).unwrap(), DataType::Int64);
        assert!(Expr::State(0).data_type(&s, None).is_err());
    }

    #[test]
    fn merge_slots_resolve_to_columns() {
        let fin = binary(
            BinaryOp::Divide,
            cast(Expr::MergeSlot(0), DataType::Float64),
            Expr::MergeSlot(1),
        );
        let out = fin.resolve_merge_slots(&[3, 4]).unwrap();
        assert_eq!(out.to_string(), "CAST($3 AS DOUBLE_TYPE) / $4");
        assert!(Expr::MergeSlot(2).resolve_merge_slots(&[0]).is_err());
    }
}
