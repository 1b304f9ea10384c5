//! The statement builder and condition algebra.
//!
//! `Stmt` is the AST every query path converges on: the fluent builder below
//! constructs it directly, and the method-name parser in [`parser`]
//! translates strings like `findByAgeGreaterThanAndActiveOrderByAgeDesc`
//! into the same shape. [`compiler`] turns a `Stmt` into a `Plan` adapters
//! can execute without re-deriving sort/filter semantics themselves.

pub mod compiler;
pub mod parser;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// The set of distinct values a field takes on, as a JSON array.
    Distinct,
    /// Row count per group, used when a `group` query names no other
    /// aggregate function.
    Group,
}

/// A single comparison against a named attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Equals(Value),
    NotEquals(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Between(Value, Value),
    In(Vec<Value>),
    Like(String),
    IsNull,
    IsNotNull,
    True,
    False,
}

/// The recursive condition algebra: a leaf attribute comparison, or a
/// boolean combination of sub-conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Attr(String, Op),
    And(Vec<Cond>),
    Or(Vec<Cond>),
    Not(Box<Cond>),
}

impl Cond {
    pub fn and(self, other: Cond) -> Cond {
        match self {
            Cond::And(mut conds) => {
                conds.push(other);
                Cond::And(conds)
            }
            first => Cond::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Cond) -> Cond {
        match self {
            Cond::Or(mut conds) => {
                conds.push(other);
                Cond::Or(conds)
            }
            first => Cond::Or(vec![first, other]),
        }
    }

    pub fn not(self) -> Cond {
        Cond::Not(Box::new(self))
    }
}

/// Helper for building leaf conditions: `Attr::new("age").greater_than(18)`.
pub struct Attr(String);

impl Attr {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    fn op(self, op: Op) -> Cond {
        Cond::Attr(self.0, op)
    }

    pub fn eq(self, value: impl Into<Value>) -> Cond {
        self.op(Op::Equals(value.into()))
    }

    pub fn ne(self, value: impl Into<Value>) -> Cond {
        self.op(Op::NotEquals(value.into()))
    }

    pub fn gt(self, value: impl Into<Value>) -> Cond {
        self.op(Op::GreaterThan(value.into()))
    }

    pub fn gte(self, value: impl Into<Value>) -> Cond {
        self.op(Op::GreaterThanOrEqual(value.into()))
    }

    pub fn lt(self, value: impl Into<Value>) -> Cond {
        self.op(Op::LessThan(value.into()))
    }

    pub fn lte(self, value: impl Into<Value>) -> Cond {
        self.op(Op::LessThanOrEqual(value.into()))
    }

    pub fn between(self, lo: impl Into<Value>, hi: impl Into<Value>) -> Cond {
        self.op(Op::Between(lo.into(), hi.into()))
    }

    pub fn is_in(self, values: Vec<Value>) -> Cond {
        self.op(Op::In(values))
    }

    pub fn like(self, pattern: impl Into<String>) -> Cond {
        self.op(Op::Like(pattern.into()))
    }

    pub fn is_null(self) -> Cond {
        self.op(Op::IsNull)
    }

    pub fn is_not_null(self) -> Cond {
        self.op(Op::IsNotNull)
    }
}

/// The statement an adapter's `raw()` method executes: a from-clause table
/// plus optional projection, filter, ordering, grouping, paging and
/// aggregation. Constructed either by [`Builder`] or by
/// [`parser::parse_method_name`].
#[derive(Debug, Clone, Default)]
pub struct Stmt {
    pub from: String,
    pub select: Option<Vec<String>>,
    pub filter: Option<Cond>,
    pub order: Vec<(String, SortDirection)>,
    pub group: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub aggregate: Option<(Aggregate, String)>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("groupBy must precede orderBy in a method name or builder chain")]
    GroupByAfterOrderBy,
    #[error("unsupported method name: {0}")]
    UnsupportedMethod(String),
    #[error("unknown condition operator: {0}")]
    UnknownOperator(String),
}

/// Fluent builder producing a [`Stmt`].
#[derive(Debug, Default)]
pub struct Builder {
    stmt: Stmt,
    order_started: bool,
}

impl Builder {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            stmt: Stmt {
                from: table.into(),
                ..Default::default()
            },
            order_started: false,
        }
    }

    pub fn select(mut self, fields: Vec<String>) -> Self {
        self.stmt.select = Some(fields);
        self
    }

    pub fn filter(mut self, cond: Cond) -> Self {
        self.stmt.filter = Some(match self.stmt.filter {
            Some(existing) => existing.and(cond),
            None => cond,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, dir: SortDirection) -> Self {
        self.order_started = true;
        self.stmt.order.push((field.into(), dir));
        self
    }

    pub fn then_by(self, field: impl Into<String>, dir: SortDirection) -> Self {
        self.order_by(field, dir)
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Result<Self, QueryError> {
        if self.order_started {
            return Err(QueryError::GroupByAfterOrderBy);
        }
        self.stmt.group.push(field.into());
        Ok(self)
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.stmt.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.stmt.offset = Some(n);
        self
    }

    pub fn aggregate(mut self, agg: Aggregate, field: impl Into<String>) -> Self {
        self.stmt.aggregate = Some((agg, field.into()));
        self
    }

    pub fn build(self) -> Stmt {
        self.stmt
    }
}

/// A stable name for a statement, used to key prepared-statement caches on
/// adapters that benefit from them (the filesystem adapter does not; kept
/// here so `quarry-repo` can treat every adapter uniformly).
pub fn prepare_name(stmt: &Stmt) -> String {
    let mut parts = vec![stmt.from.clone()];
    if let Some((agg, field)) = &stmt.aggregate {
        parts.push(format!("{agg:?}:{field}"));
    }
    for group in &stmt.group {
        parts.push(format!("group:{group}"));
    }
    for (field, dir) in &stmt.order {
        parts.push(format!("order:{field}:{dir:?}"));
    }
    if let Some(limit) = stmt.limit {
        parts.push(format!("limit:{limit}"));
    }
    if let Some(offset) = stmt.offset {
        parts.push(format!("offset:{offset}"));
    }
    parts.join("|")
}
