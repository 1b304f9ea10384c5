//! Compiles a [`Stmt`] into a [`Plan`] and supplies the in-memory predicate
//! and ordering evaluation shared by `quarry-memory`'s adapter and, for
//! result post-processing, `quarry-fs`'s.

use std::cmp::Ordering;

use serde_json::Value;

use super::{Aggregate, Cond, Op, SortDirection, Stmt};
use crate::common::Record;

/// A validated, ready-to-execute statement. Distinct from [`Stmt`] mostly in
/// name: today compilation is just validation, but keeping the two types
/// separate leaves room for adapters to attach their own execution hints
/// without mutating the builder-facing AST.
#[derive(Debug, Clone)]
pub struct Plan {
    pub from: String,
    pub select: Option<Vec<String>>,
    pub filter: Option<Cond>,
    pub order: Vec<(String, SortDirection)>,
    pub group: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub aggregate: Option<(Aggregate, String)>,
}

pub fn compile(stmt: Stmt) -> Plan {
    Plan {
        from: stmt.from,
        select: stmt.select,
        filter: stmt.filter,
        order: stmt.order,
        group: stmt.group,
        limit: stmt.limit,
        offset: stmt.offset,
        aggregate: stmt.aggregate,
    }
}

/// Evaluate `cond` against `record`. A missing attribute is treated as
/// `Value::Null` for every operator except `IsNull`/`IsNotNull`, so
/// `eq(null)` and `is_null()` agree on absent fields.
pub fn matches(cond: &Cond, record: &Record) -> bool {
    match cond {
        Cond::And(conds) => conds.iter().all(|c| matches(c, record)),
        Cond::Or(conds) => conds.iter().any(|c| matches(c, record)),
        Cond::Not(inner) => !matches(inner, record),
        Cond::Attr(field, op) => {
            let value = record.get(field).cloned().unwrap_or(Value::Null);
            eval_op(op, &value)
        }
    }
}

fn eval_op(op: &Op, value: &Value) -> bool {
    match op {
        Op::IsNull => value.is_null(),
        Op::IsNotNull => !value.is_null(),
        Op::True => value.as_bool() == Some(true),
        Op::False => value.as_bool() == Some(false),
        Op::Equals(rhs) => value == rhs,
        Op::NotEquals(rhs) => value != rhs,
        Op::GreaterThan(rhs) => compare_values(value, rhs) == Some(Ordering::Greater),
        Op::GreaterThanOrEqual(rhs) => {
            matches!(compare_values(value, rhs), Some(Ordering::Greater | Ordering::Equal))
        }
        Op::LessThan(rhs) => compare_values(value, rhs) == Some(Ordering::Less),
        Op::LessThanOrEqual(rhs) => {
            matches!(compare_values(value, rhs), Some(Ordering::Less | Ordering::Equal))
        }
        Op::Between(lo, hi) => {
            matches!(compare_values(value, lo), Some(Ordering::Greater | Ordering::Equal))
                && matches!(compare_values(value, hi), Some(Ordering::Less | Ordering::Equal))
        }
        Op::In(values) => values.contains(value),
        Op::Like(pattern) => match value.as_str() {
            Some(s) => like_matches(pattern, s),
            None => false,
        },
    }
}

/// SQL-style `LIKE`: `%` matches any run of characters, `_` matches exactly
/// one. No escaping support — patterns containing literal `%`/`_` are out of
/// scope.
fn like_matches(pattern: &str, text: &str) -> bool {
    fn go(pat: &[char], text: &[char]) -> bool {
        match pat.first() {
            None => text.is_empty(),
            Some('%') => go(&pat[1..], text) || (!text.is_empty() && go(pat, &text[1..])),
            Some('_') => !text.is_empty() && go(&pat[1..], &text[1..]),
            Some(c) => text.first() == Some(c) && go(&pat[1..], &text[1..]),
        }
    }
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    go(&pat, &text)
}

/// Order two JSON values: numbers compare
/// numerically, strings lexicographically, booleans `false < true`, and
/// mismatched non-null types are considered incomparable (`None`). `Null`
/// sorts last in ascending order and first in descending order; callers
/// implement that half of the rule since it depends on sort direction.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sort `records` in place according to `order`, applying the null-last
/// (ascending) / null-first (descending) rule per key and falling back to
/// leaving mismatched-type pairs in their relative input order (a stable
/// sort treats an `Ordering::Equal` result as "don't reorder").
pub fn sort_records(records: &mut [Record], order: &[(String, SortDirection)]) {
    records.sort_by(|a, b| {
        for (field, dir) in order {
            let av = a.get(field).cloned().unwrap_or(Value::Null);
            let bv = b.get(field).cloned().unwrap_or(Value::Null);
            // Null sorts as the maximum value here; the direction-aware
            // reverse() below turns that into "last ascending, first
            // descending" uniformly with the non-null comparisons.
            let ordering = match (av.is_null(), bv.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => compare_values(&av, &bv).unwrap_or(Ordering::Equal),
            };
            let ordering = if *dir == SortDirection::Desc {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Attr;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        let mut r = Record::new();
        for (k, v) in pairs {
            r.insert(k.to_string(), v.clone());
        }
        r
    }

    #[test]
    fn matches_and_or_not() {
        let cond = Attr::new("age").gt(18).and(Attr::new("active").eq(true));
        assert!(matches(&cond, &record(&[("age", json!(20)), ("active", json!(true))])));
        assert!(!matches(&cond, &record(&[("age", json!(10)), ("active", json!(true))])));
    }

    #[test]
    fn like_supports_percent_and_underscore() {
        assert!(like_matches("a%c", "abc"));
        assert!(like_matches("a_c", "abc"));
        assert!(!like_matches("a_c", "abbc"));
    }

    #[test]
    fn nulls_sort_last_ascending_first_descending() {
        let mut records = vec![
            record(&[("n", Value::Null)]),
            record(&[("n", json!(1))]),
            record(&[("n", json!(2))]),
        ];
        sort_records(&mut records, &[("n".to_string(), SortDirection::Asc)]);
        assert_eq!(records[2].get("n"), Some(&Value::Null));

        sort_records(&mut records, &[("n".to_string(), SortDirection::Desc)]);
        assert_eq!(records[0].get("n"), Some(&Value::Null));
    }
}
