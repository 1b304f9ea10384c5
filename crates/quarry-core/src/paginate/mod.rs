//! Paging over query results.
//!
//! Two paging strategies share one type: offset paging (`page(n)`) re-issues
//! the query with a fresh `offset`/`limit`; bookmark paging (`next()`) keeps
//! advancing from the last row's sort key instead, avoiding the skipped-or-
//! duplicated rows that offset paging suffers from when rows are inserted or
//! deleted between pages.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{Adapter, RawResult};
use crate::common::OpContext;
use crate::error::{QuarryError, Result};
use crate::query::compiler::{self, Plan};
use crate::query::{Cond, Op, SortDirection};

/// An opaque, serialisable cursor into a result set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub values: Vec<(String, Value)>,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub records: Vec<serde_json::Map<String, Value>>,
    pub has_more: bool,
    pub bookmark: Option<Bookmark>,
    pub page_number: Option<usize>,
}

/// Drives paged reads against an adapter for a fixed [`Plan`] and page size.
///
/// Bookmark paging requires the plan to carry at least one `order` clause
/// (the bookmark is built from those fields); offset paging has no such
/// requirement but degrades under concurrent writes, per the module doc.
pub struct Paginator {
    adapter: Arc<dyn Adapter>,
    base_plan: Plan,
    size: usize,
    current_page: usize,
    current_bookmark: Option<Bookmark>,
}

impl Paginator {
    pub fn new(adapter: Arc<dyn Adapter>, base_plan: Plan, size: usize) -> Self {
        Self {
            adapter,
            base_plan,
            size,
            current_page: 0,
            current_bookmark: None,
        }
    }

    /// Jump to page `n` (0-indexed) using offset paging.
    pub async fn page(&mut self, n: usize, ctx: &OpContext) -> Result<Page> {
        let mut plan = self.base_plan.clone();
        plan.limit = Some(self.size + 1);
        plan.offset = Some(n * self.size);
        let mut rows = self.execute(&plan, ctx).await?;
        let has_more = rows.len() > self.size;
        rows.truncate(self.size);
        self.current_page = n;
        Ok(Page {
            records: rows,
            has_more,
            bookmark: None,
            page_number: Some(n),
        })
    }

    /// Fetch the next page after the last one returned, using whichever
    /// bookmark is currently held (or the start of the result set, for the
    /// first call).
    pub async fn next(&mut self, ctx: &OpContext) -> Result<Page> {
        if self.base_plan.order.is_empty() {
            return Err(QuarryError::Paging(
                "bookmark paging requires at least one orderBy field".to_string(),
            ));
        }
        let mut plan = self.base_plan.clone();
        plan.limit = Some(self.size + 1);
        if let Some(bookmark) = &self.current_bookmark {
            plan.filter = Some(combine_with_bookmark(plan.filter.take(), &plan.order, bookmark));
        }
        let mut rows = self.execute(&plan, ctx).await?;
        let has_more = rows.len() > self.size;
        rows.truncate(self.size);
        let bookmark = rows.last().map(|row| bookmark_from_row(row, &self.base_plan.order));
        if let Some(b) = bookmark.clone() {
            self.current_bookmark = Some(b);
        }
        Ok(Page {
            records: rows,
            has_more,
            bookmark,
            page_number: None,
        })
    }

    async fn execute(&self, plan: &Plan, ctx: &OpContext) -> Result<Vec<serde_json::Map<String, Value>>> {
        match self.adapter.raw(plan, ctx).await? {
            RawResult::Rows(rows) => Ok(rows),
            other => Err(QuarryError::Paging(format!(
                "paginator expected rows, adapter returned {other:?}"
            ))),
        }
    }

    /// Serialise a [`Bookmark`] (or page number, for offset mode) into an
    /// opaque token a client can round-trip.
    pub fn serialize(token: &Bookmark) -> Result<String> {
        serde_json::to_string(token).map_err(|e| QuarryError::Paging(e.to_string()))
    }

    pub fn deserialize(token: &str) -> Result<Bookmark> {
        serde_json::from_str(token).map_err(|e| QuarryError::Paging(e.to_string()))
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }
}

fn bookmark_from_row(row: &serde_json::Map<String, Value>, order: &[(String, SortDirection)]) -> Bookmark {
    Bookmark {
        values: order
            .iter()
            .map(|(field, _)| (field.clone(), row.get(field).cloned().unwrap_or(Value::Null)))
            .collect(),
    }
}

/// Build a strict "greater than the last row's sort key" condition, honouring
/// multi-column ordering (a lexicographic tuple comparison), and AND it onto
/// whatever filter the base plan already carries.
fn combine_with_bookmark(existing: Option<Cond>, order: &[(String, SortDirection)], bookmark: &Bookmark) -> Cond {
    let seek = seek_condition(order, &bookmark.values, 0);
    match existing {
        Some(existing) => existing.and(seek),
        None => seek,
    }
}

fn seek_condition(order: &[(String, SortDirection)], values: &[(String, Value)], idx: usize) -> Cond {
    let (field, dir) = &order[idx];
    let value = values[idx].1.clone();
    let strict_op = if *dir == SortDirection::Asc {
        Op::GreaterThan(value.clone())
    } else {
        Op::LessThan(value.clone())
    };
    let strict = Cond::Attr(field.clone(), strict_op);
    if idx + 1 == order.len() {
        return strict;
    }
    let eq = Cond::Attr(field.clone(), Op::Equals(value));
    let rest = seek_condition(order, values, idx + 1);
    strict.or(eq.and(rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compiler::matches;
    use serde_json::json;

    #[test]
    fn seek_condition_matches_rows_strictly_after_bookmark() {
        let order = vec![
            ("age".to_string(), SortDirection::Asc),
            ("name".to_string(), SortDirection::Asc),
        ];
        let bookmark = Bookmark {
            values: vec![("age".to_string(), json!(30)), ("name".to_string(), json!("mid"))],
        };
        let cond = combine_with_bookmark(None, &order, &bookmark);

        let mut after = serde_json::Map::new();
        after.insert("age".to_string(), json!(30));
        after.insert("name".to_string(), json!("zzz"));
        assert!(matches(&cond, &after));

        let mut before = serde_json::Map::new();
        before.insert("age".to_string(), json!(30));
        before.insert("name".to_string(), json!("aaa"));
        assert!(!matches(&cond, &before));

        let mut next_bucket = serde_json::Map::new();
        next_bucket.insert("age".to_string(), json!(31));
        next_bucket.insert("name".to_string(), json!("aaa"));
        assert!(matches(&cond, &next_bucket));
    }

    #[test]
    fn bookmark_round_trips_through_serialize() {
        let bookmark = Bookmark {
            values: vec![("age".to_string(), json!(30))],
        };
        let token = Paginator::serialize(&bookmark).unwrap();
        let back = Paginator::deserialize(&token).unwrap();
        assert_eq!(bookmark, back);
    }
}

// Re-export compiler::compile for callers that only have a Stmt.
pub fn plan_from_stmt(stmt: crate::query::Stmt) -> Plan {
    compiler::compile(stmt)
}
