//! The in-memory reference adapter: nested keyed maps (`table -> id ->
//! record`) behind a single adapter-wide write lock. Every record carries
//! its primary key under the conventional `"id"` field, the same convention
//! `quarry-fs` uses to name files on disk.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use quarry_core::adapter::{Adapter, RawResult};
use quarry_core::common::{OpContext, PkValue, Record};
use quarry_core::error::{QuarryError, Result};
use quarry_core::lock::Lock;
use quarry_core::query::compiler::{self, Plan};
use quarry_core::query::Aggregate;
use quarry_core::sequence::SequenceOptions;
use serde_json::Value;

/// `table -> id string -> record`.
type Tables = HashMap<String, HashMap<String, Record>>;

pub struct MemoryAdapter {
    tables: RwLock<Tables>,
    sequences: RwLock<HashMap<String, i64>>,
    write_lock: Lock,
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            sequences: RwLock::new(HashMap::new()),
            write_lock: Lock::new(),
        }
    }

    fn record_id(record: &Record, table: &str) -> Result<String> {
        let id = record
            .get("id")
            .ok_or_else(|| QuarryError::Validation(format!("record for table '{table}' is missing an id")))?;
        let pk: PkValue = serde_json::from_value(id.clone())
            .map_err(|e| QuarryError::Validation(format!("invalid id for table '{table}': {e}")))?;
        Ok(pk.to_string())
    }

    fn all_records(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .expect("memory adapter poisoned")
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn flavour(&self) -> &str {
        "ram"
    }

    async fn create(&self, table: &str, record: Record, _ctx: &OpContext) -> Result<Record> {
        let id = Self::record_id(&record, table)?;
        let _guard = self.write_lock.acquire().await;
        let mut tables = self.tables.write().expect("memory adapter poisoned");
        let rows = tables.entry(table.to_string()).or_default();
        if rows.contains_key(&id) {
            return Err(QuarryError::conflict(table, id));
        }
        rows.insert(id, record.clone());
        Ok(record)
    }

    async fn read(&self, table: &str, id: &PkValue, _ctx: &OpContext) -> Result<Option<Record>> {
        let tables = self.tables.read().expect("memory adapter poisoned");
        Ok(tables
            .get(table)
            .and_then(|rows| rows.get(&id.to_string()))
            .cloned())
    }

    async fn update(&self, table: &str, id: &PkValue, patch: Record, _ctx: &OpContext) -> Result<Record> {
        let _guard = self.write_lock.acquire().await;
        let mut tables = self.tables.write().expect("memory adapter poisoned");
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| QuarryError::not_found(table, id.to_string()))?;
        let existing = rows
            .get_mut(&id.to_string())
            .ok_or_else(|| QuarryError::not_found(table, id.to_string()))?;
        for (key, value) in patch {
            existing.insert(key, value);
        }
        Ok(existing.clone())
    }

    async fn delete(&self, table: &str, id: &PkValue, _ctx: &OpContext) -> Result<Record> {
        let _guard = self.write_lock.acquire().await;
        let mut tables = self.tables.write().expect("memory adapter poisoned");
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| QuarryError::not_found(table, id.to_string()))?;
        rows.remove(&id.to_string())
            .ok_or_else(|| QuarryError::not_found(table, id.to_string()))
    }

    async fn raw(&self, plan: &Plan, _ctx: &OpContext) -> Result<RawResult> {
        execute_plan(plan, self.all_records(&plan.from))
    }

    async fn next_sequence_value(&self, options: &SequenceOptions) -> Result<i64> {
        let _guard = self.write_lock.acquire().await;
        let mut sequences = self.sequences.write().expect("memory adapter poisoned");
        let current = sequences
            .entry(options.name.clone())
            .or_insert(options.start_with - options.increment_by);
        *current += options.increment_by;
        if options.cycle {
            // Cycling back to start_with is adapter-specific and only makes
            // sense once an upper bound is configured; quarry-core doesn't
            // carry one today, so cycling is a no-op here.
        }
        Ok(*current)
    }
}

/// Materialise a plan against an already-fetched record set: filter, sort,
/// page, project, then aggregate if requested.
fn execute_plan(plan: &Plan, mut records: Vec<Record>) -> Result<RawResult> {
    if let Some(filter) = &plan.filter {
        records.retain(|r| compiler::matches(filter, r));
    }

    if !plan.group.is_empty() {
        return group_and_aggregate(plan, records);
    }

    if !plan.order.is_empty() {
        compiler::sort_records(&mut records, &plan.order);
    }

    let offset = plan.offset.unwrap_or(0);
    if offset > 0 {
        records = records.into_iter().skip(offset).collect();
    }
    if let Some(limit) = plan.limit {
        records.truncate(limit);
    }

    if let Some((agg, field)) = &plan.aggregate {
        return Ok(RawResult::Aggregate(aggregate_value(*agg, field, &records)));
    }

    if let Some(select) = &plan.select {
        records = records
            .into_iter()
            .map(|r| {
                let mut projected = Record::new();
                for field in select {
                    if let Some(v) = r.get(field) {
                        projected.insert(field.clone(), v.clone());
                    }
                }
                projected
            })
            .collect();
    }

    Ok(RawResult::Rows(records))
}

fn group_and_aggregate(plan: &Plan, records: Vec<Record>) -> Result<RawResult> {
    let mut groups: HashMap<Vec<Value>, Vec<Record>> = HashMap::new();
    for record in records {
        let key: Vec<Value> = plan
            .group
            .iter()
            .map(|field| record.get(field).cloned().unwrap_or(Value::Null))
            .collect();
        groups.entry(key).or_default().push(record);
    }

    let mut rows = Vec::new();
    for (key, group_records) in groups {
        let mut row = Record::new();
        for (field, value) in plan.group.iter().zip(key) {
            row.insert(field.clone(), value);
        }
        if let Some((agg, field)) = &plan.aggregate {
            row.insert(format!("{agg:?}").to_lowercase(), aggregate_value(*agg, field, &group_records));
        } else {
            row.insert("count".to_string(), Value::from(group_records.len()));
        }
        rows.push(row);
    }

    if !plan.order.is_empty() {
        compiler::sort_records(&mut rows, &plan.order);
    }

    Ok(RawResult::Rows(rows))
}

fn aggregate_value(agg: Aggregate, field: &str, records: &[Record]) -> Value {
    let numbers: Vec<f64> = records
        .iter()
        .filter_map(|r| r.get(field).and_then(|v| v.as_f64()))
        .collect();
    match agg {
        Aggregate::Count => Value::from(records.len()),
        Aggregate::Sum => Value::from(numbers.iter().sum::<f64>()),
        Aggregate::Avg => {
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::from(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Aggregate::Min => numbers
            .into_iter()
            .fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.min(n))))
            .map(Value::from)
            .unwrap_or(Value::Null),
        Aggregate::Max => numbers
            .into_iter()
            .fold(None, |acc: Option<f64>, n| Some(acc.map_or(n, |a| a.max(n))))
            .map(Value::from)
            .unwrap_or(Value::Null),
        Aggregate::Distinct => {
            let mut seen = Vec::new();
            for record in records {
                if let Some(v) = record.get(field) {
                    if !seen.contains(v) {
                        seen.push(v.clone());
                    }
                }
            }
            Value::from(seen)
        }
        Aggregate::Group => Value::from(records.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::common::OperationKind;
    use quarry_core::query::{Attr, Builder, SortDirection};
    use serde_json::json;

    fn ctx() -> OpContext {
        OpContext::new(OperationKind::Create, None)
    }

    fn record(id: &str, age: i64) -> Record {
        let mut r = Record::new();
        r.insert("id".to_string(), json!(id));
        r.insert("age".to_string(), json!(age));
        r
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let adapter = MemoryAdapter::new();
        adapter.create("users", record("1", 10), &ctx()).await.unwrap();
        let err = adapter.create("users", record("1", 20), &ctx()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_merges_fields_and_read_reflects_them() {
        let adapter = MemoryAdapter::new();
        adapter.create("users", record("1", 10), &ctx()).await.unwrap();
        let mut patch = Record::new();
        patch.insert("age".to_string(), json!(11));
        adapter
            .update("users", &PkValue::String("1".to_string()), patch, &ctx())
            .await
            .unwrap();
        let found = adapter
            .read("users", &PkValue::String("1".to_string()), &ctx())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.get("age"), Some(&json!(11)));
    }

    #[tokio::test]
    async fn delete_missing_row_is_not_found() {
        let adapter = MemoryAdapter::new();
        let err = adapter
            .delete("users", &PkValue::String("missing".to_string()), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn raw_filters_sorts_and_pages() {
        let adapter = MemoryAdapter::new();
        for (id, age) in [("1", 30), ("2", 20), ("3", 40)] {
            adapter.create("users", record(id, age), &ctx()).await.unwrap();
        }
        let stmt = Builder::from("users")
            .filter(Attr::new("age").gt(15))
            .order_by("age", SortDirection::Asc)
            .limit(2)
            .build();
        let plan = compiler::compile(stmt);
        let rows = adapter.raw(&plan, &ctx()).await.unwrap().into_rows().unwrap();
        let ages: Vec<i64> = rows.iter().map(|r| r["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![20, 30]);
    }

    #[tokio::test]
    async fn sequence_values_increment_monotonically() {
        let adapter = MemoryAdapter::new();
        let options = SequenceOptions::new("orders", quarry_core::sequence::SequenceType::Number);
        assert_eq!(adapter.next_sequence_value(&options).await.unwrap(), 1);
        assert_eq!(adapter.next_sequence_value(&options).await.unwrap(), 2);
    }
}
