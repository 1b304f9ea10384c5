//! The filesystem storage adapter: one JSON file per record under
//! `<root>/<alias>/<table>/<encoded-id>.json`, written atomically via a
//! temp-file-then-rename, with ids and lock keys percent-encoded so
//! arbitrary primary key strings stay safe as path segments.

pub mod encoding;
pub mod lock;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use quarry_core::adapter::{Adapter, RawResult};
use quarry_core::common::{OpContext, PkValue, Record};
use quarry_core::error::{QuarryError, Result};
use quarry_core::query::compiler::{self, Plan};
use quarry_core::sequence::SequenceOptions;

use encoding::encode_segment;

pub struct FsAdapter {
    root: PathBuf,
    alias: String,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>, alias: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            alias: alias.into(),
        }
    }

    fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(&self.alias).join(table)
    }

    fn record_path(&self, table: &str, id: &str) -> PathBuf {
        self.table_dir(table).join(format!("{}.json", encode_segment(id)))
    }

    fn sequence_path(&self) -> PathBuf {
        self.root.join(&self.alias).join("__quarry_sequences.json")
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| QuarryError::Internal(e.into()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, contents)
            .await
            .map_err(|e| QuarryError::Internal(e.into()))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| QuarryError::Internal(e.into()))?;
        Ok(())
    }

    async fn read_record(path: &Path) -> Result<Option<Record>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let record: Record =
                    serde_json::from_slice(&bytes).map_err(|e| QuarryError::Internal(e.into()))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QuarryError::Internal(e.into())),
        }
    }

    async fn scan_table(&self, table: &str) -> Result<Vec<Record>> {
        let dir = self.table_dir(table);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(QuarryError::Internal(e.into())),
        };
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| QuarryError::Internal(e.into()))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read_record(&path).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Adapter for FsAdapter {
    fn flavour(&self) -> &str {
        "fs"
    }

    async fn create(&self, table: &str, record: Record, _ctx: &OpContext) -> Result<Record> {
        let id = record
            .get("id")
            .ok_or_else(|| QuarryError::Validation(format!("record for table '{table}' is missing an id")))?;
        let pk: PkValue = serde_json::from_value(id.clone())
            .map_err(|e| QuarryError::Validation(format!("invalid id for table '{table}': {e}")))?;
        let path = self.record_path(table, &pk.to_string());
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(QuarryError::conflict(table, pk.to_string()));
        }
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| QuarryError::Internal(e.into()))?;
        Self::write_atomic(&path, &bytes).await?;
        Ok(record)
    }

    async fn read(&self, table: &str, id: &PkValue, _ctx: &OpContext) -> Result<Option<Record>> {
        let path = self.record_path(table, &id.to_string());
        Self::read_record(&path).await
    }

    async fn update(&self, table: &str, id: &PkValue, patch: Record, _ctx: &OpContext) -> Result<Record> {
        let path = self.record_path(table, &id.to_string());
        let mut existing =
            Self::read_record(&path).await?.ok_or_else(|| QuarryError::not_found(table, id.to_string()))?;
        for (key, value) in patch {
            existing.insert(key, value);
        }
        let bytes = serde_json::to_vec_pretty(&existing).map_err(|e| QuarryError::Internal(e.into()))?;
        Self::write_atomic(&path, &bytes).await?;
        Ok(existing)
    }

    async fn delete(&self, table: &str, id: &PkValue, _ctx: &OpContext) -> Result<Record> {
        let path = self.record_path(table, &id.to_string());
        let existing = Self::read_record(&path)
            .await?
            .ok_or_else(|| QuarryError::not_found(table, id.to_string()))?;
        tokio::fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                QuarryError::not_found(table, id.to_string())
            } else {
                QuarryError::Internal(e.into())
            }
        })?;
        Ok(existing)
    }

    async fn raw(&self, plan: &Plan, _ctx: &OpContext) -> Result<RawResult> {
        let mut records = self.scan_table(&plan.from).await?;
        if let Some(filter) = &plan.filter {
            records.retain(|r| compiler::matches(filter, r));
        }
        if !plan.order.is_empty() {
            compiler::sort_records(&mut records, &plan.order);
        }
        if let Some(offset) = plan.offset {
            records = records.into_iter().skip(offset).collect();
        }
        if let Some(limit) = plan.limit {
            records.truncate(limit);
        }
        Ok(RawResult::Rows(records))
    }

    async fn next_sequence_value(&self, options: &SequenceOptions) -> Result<i64> {
        let path = self.sequence_path();
        let mut values: std::collections::HashMap<String, i64> = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => std::collections::HashMap::new(),
        };
        let current = values
            .entry(options.name.clone())
            .or_insert(options.start_with - options.increment_by);
        *current += options.increment_by;
        let next = *current;
        let bytes = serde_json::to_vec_pretty(&values).map_err(|e| QuarryError::Internal(e.into()))?;
        Self::write_atomic(&path, &bytes).await?;
        Ok(next)
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
    async fn create_read_update_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path(), "default");
        adapter.create("users", record("1", 10), &ctx()).await.unwrap();

        let found = adapter
            .read("users", &PkValue::String("1".to_string()), &ctx())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.get("age"), Some(&json!(10)));

        let mut patch = Record::new();
        patch.insert("age".to_string(), json!(11));
        adapter
            .update("users", &PkValue::String("1".to_string()), patch, &ctx())
            .await
            .unwrap();
        let updated = adapter
            .read("users", &PkValue::String("1".to_string()), &ctx())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.get("age"), Some(&json!(11)));

        adapter
            .delete("users", &PkValue::String("1".to_string()), &ctx())
            .await
            .unwrap();
        assert!(adapter
            .read("users", &PkValue::String("1".to_string()), &ctx())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path(), "default");
        adapter.create("users", record("1", 10), &ctx()).await.unwrap();
        let err = adapter.create("users", record("1", 20), &ctx()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn ids_with_reserved_characters_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path(), "default");
        adapter.create("users", record("a/b:c", 5), &ctx()).await.unwrap();
        let found = adapter
            .read("users", &PkValue::String("a/b:c".to_string()), &ctx())
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn raw_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path(), "default");
        for (id, age) in [("1", 30), ("2", 20), ("3", 40)] {
            adapter.create("users", record(id, age), &ctx()).await.unwrap();
        }
        let stmt = Builder::from("users")
            .filter(Attr::new("age").gt(15))
            .order_by("age", SortDirection::Asc)
            .build();
        let plan = compiler::compile(stmt);
        let rows = adapter.raw(&plan, &ctx()).await.unwrap().into_rows().unwrap();
        let ages: Vec<i64> = rows.iter().map(|r| r["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![20, 30, 40]);
    }

    #[tokio::test]
    async fn sequence_values_persist_across_adapter_instances() {
        let dir = tempfile::tempdir().unwrap();
        let options = SequenceOptions::new("orders", quarry_core::sequence::SequenceType::Number);
        {
            let adapter = FsAdapter::new(dir.path(), "default");
            assert_eq!(adapter.next_sequence_value(&options).await.unwrap(), 1);
        }
        let adapter = FsAdapter::new(dir.path(), "default");
        assert_eq!(adapter.next_sequence_value(&options).await.unwrap(), 2);
    }
}
